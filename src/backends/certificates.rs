use rustls_pki_types::{CertificateDer, pem::PemObject};
use sha1::{Digest, Sha1};
use thiserror::Error;
use x509_parser::{extensions::GeneralName, parse_x509_certificate};

const CERTIFICATE_TAG: &str = "CERTIFICATE";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CertificateError {
    #[error("can't find certificate, please verify your tls.crt section")]
    Missing,
    #[error("can't find certificate, expected CERTIFICATE, got: {0}")]
    UnexpectedBlock(String),
    #[error("can't parse certificate: {0}")]
    Parse(String),
    #[error("can't find dns names for certificate")]
    NoDnsNames,
}

/// Leaf certificate and the rest of the bundle, both as normalized PEM text.
#[derive(Debug, PartialEq, Eq)]
pub struct SplitCertificate {
    pub leaf: String,
    pub chain: Option<String>,
}

fn strip_blank_lines(pem: &str) -> impl Iterator<Item = &str> {
    pem.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Splits a PEM bundle into the first block and everything after it.
/// Text outside of `-----BEGIN`/`-----END` markers is dropped.
pub fn split_certificates(pem: &str) -> Option<SplitCertificate> {
    let mut leaf = vec![];
    let mut chain = vec![];
    let mut in_block = false;
    let mut blocks = 0;

    for line in strip_blank_lines(pem) {
        if line.starts_with("-----BEGIN") {
            in_block = true;
        }
        if !in_block {
            continue;
        }
        if blocks == 0 {
            leaf.push(line);
        } else {
            chain.push(line);
        }
        if line.starts_with("-----END") {
            in_block = false;
            blocks += 1;
        }
    }

    if leaf.is_empty() {
        return None;
    }
    Some(SplitCertificate { leaf: leaf.join("\n"), chain: if chain.is_empty() { None } else { Some(chain.join("\n")) } })
}

fn leaf_der(pem: &str) -> Result<CertificateDer<'static>, CertificateError> {
    let split = split_certificates(pem).ok_or(CertificateError::Missing)?;
    let tag = split.leaf.lines().next().and_then(|line| line.strip_prefix("-----BEGIN ")).and_then(|line| line.strip_suffix("-----")).unwrap_or_default();
    if tag != CERTIFICATE_TAG {
        return Err(CertificateError::UnexpectedBlock(tag.to_owned()));
    }
    CertificateDer::from_pem_slice(split.leaf.as_bytes()).map_err(|_| CertificateError::Missing)
}

/// The leaf must be a PEM `CERTIFICATE` block holding an X.509 certificate with at least one DNS name.
pub fn validate_certificate(pem: &str) -> Result<(), CertificateError> {
    let der = leaf_der(pem)?;
    let (_, certificate) = parse_x509_certificate(&der).map_err(|e| CertificateError::Parse(e.to_string()))?;
    let san = certificate.subject_alternative_name().map_err(|e| CertificateError::Parse(e.to_string()))?;
    let has_dns_names = san.is_some_and(|san| san.value.general_names.iter().any(|name| matches!(name, GeneralName::DNSName(_))));
    if has_dns_names { Ok(()) } else { Err(CertificateError::NoDnsNames) }
}

/// Hex encoded sha1 of the leaf certificate DER, empty when the leaf is not a certificate.
pub fn fingerprint(pem: &str) -> String {
    leaf_der(pem).map(|der| hex::encode(Sha1::digest(&*der))).unwrap_or_default()
}
