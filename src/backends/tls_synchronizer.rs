use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, info};

use super::{
    SyncError,
    certificates::{fingerprint, split_certificates, validate_certificate},
    provider::{CertificateStore, CustomCertificateCreateInput, CustomCertificateUpdateInput, SslCertificate},
};
use crate::common::{HostCertificates, SECRET_LABEL_ID, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TlsConfigInfo, TlsInfo, secret_label_selector};

const TARGET: &str = "backends::tls_synchronizer";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TlsSynchronizer: Send + Sync {
    /// Makes sure every host has a certificate at the provider and returns host -> certificate id.
    /// Certificates created for earlier hosts stay in place when a later host fails.
    async fn ensure_tls(&self, tls_info: &TlsInfo) -> Result<HostCertificates, SyncError>;
}

pub struct ProviderTlsSynchronizer {
    store: Arc<dyn CertificateStore>,
}

struct SecretMaterial {
    uid: String,
    leaf: String,
    chain: Option<String>,
    private_key: String,
    fingerprint: String,
}

impl ProviderTlsSynchronizer {
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self { store }
    }

    fn secret_material(host: &str, secret: &Secret) -> Result<SecretMaterial, SyncError> {
        let data = secret.data.as_ref();
        let certificate = data.and_then(|d| d.get(TLS_CERT_KEY)).ok_or_else(|| SyncError::MissingCertificate(host.to_owned()))?;
        let private_key = data.and_then(|d| d.get(TLS_PRIVATE_KEY_KEY)).ok_or_else(|| SyncError::MissingPrivateKey(host.to_owned()))?;
        let uid = secret.metadata.uid.clone().ok_or_else(|| SyncError::MissingSecretUid(host.to_owned()))?;

        let certificate = String::from_utf8_lossy(&certificate.0);
        validate_certificate(&certificate).map_err(|source| SyncError::InvalidCertificate { host: host.to_owned(), source })?;
        let split = split_certificates(&certificate)
            .ok_or_else(|| SyncError::InvalidCertificate { host: host.to_owned(), source: super::certificates::CertificateError::Missing })?;

        Ok(SecretMaterial {
            uid,
            fingerprint: fingerprint(&split.leaf),
            leaf: split.leaf,
            chain: split.chain,
            private_key: String::from_utf8_lossy(&private_key.0).into_owned(),
        })
    }

    /// Prefers the labeled certificate with the same fingerprint, otherwise the first labeled one.
    async fn find_certificate(&self, material: &SecretMaterial) -> Result<Option<SslCertificate>, super::provider::ProviderError> {
        let certificates = match self.store.list_custom_certificates(&secret_label_selector(&material.uid)).await {
            Ok(certificates) => certificates,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        // several certificates under one secret label are not an error, the first one gets updated
        let matching = certificates.iter().position(|c| c.sha1_fingerprint == material.fingerprint).unwrap_or(0);
        Ok(certificates.into_iter().nth(matching))
    }

    async fn ensure_secret_certificate(&self, host: &str, material: SecretMaterial) -> Result<String, SyncError> {
        let sync_error = |source| SyncError::CertificateSync { host: host.to_owned(), source };
        let found = self.find_certificate(&material).await.map_err(sync_error)?;

        match found {
            Some(certificate) if certificate.sha1_fingerprint == material.fingerprint => {
                debug!(target: TARGET, "certificate {} for host {host} is up to date", certificate.id);
                Ok(certificate.id)
            },
            Some(certificate) if !certificate.id.is_empty() => {
                info!(target: TARGET, "updating certificate {} for host {host}", certificate.id);
                let input = CustomCertificateUpdateInput { public_key: material.leaf, private_key: material.private_key, chain_key: material.chain };
                let updated = self.store.update_custom_certificate(&certificate.id, input).await.map_err(sync_error)?;
                Ok(updated.id)
            },
            _ => {
                info!(target: TARGET, "creating certificate for host {host}");
                let input = CustomCertificateCreateInput {
                    name: format!("gw-secret-{}", material.uid),
                    public_key: material.leaf,
                    private_key: material.private_key,
                    chain_key: material.chain,
                    labels: BTreeMap::from([(SECRET_LABEL_ID.to_owned(), material.uid)]),
                };
                let created = self.store.create_custom_certificate(input).await.map_err(sync_error)?;
                Ok(created.id)
            },
        }
    }
}

#[async_trait]
impl TlsSynchronizer for ProviderTlsSynchronizer {
    async fn ensure_tls(&self, tls_info: &TlsInfo) -> Result<HostCertificates, SyncError> {
        let mut host_certificates = HostCertificates::new();
        for (host, info) in tls_info {
            let certificate_id = match info {
                TlsConfigInfo::ExternalId(id) => {
                    let certificate = self.store.get_custom_certificate(id).await.map_err(|source| SyncError::ExternalCertificate {
                        host: host.clone(),
                        id: id.clone(),
                        source,
                    })?;
                    certificate.id
                },
                TlsConfigInfo::Secret(secret) => {
                    let material = Self::secret_material(host, secret)?;
                    self.ensure_secret_certificate(host, material).await?
                },
            };
            host_certificates.insert(host.clone(), certificate_id);
        }
        Ok(host_certificates)
    }
}
