use gateway_api::apis::standard::gateways::{Gateway, GatewayListeners, GatewayListenersTlsMode};
use thiserror::Error;
use tracing::debug;

use super::BuildError;
use crate::{
    common::{ProtocolType, ResourceKey, TLS_EXTERNAL_ID_KEY, TlsConfigInfo, TlsInfo},
    services::ClusterReader,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ListenerValidationError {
    #[error("hostname must be specified for HTTPS protocol")]
    MissingHostname,
    #[error("hostname=\"{0}\": missing TLS config")]
    MissingTls(String),
    #[error("hostname=\"{0}\": TLS mode must be 'Terminate'")]
    UnsupportedTlsMode(String),
    #[error("listener[{index}]: {source}")]
    Listener { index: usize, source: Box<ListenerValidationError> },
    #[error("listener[{0}]: no valid refs found")]
    NoValidRefs(usize),
}

/// Only HTTPS listeners are checked, anything else passes.
pub fn validate_https_listener(listener: &GatewayListeners) -> Result<(), ListenerValidationError> {
    if ProtocolType::from(listener.protocol.as_str()) != ProtocolType::Https {
        return Ok(());
    }
    let hostname = match listener.hostname.as_deref() {
        Some(hostname) if !hostname.is_empty() => hostname,
        _ => return Err(ListenerValidationError::MissingHostname),
    };
    let Some(tls) = &listener.tls else {
        return Err(ListenerValidationError::MissingTls(hostname.to_owned()));
    };
    match tls.mode {
        Some(GatewayListenersTlsMode::Terminate) => Ok(()),
        _ => Err(ListenerValidationError::UnsupportedTlsMode(hostname.to_owned())),
    }
}

/// Resolves the certificate source of every HTTPS listener.
/// Spec problems are collected across listeners, a failed secret read stops right away.
pub struct ListenerTlsConfigValidator<'a> {
    gateway: &'a Gateway,
    cluster: &'a dyn ClusterReader,
}

impl<'a> ListenerTlsConfigValidator<'a> {
    pub fn new(gateway: &'a Gateway, cluster: &'a dyn ClusterReader) -> Self {
        Self { gateway, cluster }
    }

    pub async fn resolve(self) -> Result<TlsInfo, BuildError> {
        let gateway_namespace = ResourceKey::from(self.gateway).namespace;
        let mut tls_info = TlsInfo::new();
        let mut errors = vec![];

        let https_listeners =
            self.gateway.spec.listeners.iter().enumerate().filter(|(_, l)| ProtocolType::from(l.protocol.as_str()) == ProtocolType::Https);

        for (index, listener) in https_listeners {
            if let Err(e) = validate_https_listener(listener) {
                errors.push(ListenerValidationError::Listener { index, source: Box::new(e) });
                continue;
            }
            let (Some(hostname), Some(tls)) = (listener.hostname.clone(), listener.tls.as_ref()) else {
                continue;
            };

            let external_id = tls.options.as_ref().and_then(|options| options.get(TLS_EXTERNAL_ID_KEY)).filter(|id| !id.is_empty());
            if let Some(external_id) = external_id {
                debug!("listener {} uses provider certificate {external_id}", listener.name);
                tls_info.insert(hostname, TlsConfigInfo::ExternalId(external_id.clone()));
                continue;
            }

            let secret_ref = tls.certificate_refs.iter().flatten().find(|r| {
                r.kind.as_deref().is_none_or(|kind| kind == "Secret") && r.group.as_deref().is_none_or(str::is_empty)
            });
            let Some(secret_ref) = secret_ref else {
                errors.push(ListenerValidationError::NoValidRefs(index));
                continue;
            };

            let namespace = secret_ref.namespace.clone().unwrap_or_else(|| gateway_namespace.clone());
            let secret = self
                .cluster
                .get_secret(&namespace, &secret_ref.name)
                .await
                .map_err(|source| BuildError::Secret { secret: format!("{namespace}/{}", secret_ref.name), source })?;
            tls_info.insert(hostname, TlsConfigInfo::Secret(Box::new(secret)));
        }

        if errors.is_empty() { Ok(tls_info) } else { Err(BuildError::InvalidListeners(errors)) }
    }
}
