mod certificates;
mod lb_synchronizer;
pub mod provider;
mod tls_synchronizer;
mod translator;

pub use lb_synchronizer::{LbSynchronizer, LoadBalancerState, ProviderLbSynchronizer};
#[cfg(test)]
pub use lb_synchronizer::MockLbSynchronizer;
use thiserror::Error;
pub use tls_synchronizer::{ProviderTlsSynchronizer, TlsSynchronizer};
#[cfg(test)]
pub use tls_synchronizer::MockTlsSynchronizer;
pub use translator::{TranslationError, load_balancer_name};

use self::{certificates::CertificateError, provider::ProviderError};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("provider certificate id \"{id}\" for host \"{host}\" not found: {source}")]
    ExternalCertificate { host: String, id: String, source: ProviderError },
    #[error("secret for host \"{0}\" has no tls.crt")]
    MissingCertificate(String),
    #[error("secret for host \"{0}\" has no tls.key")]
    MissingPrivateKey(String),
    #[error("secret for host \"{0}\" has no uid")]
    MissingSecretUid(String),
    #[error("invalid certificate for host \"{host}\": {source}")]
    InvalidCertificate { host: String, source: CertificateError },
    #[error("certificate sync for host \"{host}\" failed: {source}")]
    CertificateSync { host: String, source: ProviderError },
    #[error("gateway has no uid, its load balancer can't be labeled")]
    MissingGatewayUid,
    #[error("found more than one lb with label {0}")]
    MultipleLoadBalancers(String),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error("load balancer sync failed: {0}")]
    Provider(#[from] ProviderError),
}
