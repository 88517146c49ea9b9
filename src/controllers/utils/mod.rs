mod conditions;
mod hostname_match_filter;
mod route_listener_matcher;
mod tls_config_validator;
mod topology_builder;

pub use conditions::*;
pub use hostname_match_filter::{HostnameMatchFilter, host_matches};
pub use route_listener_matcher::{RouteListenerMatcher, is_route_attached_to_gateway, is_route_namespace_allowed, listener_infos};
use thiserror::Error;
pub use tls_config_validator::{ListenerTlsConfigValidator, ListenerValidationError, validate_https_listener};
pub use topology_builder::GatewayTopologyBuilder;

use crate::{
    common::{ResourceKey, ServiceRef},
    services::ClusterError,
};

/// Reasons a Gateway or one of its routes can't be turned into a topology.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("duplicate listener name: \"{0}\"")]
    DuplicateListenerName(String),
    #[error("HTTPRoute {0}: Hostname must be specified (no wildcards, no empty values supported)")]
    MissingRouteHostnames(ResourceKey),
    #[error("HTTPRoute {route}: Invalid hostname \"{host}\" (must be concrete, no wildcards, no empty)")]
    InvalidHostname { route: ResourceKey, host: String },
    #[error("domain \"{host}\" used in several HTTPRoute: \"{first}\" and \"{second}\"")]
    DuplicateHostname { host: String, first: ResourceKey, second: ResourceKey },
    #[error("non-core backend groups not supported: {0}")]
    UnsupportedBackendGroup(String),
    #[error("backend kind not supported: {0}")]
    UnsupportedBackendKind(String),
    #[error("service {0} has no NodePort (only NodePort/LoadBalancer supported)")]
    MissingNodePort(ServiceRef),
    #[error("service {service}: port {port} not found")]
    ServicePortNotFound { service: ServiceRef, port: i32 },
    #[error("failed to get service {service}: {source}")]
    Service { service: ServiceRef, source: ClusterError },
    #[error("can't get secret {secret}: {source}")]
    Secret { secret: String, source: ClusterError },
    #[error("cannot get labels for namespace \"{namespace}\": {source}")]
    NamespaceLabels { namespace: String, source: ClusterError },
    #[error("validation errors:\n{}", join_errors(.0))]
    InvalidListeners(Vec<ListenerValidationError>),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

fn join_errors(errors: &[ListenerValidationError]) -> String {
    errors.iter().map(|e| format!("- {e}\n")).collect()
}

impl BuildError {
    /// Cluster access failures other than a missing object clear up without a spec change.
    pub fn is_transient(&self) -> bool {
        let source = match self {
            Self::Service { source, .. } | Self::Secret { source, .. } | Self::NamespaceLabels { source, .. } | Self::Cluster(source) => source,
            _ => return false,
        };
        !source.is_not_found()
    }
}
