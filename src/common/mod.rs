mod resource_key;

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use k8s_openapi::api::core::v1::Secret;
pub use resource_key::{DEFAULT_GROUP_NAME, DEFAULT_KIND_NAME, DEFAULT_NAMESPACE_NAME, ResourceKey, RouteRefKey, route_parent_keys};

pub const DEFAULT_CONTROLLER_NAME: &str = "k8s.srvrscloud.com/gateway-controller";
pub const GATEWAY_FINALIZER: &str = "k8s.srvrscloud.com/gateway-cleanup";
pub const GATEWAY_LABEL_ID: &str = "k8s.srvrscloud.com/api-gateway-id";
pub const SECRET_LABEL_ID: &str = "k8s.srvrscloud.com/api-secret-id";
pub const TLS_EXTERNAL_ID_KEY: &str = "sc-certmgr-cert-id";
pub const LB_ACTIVE_STATUS: &str = "active";
pub const DEFAULT_ROUTE_PATH: &str = "/";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

pub fn gateway_label_selector(gateway_uid: &str) -> String {
    format!("{GATEWAY_LABEL_ID}={gateway_uid}")
}

pub fn secret_label_selector(secret_uid: &str) -> String {
    format!("{SECRET_LABEL_ID}={secret_uid}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolType {
    Http,
    Https,
    Other,
}

impl From<&str> for ProtocolType {
    fn from(value: &str) -> Self {
        match value {
            "HTTP" => ProtocolType::Http,
            "HTTPS" => ProtocolType::Https,
            _ => ProtocolType::Other,
        }
    }
}

/// Which route namespaces a listener accepts routes from.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum AllowedNamespaces {
    All,
    #[default]
    Same,
    Selector(BTreeMap<String, String>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerInfo {
    pub name: String,
    pub hostname: Option<String>,
    pub protocol: ProtocolType,
    pub port: i32,
    pub allowed_namespaces: AllowedNamespaces,
}

impl ListenerInfo {
    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

impl Display for ServiceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathInfo {
    pub path: String,
    pub service: ServiceRef,
    pub node_port: i32,
    pub node_ips: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VHostInfo {
    pub host: String,
    pub ssl: bool,
    pub ports: BTreeSet<i32>,
    pub paths: Vec<PathInfo>,
}

impl VHostInfo {
    pub fn new(host: &str) -> Self {
        Self { host: host.to_owned(), ssl: false, ports: BTreeSet::new(), paths: vec![] }
    }

    /// An HTTPS claim turns the whole host into SSL and drops plain HTTP ports.
    pub fn merge_ports(&mut self, ssl: bool, ports: impl IntoIterator<Item = i32>) {
        if ssl && !self.ssl {
            self.ssl = true;
            self.ports.clear();
        }
        if ssl == self.ssl {
            self.ports.extend(ports);
        }
    }
}

/// Canonical topology of one Gateway, rebuilt from scratch on every pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayInfo {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub vhosts: BTreeMap<String, VHostInfo>,
}

#[derive(Clone, PartialEq)]
pub enum TlsConfigInfo {
    ExternalId(String),
    Secret(Box<Secret>),
}

impl std::fmt::Debug for TlsConfigInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExternalId(id) => f.debug_tuple("ExternalId").field(id).finish(),
            Self::Secret(secret) => f.debug_tuple("Secret").field(&secret.metadata.name).finish(),
        }
    }
}

pub type TlsInfo = BTreeMap<String, TlsConfigInfo>;
pub type HostCertificates = BTreeMap<String, String>;
