mod servers_com;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
pub use servers_com::ServersComClient;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("provider api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid provider url: {0}")]
    InvalidUrl(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Custom SSL certificate as returned by the provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SslCertificate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sha1_fingerprint: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CustomCertificateCreateInput {
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_key: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CustomCertificateUpdateInput {
    pub public_key: String,
    pub private_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_key: Option<String>,
}

impl std::fmt::Debug for CustomCertificateCreateInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCertificateCreateInput").field("name", &self.name).field("labels", &self.labels).finish_non_exhaustive()
    }
}

impl std::fmt::Debug for CustomCertificateUpdateInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomCertificateUpdateInput").field("has_chain", &self.chain_key.is_some()).finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub external_addresses: Vec<String>,
    #[serde(default)]
    pub location_id: Option<i64>,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L7LocationZoneInput {
    pub location: String,
    pub upstream_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L7VHostZoneInput {
    pub id: String,
    pub ports: Vec<i32>,
    pub domains: Vec<String>,
    pub ssl: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_cert_id: String,
    pub location_zones: Vec<L7LocationZoneInput>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L7UpstreamInput {
    pub ip: String,
    pub port: i32,
    pub weight: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L7UpstreamZoneInput {
    pub id: String,
    pub upstreams: Vec<L7UpstreamInput>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct L7LoadBalancerCreateInput {
    pub name: String,
    pub location_id: i64,
    pub vhost_zones: Vec<L7VHostZoneInput>,
    pub upstream_zones: Vec<L7UpstreamZoneInput>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct L7LoadBalancerUpdateInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vhost_zones: Option<Vec<L7VHostZoneInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_zones: Option<Vec<L7UpstreamZoneInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_cluster: Option<bool>,
}

impl From<L7LoadBalancerCreateInput> for L7LoadBalancerUpdateInput {
    fn from(input: L7LoadBalancerCreateInput) -> Self {
        Self {
            name: Some(input.name),
            vhost_zones: Some(input.vhost_zones),
            upstream_zones: Some(input.upstream_zones),
            cluster_id: None,
            shared_cluster: Some(true),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn get_custom_certificate(&self, id: &str) -> Result<SslCertificate, ProviderError>;
    async fn create_custom_certificate(&self, input: CustomCertificateCreateInput) -> Result<SslCertificate, ProviderError>;
    async fn update_custom_certificate(&self, id: &str, input: CustomCertificateUpdateInput) -> Result<SslCertificate, ProviderError>;
    async fn list_custom_certificates(&self, label_selector: &str) -> Result<Vec<SslCertificate>, ProviderError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoadBalancerStore: Send + Sync {
    async fn list_l7_load_balancers(&self, label_selector: &str) -> Result<Vec<LoadBalancer>, ProviderError>;
    async fn create_l7_load_balancer(&self, input: L7LoadBalancerCreateInput) -> Result<LoadBalancer, ProviderError>;
    async fn update_l7_load_balancer(&self, id: &str, input: L7LoadBalancerUpdateInput) -> Result<LoadBalancer, ProviderError>;
    async fn delete_l7_load_balancer(&self, id: &str) -> Result<(), ProviderError>;
}
