use std::collections::BTreeMap;

use async_trait::async_trait;
use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute};
use k8s_openapi::api::core::v1::{Namespace, Node, Secret, Service};
use kube::{Api, Client, api::ListParams};
use thiserror::Error;

use crate::common::ResourceKey;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("conflict while updating {0}")]
    Conflict(String),
    #[error(transparent)]
    Kube(kube::Error),
}

impl ClusterError {
    pub fn from_kube(kind: &str, key: &str, error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound { kind: kind.to_owned(), key: key.to_owned() },
            kube::Error::Api(response) if response.code == 409 => Self::Conflict(format!("{kind} {key}")),
            _ => Self::Kube(error),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Read access to the cluster objects a reconcile pass consults.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn get_gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, ClusterError>;
    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, ClusterError>;
    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>, ClusterError>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError>;
    async fn get_namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, ClusterError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;
}

#[derive(Clone)]
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn get_gateway(&self, key: &ResourceKey) -> Result<Option<Gateway>, ClusterError> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name).await.map_err(|e| ClusterError::from_kube("Gateway", &key.to_string(), e))
    }

    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, ClusterError> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        api.get_opt(name).await.map_err(|e| ClusterError::from_kube("GatewayClass", name, e))
    }

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>, ClusterError> {
        let api: Api<HTTPRoute> = Api::all(self.client.clone());
        let routes = api.list(&ListParams::default()).await.map_err(|e| ClusterError::from_kube("HTTPRoute", "*", e))?;
        Ok(routes.items)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| ClusterError::from_kube("Service", &format!("{namespace}/{name}"), e))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| ClusterError::from_kube("Secret", &format!("{namespace}/{name}"), e))
    }

    async fn get_namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = api.get(namespace).await.map_err(|e| ClusterError::from_kube("Namespace", namespace, e))?;
        Ok(namespace.metadata.labels.unwrap_or_default())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await.map_err(|e| ClusterError::from_kube("Node", "*", e))?;
        Ok(nodes.items)
    }
}
