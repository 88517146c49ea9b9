use async_trait::async_trait;
use gateway_api::apis::standard::gateways::{Gateway, GatewayStatus};
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{Patch, PatchParams},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::debug;

use crate::{
    common::{GATEWAY_FINALIZER, ResourceKey},
    services::cluster::ClusterError,
};

const TARGET: &str = "services::patchers";

/// Writes back to a Gateway. Every patch carries the resource version the caller last saw,
/// so a concurrent change surfaces as [`ClusterError::Conflict`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayPatcher: Send + Sync {
    async fn add_finalizer(&self, gateway: &Gateway) -> Result<Gateway, ClusterError>;
    async fn remove_finalizer(&self, gateway: &Gateway) -> Result<Gateway, ClusterError>;
    async fn patch_status(&self, gateway: &Gateway, status: GatewayStatus) -> Result<Gateway, ClusterError>;
}

#[derive(Clone)]
pub struct KubeGatewayPatcher {
    client: Client,
}

impl KubeGatewayPatcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, gateway: &Gateway) -> Api<Gateway> {
        Api::namespaced(self.client.clone(), &ResourceKey::from(gateway).namespace)
    }

    async fn patch_finalizers(&self, gateway: &Gateway, finalizers: Vec<String>) -> Result<Gateway, ClusterError> {
        let key = ResourceKey::from(gateway);
        let patch = json!({
            "metadata": {
                "resourceVersion": gateway.resource_version(),
                "finalizers": finalizers,
            }
        });
        debug!(target: TARGET, "patching finalizers {key} {finalizers:?}");
        self.api(gateway)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube("Gateway", &key.to_string(), e))
    }
}

/// Merge-patches the status subresource, guarded by the resource version of `resource`.
pub async fn patch_status<R, S>(api: &Api<R>, resource: &R, status: &S) -> Result<R, ClusterError>
where
    R: Resource<DynamicType = ()> + ResourceExt + Clone + DeserializeOwned + std::fmt::Debug,
    S: Serialize,
{
    let kind = R::kind(&());
    let name = resource.name_any();
    let patch = json!({
        "metadata": { "resourceVersion": resource.resource_version() },
        "status": status,
    });
    debug!(target: TARGET, "patching status {kind} {name}");
    api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| ClusterError::from_kube(&kind, &name, e))
}

#[async_trait]
impl GatewayPatcher for KubeGatewayPatcher {
    async fn add_finalizer(&self, gateway: &Gateway) -> Result<Gateway, ClusterError> {
        let mut finalizers = gateway.finalizers().to_vec();
        if finalizers.iter().any(|f| f == GATEWAY_FINALIZER) {
            return Ok(gateway.clone());
        }
        finalizers.push(GATEWAY_FINALIZER.to_owned());
        self.patch_finalizers(gateway, finalizers).await
    }

    async fn remove_finalizer(&self, gateway: &Gateway) -> Result<Gateway, ClusterError> {
        if !gateway.finalizers().iter().any(|f| f == GATEWAY_FINALIZER) {
            return Ok(gateway.clone());
        }
        let finalizers = gateway.finalizers().iter().filter(|f| *f != GATEWAY_FINALIZER).cloned().collect();
        self.patch_finalizers(gateway, finalizers).await
    }

    async fn patch_status(&self, gateway: &Gateway, status: GatewayStatus) -> Result<Gateway, ClusterError> {
        patch_status(&self.api(gateway), gateway, &status).await
    }
}
