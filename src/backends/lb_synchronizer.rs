use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    SyncError,
    provider::{L7LoadBalancerUpdateInput, LoadBalancer, LoadBalancerStore},
    translator::translate,
};
use crate::common::{GatewayInfo, HostCertificates, LB_ACTIVE_STATUS, gateway_label_selector};

const TARGET: &str = "backends::lb_synchronizer";

/// What the controller needs to know about the load balancer after a sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadBalancerState {
    pub id: Option<String>,
    pub status: String,
    pub external_addresses: Vec<String>,
}

impl LoadBalancerState {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case(LB_ACTIVE_STATUS)
    }

    fn pending(status: &str) -> Self {
        Self { id: None, status: status.to_owned(), external_addresses: vec![] }
    }
}

impl From<LoadBalancer> for LoadBalancerState {
    fn from(lb: LoadBalancer) -> Self {
        Self { id: Some(lb.id), status: lb.status, external_addresses: lb.external_addresses }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LbSynchronizer: Send + Sync {
    async fn ensure_lb(&self, gateway_info: &GatewayInfo, host_certificates: &HostCertificates) -> Result<LoadBalancerState, SyncError>;
    async fn delete_lb(&self, gateway_uid: &str) -> Result<(), SyncError>;
}

/// An empty uid would select every unlabeled load balancer.
fn label_selector(gateway_uid: &str) -> Result<String, SyncError> {
    if gateway_uid.trim().is_empty() { Err(SyncError::MissingGatewayUid) } else { Ok(gateway_label_selector(gateway_uid)) }
}

pub struct ProviderLbSynchronizer {
    store: Arc<dyn LoadBalancerStore>,
    location_id: i64,
}

impl ProviderLbSynchronizer {
    pub fn new(store: Arc<dyn LoadBalancerStore>, location_id: i64) -> Self {
        Self { store, location_id }
    }
}

#[async_trait]
impl LbSynchronizer for ProviderLbSynchronizer {
    async fn ensure_lb(&self, gateway_info: &GatewayInfo, host_certificates: &HostCertificates) -> Result<LoadBalancerState, SyncError> {
        let selector = label_selector(&gateway_info.uid)?;
        let mut existing = self.store.list_l7_load_balancers(&selector).await?;

        match existing.len() {
            0 => {
                let input = translate(gateway_info, host_certificates, self.location_id)?;
                info!(target: TARGET, "creating load balancer {} for gateway {}/{}", input.name, gateway_info.namespace, gateway_info.name);
                let created = self.store.create_l7_load_balancer(input).await?;
                Ok(created.into())
            },
            1 => {
                let lb = existing.remove(0);
                if !lb.status.eq_ignore_ascii_case(LB_ACTIVE_STATUS) {
                    debug!(target: TARGET, "load balancer {} is {}, skipping update", lb.id, lb.status);
                    return Ok(LoadBalancerState::pending(&lb.status));
                }
                let input = L7LoadBalancerUpdateInput::from(translate(gateway_info, host_certificates, self.location_id)?);
                debug!(target: TARGET, "updating load balancer {}", lb.id);
                let updated = self.store.update_l7_load_balancer(&lb.id, input).await?;
                Ok(updated.into())
            },
            _ => Err(SyncError::MultipleLoadBalancers(selector)),
        }
    }

    async fn delete_lb(&self, gateway_uid: &str) -> Result<(), SyncError> {
        let selector = label_selector(gateway_uid)?;
        let mut existing = match self.store.list_l7_load_balancers(&selector).await {
            Ok(existing) => existing,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        match existing.len() {
            0 => Ok(()),
            1 => {
                let lb = existing.remove(0);
                info!(target: TARGET, "deleting load balancer {} {}", lb.id, lb.name);
                match self.store.delete_l7_load_balancer(&lb.id).await {
                    Err(e) if e.is_not_found() => {
                        warn!(target: TARGET, "load balancer {} already gone", lb.id);
                        Ok(())
                    },
                    other => Ok(other?),
                }
            },
            _ => Err(SyncError::MultipleLoadBalancers(selector)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use mockall::predicate::eq;

    use super::*;
    use crate::{
        backends::provider::{MockLoadBalancerStore, ProviderError},
        common::{GATEWAY_LABEL_ID, PathInfo, ServiceRef, VHostInfo},
    };

    const UID: &str = "0b1c2d3e-aaaa-bbbb-cccc-1234567890ab";
    const SELECTOR: &str = "k8s.srvrscloud.com/api-gateway-id=0b1c2d3e-aaaa-bbbb-cccc-1234567890ab";

    fn gateway_info() -> GatewayInfo {
        let vhost = VHostInfo {
            host: "a.example.com".to_owned(),
            ssl: false,
            ports: BTreeSet::from([80]),
            paths: vec![PathInfo {
                path: "/".to_owned(),
                service: ServiceRef { namespace: "default".to_owned(), name: "web".to_owned() },
                node_port: 30080,
                node_ips: vec!["10.0.0.1".to_owned()],
            }],
        };
        GatewayInfo {
            uid: UID.to_owned(),
            name: "gw".to_owned(),
            namespace: "default".to_owned(),
            vhosts: BTreeMap::from([(vhost.host.clone(), vhost)]),
        }
    }

    fn lb(id: &str, status: &str) -> LoadBalancer {
        LoadBalancer { id: id.to_owned(), status: status.to_owned(), external_addresses: vec!["192.0.2.10".to_owned()], ..Default::default() }
    }

    #[tokio::test]
    async fn creates_missing_load_balancer() {
        let mut store = MockLoadBalancerStore::new();
        store.expect_list_l7_load_balancers().with(eq(SELECTOR)).returning(|_| Ok(vec![]));
        store
            .expect_create_l7_load_balancer()
            .withf(|input| input.location_id == 3 && input.labels.get(GATEWAY_LABEL_ID).is_some_and(|v| v == UID))
            .times(1)
            .returning(|_| Ok(lb("lb-1", "pending")));
        let synchronizer = ProviderLbSynchronizer::new(Arc::new(store), 3);

        let state = synchronizer.ensure_lb(&gateway_info(), &HostCertificates::new()).await.unwrap();
        assert_eq!(state.id.as_deref(), Some("lb-1"));
        assert!(!state.is_active());
    }

    #[tokio::test]
    async fn updates_active_load_balancer_as_shared_cluster() {
        let mut store = MockLoadBalancerStore::new();
        store.expect_list_l7_load_balancers().returning(|_| Ok(vec![lb("lb-1", "Active")]));
        store
            .expect_update_l7_load_balancer()
            .withf(|id, input| id == "lb-1" && input.shared_cluster == Some(true) && input.vhost_zones.as_ref().is_some_and(|v| v.len() == 1))
            .times(1)
            .returning(|id, _| Ok(lb(id, "active")));
        store.expect_create_l7_load_balancer().never();
        let synchronizer = ProviderLbSynchronizer::new(Arc::new(store), 1);

        let state = synchronizer.ensure_lb(&gateway_info(), &HostCertificates::new()).await.unwrap();
        assert!(state.is_active());
        assert_eq!(state.external_addresses, vec!["192.0.2.10".to_owned()]);
    }

    #[tokio::test]
    async fn pending_load_balancer_is_left_alone() {
        let mut store = MockLoadBalancerStore::new();
        store.expect_list_l7_load_balancers().returning(|_| Ok(vec![lb("lb-1", "in_process")]));
        store.expect_update_l7_load_balancer().never();
        let synchronizer = ProviderLbSynchronizer::new(Arc::new(store), 1);

        let state = synchronizer.ensure_lb(&gateway_info(), &HostCertificates::new()).await.unwrap();
        assert_eq!(state, LoadBalancerState { id: None, status: "in_process".to_owned(), external_addresses: vec![] });
    }

    #[tokio::test]
    async fn several_labeled_load_balancers_are_an_error() {
        let mut store = MockLoadBalancerStore::new();
        store.expect_list_l7_load_balancers().returning(|_| Ok(vec![lb("lb-1", "active"), lb("lb-2", "active")]));
        store.expect_delete_l7_load_balancer().never();
        let synchronizer = ProviderLbSynchronizer::new(Arc::new(store), 1);

        let err = synchronizer.ensure_lb(&gateway_info(), &HostCertificates::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::MultipleLoadBalancers(_)));
        let err = synchronizer.delete_lb(UID).await.unwrap_err();
        assert!(matches!(err, SyncError::MultipleLoadBalancers(_)));
    }

    #[tokio::test]
    async fn empty_uid_never_reaches_provider() {
        let mut store = MockLoadBalancerStore::new();
        store.expect_list_l7_load_balancers().never();
        store.expect_delete_l7_load_balancer().never();
        store.expect_create_l7_load_balancer().never();
        let synchronizer = ProviderLbSynchronizer::new(Arc::new(store), 1);

        assert!(matches!(synchronizer.delete_lb("").await, Err(SyncError::MissingGatewayUid)));
        let mut info = gateway_info();
        info.uid = String::new();
        assert!(matches!(synchronizer.ensure_lb(&info, &HostCertificates::new()).await, Err(SyncError::MissingGatewayUid)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let mut store = MockLoadBalancerStore::new();
        let mut calls = 0;
        store.expect_list_l7_load_balancers().returning(move |_| {
            calls += 1;
            match calls {
                1 => Err(ProviderError::NotFound("load_balancers".to_owned())),
                2 => Ok(vec![]),
                _ => Ok(vec![lb("lb-1", "active")]),
            }
        });
        store.expect_delete_l7_load_balancer().with(eq("lb-1")).times(1).returning(|id| Err(ProviderError::NotFound(id.to_owned())));
        let synchronizer = ProviderLbSynchronizer::new(Arc::new(store), 1);

        assert!(synchronizer.delete_lb(UID).await.is_ok());
        assert!(synchronizer.delete_lb(UID).await.is_ok());
        assert!(synchronizer.delete_lb(UID).await.is_ok());
    }

    #[tokio::test]
    async fn delete_propagates_provider_failures() {
        let mut store = MockLoadBalancerStore::new();
        store.expect_list_l7_load_balancers().returning(|_| Ok(vec![lb("lb-1", "active")]));
        store.expect_delete_l7_load_balancer().returning(|_| Err(ProviderError::Api { status: 500, message: "boom".to_owned() }));
        let synchronizer = ProviderLbSynchronizer::new(Arc::new(store), 1);

        assert!(matches!(synchronizer.delete_lb(UID).await, Err(SyncError::Provider(_))));
    }
}
