use std::{fmt::Display, sync::Arc};

use gateway_api::apis::standard::gateways::{Gateway, GatewayStatus, GatewayStatusAddresses};
use kube::{Resource, runtime::controller::Action, runtime::events::EventType};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use super::{
    ControllerError, RECONCILE_ERROR_WAIT,
    ownership::{OwnershipFilter, has_finalizer},
    utils::{
        CONDITION_ACCEPTED, CONDITION_PROGRAMMED, GatewayTopologyBuilder, ListenerTlsConfigValidator, REASON_ACCEPTED, REASON_CREATED,
        REASON_INVALID_GATEWAY, REASON_INVALID_TLS, REASON_NO_LONGER_MANAGED, REASON_PROGRAMMED, REASON_SYNC_FAILED, REASON_SYNC_TLS_FAILED,
        new_condition, set_condition,
    },
};
use crate::{
    backends::{LbSynchronizer, TlsSynchronizer},
    common::{GatewayInfo, ResourceKey, TlsInfo},
    services::{ClusterReader, EventPublisher, GatewayPatcher, events::reasons},
};

const ADDRESS_TYPE_IP: &str = "IPAddress";
const PENDING_MESSAGE: &str = "Load balancer created, waiting for status=Active";

/// Where a Gateway stands within one reconcile pass.
#[derive(Debug)]
pub enum GatewayState {
    Deleting,
    Unmanaged,
    MissingFinalizer,
    Invalid { reason: &'static str, message: String },
    Accepted { topology: GatewayInfo, tls_info: TlsInfo },
    SyncFailed { reason: &'static str, message: String },
    Pending { status: String },
    Active { addresses: Vec<String> },
}

impl Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Deleting => "Deleting",
            Self::Unmanaged => "Unmanaged",
            Self::MissingFinalizer => "MissingFinalizer",
            Self::Invalid { .. } => "Invalid",
            Self::Accepted { .. } => "Accepted",
            Self::SyncFailed { .. } => "SyncFailed",
            Self::Pending { .. } => "Pending",
            Self::Active { .. } => "Active",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug)]
enum Transition {
    Next(GatewayState),
    Done(Action),
}

/// Drives one Gateway through [`GatewayState`] until a terminal state is reached.
/// Each non-terminal state can only be left towards a later one: finalizer before validation,
/// validation before any provider call, TLS before the load balancer.
#[derive(TypedBuilder)]
pub struct GatewayReconciler {
    ownership: OwnershipFilter,
    cluster: Arc<dyn ClusterReader>,
    patcher: Arc<dyn GatewayPatcher>,
    events: Arc<dyn EventPublisher>,
    tls_synchronizer: Arc<dyn TlsSynchronizer>,
    lb_synchronizer: Arc<dyn LbSynchronizer>,
}

impl GatewayReconciler {
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<Action, ControllerError> {
        let Some(mut gateway) = self.cluster.get_gateway(key).await.map_err(ControllerError::ClusterRead)? else {
            debug!("reconcile_gateway: {key} is gone");
            return Ok(Action::await_change());
        };

        let mut state = match self.initial_state(&gateway).await? {
            Transition::Next(state) => state,
            Transition::Done(action) => return Ok(action),
        };

        let mut status = gateway.status.clone().unwrap_or_default();
        let action = loop {
            debug!("reconcile_gateway: {key} state {state}");
            match self.step(&mut gateway, &mut status, state).await? {
                Transition::Next(next) => state = next,
                Transition::Done(action) => break action,
            }
        };

        if gateway.metadata.deletion_timestamp.is_none() && gateway.status.as_ref() != Some(&status) {
            self.patcher.patch_status(&gateway, status).await.map_err(ControllerError::PatchFailed)?;
            debug!("reconcile_gateway: {key} status patched");
        }
        Ok(action)
    }

    async fn initial_state(&self, gateway: &Gateway) -> Result<Transition, ControllerError> {
        let deleting = gateway.metadata.deletion_timestamp.is_some();
        let finalized = has_finalizer(gateway);
        if deleting {
            return Ok(if finalized { Transition::Next(GatewayState::Deleting) } else { Transition::Done(Action::await_change()) });
        }

        let gateway_class = self.cluster.get_gateway_class(&gateway.spec.gateway_class_name).await.map_err(ControllerError::ClusterRead)?;
        if !self.ownership.should_reconcile(gateway, gateway_class.as_ref()) {
            return Ok(Transition::Done(Action::await_change()));
        }
        if !self.ownership.owns_class(gateway_class.as_ref()) {
            return Ok(Transition::Next(GatewayState::Unmanaged));
        }
        if !finalized {
            return Ok(Transition::Next(GatewayState::MissingFinalizer));
        }
        self.validate(gateway).await.map(Transition::Next)
    }

    async fn step(&self, gateway: &mut Gateway, status: &mut GatewayStatus, state: GatewayState) -> Result<Transition, ControllerError> {
        let generation = gateway.metadata.generation;
        let conditions = status.conditions.get_or_insert_with(Vec::new);

        match state {
            GatewayState::Deleting => {
                self.cleanup(gateway).await?;
                Ok(Transition::Done(Action::await_change()))
            },
            GatewayState::Unmanaged => {
                self.cleanup(gateway).await?;
                let message = format!("Gateway is no longer managed by {}", self.ownership.controller_name());
                set_condition(conditions, new_condition(CONDITION_PROGRAMMED, false, REASON_NO_LONGER_MANAGED, &message, generation));
                Ok(Transition::Done(Action::await_change()))
            },
            GatewayState::MissingFinalizer => {
                *gateway = self.patcher.add_finalizer(gateway).await.map_err(ControllerError::FinalizerPatchFailed)?;
                self.validate(gateway).await.map(Transition::Next)
            },
            GatewayState::Invalid { reason, message } => {
                set_condition(conditions, new_condition(CONDITION_ACCEPTED, false, reason, &message, generation));
                self.publish(gateway, EventType::Warning, reason, message).await;
                Ok(Transition::Done(Action::await_change()))
            },
            GatewayState::Accepted { topology, tls_info } => {
                set_condition(conditions, new_condition(CONDITION_ACCEPTED, true, REASON_ACCEPTED, "Gateway is valid and accepted", generation));

                // Certificates created here stay at the provider if the load balancer sync below fails.
                let host_certificates = match self.tls_synchronizer.ensure_tls(&tls_info).await {
                    Ok(host_certificates) => host_certificates,
                    Err(e) => return Ok(Transition::Next(GatewayState::SyncFailed { reason: REASON_SYNC_TLS_FAILED, message: e.to_string() })),
                };
                match self.lb_synchronizer.ensure_lb(&topology, &host_certificates).await {
                    Ok(lb) if lb.is_active() => Ok(Transition::Next(GatewayState::Active { addresses: lb.external_addresses })),
                    Ok(lb) => Ok(Transition::Next(GatewayState::Pending { status: lb.status })),
                    Err(e) => Ok(Transition::Next(GatewayState::SyncFailed { reason: REASON_SYNC_FAILED, message: e.to_string() })),
                }
            },
            GatewayState::SyncFailed { reason, message } => {
                warn!("reconcile_gateway: {} sync failed {message}", ResourceKey::from(&*gateway));
                set_condition(conditions, new_condition(CONDITION_PROGRAMMED, false, reason, &message, generation));
                self.publish(gateway, EventType::Warning, reason, message).await;
                Ok(Transition::Done(Action::requeue(RECONCILE_ERROR_WAIT)))
            },
            GatewayState::Pending { status: lb_status } => {
                debug!("reconcile_gateway: {} load balancer is {lb_status}", ResourceKey::from(&*gateway));
                set_condition(conditions, new_condition(CONDITION_PROGRAMMED, false, REASON_CREATED, PENDING_MESSAGE, generation));
                self.publish(gateway, EventType::Warning, reasons::CREATED, PENDING_MESSAGE.to_owned()).await;
                Ok(Transition::Done(Action::requeue(RECONCILE_ERROR_WAIT)))
            },
            GatewayState::Active { addresses } => {
                set_condition(conditions, new_condition(CONDITION_PROGRAMMED, true, REASON_PROGRAMMED, "Successfully programmed", generation));
                status.addresses = Some(
                    addresses.into_iter().map(|value| GatewayStatusAddresses { r#type: Some(ADDRESS_TYPE_IP.to_owned()), value }).collect(),
                );
                info!("reconcile_gateway: {} programmed", ResourceKey::from(&*gateway));
                self.publish(gateway, EventType::Normal, reasons::SYNCED, "Successfully synced".to_owned()).await;
                Ok(Transition::Done(Action::await_change()))
            },
        }
    }

    /// Spec problems become [`GatewayState::Invalid`], cluster access problems are returned for a retry.
    async fn validate(&self, gateway: &Gateway) -> Result<GatewayState, ControllerError> {
        let tls_info = match ListenerTlsConfigValidator::new(gateway, self.cluster.as_ref()).resolve().await {
            Ok(tls_info) => tls_info,
            Err(e) if e.is_transient() => return Err(ControllerError::Topology(e)),
            Err(e) => return Ok(GatewayState::Invalid { reason: REASON_INVALID_TLS, message: e.to_string() }),
        };
        let topology = match GatewayTopologyBuilder::new(gateway, self.cluster.as_ref()).build().await {
            Ok(topology) => topology,
            Err(e) if e.is_transient() => return Err(ControllerError::Topology(e)),
            Err(e) => return Ok(GatewayState::Invalid { reason: REASON_INVALID_GATEWAY, message: e.to_string() }),
        };
        Ok(GatewayState::Accepted { topology, tls_info })
    }

    async fn cleanup(&self, gateway: &mut Gateway) -> Result<(), ControllerError> {
        match gateway.metadata.uid.as_deref().filter(|uid| !uid.is_empty()) {
            Some(uid) => self.lb_synchronizer.delete_lb(uid).await.map_err(ControllerError::CleanupFailed)?,
            None => warn!("reconcile_gateway: {} has no uid, no load balancer to delete", ResourceKey::from(&*gateway)),
        }
        *gateway = self.patcher.remove_finalizer(gateway).await.map_err(ControllerError::FinalizerPatchFailed)?;
        info!("reconcile_gateway: {} cleaned up", ResourceKey::from(&*gateway));
        Ok(())
    }

    async fn publish(&self, gateway: &Gateway, type_: EventType, reason: &str, note: String) {
        self.events.publish(&gateway.object_ref(&()), type_, reason, note).await;
    }
}
