use std::sync::Arc;

use futures::{FutureExt, StreamExt, future::BoxFuture};
use gateway_api::apis::standard::gatewayclasses::{GatewayClass, GatewayClassStatus};
use kube::{
    Api, Client, ResourceExt,
    runtime::{Controller, controller::Action, watcher::Config},
};
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{
    ControllerError, RECONCILE_ERROR_WAIT, RECONCILE_LONG_WAIT,
    utils::{CONDITION_ACCEPTED, REASON_ACCEPTED, new_condition, set_condition},
};
use crate::services::patchers::patch_status;

type Result<T, E = ControllerError> = std::result::Result<T, E>;

const ACCEPTED_MESSAGE: &str = "GatewayClass accepted by controller";

#[derive(Clone, TypedBuilder)]
pub struct GatewayClassControllerContext {
    controller_name: String,
    client: Client,
}

#[derive(TypedBuilder)]
pub struct GatewayClassController {
    ctx: Arc<GatewayClassControllerContext>,
}

/// `None` when the class already carries an up to date `Accepted` condition.
fn accepted_status(gateway_class: &GatewayClass) -> Option<GatewayClassStatus> {
    let mut status = gateway_class.status.clone().unwrap_or_default();
    let conditions = status.conditions.get_or_insert_with(Vec::new);
    let condition = new_condition(CONDITION_ACCEPTED, true, REASON_ACCEPTED, ACCEPTED_MESSAGE, gateway_class.metadata.generation);
    set_condition(conditions, condition).then_some(status)
}

impl GatewayClassController {
    pub fn get_controller(&'_ self) -> BoxFuture<'_, ()> {
        let client = self.ctx.client.clone();
        let context = &self.ctx;

        Controller::new(Api::<GatewayClass>::all(client), Config::default())
            .shutdown_on_signal()
            .run(Self::reconcile_gateway_class, Self::error_policy, Arc::clone(context))
            .for_each(|_| futures::future::ready(()))
            .boxed()
    }

    #[allow(clippy::needless_pass_by_value)]
    fn error_policy<T>(_object: Arc<T>, err: &ControllerError, _ctx: Arc<GatewayClassControllerContext>) -> Action {
        match err {
            ControllerError::InvalidPayload(_) => Action::requeue(RECONCILE_LONG_WAIT),
            _ => Action::requeue(RECONCILE_ERROR_WAIT),
        }
    }

    async fn reconcile_gateway_class(gateway_class: Arc<GatewayClass>, ctx: Arc<GatewayClassControllerContext>) -> Result<Action> {
        let configured_controller_name = &ctx.controller_name;
        let resource_name = gateway_class.name_any();

        let id = Uuid::parse_str(&gateway_class.metadata.uid.clone().ok_or(ControllerError::InvalidPayload("Uid must be present".to_owned()))?)
            .map_err(|e| ControllerError::InvalidPayload(format!("Uid in wrong format {e}")))?;

        let controller_name = &gateway_class.spec.controller_name;
        if configured_controller_name != controller_name {
            debug!("reconcile_gateway_class: {configured_controller_name} {id} {resource_name} belongs to {controller_name}, skipping");
            return Ok(Action::await_change());
        }

        let Some(status) = accepted_status(&gateway_class) else {
            debug!("reconcile_gateway_class: {configured_controller_name} {id} {resource_name} already accepted");
            return Ok(Action::await_change());
        };

        match patch_status(&Api::all(ctx.client.clone()), &*gateway_class, &status).await {
            Ok(_) => {
                info!("reconcile_gateway_class: {configured_controller_name} {id} {resource_name} accepted");
                Ok(Action::await_change())
            },
            Err(e) => {
                warn!("reconcile_gateway_class: {configured_controller_name} {id} {resource_name} patch failed {e}");
                Err(ControllerError::PatchFailed(e))
            },
        }
    }
}
