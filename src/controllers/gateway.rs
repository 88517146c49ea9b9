use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use futures::{FutureExt, StreamExt, future::BoxFuture};
use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    Api, Client, Resource, ResourceExt,
    runtime::{
        Controller, WatchStreamExt,
        controller::{self, Action},
        reflector, watcher,
        watcher::Config,
    },
};
use tracing::{Instrument, Level, debug, info, span, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{ControllerError, GatewayReconciler, OwnershipFilter, RECONCILE_ERROR_WAIT, RECONCILE_LONG_WAIT, handlers::GatewayRefMapper, has_finalizer};
use crate::common::ResourceKey;

type Result<T, E = ControllerError> = std::result::Result<T, E>;

#[derive(Clone, TypedBuilder)]
pub struct GatewayControllerContext {
    controller_name: String,
    client: Client,
    ownership: OwnershipFilter,
    reconciler: Arc<GatewayReconciler>,
}

#[derive(TypedBuilder)]
pub struct GatewayController {
    ctx: Arc<GatewayControllerContext>,
}

struct LogContext<'a> {
    controller_name: &'a str,
    resource_key: &'a ResourceKey,
    version: Option<String>,
}

impl std::fmt::Display for LogContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "reconcile_gateway: controller_name: {} key: {} version: {:?}", self.controller_name, self.resource_key, self.version)
    }
}

/// Status patches don't change this, spec edits, deletion and our finalizer do.
fn gateway_changes(gateway: &Gateway) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    gateway.metadata.uid.hash(&mut hasher);
    gateway.metadata.generation.hash(&mut hasher);
    gateway.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    has_finalizer(gateway).hash(&mut hasher);
    Some(hasher.finish())
}

impl GatewayController {
    pub fn get_controller(&'_ self) -> BoxFuture<'_, ()> {
        let client = self.ctx.client.clone();
        let context = &self.ctx;

        let (routes, route_writer) = reflector::store();
        let route_stream =
            reflector(route_writer, watcher(Api::<HTTPRoute>::all(client.clone()), Config::default())).touched_objects().default_backoff();
        let (gateway_classes, gateway_class_writer) = reflector::store();
        let gateway_class_stream =
            reflector(gateway_class_writer, watcher(Api::<GatewayClass>::all(client.clone()), Config::default())).touched_objects().default_backoff();

        let (gateways, gateway_writer) = reflector::store();
        let gateway_stream = reflector(gateway_writer, watcher(Api::<Gateway>::all(client.clone()), Config::default()))
            .default_backoff()
            .touched_objects()
            .predicate_filter(gateway_changes);

        // one Gateway at a time, provider calls for different Gateways never interleave
        let controller = Controller::for_stream(gateway_stream, gateways)
            .with_config(controller::Config::default().concurrency(1))
            .shutdown_on_signal();

        let mapper = GatewayRefMapper::new(context.ownership.clone(), controller.store(), gateway_classes, routes);
        let route_mapper = mapper.clone();
        let service_mapper = mapper.clone();
        let secret_mapper = mapper.clone();
        let gateway_class_mapper = mapper;

        controller
            .watches_stream(route_stream, move |route: HTTPRoute| route_mapper.for_route(&route))
            .watches(Api::<Service>::all(client.clone()), Config::default(), move |service: Service| service_mapper.for_service(&service))
            .watches(Api::<Secret>::all(client), Config::default(), move |secret: Secret| secret_mapper.for_secret(&secret))
            .watches_stream(gateway_class_stream, move |gateway_class: GatewayClass| gateway_class_mapper.for_gateway_class(&gateway_class))
            .run(Self::reconcile_gateway, Self::error_policy, Arc::clone(context))
            .for_each(|_| futures::future::ready(()))
            .boxed()
    }

    #[allow(clippy::needless_pass_by_value)]
    fn error_policy<T>(_object: Arc<T>, err: &ControllerError, _ctx: Arc<GatewayControllerContext>) -> Action {
        match err {
            ControllerError::InvalidPayload(_) => Action::requeue(RECONCILE_LONG_WAIT),
            ControllerError::ClusterRead(_)
            | ControllerError::Topology(_)
            | ControllerError::FinalizerPatchFailed(_)
            | ControllerError::PatchFailed(_)
            | ControllerError::CleanupFailed(_) => Action::requeue(RECONCILE_ERROR_WAIT),
        }
    }

    async fn reconcile_gateway(resource: Arc<Gateway>, ctx: Arc<GatewayControllerContext>) -> Result<Action> {
        let controller_name = &ctx.controller_name;

        let Some(name) = resource.meta().name.clone() else {
            return Err(ControllerError::InvalidPayload("Resource name is not provided".to_owned()));
        };

        let Some(maybe_id) = resource.metadata.uid.clone() else {
            return Err(ControllerError::InvalidPayload("Uid must be present".to_owned()));
        };

        let Ok(_) = Uuid::parse_str(&maybe_id) else {
            return Err(ControllerError::InvalidPayload("Uid in wrong format".to_owned()));
        };

        let resource_key = ResourceKey::from(&*resource);
        let log_context = LogContext { controller_name, resource_key: &resource_key, version: resource.resource_version() };
        debug!("{log_context} {name} {:?}", resource.spec.gateway_class_name);

        let span = span!(Level::INFO, "GatewayReconciler", id = %resource_key);
        let result = ctx.reconciler.reconcile(&resource_key).instrument(span).await;
        match &result {
            Ok(action) => info!("{log_context} done {action:?}"),
            Err(ControllerError::PatchFailed(e) | ControllerError::FinalizerPatchFailed(e)) if e.is_conflict() => {
                debug!("{log_context} stale object, retrying {e}");
            },
            Err(e) => warn!("{log_context} failed {e}"),
        }
        result
    }
}
