use std::collections::BTreeSet;

use gateway_api::apis::standard::{gatewayclasses::GatewayClass, gateways::Gateway, httproutes::HTTPRoute};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::reflector::{ObjectRef, Store};
use tracing::debug;

use crate::{
    common::{ResourceKey, RouteRefKey, route_parent_keys},
    controllers::OwnershipFilter,
};

const TARGET: &str = "controllers::handlers::watch_mapper";
const SERVICE_KIND: &str = "Service";
const SECRET_KIND: &str = "Secret";

fn is_core_kind(group: Option<&str>, kind: Option<&str>, expected_kind: &str) -> bool {
    group.is_none_or(str::is_empty) && kind.is_none_or(|kind| kind == expected_kind)
}

fn references_service(route: &HTTPRoute, service_key: &ResourceKey) -> bool {
    let route_namespace = ResourceKey::from(route).namespace;
    route.spec.rules.iter().flatten().flat_map(|rule| rule.backend_refs.iter().flatten()).any(|backend| {
        is_core_kind(backend.group.as_deref(), backend.kind.as_deref(), SERVICE_KIND)
            && backend.name == service_key.name
            && backend.namespace.as_deref().unwrap_or(&route_namespace) == service_key.namespace
    })
}

fn references_secret(gateway: &Gateway, secret_key: &ResourceKey) -> bool {
    let gateway_namespace = ResourceKey::from(gateway).namespace;
    gateway
        .spec
        .listeners
        .iter()
        .filter_map(|listener| listener.tls.as_ref())
        .flat_map(|tls| tls.certificate_refs.iter().flatten())
        .any(|reference| {
            is_core_kind(reference.group.as_deref(), reference.kind.as_deref(), SECRET_KIND)
                && reference.name == secret_key.name
                && reference.namespace.as_deref().unwrap_or(&gateway_namespace) == secret_key.namespace
        })
}

/// Maps changes of related objects onto the managed Gateways they affect.
/// Only reflector caches are consulted.
#[derive(Clone)]
pub struct GatewayRefMapper {
    ownership: OwnershipFilter,
    gateways: Store<Gateway>,
    gateway_classes: Store<GatewayClass>,
    routes: Store<HTTPRoute>,
}

impl GatewayRefMapper {
    pub fn new(ownership: OwnershipFilter, gateways: Store<Gateway>, gateway_classes: Store<GatewayClass>, routes: Store<HTTPRoute>) -> Self {
        Self { ownership, gateways, gateway_classes, routes }
    }

    fn is_managed(&self, gateway: &Gateway) -> bool {
        let gateway_class = self.gateway_classes.get(&ObjectRef::new(&gateway.spec.gateway_class_name));
        self.ownership.should_reconcile(gateway, gateway_class.as_deref())
    }

    fn parent_gateways(&self, route: &HTTPRoute) -> BTreeSet<ResourceKey> {
        route_parent_keys(route)
            .iter()
            .filter(|parent| RouteRefKey::is_gateway(parent))
            .filter(|parent| self.gateways.get(&parent.resource_key.gateway_ref()).is_some_and(|gateway| self.is_managed(&gateway)))
            .map(|parent| ResourceKey::namespaced(&parent.resource_key.name, &parent.resource_key.namespace))
            .collect()
    }

    pub fn for_route(&self, route: &HTTPRoute) -> Vec<ObjectRef<Gateway>> {
        let gateways = self.parent_gateways(route);
        debug!(target: TARGET, "route {} affects {gateways:?}", ResourceKey::from(route));
        gateways.iter().map(ResourceKey::gateway_ref).collect()
    }

    pub fn for_service(&self, service: &Service) -> Vec<ObjectRef<Gateway>> {
        let service_key = ResourceKey::from(service);
        let gateways: BTreeSet<ResourceKey> = self
            .routes
            .state()
            .iter()
            .filter(|route| references_service(route, &service_key))
            .flat_map(|route| self.parent_gateways(route))
            .collect();
        debug!(target: TARGET, "service {service_key} affects {gateways:?}");
        gateways.iter().map(ResourceKey::gateway_ref).collect()
    }

    pub fn for_secret(&self, secret: &Secret) -> Vec<ObjectRef<Gateway>> {
        let secret_key = ResourceKey::from(secret);
        let gateways: BTreeSet<ResourceKey> = self
            .gateways
            .state()
            .iter()
            .filter(|gateway| references_secret(gateway, &secret_key) && self.is_managed(gateway))
            .map(|gateway| ResourceKey::from(&**gateway))
            .collect();
        debug!(target: TARGET, "secret {secret_key} affects {gateways:?}");
        gateways.iter().map(ResourceKey::gateway_ref).collect()
    }

    /// A class change can hand Gateways over to or away from this controller.
    pub fn for_gateway_class(&self, gateway_class: &GatewayClass) -> Vec<ObjectRef<Gateway>> {
        let class_name = gateway_class.metadata.name.as_deref().unwrap_or_default();
        self.gateways
            .state()
            .iter()
            .filter(|gateway| gateway.spec.gateway_class_name == class_name)
            .filter(|gateway| self.ownership.should_reconcile(gateway, Some(gateway_class)))
            .map(|gateway| ResourceKey::from(&**gateway).gateway_ref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use kube::{
        Resource,
        runtime::{reflector, watcher},
    };

    use super::*;
    use crate::common::test::{gateway_class, gateway_from_yaml, route_from_yaml, service};

    const CONTROLLER: &str = "k8s.srvrscloud.com/gateway-controller";

    fn store<K>(objects: Vec<K>) -> Store<K>
    where
        K: Resource<DynamicType = ()> + Clone + 'static,
    {
        let (reader, mut writer) = reflector::store();
        for object in objects {
            writer.apply_watcher_event(&watcher::Event::Apply(object));
        }
        reader
    }

    fn gateway(namespace: &str, name: &str, class_name: &str) -> Gateway {
        gateway_from_yaml(&format!(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: {name}
  namespace: {namespace}
spec:
  gatewayClassName: {class_name}
  listeners:
    - name: https
      port: 443
      protocol: HTTPS
      hostname: a.example.com
      tls:
        mode: Terminate
        certificateRefs:
          - name: tls
          - name: shared
            namespace: certs
"#
        ))
    }

    fn route(namespace: &str, name: &str, parents: &str, backend: &str) -> HTTPRoute {
        route_from_yaml(&format!(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: {name}
  namespace: {namespace}
spec:
  parentRefs: {parents}
  hostnames: ["a.example.com"]
  rules:
    - backendRefs:
        - {backend}
"#
        ))
    }

    fn mapper(routes: Vec<HTTPRoute>) -> GatewayRefMapper {
        let gateways = store(vec![gateway("default", "gw", "sc"), gateway("default", "foreign", "other"), gateway("apps", "gw", "sc")]);
        let classes = store(vec![gateway_class("sc", CONTROLLER), gateway_class("other", "example.com/other")]);
        GatewayRefMapper::new(OwnershipFilter::new(CONTROLLER, None), gateways, classes, store(routes))
    }

    fn keys(refs: Vec<ObjectRef<Gateway>>) -> Vec<String> {
        let mut keys: Vec<_> = refs.iter().map(|r| format!("{}/{}", r.namespace.clone().unwrap_or_default(), r.name)).collect();
        keys.sort();
        keys
    }

    #[test]
    fn route_maps_to_managed_parents() {
        let route = route(
            "default",
            "web",
            r#"[{name: gw}, {name: gw}, {name: foreign}, {name: missing}, {name: gw, namespace: apps}, {name: svc, kind: Service}]"#,
            "{name: web, port: 80}",
        );
        assert_eq!(keys(mapper(vec![]).for_route(&route)), vec!["apps/gw", "default/gw"]);
    }

    #[test]
    fn service_maps_through_routes() {
        let routes = vec![
            route("default", "web", "[{name: gw}]", "{name: web, port: 80}"),
            route("apps", "web-from-default", "[{name: gw}]", "{name: web, namespace: default, port: 80}"),
            route("apps", "other", "[{name: gw, namespace: default}]", "{name: other, port: 80}"),
        ];
        let mapper = mapper(routes);
        assert_eq!(keys(mapper.for_service(&service("default", "web", 80, Some(30080)))), vec!["apps/gw", "default/gw"]);
        assert!(mapper.for_service(&service("apps", "web", 80, Some(30080))).is_empty());
    }

    #[test]
    fn secret_maps_to_referencing_gateways() {
        let secret = |namespace: &str, name: &str| -> Secret {
            serde_json::from_value(serde_json::json!({"metadata": {"name": name, "namespace": namespace}})).unwrap()
        };
        let mapper = mapper(vec![]);
        assert_eq!(keys(mapper.for_secret(&secret("default", "tls"))), vec!["default/gw"]);
        assert_eq!(keys(mapper.for_secret(&secret("certs", "shared"))), vec!["apps/gw", "default/gw"]);
        assert!(mapper.for_secret(&secret("default", "shared")).is_empty());
    }

    #[test]
    fn class_change_maps_to_its_gateways() {
        let mapper = mapper(vec![]);
        assert_eq!(keys(mapper.for_gateway_class(&gateway_class("sc", CONTROLLER))), vec!["apps/gw", "default/gw"]);
        assert!(mapper.for_gateway_class(&gateway_class("other", "example.com/other")).is_empty());
        assert_eq!(keys(mapper.for_gateway_class(&gateway_class("other", CONTROLLER))), vec!["default/foreign"]);
    }
}
