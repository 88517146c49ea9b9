use std::fmt::Display;

use gateway_api::apis::standard::{
    gateways::Gateway,
    httproutes::{HTTPRoute, HTTPRouteParentRefs},
};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{ResourceExt, runtime::reflector::ObjectRef};

pub const DEFAULT_GROUP_NAME: &str = "gateway.networking.k8s.io";
pub const DEFAULT_NAMESPACE_NAME: &str = "default";
pub const DEFAULT_KIND_NAME: &str = "Gateway";

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub group: String,
    pub namespace: String,
    pub name: String,
    pub kind: String,
}

impl ResourceKey {
    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self { name: name.to_owned(), namespace: namespace.to_owned(), ..Default::default() }
    }

    pub fn gateway_ref(&self) -> ObjectRef<Gateway> {
        ObjectRef::new(&self.name).within(&self.namespace)
    }
}

impl Default for ResourceKey {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP_NAME.to_owned(),
            namespace: DEFAULT_NAMESPACE_NAME.to_owned(),
            name: String::default(),
            kind: DEFAULT_KIND_NAME.to_owned(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn namespace_or_default(namespace: Option<String>) -> String {
    match namespace {
        Some(namespace) if !namespace.is_empty() => namespace,
        _ => DEFAULT_NAMESPACE_NAME.to_owned(),
    }
}

impl From<&Gateway> for ResourceKey {
    fn from(value: &Gateway) -> Self {
        Self { namespace: namespace_or_default(value.namespace()), name: value.name_any(), ..Default::default() }
    }
}

impl From<&HTTPRoute> for ResourceKey {
    fn from(value: &HTTPRoute) -> Self {
        Self {
            namespace: namespace_or_default(value.namespace()),
            name: value.name_any(),
            kind: "HTTPRoute".to_owned(),
            ..Default::default()
        }
    }
}

impl From<&Service> for ResourceKey {
    fn from(value: &Service) -> Self {
        Self { group: String::new(), namespace: namespace_or_default(value.namespace()), name: value.name_any(), kind: "Service".to_owned() }
    }
}

impl From<&Secret> for ResourceKey {
    fn from(value: &Secret) -> Self {
        Self { group: String::new(), namespace: namespace_or_default(value.namespace()), name: value.name_any(), kind: "Secret".to_owned() }
    }
}

impl From<&ObjectRef<Gateway>> for ResourceKey {
    fn from(value: &ObjectRef<Gateway>) -> Self {
        Self { namespace: namespace_or_default(value.namespace.clone()), name: value.name.clone(), ..Default::default() }
    }
}

/// Parent reference of a route, resolved against the route's own namespace.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RouteRefKey {
    pub resource_key: ResourceKey,
    pub section_name: Option<String>,
    pub port: Option<i32>,
}

impl From<(&HTTPRouteParentRefs, String)> for RouteRefKey {
    fn from((route_parent, route_namespace): (&HTTPRouteParentRefs, String)) -> Self {
        Self {
            resource_key: ResourceKey {
                group: route_parent.group.clone().unwrap_or(DEFAULT_GROUP_NAME.to_owned()),
                namespace: route_parent.namespace.clone().unwrap_or(route_namespace),
                name: route_parent.name.clone(),
                kind: route_parent.kind.clone().unwrap_or(DEFAULT_KIND_NAME.to_owned()),
            },
            section_name: route_parent.section_name.clone(),
            port: route_parent.port,
        }
    }
}

impl RouteRefKey {
    /// Only references of kind `Gateway` in the Gateway API group point at a Gateway.
    /// An explicitly empty group or kind is treated the same as an absent one.
    pub fn is_gateway(&self) -> bool {
        let key = &self.resource_key;
        (key.kind.is_empty() || key.kind == DEFAULT_KIND_NAME) && (key.group.is_empty() || key.group == DEFAULT_GROUP_NAME)
    }
}

pub fn route_parent_keys(route: &HTTPRoute) -> Vec<RouteRefKey> {
    let route_namespace = namespace_or_default(route.namespace());
    route.spec.parent_refs.iter().flatten().map(|parent| RouteRefKey::from((parent, route_namespace.clone()))).collect()
}
