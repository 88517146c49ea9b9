use std::collections::{BTreeMap, BTreeSet};

use gateway_api::apis::standard::{
    gateways::{Gateway, GatewayListenersAllowedRoutesNamespaces, GatewayListenersAllowedRoutesNamespacesFrom},
    httproutes::HTTPRoute,
};
use tracing::debug;

use super::{BuildError, host_matches};
use crate::common::{AllowedNamespaces, ListenerInfo, ProtocolType, ResourceKey, route_parent_keys};

impl From<Option<&GatewayListenersAllowedRoutesNamespaces>> for AllowedNamespaces {
    fn from(namespaces: Option<&GatewayListenersAllowedRoutesNamespaces>) -> Self {
        let Some(namespaces) = namespaces else {
            return AllowedNamespaces::Same;
        };
        match namespaces.from {
            Some(GatewayListenersAllowedRoutesNamespacesFrom::All) => AllowedNamespaces::All,
            Some(GatewayListenersAllowedRoutesNamespacesFrom::Selector) => AllowedNamespaces::Selector(
                namespaces.selector.as_ref().and_then(|selector| selector.match_labels.clone()).unwrap_or_default(),
            ),
            Some(GatewayListenersAllowedRoutesNamespacesFrom::Same) | None => AllowedNamespaces::Same,
        }
    }
}

pub fn listener_infos(gateway: &Gateway) -> Result<Vec<ListenerInfo>, BuildError> {
    let mut seen = BTreeSet::new();
    let mut listeners = vec![];
    for listener in &gateway.spec.listeners {
        if !seen.insert(listener.name.as_str()) {
            return Err(BuildError::DuplicateListenerName(listener.name.clone()));
        }
        listeners.push(ListenerInfo {
            name: listener.name.clone(),
            hostname: listener.hostname.clone(),
            protocol: ProtocolType::from(listener.protocol.as_str()),
            port: listener.port,
            allowed_namespaces: AllowedNamespaces::from(listener.allowed_routes.as_ref().and_then(|routes| routes.namespaces.as_ref())),
        });
    }
    Ok(listeners)
}

pub fn is_route_namespace_allowed(
    allowed_namespaces: &AllowedNamespaces,
    gateway_namespace: &str,
    route_namespace: &str,
    route_namespace_labels: &BTreeMap<String, String>,
) -> bool {
    match allowed_namespaces {
        AllowedNamespaces::All => true,
        AllowedNamespaces::Same => gateway_namespace == route_namespace,
        AllowedNamespaces::Selector(selector) => selector.iter().all(|(k, v)| route_namespace_labels.get(k) == Some(v)),
    }
}

pub fn is_route_attached_to_gateway(route: &HTTPRoute, gateway: &Gateway) -> bool {
    let gateway_key = ResourceKey::from(gateway);
    route_parent_keys(route)
        .iter()
        .any(|parent| parent.is_gateway() && parent.resource_key.name == gateway_key.name && parent.resource_key.namespace == gateway_key.namespace)
}

/// Picks the listeners of one Gateway a route hostname binds to.
pub struct RouteListenerMatcher<'a> {
    listeners: &'a [ListenerInfo],
    gateway_namespace: &'a str,
}

impl<'a> RouteListenerMatcher<'a> {
    pub fn new(listeners: &'a [ListenerInfo], gateway_namespace: &'a str) -> Self {
        Self { listeners, gateway_namespace }
    }

    /// Section names restrict candidates first, then the namespace policy, then the hostname pattern.
    pub fn candidate_listeners(
        &self,
        section_names: &BTreeSet<String>,
        route_namespace: &str,
        route_namespace_labels: &BTreeMap<String, String>,
        hostname: &str,
    ) -> Vec<&'a ListenerInfo> {
        let matched: Vec<_> = self
            .listeners
            .iter()
            .filter(|listener| section_names.is_empty() || section_names.contains(&listener.name))
            .filter(|listener| is_route_namespace_allowed(&listener.allowed_namespaces, self.gateway_namespace, route_namespace, route_namespace_labels))
            .filter(|listener| host_matches(listener.hostname(), hostname))
            .collect();
        debug!("Matching listeners for {hostname} {:?}", matched.iter().map(|l| &l.name).collect::<Vec<_>>());
        matched
    }
}
