use std::collections::{BTreeMap, BTreeSet};

use gateway_api::apis::standard::{
    gateways::Gateway,
    httproutes::{HTTPRoute, HTTPRouteRules, HTTPRouteRulesMatchesPathType},
};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::{BuildError, RouteListenerMatcher, is_route_attached_to_gateway, listener_infos};
use crate::{
    common::{DEFAULT_ROUTE_PATH, GatewayInfo, ListenerInfo, PathInfo, ProtocolType, ResourceKey, ServiceRef, VHostInfo, route_parent_keys},
    services::ClusterReader,
};

const TARGET: &str = "controllers::topology_builder";

/// External address of every node, or the internal one when a node has none.
fn node_ips(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|node| {
            let addresses = node.status.as_ref()?.addresses.as_ref()?;
            let find = |type_: &str| addresses.iter().find(|a| a.type_ == type_ && !a.address.is_empty()).map(|a| a.address.clone());
            find("ExternalIP").or_else(|| find("InternalIP"))
        })
        .collect()
}

fn route_hostnames(route: &HTTPRoute, route_key: &ResourceKey) -> Result<Vec<String>, BuildError> {
    let hostnames = route.spec.hostnames.clone().unwrap_or_default();
    if hostnames.is_empty() {
        return Err(BuildError::MissingRouteHostnames(route_key.clone()));
    }
    for host in &hostnames {
        if host.is_empty() || host.contains('*') {
            return Err(BuildError::InvalidHostname { route: route_key.clone(), host: host.clone() });
        }
    }
    Ok(hostnames)
}

fn rule_paths(rule: &HTTPRouteRules, route_key: &ResourceKey) -> Vec<String> {
    let Some(matches) = rule.matches.as_ref().filter(|m| !m.is_empty()) else {
        return vec![DEFAULT_ROUTE_PATH.to_owned()];
    };
    matches
        .iter()
        .filter_map(|m| {
            let path = m.path.as_ref()?;
            let value = path.value.clone()?;
            match path.r#type {
                Some(HTTPRouteRulesMatchesPathType::PathPrefix) | None => Some(value),
                Some(ref other) => {
                    warn!(target: TARGET, "unsupported match type {other:?} in {route_key}, only PathPrefix is supported, skipping");
                    None
                },
            }
        })
        .collect()
}

/// Builds the canonical topology of one Gateway from everything attached to it.
/// Any invalid route fails the whole build.
pub struct GatewayTopologyBuilder<'a> {
    gateway: &'a Gateway,
    cluster: &'a dyn ClusterReader,
}

impl<'a> GatewayTopologyBuilder<'a> {
    pub fn new(gateway: &'a Gateway, cluster: &'a dyn ClusterReader) -> Self {
        Self { gateway, cluster }
    }

    pub async fn build(self) -> Result<GatewayInfo, BuildError> {
        let gateway_key = ResourceKey::from(self.gateway);
        let node_ips = node_ips(&self.cluster.list_nodes().await?);
        let listeners = listener_infos(self.gateway)?;
        let matcher = RouteListenerMatcher::new(&listeners, &gateway_key.namespace);

        let mut routes = self.cluster.list_http_routes().await?;
        routes.sort_by_cached_key(|route| ResourceKey::from(route));

        let mut claimed_hosts: BTreeMap<String, ResourceKey> = BTreeMap::new();
        let mut vhosts: BTreeMap<String, VHostInfo> = BTreeMap::new();

        for route in routes.iter().filter(|route| is_route_attached_to_gateway(route, self.gateway)) {
            let route_key = ResourceKey::from(route);
            let hostnames = route_hostnames(route, &route_key)?;
            let section_names: BTreeSet<String> = route_parent_keys(route)
                .into_iter()
                .filter(|parent| parent.is_gateway() && parent.resource_key.name == gateway_key.name && parent.resource_key.namespace == gateway_key.namespace)
                .filter_map(|parent| parent.section_name)
                .collect();
            let namespace_labels = self
                .cluster
                .get_namespace_labels(&route_key.namespace)
                .await
                .map_err(|source| BuildError::NamespaceLabels { namespace: route_key.namespace.clone(), source })?;

            for hostname in hostnames {
                match claimed_hosts.get(&hostname) {
                    Some(first) if *first != route_key => {
                        return Err(BuildError::DuplicateHostname { host: hostname, first: first.clone(), second: route_key });
                    },
                    Some(_) => {},
                    None => {
                        claimed_hosts.insert(hostname.clone(), route_key.clone());
                    },
                }

                let candidates = matcher.candidate_listeners(&section_names, &route_key.namespace, &namespace_labels, &hostname);
                if candidates.is_empty() {
                    debug!(target: TARGET, "no listener for {hostname} in {route_key}, skipping");
                    continue;
                }
                let paths = self.route_paths(route, &route_key, &node_ips).await?;

                let vhost = vhosts.entry(hostname.clone()).or_insert_with(|| VHostInfo::new(&hostname));
                let (ssl, ports) = Self::listener_ports(&candidates);
                vhost.merge_ports(ssl, ports);
                vhost.paths.extend(paths);
            }
        }

        Ok(GatewayInfo {
            uid: self.gateway.uid().unwrap_or_default(),
            name: gateway_key.name,
            namespace: gateway_key.namespace,
            vhosts,
        })
    }

    /// HTTPS ports when any candidate is HTTPS, HTTP ports otherwise.
    fn listener_ports(candidates: &[&ListenerInfo]) -> (bool, Vec<i32>) {
        let ssl = candidates.iter().any(|l| l.protocol == ProtocolType::Https);
        let wanted = if ssl { ProtocolType::Https } else { ProtocolType::Http };
        (ssl, candidates.iter().filter(|l| l.protocol == wanted).map(|l| l.port).collect())
    }

    async fn route_paths(&self, route: &HTTPRoute, route_key: &ResourceKey, node_ips: &[String]) -> Result<Vec<PathInfo>, BuildError> {
        let mut paths = vec![];
        for rule in route.spec.rules.iter().flatten() {
            let Some(backend) = rule.backend_refs.as_ref().and_then(|refs| refs.first()) else {
                continue;
            };
            if rule.filters.as_ref().is_some_and(|filters| !filters.is_empty()) {
                warn!(target: TARGET, "HTTPRoute filters will be ignored {route_key}");
            }
            if let Some(group) = backend.group.as_ref().filter(|group| !group.is_empty()) {
                return Err(BuildError::UnsupportedBackendGroup(group.clone()));
            }
            if let Some(kind) = backend.kind.as_ref().filter(|kind| *kind != "Service") {
                return Err(BuildError::UnsupportedBackendKind(kind.clone()));
            }

            let service_ref =
                ServiceRef { namespace: backend.namespace.clone().unwrap_or_else(|| route_key.namespace.clone()), name: backend.name.clone() };
            let node_port = self.node_port(&service_ref, backend.port).await?;

            for path in rule_paths(rule, route_key) {
                paths.push(PathInfo { path, service: service_ref.clone(), node_port, node_ips: node_ips.to_vec() });
            }
        }
        Ok(paths)
    }

    async fn node_port(&self, service_ref: &ServiceRef, requested_port: Option<i32>) -> Result<i32, BuildError> {
        let service = self
            .cluster
            .get_service(&service_ref.namespace, &service_ref.name)
            .await
            .map_err(|source| BuildError::Service { service: service_ref.clone(), source })?;
        let ports = service.spec.and_then(|spec| spec.ports).unwrap_or_default();
        let wanted = requested_port.or_else(|| ports.first().map(|p| p.port)).unwrap_or_default();

        let port = ports.iter().find(|p| p.port == wanted).ok_or_else(|| BuildError::ServicePortNotFound { service: service_ref.clone(), port: wanted })?;
        match port.node_port {
            Some(node_port) if node_port != 0 => Ok(node_port),
            _ => Err(BuildError::MissingNodePort(service_ref.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test::{FakeCluster, gateway_from_yaml, node, route_from_yaml, service};

    const GATEWAY: &str = r#"
apiVersion: gateway.networking.k8s.io/v1
kind: Gateway
metadata:
  name: gw
  namespace: infra
  uid: 0b1c2d3e-aaaa-bbbb-cccc-1234567890ab
spec:
  gatewayClassName: sc
  listeners:
    - name: http
      port: 80
      protocol: HTTP
      allowedRoutes:
        namespaces:
          from: All
    - name: https
      port: 443
      protocol: HTTPS
      hostname: "*.example.com"
      allowedRoutes:
        namespaces:
          from: All
      tls:
        mode: Terminate
        options:
          sc-certmgr-cert-id: ext-1
"#;

    fn route(namespace: &str, name: &str, hostnames: &[&str], extra: &str) -> HTTPRoute {
        route_from_yaml(&format!(
            r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: {name}
  namespace: {namespace}
spec:
  parentRefs:
    - name: gw
      namespace: infra
  hostnames: {hostnames:?}
  rules:
    - backendRefs:
        - name: web
          port: 8080
{extra}
"#
        ))
    }

    fn cluster(routes: Vec<HTTPRoute>) -> FakeCluster {
        FakeCluster::default()
            .with_nodes(vec![node("n1", Some("192.0.2.1"), "10.0.0.1"), node("n2", None, "10.0.0.2")])
            .with_services(vec![service("apps", "web", 8080, Some(30080)), service("other", "web", 8080, Some(30090))])
            .with_routes(routes)
    }

    #[tokio::test]
    async fn builds_ssl_vhost_from_https_listener() {
        let gateway = gateway_from_yaml(GATEWAY);
        let cluster = cluster(vec![route("apps", "web", &["a.example.com", "plain.org"], "")]);

        let info = GatewayTopologyBuilder::new(&gateway, &cluster).build().await.unwrap();

        assert_eq!(info.uid, "0b1c2d3e-aaaa-bbbb-cccc-1234567890ab");
        let secure = &info.vhosts["a.example.com"];
        assert!(secure.ssl);
        assert_eq!(secure.ports, BTreeSet::from([443]));
        assert_eq!(secure.paths.len(), 1);
        assert_eq!(secure.paths[0].path, "/");
        assert_eq!(secure.paths[0].node_port, 30080);
        assert_eq!(secure.paths[0].node_ips, vec!["192.0.2.1".to_owned(), "10.0.0.2".to_owned()]);

        let plain = &info.vhosts["plain.org"];
        assert!(!plain.ssl);
        assert_eq!(plain.ports, BTreeSet::from([80]));
    }

    #[tokio::test]
    async fn section_name_restricts_listeners() {
        let gateway = gateway_from_yaml(GATEWAY);
        let mut route = route("apps", "web", &["a.example.com"], "");
        route.spec.parent_refs.as_mut().unwrap()[0].section_name = Some("http".to_owned());

        let info = GatewayTopologyBuilder::new(&gateway, &cluster(vec![route])).build().await.unwrap();
        let vhost = &info.vhosts["a.example.com"];
        assert!(!vhost.ssl);
        assert_eq!(vhost.ports, BTreeSet::from([80]));
    }

    #[tokio::test]
    async fn only_prefix_matches_are_kept() {
        let gateway = gateway_from_yaml(GATEWAY);
        let matches = r#"      matches:
        - path:
            type: PathPrefix
            value: /api
        - path:
            type: Exact
            value: /exact
        - path:
            value: /default
        - headers:
            - name: x-test
              value: "1""#;
        let route = route("apps", "web", &["a.example.com"], matches);

        let info = GatewayTopologyBuilder::new(&gateway, &cluster(vec![route])).build().await.unwrap();
        let paths: Vec<_> = info.vhosts["a.example.com"].paths.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["/api", "/default"]);
    }

    #[tokio::test]
    async fn same_hostname_in_two_namespaces_is_rejected() {
        let gateway = gateway_from_yaml(GATEWAY);
        let cluster = cluster(vec![route("apps", "web", &["example.com"], ""), route("other", "web", &["example.com"], "")]);

        let err = GatewayTopologyBuilder::new(&gateway, &cluster).build().await.unwrap_err();
        assert!(matches!(err, BuildError::DuplicateHostname { ref host, .. } if host == "example.com"));
        assert_eq!(err.to_string(), "domain \"example.com\" used in several HTTPRoute: \"apps/web\" and \"other/web\"");
    }

    #[tokio::test]
    async fn rejects_wildcard_and_missing_hostnames() {
        let gateway = gateway_from_yaml(GATEWAY);

        let err = GatewayTopologyBuilder::new(&gateway, &cluster(vec![route("apps", "web", &["*.example.com"], "")])).build().await.unwrap_err();
        assert!(matches!(err, BuildError::InvalidHostname { .. }));

        let err = GatewayTopologyBuilder::new(&gateway, &cluster(vec![route("apps", "web", &[], "")])).build().await.unwrap_err();
        assert_eq!(err.to_string(), "HTTPRoute apps/web: Hostname must be specified (no wildcards, no empty values supported)");
    }

    #[tokio::test]
    async fn unattached_routes_are_ignored() {
        let gateway = gateway_from_yaml(GATEWAY);
        let mut route = route("apps", "web", &["*.broken"], "");
        route.spec.parent_refs.as_mut().unwrap()[0].name = "someone-else".to_owned();

        let info = GatewayTopologyBuilder::new(&gateway, &cluster(vec![route])).build().await.unwrap();
        assert!(info.vhosts.is_empty());
    }

    #[tokio::test]
    async fn backend_must_expose_a_node_port() {
        let gateway = gateway_from_yaml(GATEWAY);
        let cluster = cluster(vec![route("apps", "web", &["a.example.com"], "")]).with_services(vec![service("apps", "web", 8080, None)]);

        let err = GatewayTopologyBuilder::new(&gateway, &cluster).build().await.unwrap_err();
        assert_eq!(err.to_string(), "service apps/web has no NodePort (only NodePort/LoadBalancer supported)");

        let mut route = route("apps", "web", &["a.example.com"], "");
        route.spec.rules.as_mut().unwrap()[0].backend_refs.as_mut().unwrap()[0].port = Some(9999);
        let err = GatewayTopologyBuilder::new(&gateway, &self::cluster(vec![route])).build().await.unwrap_err();
        assert!(matches!(err, BuildError::ServicePortNotFound { port: 9999, .. }));
    }

    #[tokio::test]
    async fn rejects_non_core_backends() {
        let gateway = gateway_from_yaml(GATEWAY);
        let mut route = route("apps", "web", &["a.example.com"], "");
        route.spec.rules.as_mut().unwrap()[0].backend_refs.as_mut().unwrap()[0].group = Some("example.com".to_owned());

        let err = GatewayTopologyBuilder::new(&gateway, &cluster(vec![route])).build().await.unwrap_err();
        assert_eq!(err.to_string(), "non-core backend groups not supported: example.com");
    }
}
