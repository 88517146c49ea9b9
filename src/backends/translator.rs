use std::collections::BTreeMap;

use thiserror::Error;

use super::provider::{L7LoadBalancerCreateInput, L7LocationZoneInput, L7UpstreamInput, L7UpstreamZoneInput, L7VHostZoneInput};
use crate::common::{GATEWAY_LABEL_ID, GatewayInfo, HostCertificates, PathInfo};

const LOAD_BALANCER_NAME_LIMIT: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TranslationError {
    #[error("vhost or upstream can't be empty, can't continue")]
    EmptyTopology,
}

fn upstream_zone_id(path: &PathInfo) -> String {
    format!("upstream-zone-{}-{}", path.service.name, path.node_port)
}

/// `gw-` followed by `a` and the UID without dashes, cut to 32 characters.
pub fn load_balancer_name(uid: &str) -> String {
    let name: String = format!("a{uid}").chars().filter(|c| *c != '-').take(LOAD_BALANCER_NAME_LIMIT).collect();
    format!("gw-{name}")
}

pub fn translate(gateway_info: &GatewayInfo, host_certificates: &HostCertificates, location_id: i64) -> Result<L7LoadBalancerCreateInput, TranslationError> {
    let mut upstream_zones: BTreeMap<String, L7UpstreamZoneInput> = BTreeMap::new();
    let mut vhost_zones = vec![];

    for (host, vhost) in &gateway_info.vhosts {
        let ssl_cert_id = if vhost.ssl { host_certificates.get(host).cloned().unwrap_or_default() } else { String::new() };

        let mut location_zones = vec![];
        for path in &vhost.paths {
            let upstream_id = upstream_zone_id(path);
            location_zones.push(L7LocationZoneInput { location: path.path.clone(), upstream_id: upstream_id.clone() });
            upstream_zones.entry(upstream_id.clone()).or_insert_with(|| L7UpstreamZoneInput {
                id: upstream_id,
                upstreams: path.node_ips.iter().map(|ip| L7UpstreamInput { ip: ip.clone(), port: path.node_port, weight: 1 }).collect(),
            });
        }

        if vhost.ports.is_empty() || location_zones.is_empty() {
            continue;
        }

        vhost_zones.push(L7VHostZoneInput {
            id: format!("vhost-zone-{host}"),
            ports: vhost.ports.iter().copied().collect(),
            domains: vec![host.clone()],
            ssl: vhost.ssl,
            ssl_cert_id,
            location_zones,
        });
    }

    if vhost_zones.is_empty() || upstream_zones.is_empty() {
        return Err(TranslationError::EmptyTopology);
    }

    Ok(L7LoadBalancerCreateInput {
        name: load_balancer_name(&gateway_info.uid),
        location_id,
        vhost_zones,
        upstream_zones: upstream_zones.into_values().collect(),
        labels: BTreeMap::from([(GATEWAY_LABEL_ID.to_owned(), gateway_info.uid.clone())]),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::common::{ServiceRef, VHostInfo};

    fn path(path: &str, service: &str, node_port: i32) -> PathInfo {
        PathInfo {
            path: path.to_owned(),
            service: ServiceRef { namespace: "default".to_owned(), name: service.to_owned() },
            node_port,
            node_ips: vec!["10.0.0.1".to_owned(), "10.0.0.2".to_owned()],
        }
    }

    fn vhost(host: &str, ssl: bool, ports: &[i32], paths: Vec<PathInfo>) -> VHostInfo {
        VHostInfo { host: host.to_owned(), ssl, ports: ports.iter().copied().collect::<BTreeSet<_>>(), paths }
    }

    fn gateway_info(vhosts: Vec<VHostInfo>) -> GatewayInfo {
        GatewayInfo {
            uid: "0b1c2d3e-aaaa-bbbb-cccc-1234567890ab".to_owned(),
            name: "gw".to_owned(),
            namespace: "default".to_owned(),
            vhosts: vhosts.into_iter().map(|v| (v.host.clone(), v)).collect(),
        }
    }

    #[test]
    fn names_load_balancer_after_uid() {
        assert_eq!(load_balancer_name("0b1c2d3e-aaaa-bbbb-cccc-1234567890ab"), "gw-a0b1c2d3eaaaabbbbcccc1234567890a");
        assert_eq!(load_balancer_name("abc"), "gw-aabc");
    }

    #[test]
    fn shares_upstream_zones_between_hosts() {
        let info = gateway_info(vec![
            vhost("a.example.com", true, &[443], vec![path("/", "web", 30080), path("/api", "api", 30081)]),
            vhost("b.example.com", false, &[80], vec![path("/", "web", 30080)]),
        ]);
        let certificates = HostCertificates::from([("a.example.com".to_owned(), "cert-1".to_owned())]);

        let input = translate(&info, &certificates, 7).unwrap();

        assert_eq!(input.location_id, 7);
        assert_eq!(input.labels.get(GATEWAY_LABEL_ID).map(String::as_str), Some("0b1c2d3e-aaaa-bbbb-cccc-1234567890ab"));
        assert_eq!(input.upstream_zones.len(), 2);
        let web = input.upstream_zones.iter().find(|z| z.id == "upstream-zone-web-30080").unwrap();
        assert_eq!(web.upstreams.len(), 2);
        assert!(web.upstreams.iter().all(|u| u.port == 30080 && u.weight == 1));

        let a = &input.vhost_zones[0];
        assert_eq!(a.id, "vhost-zone-a.example.com");
        assert!(a.ssl);
        assert_eq!(a.ssl_cert_id, "cert-1");
        assert_eq!(a.ports, vec![443]);
        assert_eq!(a.location_zones[1].upstream_id, "upstream-zone-api-30081");
        let b = &input.vhost_zones[1];
        assert!(!b.ssl);
        assert_eq!(b.ssl_cert_id, "");
    }

    #[test]
    fn ssl_host_without_certificate_gets_empty_id() {
        let info = gateway_info(vec![vhost("a.example.com", true, &[443], vec![path("/", "web", 30080)])]);
        let input = translate(&info, &HostCertificates::new(), 1).unwrap();
        assert_eq!(input.vhost_zones[0].ssl_cert_id, "");
    }

    #[test]
    fn rejects_empty_topology() {
        assert_eq!(translate(&gateway_info(vec![]), &HostCertificates::new(), 1), Err(TranslationError::EmptyTopology));

        let no_ports = gateway_info(vec![vhost("a.example.com", false, &[], vec![path("/", "web", 30080)])]);
        assert_eq!(translate(&no_ports, &HostCertificates::new(), 1), Err(TranslationError::EmptyTopology));

        let no_paths = gateway_info(vec![vhost("a.example.com", false, &[80], vec![])]);
        assert_eq!(translate(&no_paths, &HostCertificates::new(), 1), Err(TranslationError::EmptyTopology));
    }
}
