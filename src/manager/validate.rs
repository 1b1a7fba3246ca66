//! Spec validation and config generation
//!
//! Pure functions only: nothing here touches the registry, the store or the
//! network. Storage checks on removed nodes need the `NodeListener` and are
//! done by the registry with the node names returned by `validate_for_update`.

use crate::cluster::{ClusterConfig, ClusterSpec, NodeRole, NodeSpec};
use crate::error::ApiError;
use std::collections::HashSet;
use std::net::IpAddr;

const SUPPORTED_NETWORK_PLUGINS: &[&str] = &["flannel", "calico"];
const MAX_NAME_LEN: usize = 63;

/// An IP network in CIDR notation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Result<Self, String> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("{} is not in CIDR notation", s))?;
        let network: IpAddr = addr
            .parse()
            .map_err(|_| format!("{} has an invalid network address", s))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| format!("{} has an invalid prefix length", s))?;
        if prefix > width(network) {
            return Err(format!("{} prefix length out of range", s));
        }
        Ok(Self { network, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        same_family(self.network, ip)
            && masked(ip, self.prefix) == masked(self.network, self.prefix)
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        let prefix = self.prefix.min(other.prefix);
        same_family(self.network, other.network)
            && masked(self.network, prefix) == masked(other.network, prefix)
    }
}

fn same_family(a: IpAddr, b: IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

fn width(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn masked(ip: IpAddr, prefix: u8) -> u128 {
    let (bits, width) = match ip {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32u32),
        IpAddr::V6(v6) => (u128::from(v6), 128u32),
    };
    if prefix == 0 {
        return 0;
    }
    let host_bits = width - u32::from(prefix);
    let mask = if host_bits == 0 { u128::MAX } else { u128::MAX << host_bits };
    bits & mask
}

fn is_dns1123_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_NAME_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

fn check_nodes(nodes: &[NodeSpec]) -> Result<(), String> {
    if nodes.is_empty() {
        return Err("cluster must have at least one node".to_string());
    }

    let mut names = HashSet::new();
    let mut addresses = HashSet::new();
    let mut has_controlplane = false;
    let mut has_worker = false;

    for node in nodes {
        if node.name.is_empty() {
            return Err("node name can't be empty".to_string());
        }
        if !names.insert(node.name.as_str()) {
            return Err(format!("duplicate node name {}", node.name));
        }
        if node.address.parse::<IpAddr>().is_err() {
            return Err(format!("node {} address {} is not an ip", node.name, node.address));
        }
        if !addresses.insert(node.address.as_str()) {
            return Err(format!("duplicate node address {}", node.address));
        }
        if node.roles.is_empty() {
            return Err(format!("node {} has no role", node.name));
        }
        if node.has_role(NodeRole::Etcd) {
            return Err(format!("node {} can't be given the etcd role explicitly", node.name));
        }
        if node.has_role(NodeRole::Edge) && node.has_role(NodeRole::ControlPlane) {
            return Err(format!("node {} can't be both edge and controlplane", node.name));
        }
        has_controlplane |= node.has_role(NodeRole::ControlPlane);
        has_worker |= node.has_role(NodeRole::Worker);
    }

    if !has_controlplane {
        return Err("cluster must have at least one controlplane node".to_string());
    }
    if !has_worker {
        return Err("cluster must have at least one worker node".to_string());
    }
    Ok(())
}

fn check_spec(spec: &ClusterSpec) -> Result<(), String> {
    if !is_dns1123_label(&spec.name) {
        return Err(format!("cluster name {} is not a valid dns label", spec.name));
    }
    check_nodes(&spec.nodes)?;

    if spec.ssh_user.is_empty() {
        return Err("ssh user can't be empty".to_string());
    }
    if spec.ssh_port == 0 {
        return Err("ssh port must be between 1 and 65535".to_string());
    }

    let cluster_cidr = Cidr::parse(&spec.cluster_cidr)?;
    let service_cidr = Cidr::parse(&spec.service_cidr)?;
    if cluster_cidr.overlaps(&service_cidr) {
        return Err(format!(
            "cluster cidr {} overlaps service cidr {}",
            spec.cluster_cidr, spec.service_cidr
        ));
    }

    let dns_ip: IpAddr = spec
        .cluster_dns_service_ip
        .parse()
        .map_err(|_| {
            format!("cluster dns service ip {} is not an ip", spec.cluster_dns_service_ip)
        })?;
    if !service_cidr.contains(dns_ip) {
        return Err(format!(
            "cluster dns service ip {} is outside service cidr {}",
            spec.cluster_dns_service_ip, spec.service_cidr
        ));
    }

    for dns in &spec.cluster_upstream_dns {
        if dns.parse::<IpAddr>().is_err() {
            return Err(format!("upstream dns server {} is not an ip", dns));
        }
    }

    if spec.cluster_domain.is_empty() {
        return Err("cluster domain can't be empty".to_string());
    }
    if !SUPPORTED_NETWORK_PLUGINS.contains(&spec.network.plugin.as_str()) {
        return Err(format!("unsupported network plugin {}", spec.network.plugin));
    }
    Ok(())
}

fn invalid(reason: String) -> ApiError {
    ApiError::invalid_option(format!("cluster config validate failed {}", reason))
}

/// Validate a spec submitted to Create
pub fn validate_for_create(spec: &ClusterSpec) -> Result<(), ApiError> {
    check_spec(spec).map_err(invalid)
}

/// Validate a spec submitted to Update against the stored configuration
///
/// Returns the names of the nodes the update would remove.
pub fn validate_for_update(
    current: &ClusterConfig,
    spec: &ClusterSpec,
) -> Result<Vec<String>, ApiError> {
    check_spec(spec).map_err(invalid)?;

    let immutable = [
        ("cluster cidr", &current.cluster_cidr, &spec.cluster_cidr),
        ("service cidr", &current.service_cidr, &spec.service_cidr),
        ("cluster domain", &current.cluster_domain, &spec.cluster_domain),
        ("cluster dns service ip", &current.cluster_dns_service_ip, &spec.cluster_dns_service_ip),
        ("network plugin", &current.network.plugin, &spec.network.plugin),
        ("ssh user", &current.ssh_user, &spec.ssh_user),
    ];
    for (field, old, new) in immutable {
        if old != new {
            return Err(invalid(format!("{} can't be changed", field)));
        }
    }

    let kept: HashSet<&str> = spec.nodes.iter().map(|n| n.name.as_str()).collect();
    Ok(current
        .nodes
        .iter()
        .filter(|node| !kept.contains(node.name.as_str()))
        .map(|node| node.name.clone())
        .collect())
}

fn internal_nodes(nodes: &[NodeSpec]) -> Vec<NodeSpec> {
    nodes
        .iter()
        .map(|node| {
            let mut node = node.clone();
            if node.has_role(NodeRole::ControlPlane) && !node.has_role(NodeRole::Etcd) {
                node.roles.push(NodeRole::Etcd);
            }
            node
        })
        .collect()
}

/// Build the internal configuration of a new cluster
pub fn generate_config(spec: &ClusterSpec) -> ClusterConfig {
    ClusterConfig {
        cluster_name: spec.name.clone(),
        nodes: internal_nodes(&spec.nodes),
        ssh_user: spec.ssh_user.clone(),
        ssh_port: spec.ssh_port,
        ssh_key: spec.ssh_key.clone(),
        cluster_cidr: spec.cluster_cidr.clone(),
        service_cidr: spec.service_cidr.clone(),
        cluster_domain: spec.cluster_domain.clone(),
        cluster_dns_service_ip: spec.cluster_dns_service_ip.clone(),
        cluster_upstream_dns: spec.cluster_upstream_dns.clone(),
        network: spec.network.clone(),
        single_cloud_address: spec.single_cloud_address.clone(),
    }
}

/// Apply the mutable part of `spec` on top of the stored configuration
pub fn merge_config(current: &ClusterConfig, spec: &ClusterSpec) -> ClusterConfig {
    ClusterConfig {
        nodes: internal_nodes(&spec.nodes),
        ssh_key: spec.ssh_key.clone(),
        ssh_port: spec.ssh_port,
        cluster_upstream_dns: spec.cluster_upstream_dns.clone(),
        single_cloud_address: spec.single_cloud_address.clone(),
        ..current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NetworkSpec;
    use crate::error::ErrorKind;

    fn spec() -> ClusterSpec {
        ClusterSpec {
            name: "prod".to_string(),
            nodes: vec![
                NodeSpec::new("master", "10.0.0.1", &[NodeRole::ControlPlane]),
                NodeSpec::new("worker1", "10.0.0.2", &[NodeRole::Worker, NodeRole::Storage]),
            ],
            ssh_user: "root".to_string(),
            ssh_port: 22,
            ssh_key: "key".to_string(),
            cluster_cidr: "10.42.0.0/16".to_string(),
            service_cidr: "10.43.0.0/16".to_string(),
            cluster_domain: "cluster.local".to_string(),
            cluster_dns_service_ip: "10.43.0.10".to_string(),
            cluster_upstream_dns: vec!["223.5.5.5".to_string()],
            network: NetworkSpec {
                plugin: "flannel".to_string(),
                iface: "eth0".to_string(),
            },
            single_cloud_address: String::new(),
        }
    }

    fn rejected(spec: &ClusterSpec) -> String {
        let err = validate_for_create(spec).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidOption);
        err.message
    }

    #[test]
    fn test_valid_spec_accepted() {
        assert!(validate_for_create(&spec()).is_ok());
    }

    #[test]
    fn test_create_rules() {
        let mut s = spec();
        s.name = "Prod_1".to_string();
        assert!(rejected(&s).contains("dns label"));

        let mut s = spec();
        s.nodes[1].roles = vec![NodeRole::Storage];
        assert!(rejected(&s).contains("worker"));

        let mut s = spec();
        s.nodes[0].roles.push(NodeRole::Edge);
        assert!(rejected(&s).contains("edge"));

        let mut s = spec();
        s.nodes[1].address = "10.0.0.1".to_string();
        assert!(rejected(&s).contains("duplicate node address"));

        let mut s = spec();
        s.service_cidr = "10.42.128.0/20".to_string();
        s.cluster_dns_service_ip = "10.42.128.10".to_string();
        assert!(rejected(&s).contains("overlaps"));

        let mut s = spec();
        s.cluster_dns_service_ip = "10.44.0.10".to_string();
        assert!(rejected(&s).contains("outside service cidr"));

        let mut s = spec();
        s.network.plugin = "weave".to_string();
        assert!(rejected(&s).contains("network plugin"));

        let mut s = spec();
        s.ssh_port = 0;
        assert!(rejected(&s).contains("ssh port"));
    }

    #[test]
    fn test_cidr_math() {
        let net = Cidr::parse("192.168.0.0/24").unwrap();
        assert!(net.contains("192.168.0.200".parse().unwrap()));
        assert!(!net.contains("192.168.1.1".parse().unwrap()));
        assert!(net.overlaps(&Cidr::parse("192.168.0.0/16").unwrap()));
        assert!(!net.overlaps(&Cidr::parse("fd00::/8").unwrap()));
        assert!(Cidr::parse("10.0.0.0/33").is_err());
        assert!(Cidr::parse("10.0.0.0").is_err());
    }

    #[test]
    fn test_generated_config_adds_etcd() {
        let config = generate_config(&spec());
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.nodes[0].roles, vec![NodeRole::ControlPlane, NodeRole::Etcd]);
        assert_eq!(config.nodes[1].roles, vec![NodeRole::Worker, NodeRole::Storage]);
    }

    #[test]
    fn test_update_reports_removed_nodes() {
        let current = generate_config(&spec());
        let mut next = spec();
        next.nodes[1] = NodeSpec::new("worker2", "10.0.0.3", &[NodeRole::Worker]);

        assert_eq!(validate_for_update(&current, &next).unwrap(), vec!["worker1".to_string()]);
    }

    #[test]
    fn test_update_keeps_immutable_fields() {
        let current = generate_config(&spec());
        let mut next = spec();
        next.cluster_domain = "corp.local".to_string();

        let err = validate_for_update(&current, &next).unwrap_err();
        assert!(err.message.contains("cluster domain can't be changed"));
    }

    #[test]
    fn test_merge_replaces_mutable_fields() {
        let current = generate_config(&spec());
        let mut next = spec();
        next.ssh_port = 2222;
        next.cluster_upstream_dns = vec!["8.8.8.8".to_string()];
        next.nodes.push(NodeSpec::new("edge1", "10.0.0.9", &[NodeRole::Edge]));

        let merged = merge_config(&current, &next);
        assert_eq!(merged.ssh_port, 2222);
        assert_eq!(merged.cluster_upstream_dns, vec!["8.8.8.8".to_string()]);
        assert_eq!(merged.nodes.len(), 3);
        assert_eq!(merged.cluster_cidr, current.cluster_cidr);
    }
}
