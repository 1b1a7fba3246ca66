//! Declarative cluster description
//!
//! `ClusterSpec` is what callers submit, `ClusterConfig` is the internal form
//! handed to the provisioning engine and persisted in the cluster record, and
//! `ClusterView` is the point-in-time snapshot returned by reads.

use crate::cluster::fsm::ClusterStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a host plays inside a cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    ControlPlane,
    Worker,
    Edge,
    Storage,
    /// Implicit role given to every control plane node in `ClusterConfig`.
    Etcd,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeRole::ControlPlane => "controlplane",
            NodeRole::Worker => "worker",
            NodeRole::Edge => "edge",
            NodeRole::Storage => "storage",
            NodeRole::Etcd => "etcd",
        };
        f.write_str(name)
    }
}

/// A single host of the cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub address: String,
    pub roles: Vec<NodeRole>,
}

impl NodeSpec {
    pub fn new(name: &str, address: &str, roles: &[NodeRole]) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            roles: roles.to_vec(),
        }
    }

    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Pod network settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub plugin: String,
    pub iface: String,
}

/// Cluster description submitted by callers on Create and Update
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub nodes: Vec<NodeSpec>,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub ssh_key: String,
    pub cluster_cidr: String,
    pub service_cidr: String,
    pub cluster_domain: String,
    pub cluster_dns_service_ip: String,
    pub cluster_upstream_dns: Vec<String>,
    pub network: NetworkSpec,
    pub single_cloud_address: String,
}

impl ClusterSpec {
    /// Strip surrounding whitespace from every user supplied string.
    pub fn trim_field_space(&mut self) {
        fn trim(s: &mut String) {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }

        trim(&mut self.name);
        trim(&mut self.ssh_user);
        trim(&mut self.cluster_cidr);
        trim(&mut self.service_cidr);
        trim(&mut self.cluster_domain);
        trim(&mut self.cluster_dns_service_ip);
        trim(&mut self.network.plugin);
        trim(&mut self.network.iface);
        trim(&mut self.single_cloud_address);
        self.cluster_upstream_dns.iter_mut().for_each(trim);
        for node in &mut self.nodes {
            trim(&mut node.name);
            trim(&mut node.address);
        }
    }
}

/// Internal cluster configuration consumed by the provisioning engine
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_name: String,
    pub nodes: Vec<NodeSpec>,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub ssh_key: String,
    pub cluster_cidr: String,
    pub service_cidr: String,
    pub cluster_domain: String,
    pub cluster_dns_service_ip: String,
    pub cluster_upstream_dns: Vec<String>,
    pub network: NetworkSpec,
    pub single_cloud_address: String,
}

impl ClusterConfig {
    /// Nodes as callers see them, without the implicit etcd role
    pub fn visible_nodes(&self) -> Vec<NodeSpec> {
        self.nodes
            .iter()
            .map(|node| NodeSpec {
                name: node.name.clone(),
                address: node.address.clone(),
                roles: node
                    .roles
                    .iter()
                    .copied()
                    .filter(|role| *role != NodeRole::Etcd)
                    .collect(),
            })
            .collect()
    }
}

/// Snapshot of a cluster returned by Get/List
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterView {
    pub name: String,
    pub status: ClusterStatus,
    pub nodes: Vec<NodeSpec>,
    pub nodes_count: usize,
    pub ssh_user: String,
    pub ssh_port: u16,
    pub cluster_cidr: String,
    pub service_cidr: String,
    pub cluster_domain: String,
    pub cluster_dns_service_ip: String,
    pub cluster_upstream_dns: Vec<String>,
    pub network: NetworkSpec,
    pub single_cloud_address: String,
    pub platform_version: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Last workflow failure, if any
    pub error: Option<String>,
    pub cancel_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_field_space() {
        let mut spec = ClusterSpec {
            name: "  prod ".to_string(),
            ssh_user: "root\t".to_string(),
            cluster_upstream_dns: vec![" 8.8.8.8 ".to_string()],
            nodes: vec![NodeSpec::new(" n1", "10.0.0.1 ", &[NodeRole::Worker])],
            ..Default::default()
        };
        spec.trim_field_space();

        assert_eq!(spec.name, "prod");
        assert_eq!(spec.ssh_user, "root");
        assert_eq!(spec.cluster_upstream_dns, vec!["8.8.8.8".to_string()]);
        assert_eq!(spec.nodes[0].name, "n1");
        assert_eq!(spec.nodes[0].address, "10.0.0.1");
    }

    #[test]
    fn test_visible_nodes_hide_etcd() {
        let config = ClusterConfig {
            nodes: vec![NodeSpec::new(
                "master",
                "10.0.0.1",
                &[NodeRole::ControlPlane, NodeRole::Etcd],
            )],
            ..Default::default()
        };
        assert_eq!(config.visible_nodes()[0].roles, vec![NodeRole::ControlPlane]);
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&NodeRole::ControlPlane).unwrap();
        assert_eq!(json, "\"controlplane\"");
    }
}
