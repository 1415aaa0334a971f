//! Configuration types for a Kestrel cluster.
//!
//! This module defines the structs that map to the cluster YAML file. Keys are
//! camelCase on disk. Field-level constraints are declared with `validator`;
//! cross-field rules live in [`super::ConfigValidator`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use validator::Validate;

/// The root configuration structure for a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Cluster identity.
    #[validate(nested)]
    pub cluster: ClusterMeta,
    /// Physical hosts that run the cluster's virtual machines.
    #[validate(nested)]
    pub hosts: Vec<HostConfig>,
    /// Virtual network shared by every node.
    #[validate(nested)]
    pub network: NetworkConfig,
    /// Settings applied to every node.
    #[serde(default)]
    pub node_template: NodeTemplate,
    /// Control plane and worker nodes.
    #[validate(nested)]
    pub nodes: NodesConfig,
    /// Optional load balancers in front of the control plane.
    #[serde(default)]
    #[validate(nested)]
    pub load_balancer: Option<LoadBalancerConfig>,
    /// Kubernetes distribution settings.
    #[validate(nested)]
    pub kubernetes: KubernetesConfig,
}

/// Cluster identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ClusterMeta {
    /// Unique cluster name, also the name of its working directory.
    #[validate(length(min = 1, max = 63))]
    pub name: String,
}

/// A physical host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Unique host name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Whether nodes without an explicit host land here.
    #[serde(default)]
    pub default: bool,
    /// How the engine reaches the host's hypervisor.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Storage pool path for node disks.
    #[serde(default)]
    pub main_resource_pool_path: Option<String>,
}

/// Hypervisor connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Local or remote connection.
    #[serde(rename = "type", default)]
    pub kind: ConnectionType,
    /// SSH user for remote hosts.
    #[serde(default)]
    pub user: Option<String>,
    /// Address of a remote host.
    #[serde(default)]
    pub ip: Option<IpAddr>,
    /// SSH port of a remote host.
    #[serde(default)]
    pub port: Option<u16>,
    /// SSH private key for remote hosts.
    #[serde(default)]
    pub ssh_key_file: Option<String>,
}

/// Connection types.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// The hypervisor runs on this machine.
    #[default]
    Local,
    /// The hypervisor is reached over SSH.
    Remote,
}

/// Virtual network settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct NetworkConfig {
    /// Network mode.
    #[serde(default)]
    pub mode: NetworkMode,
    /// Network CIDR, e.g. `192.168.113.0/24`.
    #[validate(length(min = 1))]
    pub cidr: String,
    /// Optional gateway address.
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    /// Bridge interface for bridge mode.
    #[serde(default)]
    pub bridge: Option<String>,
}

/// Network modes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// NAT behind the host.
    #[default]
    Nat,
    /// Routed network.
    Route,
    /// Bridged onto a host interface.
    Bridge,
}

/// Settings applied to every node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeTemplate {
    /// Login user created on every node.
    #[serde(default = "default_node_user")]
    pub user: String,
    /// Operating system distribution.
    #[serde(default = "default_distro")]
    pub distro: String,
    /// Whether packages are upgraded on first boot.
    #[serde(default = "default_true")]
    pub update_on_boot: bool,
    /// DNS servers handed to every node.
    #[serde(default)]
    pub dns: Vec<IpAddr>,
}

impl Default for NodeTemplate {
    fn default() -> Self {
        Self {
            user: default_node_user(),
            distro: default_distro(),
            update_on_boot: true,
            dns: Vec::new(),
        }
    }
}

/// Default resources for a node group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefaults {
    /// Virtual CPUs.
    #[serde(default = "default_cpu")]
    #[validate(range(min = 1, max = 256))]
    pub cpu: u32,
    /// Memory in GiB.
    #[serde(default = "default_ram")]
    #[validate(range(min = 1))]
    pub ram: u32,
    /// Main disk size in GiB.
    #[serde(default = "default_disk")]
    #[validate(range(min = 8))]
    pub main_disk_size: u32,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            ram: default_ram(),
            main_disk_size: default_disk(),
        }
    }
}

/// Control plane and worker nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct NodesConfig {
    /// Defaults for nodes that leave resources unset.
    #[serde(default)]
    #[validate(nested)]
    pub default: NodeDefaults,
    /// Control plane nodes.
    #[validate(nested)]
    pub master: Vec<NodeInstance>,
    /// Worker nodes.
    #[serde(default)]
    #[validate(nested)]
    pub worker: Vec<NodeInstance>,
}

/// A single control plane or worker node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    /// Node identifier, unique across the cluster.
    #[validate(length(min = 1, max = 32))]
    pub id: String,
    /// Host the node runs on; the default host when unset.
    #[serde(default)]
    pub host: Option<String>,
    /// Static address.
    #[serde(default)]
    pub ip: Option<IpAddr>,
    /// Static MAC address.
    #[serde(default)]
    pub mac: Option<String>,
    /// Virtual CPUs.
    #[serde(default)]
    #[validate(range(min = 1, max = 256))]
    pub cpu: Option<u32>,
    /// Memory in GiB.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub ram: Option<u32>,
    /// Main disk size in GiB.
    #[serde(default)]
    #[validate(range(min = 8))]
    pub main_disk_size: Option<u32>,
    /// Additional disks.
    #[serde(default)]
    #[validate(nested)]
    pub data_disks: Vec<DataDisk>,
    /// Kubernetes node labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Kubernetes node taints, e.g. `dedicated=gpu:NoSchedule`.
    #[serde(default)]
    pub taints: Vec<String>,
}

/// An additional node disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct DataDisk {
    /// Disk name, unique per node.
    #[validate(length(min = 1))]
    pub name: String,
    /// Size in GiB.
    #[validate(range(min = 1))]
    pub size: u32,
    /// Storage pool; the main pool when unset.
    #[serde(default)]
    pub pool: Option<String>,
}

/// Load balancers in front of the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerConfig {
    /// Virtual IP shared by the load balancers.
    #[serde(default)]
    pub vip: Option<IpAddr>,
    /// VRRP router id.
    #[serde(default)]
    #[validate(range(max = 255))]
    pub virtual_router_id: Option<u32>,
    /// Defaults for load balancer instances.
    #[serde(default)]
    #[validate(nested)]
    pub default: NodeDefaults,
    /// Ports forwarded through the load balancers.
    #[serde(default)]
    #[validate(nested)]
    pub forward_ports: Vec<ForwardPort>,
    /// Load balancer instances.
    #[serde(default)]
    #[validate(nested)]
    pub instances: Vec<LoadBalancerInstance>,
}

/// A port forwarded by the load balancers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ForwardPort {
    /// Unique port name.
    #[validate(length(min = 1))]
    pub name: String,
    /// Port the load balancer listens on.
    #[validate(range(min = 1, max = 65535))]
    pub port: u32,
    /// Port on the target nodes; `port` when unset.
    #[serde(default)]
    #[validate(range(min = 1, max = 65535))]
    pub target_port: Option<u32>,
    /// Which nodes receive the traffic.
    #[serde(default)]
    pub target: ForwardTarget,
}

/// Targets of a forwarded port.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ForwardTarget {
    /// Worker nodes.
    #[default]
    Workers,
    /// Control plane nodes.
    Masters,
    /// Every node.
    All,
}

/// A load balancer instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerInstance {
    /// Instance identifier, unique across the cluster.
    #[validate(length(min = 1, max = 32))]
    pub id: String,
    /// Host the instance runs on.
    #[serde(default)]
    pub host: Option<String>,
    /// Static address.
    #[serde(default)]
    pub ip: Option<IpAddr>,
    /// Static MAC address.
    #[serde(default)]
    pub mac: Option<String>,
    /// Virtual CPUs.
    #[serde(default)]
    #[validate(range(min = 1, max = 256))]
    pub cpu: Option<u32>,
    /// Memory in GiB.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub ram: Option<u32>,
    /// Main disk size in GiB.
    #[serde(default)]
    #[validate(range(min = 8))]
    pub main_disk_size: Option<u32>,
    /// VRRP priority.
    #[serde(default)]
    #[validate(range(max = 255))]
    pub priority: Option<u32>,
}

/// Kubernetes distribution settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesConfig {
    /// Kubernetes version, e.g. `v1.28.6`.
    #[validate(length(min = 2))]
    pub version: String,
    /// Pod network plugin.
    #[serde(default)]
    pub network_plugin: NetworkPlugin,
    /// Cluster DNS implementation.
    #[serde(default)]
    pub dns_mode: DnsMode,
    /// Miscellaneous switches.
    #[serde(default)]
    pub other: KubernetesOther,
}

/// Pod network plugins.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPlugin {
    /// Calico.
    #[default]
    Calico,
    /// Cilium.
    Cilium,
    /// Flannel.
    Flannel,
    /// kube-router.
    KubeRouter,
}

/// Cluster DNS implementations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DnsMode {
    /// `CoreDNS`.
    #[default]
    Coredns,
    /// kube-dns.
    Kubedns,
}

/// Miscellaneous Kubernetes switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesOther {
    /// Renew control plane certificates automatically.
    #[serde(default)]
    pub auto_renew_certificates: bool,
    /// Copy the kubeconfig to the local machine after apply.
    #[serde(default)]
    pub copy_kubeconfig: bool,
}

impl ClusterConfig {
    /// Returns the cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.cluster.name
    }

    /// Returns the default host, the first host when none is flagged.
    #[must_use]
    pub fn default_host(&self) -> Option<&HostConfig> {
        self.hosts
            .iter()
            .find(|h| h.default)
            .or_else(|| self.hosts.first())
    }

    /// Returns every node id (masters, workers, load balancers) in declaration order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<&str> {
        let lb_ids = self
            .load_balancer
            .iter()
            .flat_map(|lb| lb.instances.iter().map(|i| i.id.as_str()));

        self.nodes
            .master
            .iter()
            .chain(self.nodes.worker.iter())
            .map(|n| n.id.as_str())
            .chain(lb_ids)
            .collect()
    }
}

impl fmt::Display for NetworkPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Calico => "calico",
            Self::Cilium => "cilium",
            Self::Flannel => "flannel",
            Self::KubeRouter => "kube-router",
        };
        write!(f, "{name}")
    }
}

fn default_node_user() -> String {
    String::from("k8s")
}

fn default_distro() -> String {
    String::from("ubuntu22")
}

const fn default_true() -> bool {
    true
}

const fn default_cpu() -> u32 {
    2
}

const fn default_ram() -> u32 {
    4
}

const fn default_disk() -> u32 {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
cluster:
  name: lab
hosts:
  - name: localhost
network:
  cidr: 192.168.113.0/24
nodes:
  master:
    - id: m1
kubernetes:
  version: v1.28.6
";

    #[test]
    fn test_minimal_config_defaults() {
        let config: ClusterConfig = serde_yaml::from_str(MINIMAL).expect("parse");

        assert_eq!(config.name(), "lab");
        assert_eq!(config.node_template.user, "k8s");
        assert_eq!(config.nodes.default.cpu, 2);
        assert_eq!(config.kubernetes.network_plugin, NetworkPlugin::Calico);
        assert!(config.load_balancer.is_none());
        assert_eq!(config.default_host().map(|h| h.name.as_str()), Some("localhost"));
    }

    #[test]
    fn test_network_plugin_names() {
        let plugin: NetworkPlugin = serde_yaml::from_str("kube-router").expect("parse");
        assert_eq!(plugin, NetworkPlugin::KubeRouter);
        assert_eq!(plugin.to_string(), "kube-router");
    }

    #[test]
    fn test_node_ids_in_order() {
        let mut config: ClusterConfig = serde_yaml::from_str(MINIMAL).expect("parse");
        config.nodes.worker.push(NodeInstance {
            id: "w1".to_string(),
            host: None,
            ip: None,
            mac: None,
            cpu: Some(4),
            ram: None,
            main_disk_size: None,
            data_disks: Vec::new(),
            labels: BTreeMap::new(),
            taints: Vec::new(),
        });

        assert_eq!(config.node_ids(), vec!["m1", "w1"]);
    }

    #[test]
    fn test_field_constraints() {
        let mut config: ClusterConfig = serde_yaml::from_str(MINIMAL).expect("parse");
        assert!(config.validate().is_ok());

        config.nodes.master[0].cpu = Some(0);
        assert!(config.validate().is_err());
    }
}
