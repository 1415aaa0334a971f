//! Known paths and list identities of configuration trees.
//!
//! The schema is what lets the diff tell a renamed field from a new one: any
//! path it does not describe is schema drift and fails classification.

use crate::config::{ConfigPath, PathPattern, Value};
use crate::error::{ClassifyError, Result};

/// Node groups sharing the same instance shape.
const NODE_GROUPS: &[&str] = &["master", "worker"];

/// Known leaf paths of a cluster configuration, outside the node groups.
const CLUSTER_PATHS: &[&str] = &[
    "cluster.name",
    "hosts[*].name",
    "hosts[*].default",
    "hosts[*].connection.type",
    "hosts[*].connection.user",
    "hosts[*].connection.ip",
    "hosts[*].connection.port",
    "hosts[*].connection.sshKeyFile",
    "hosts[*].mainResourcePoolPath",
    "network.mode",
    "network.cidr",
    "network.gateway",
    "network.bridge",
    "nodeTemplate.user",
    "nodeTemplate.distro",
    "nodeTemplate.updateOnBoot",
    "nodeTemplate.dns[*]",
    "nodes.default.cpu",
    "nodes.default.ram",
    "nodes.default.mainDiskSize",
    "loadBalancer.vip",
    "loadBalancer.virtualRouterId",
    "loadBalancer.default.cpu",
    "loadBalancer.default.ram",
    "loadBalancer.default.mainDiskSize",
    "loadBalancer.forwardPorts[*].name",
    "loadBalancer.forwardPorts[*].port",
    "loadBalancer.forwardPorts[*].targetPort",
    "loadBalancer.forwardPorts[*].target",
    "loadBalancer.instances[*].id",
    "loadBalancer.instances[*].host",
    "loadBalancer.instances[*].ip",
    "loadBalancer.instances[*].mac",
    "loadBalancer.instances[*].cpu",
    "loadBalancer.instances[*].ram",
    "loadBalancer.instances[*].mainDiskSize",
    "loadBalancer.instances[*].priority",
    "kubernetes.version",
    "kubernetes.networkPlugin",
    "kubernetes.dnsMode",
    "kubernetes.other.autoRenewCertificates",
    "kubernetes.other.copyKubeconfig",
];

/// Known leaf paths below each node instance.
const NODE_PATHS: &[&str] = &[
    "id",
    "host",
    "ip",
    "mac",
    "cpu",
    "ram",
    "mainDiskSize",
    "dataDisks[*].name",
    "dataDisks[*].size",
    "dataDisks[*].pool",
    "labels.*",
    "taints[*]",
];

/// Identity-keyed lists of a cluster configuration.
const CLUSTER_IDENTITIES: &[(&str, &str)] = &[
    ("hosts", "name"),
    ("loadBalancer.instances", "id"),
    ("loadBalancer.forwardPorts", "name"),
];

/// Known paths and identity keys of a configuration tree.
#[derive(Debug, Clone, Default)]
pub struct TreeSchema {
    known: Vec<PathPattern>,
    identities: Vec<(PathPattern, String)>,
}

impl TreeSchema {
    /// Creates an empty schema; every path is unknown.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            known: Vec::new(),
            identities: Vec::new(),
        }
    }

    /// Creates a schema where every path is known and every list is positional.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn permissive() -> Result<Self> {
        Self::new().with_path("**")
    }

    /// Creates the schema of a cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern is malformed.
    pub fn cluster() -> Result<Self> {
        let mut schema = Self::new();

        for pattern in CLUSTER_PATHS {
            schema = schema.with_path(pattern)?;
        }
        for group in NODE_GROUPS {
            for leaf in NODE_PATHS {
                schema = schema.with_path(&format!("nodes.{group}[*].{leaf}"))?;
            }
            schema = schema
                .with_identity(&format!("nodes.{group}"), "id")?
                .with_identity(&format!("nodes.{group}[*].dataDisks"), "name")?;
        }
        for (list, key) in CLUSTER_IDENTITIES {
            schema = schema.with_identity(list, key)?;
        }

        Ok(schema)
    }

    /// Adds a known leaf pattern. Every ancestor of a matching path is known too.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is malformed.
    pub fn with_path(mut self, pattern: &str) -> Result<Self> {
        self.known.push(PathPattern::parse(pattern)?);
        Ok(self)
    }

    /// Declares a list whose elements are aligned by `key` instead of position.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is malformed.
    pub fn with_identity(mut self, list: &str, key: &str) -> Result<Self> {
        self.identities.push((PathPattern::parse(list)?, key.to_string()));
        Ok(self)
    }

    /// Returns true if the schema describes the path.
    #[must_use]
    pub fn is_known(&self, path: &ConfigPath) -> bool {
        self.known.iter().any(|pattern| pattern.covers(path))
    }

    /// Returns the identity key of the list at `path`, if it is identity-keyed.
    #[must_use]
    pub fn identity_key(&self, path: &ConfigPath) -> Option<&str> {
        self.identities
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, key)| key.as_str())
    }

    /// Checks a tree, failing with every unknown path.
    ///
    /// Only the shallowest node of an unknown subtree is reported.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::SchemaDrift`] if any path is unknown.
    pub fn check(&self, root: &Value) -> Result<()> {
        let mut unknown = Vec::new();
        self.collect_unknown(&ConfigPath::root(), root, &mut unknown);

        if unknown.is_empty() {
            Ok(())
        } else {
            Err(ClassifyError::SchemaDrift {
                paths: unknown.iter().map(ToString::to_string).collect(),
            }
            .into())
        }
    }

    fn collect_unknown(&self, path: &ConfigPath, value: &Value, unknown: &mut Vec<ConfigPath>) {
        let children: Vec<(ConfigPath, &Value)> = match value {
            Value::Map(map) => map.iter().map(|(k, v)| (path.key(k), v)).collect(),
            Value::List(items) => {
                let key = self.identity_key(path);
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let id = key.and_then(|key| item.as_map()?.get(key)?.as_identity());
                        (id.map_or_else(|| path.index(i), |id| path.id(&id)), item)
                    })
                    .collect()
            }
            _ => return,
        };

        for (child, value) in children {
            if self.is_known(&child) {
                self.collect_unknown(&child, value, unknown);
            } else {
                unknown.push(child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigTree;
    use crate::error::KestrelError;

    const FULL: &str = r"
cluster:
  name: lab
hosts:
  - name: localhost
    default: true
    connection: {type: local}
network:
  mode: nat
  cidr: 192.168.113.0/24
nodeTemplate:
  user: k8s
  dns: [1.1.1.1]
nodes:
  default: {cpu: 2, ram: 4, mainDiskSize: 32}
  master:
    - id: m1
      labels: {zone: a}
  worker:
    - id: w1
      cpu: 4
      dataDisks: [{name: rook, size: 64}]
      taints: ['gpu=true:NoSchedule']
loadBalancer:
  vip: 192.168.113.200
  forwardPorts: [{name: https, port: 443, target: workers}]
  instances: [{id: lb1, priority: 200}]
kubernetes:
  version: v1.28.6
  networkPlugin: calico
  other: {copyKubeconfig: true}
";

    #[test]
    fn test_cluster_schema_accepts_full_config() {
        let schema = TreeSchema::cluster().expect("schema");
        let tree = ConfigTree::from_yaml(FULL).expect("tree");

        assert!(schema.check(tree.root()).is_ok());
    }

    #[test]
    fn test_unknown_paths_are_reported_at_shallowest_node() {
        let schema = TreeSchema::cluster().expect("schema");
        let yaml = format!("{FULL}storage:\n  class: fast\n");
        let tree = ConfigTree::from_yaml(&yaml.replace("cpu: 4", "cpu: 4\n      gpu: 1")).expect("tree");

        match schema.check(tree.root()) {
            Err(KestrelError::Classify(ClassifyError::SchemaDrift { paths })) => {
                assert_eq!(paths, vec!["nodes.worker[w1].gpu", "storage"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_identity_keys() {
        let schema = TreeSchema::cluster().expect("schema");
        let workers = ConfigPath::root().key("nodes").key("worker");
        let disks = workers.id("w1").key("dataDisks");
        let dns = ConfigPath::root().key("nodeTemplate").key("dns");

        assert_eq!(schema.identity_key(&workers), Some("id"));
        assert_eq!(schema.identity_key(&disks), Some("name"));
        assert_eq!(schema.identity_key(&dns), None);
    }

    #[test]
    fn test_empty_schema_knows_nothing() {
        let schema = TreeSchema::new();
        let tree = ConfigTree::from_yaml("a: 1\n").expect("tree");

        assert!(schema.check(tree.root()).is_err());
        assert!(TreeSchema::permissive().expect("schema").check(tree.root()).is_ok());
    }
}
