//! Configuration module for Kestrel.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing the cluster YAML file
//! - Validation of configuration values
//! - Normalized configuration trees and paths for change classification
//! - Configuration hashes for change tracking

mod hash;
mod parser;
mod path;
mod paths;
mod spec;
mod tree;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use path::{ConfigPath, PathPattern, PathSegment};
pub use paths::ClusterPaths;
pub use spec::{
    ClusterConfig, ClusterMeta, ConnectionConfig, ConnectionType, DataDisk, DnsMode, ForwardPort,
    ForwardTarget, HostConfig, KubernetesConfig, KubernetesOther, LoadBalancerConfig,
    LoadBalancerInstance, NetworkConfig, NetworkMode, NetworkPlugin, NodeDefaults, NodeInstance,
    NodeTemplate, NodesConfig,
};
pub use tree::{ConfigTree, Value};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
