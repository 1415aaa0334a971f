//! Configuration validation for cluster specs.
//!
//! Field constraints declared on the configuration types are checked through the
//! `validator` derive; cross-field rules (identity uniqueness, host references,
//! address families) are checked here. Every message is qualified with the
//! path of the offending field.

use crate::error::{ConfigError, KestrelError, Result};
use crate::provisioner::identifier;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use super::spec::{ClusterConfig, ConnectionType, LoadBalancerConfig, NodeInstance};

/// Validator for cluster configurations.
///
/// Constructed explicitly wherever validation is needed; it holds no state.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a cluster configuration.
    ///
    /// # Errors
    ///
    /// Returns an error listing every failed rule if validation fails.
    pub fn validate(&self, config: &ClusterConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            return Ok(result);
        }

        let message = result
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");

        Err(KestrelError::Config(ConfigError::ValidationError {
            message,
            field: Some(result.errors[0].field.clone()),
        }))
    }

    /// Runs every rule and returns the collected errors and warnings.
    #[must_use]
    pub fn check(&self, config: &ClusterConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = config.validate() {
            collect_field_errors(&errors, "", &mut result);
            result.errors.sort_by(|a, b| a.field.cmp(&b.field));
        }

        Self::validate_cluster(config, &mut result);
        Self::validate_hosts(config, &mut result);
        Self::validate_nodes(config, &mut result);
        Self::validate_network(config, &mut result);
        if let Some(lb) = &config.load_balancer {
            Self::validate_load_balancer(lb, &mut result);
        }

        result
    }

    fn validate_cluster(config: &ClusterConfig, result: &mut ValidationResult) {
        if !is_valid_name(&config.cluster.name) {
            result.push(
                "cluster.name",
                format!(
                    "Cluster name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.cluster.name
                ),
            );
        }

        if !config.kubernetes.version.starts_with('v') {
            result.push(
                "kubernetes.version",
                format!(
                    "Kubernetes version '{}' must start with 'v'",
                    config.kubernetes.version
                ),
            );
        }
    }

    fn validate_hosts(config: &ClusterConfig, result: &mut ValidationResult) {
        if config.hosts.is_empty() {
            result.push("hosts", "At least one host is required");
            return;
        }

        let mut seen = HashSet::new();
        let mut identifiers: HashMap<String, &str> = HashMap::new();
        for (i, host) in config.hosts.iter().enumerate() {
            if !seen.insert(host.name.as_str()) {
                result.push(
                    format!("hosts[{i}].name"),
                    format!("Duplicate host name: {}", host.name),
                );
            } else if let Some(other) = identifiers.insert(identifier(&host.name), &host.name) {
                result.push(
                    format!("hosts[{i}].name"),
                    format!(
                        "Host name '{}' collides with '{other}' once made an identifier ({})",
                        host.name,
                        identifier(&host.name)
                    ),
                );
            }

            if host.connection.kind == ConnectionType::Remote && host.connection.ip.is_none() {
                result.push(
                    format!("hosts[{i}].connection.ip"),
                    format!("Remote host '{}' requires an address", host.name),
                );
            }
        }

        if config.hosts.iter().filter(|h| h.default).count() > 1 {
            result.push("hosts", "At most one host can be marked as default");
        }
    }

    fn validate_nodes(config: &ClusterConfig, result: &mut ValidationResult) {
        if config.nodes.master.is_empty() {
            result.push("nodes.master", "At least one master node is required");
        } else if config.nodes.master.len() % 2 == 0 {
            result.warnings.push(format!(
                "nodes.master: {} masters cannot tolerate more failures than {}",
                config.nodes.master.len(),
                config.nodes.master.len() - 1
            ));
        }

        if config.nodes.worker.is_empty() {
            result
                .warnings
                .push(String::from("nodes.worker: No workers, workloads will run on masters"));
        }

        let host_names: HashSet<&str> = config.hosts.iter().map(|h| h.name.as_str()).collect();
        let mut seen_ids = HashSet::new();

        let groups = [("master", &config.nodes.master), ("worker", &config.nodes.worker)];
        for (group, nodes) in groups {
            for node in nodes.iter() {
                let prefix = format!("nodes.{group}[{}]", node.id);
                Self::validate_node(node, &prefix, &host_names, result);

                if !seen_ids.insert(node.id.as_str()) {
                    result.push(
                        format!("{prefix}.id"),
                        format!("Duplicate node id: {}", node.id),
                    );
                }
            }
        }

        if let Some(lb) = &config.load_balancer {
            for instance in &lb.instances {
                let prefix = format!("loadBalancer.instances[{}]", instance.id);
                if !seen_ids.insert(instance.id.as_str()) {
                    result.push(
                        format!("{prefix}.id"),
                        format!("Duplicate node id: {}", instance.id),
                    );
                }
                if let Some(host) = &instance.host {
                    if !host_names.contains(host.as_str()) {
                        result.push(format!("{prefix}.host"), format!("Unknown host: {host}"));
                    }
                }
            }
        }
    }

    fn validate_node(
        node: &NodeInstance,
        prefix: &str,
        host_names: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        if !is_valid_name(&node.id) {
            result.push(
                format!("{prefix}.id"),
                format!("Node id '{}' is invalid. Must be lowercase alphanumeric with hyphens.", node.id),
            );
        }

        if let Some(host) = &node.host {
            if !host_names.contains(host.as_str()) {
                result.push(format!("{prefix}.host"), format!("Unknown host: {host}"));
            }
        }

        let mut disks = HashSet::new();
        for disk in &node.data_disks {
            if !disks.insert(disk.name.as_str()) {
                result.push(
                    format!("{prefix}.dataDisks[{}]", disk.name),
                    format!("Duplicate data disk name: {}", disk.name),
                );
            }
        }
    }

    fn validate_network(config: &ClusterConfig, result: &mut ValidationResult) {
        let Some((network, prefix_len)) = parse_cidr(&config.network.cidr) else {
            result.push(
                "network.cidr",
                format!("Invalid CIDR: {}", config.network.cidr),
            );
            return;
        };

        let mut addresses: Vec<(String, IpAddr)> = Vec::new();
        for node in config.nodes.master.iter().chain(config.nodes.worker.iter()) {
            if let Some(ip) = node.ip {
                addresses.push((format!("nodes[{}].ip", node.id), ip));
            }
        }
        if let Some(lb) = &config.load_balancer {
            if let Some(vip) = lb.vip {
                addresses.push((String::from("loadBalancer.vip"), vip));
            }
            for instance in &lb.instances {
                if let Some(ip) = instance.ip {
                    addresses.push((format!("loadBalancer.instances[{}].ip", instance.id), ip));
                }
            }
        }
        if let Some(gateway) = config.network.gateway {
            addresses.push((String::from("network.gateway"), gateway));
        }

        let mut seen = HashSet::new();
        for (field, ip) in addresses {
            if !cidr_contains(network, prefix_len, ip) {
                result.push(
                    field.clone(),
                    format!("Address {ip} is outside network {}", config.network.cidr),
                );
            }
            if !seen.insert(ip) {
                result.push(field, format!("Address {ip} is used more than once"));
            }
        }
    }

    fn validate_load_balancer(lb: &LoadBalancerConfig, result: &mut ValidationResult) {
        if !lb.instances.is_empty() && lb.vip.is_none() {
            result.push(
                "loadBalancer.vip",
                "A virtual IP is required when load balancer instances are defined",
            );
        }

        if lb.instances.len() > 1 && lb.virtual_router_id.is_none() {
            result.warnings.push(String::from(
                "loadBalancer.virtualRouterId: Not set, the default router id will be used",
            ));
        }

        let mut names = HashSet::new();
        for port in &lb.forward_ports {
            if !names.insert(port.name.as_str()) {
                result.push(
                    format!("loadBalancer.forwardPorts[{}]", port.name),
                    format!("Duplicate forward port name: {}", port.name),
                );
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Flattens derive-level errors into path-qualified entries.
fn collect_field_errors(errors: &ValidationErrors, prefix: &str, result: &mut ValidationResult) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error.message.as_ref().map_or_else(
                        || format!("Failed '{}' constraint", error.code),
                        ToString::to_string,
                    );
                    result.push(path.clone(), message);
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(inner, &path, result),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(inner, &format!("{path}[{index}]"), result);
                }
            }
        }
    }
}

/// Parses `address/prefix` notation.
fn parse_cidr(cidr: &str) -> Option<(IpAddr, u8)> {
    let (address, prefix) = cidr.split_once('/')?;
    let address: IpAddr = address.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((address, prefix))
}

fn cidr_contains(network: IpAddr, prefix_len: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(addr)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0);
            u32::from(net) & mask == u32::from(addr) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(addr)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0);
            u128::from(net) & mask == u128::from(addr) & mask
        }
        _ => false,
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> ClusterConfig {
        serde_yaml::from_str(yaml).expect("parse")
    }

    const VALID: &str = r"
cluster:
  name: lab
hosts:
  - name: localhost
    default: true
network:
  cidr: 192.168.113.0/24
nodes:
  master:
    - id: m1
      ip: 192.168.113.10
  worker:
    - id: w1
      ip: 192.168.113.21
loadBalancer:
  vip: 192.168.113.200
  instances:
    - id: lb1
kubernetes:
  version: v1.28.6
";

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("lab"));
        assert!(is_valid_name("worker-1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Lab"));
        assert!(!is_valid_name("1lab"));
        assert!(!is_valid_name("lab-"));
        assert!(!is_valid_name("l--ab"));
    }

    #[test]
    fn test_valid_config_passes() {
        let result = ConfigValidator::new().validate(&config(VALID)).expect("valid");
        assert!(result.is_valid());
    }

    #[test]
    fn test_duplicate_node_ids_across_groups() {
        let mut cfg = config(VALID);
        cfg.nodes.worker[0].id = "m1".to_string();

        let result = ConfigValidator::new().check(&cfg);
        assert!(result.errors.iter().any(|e| e.field == "nodes.worker[m1].id"));
    }

    #[test]
    fn test_host_identifier_collision() {
        let mut cfg = config(VALID);
        let mut second = cfg.hosts[0].clone();
        cfg.hosts[0].name = "rack.2".to_string();
        second.name = "rack_2".to_string();
        second.default = false;
        cfg.hosts.push(second);

        let result = ConfigValidator::new().check(&cfg);
        assert!(result.errors.iter().any(|e| e.field == "hosts[1].name" && e.message.contains("rack.2")));

        cfg.hosts[1].name = "rack-2".to_string();
        assert!(ConfigValidator::new().check(&cfg).is_valid());
    }

    #[test]
    fn test_unknown_host_reference() {
        let mut cfg = config(VALID);
        cfg.nodes.worker[0].host = Some("elsewhere".to_string());

        let err = ConfigValidator::new().validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("Unknown host: elsewhere"));
    }

    #[test]
    fn test_address_outside_network() {
        let mut cfg = config(VALID);
        cfg.nodes.master[0].ip = Some("10.0.0.1".parse().expect("ip"));

        let result = ConfigValidator::new().check(&cfg);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "nodes[m1].ip");
    }

    #[test]
    fn test_load_balancer_requires_vip() {
        let mut cfg = config(VALID);
        if let Some(lb) = cfg.load_balancer.as_mut() {
            lb.vip = None;
        }

        let result = ConfigValidator::new().check(&cfg);
        assert!(result.errors.iter().any(|e| e.field == "loadBalancer.vip"));
    }

    #[test]
    fn test_derive_errors_are_path_qualified() {
        let mut cfg = config(VALID);
        cfg.nodes.worker[0].cpu = Some(0);

        let result = ConfigValidator::new().check(&cfg);
        assert!(result.errors.iter().any(|e| e.field == "nodes.worker[0].cpu"));
    }

    #[test]
    fn test_cidr_contains() {
        let (net, len) = parse_cidr("192.168.113.0/24").expect("cidr");
        assert!(cidr_contains(net, len, "192.168.113.7".parse().expect("ip")));
        assert!(!cidr_contains(net, len, "192.168.114.7".parse().expect("ip")));
        assert!(parse_cidr("192.168.113.0/33").is_none());
        assert!(parse_cidr("not-a-cidr").is_none());
    }
}
