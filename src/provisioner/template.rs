//! Generation of the infrastructure entry file.
//!
//! The entry file declares one libvirt provider alias and one module per
//! host. Every module instance uses the embedded host module and reads the
//! cluster variables from `variables.yaml`.

use std::fmt::Write;

use crate::config::{ClusterConfig, ConnectionType, HostConfig};

/// Name of the generated entry file.
pub const MAIN_FILE: &str = "main.tf";

/// Name of the generated variables file.
pub const VARIABLES_FILE: &str = "variables.yaml";

/// Directory of the host module, relative to the project directory.
pub const HOST_MODULE_DIR: &str = "modules/host";

/// Host module shared by every hypervisor.
pub const HOST_MODULE: &str = include_str!("host_module.tf");

/// Version of the libvirt provider.
const LIBVIRT_PROVIDER_VERSION: &str = "0.7.1";

/// Default SSH port of remote hosts.
const DEFAULT_SSH_PORT: u16 = 22;

/// Returns an identifier safe to use in the entry file.
#[must_use]
pub fn identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Returns the libvirt connection URI of a host.
#[must_use]
pub fn libvirt_uri(host: &HostConfig) -> String {
    let conn = &host.connection;
    match (conn.kind, conn.ip) {
        (ConnectionType::Remote, Some(ip)) => {
            let user = conn.user.as_deref().unwrap_or("root");
            let port = conn.port.unwrap_or(DEFAULT_SSH_PORT);
            let mut uri = format!("qemu+ssh://{user}@{ip}:{port}/system");
            if let Some(key) = &conn.ssh_key_file {
                let _ = write!(uri, "?keyfile={key}");
            }
            uri
        }
        _ => String::from("qemu:///system"),
    }
}

/// Renders the entry file for a cluster.
#[must_use]
pub fn render_main(config: &ClusterConfig) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Generated by kestrel for cluster {}. Do not edit.", config.name());
    let _ = writeln!(out);
    let _ = writeln!(out, "terraform {{");
    let _ = writeln!(out, "  required_version = \">= 1.0\"");
    let _ = writeln!(out, "  required_providers {{");
    let _ = writeln!(out, "    libvirt = {{");
    let _ = writeln!(out, "      source  = \"dmacvicar/libvirt\"");
    let _ = writeln!(out, "      version = \"{LIBVIRT_PROVIDER_VERSION}\"");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "  }}");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "locals {{");
    let _ = writeln!(out, "  cluster = yamldecode(file(\"${{path.module}}/{VARIABLES_FILE}\"))");
    let _ = writeln!(out, "}}");

    for host in &config.hosts {
        let id = identifier(&host.name);
        let _ = writeln!(out);
        let _ = writeln!(out, "provider \"libvirt\" {{");
        let _ = writeln!(out, "  alias = \"{id}\"");
        let _ = writeln!(out, "  uri   = \"{}\"", libvirt_uri(host));
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
        let _ = writeln!(out, "module \"host_{id}\" {{");
        let _ = writeln!(out, "  source    = \"./{HOST_MODULE_DIR}\"");
        let _ = writeln!(out, "  providers = {{ libvirt = libvirt.{id} }}");
        let _ = writeln!(out, "  host_name = \"{}\"", host.name);
        if let Some(pool) = &host.main_resource_pool_path {
            let _ = writeln!(out, "  pool_path = \"{pool}\"");
        }
        let _ = writeln!(out, "  cluster   = local.cluster");
        let _ = writeln!(out, "}}");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r"
cluster:
  name: lab
hosts:
  - name: localhost
    default: true
  - name: rack.2
    connection:
      type: remote
      user: ops
      ip: 10.0.0.12
      port: 2222
      sshKeyFile: /keys/rack2
    mainResourcePoolPath: /var/lib/pools
network:
  cidr: 192.168.113.0/24
nodes:
  master:
    - id: m1
kubernetes:
  version: v1.28.6
";

    fn config() -> ClusterConfig {
        serde_yaml::from_str(CONFIG).expect("config")
    }

    #[test]
    fn test_libvirt_uri() {
        let config = config();

        assert_eq!(libvirt_uri(&config.hosts[0]), "qemu:///system");
        assert_eq!(
            libvirt_uri(&config.hosts[1]),
            "qemu+ssh://ops@10.0.0.12:2222/system?keyfile=/keys/rack2"
        );
    }

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("rack.2"), "rack_2");
        assert_eq!(identifier("host-a_1"), "host-a_1");
    }

    #[test]
    fn test_render_main_has_one_module_per_host() {
        let main = render_main(&config());

        assert!(main.contains("source  = \"dmacvicar/libvirt\""));
        assert!(main.contains("yamldecode(file(\"${path.module}/variables.yaml\"))"));
        assert_eq!(main.matches("provider \"libvirt\" {").count(), 2);
        assert!(main.contains("module \"host_localhost\""));
        assert!(main.contains("module \"host_rack_2\""));
        assert!(main.contains("providers = { libvirt = libvirt.rack_2 }"));
        assert!(main.contains("pool_path = \"/var/lib/pools\""));
        assert_eq!(main.matches("source    = \"./modules/host\"").count(), 2);
    }

    #[test]
    fn test_host_module_declares_module_inputs() {
        for variable in ["host_name", "pool_path", "cluster"] {
            assert!(HOST_MODULE.contains(&format!("variable \"{variable}\"")));
        }
        assert!(HOST_MODULE.contains("resource \"libvirt_domain\" \"node\""));
    }
}
