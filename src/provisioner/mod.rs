//! Provisioners that turn a cluster configuration into running machines.
//!
//! Every provisioner follows the same contract: `init` regenerates its input
//! files and bootstraps its engine once, `plan` reports pending changes,
//! `apply` plans, confirms and applies, `destroy` tears everything down.
//! Engines run as subprocesses through a [`CommandRunner`].

mod command;
mod configuration;
mod files;
mod infrastructure;
mod installer;
mod template;

use async_trait::async_trait;

use crate::error::Result;

pub use command::{
    CommandRunner, EngineCommand, ProcessRunner, SIGNAL_EXIT_CODE, flag, flag_with,
};
pub use configuration::{
    CLUSTER_VARS_FILE, ConfigurationProvisioner, INVENTORY_FILE, Inventory, InventoryGroup,
    InventoryHost, InventoryRoot, PLAYBOOK_BINARY, find_binary,
};
pub use files::{PRIVATE_FILE_MODE, remove_file_if_exists, write_private_file};
pub use infrastructure::{
    ENGINE_PRODUCT, ENGINE_VERSION, InfrastructureProvisioner, apply_args, init_args, plan_args,
};
pub use installer::{
    BinaryInstaller, DEFAULT_RELEASE_URL, Product, ReleaseInstaller, expected_checksum,
    extract_binary, release_arch, release_os, reports_version,
};
pub use template::{
    HOST_MODULE, HOST_MODULE_DIR, MAIN_FILE, VARIABLES_FILE, identifier, libvirt_uri, render_main,
};

/// Lifecycle of a provisioner instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing done yet.
    Uninitialized,
    /// The engine binary was found or installed.
    BinaryResolved,
    /// Input files were generated.
    FilesWritten,
    /// The engine project was bootstrapped.
    Initialized,
    /// A plan ran.
    Planned,
    /// Changes were applied.
    Applied,
    /// Resources were destroyed.
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::BinaryResolved => "binary resolved",
            Self::FilesWritten => "files written",
            Self::Initialized => "initialized",
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}

/// Result of a successful apply call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The engine applied the configuration.
    Applied {
        /// Whether the plan reported pending changes.
        had_changes: bool,
    },
    /// The operator declined the confirmation.
    Cancelled,
}

impl ProvisionOutcome {
    /// Returns true if the operator declined.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Lifecycle contract of a provisioner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send {
    /// Short name used in logs and history.
    fn name(&self) -> &'static str;

    /// Returns true if the provisioner carries metadata-only changes, such as
    /// node labels and taints, to the running cluster.
    fn applies_metadata(&self) -> bool;

    /// Regenerates input files and bootstraps the engine once.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary, the input files or the bootstrap fail.
    async fn init(&mut self) -> Result<()>;

    /// Returns true if changes are pending.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization or the plan run fails.
    async fn plan(&mut self) -> Result<bool>;

    /// Plans, asks for confirmation when needed, and applies.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan or apply run fails. Declining is not an error.
    async fn apply(&mut self) -> Result<ProvisionOutcome>;

    /// Tears down everything the provisioner created.
    ///
    /// # Errors
    ///
    /// Returns an error if the destroy run fails.
    async fn destroy(&mut self) -> Result<()>;
}

/// The provisioners a cluster pipeline can run.
#[derive(Debug)]
pub enum ClusterProvisioner {
    /// Virtual machines and networks.
    Infrastructure(InfrastructureProvisioner),
    /// Node software.
    Configuration(ConfigurationProvisioner),
}

#[async_trait]
impl Provisioner for ClusterProvisioner {
    fn name(&self) -> &'static str {
        match self {
            Self::Infrastructure(p) => p.name(),
            Self::Configuration(p) => p.name(),
        }
    }

    fn applies_metadata(&self) -> bool {
        match self {
            Self::Infrastructure(p) => p.applies_metadata(),
            Self::Configuration(p) => p.applies_metadata(),
        }
    }

    async fn init(&mut self) -> Result<()> {
        match self {
            Self::Infrastructure(p) => p.init().await,
            Self::Configuration(p) => p.init().await,
        }
    }

    async fn plan(&mut self) -> Result<bool> {
        match self {
            Self::Infrastructure(p) => p.plan().await,
            Self::Configuration(p) => p.plan().await,
        }
    }

    async fn apply(&mut self) -> Result<ProvisionOutcome> {
        match self {
            Self::Infrastructure(p) => p.apply().await,
            Self::Configuration(p) => p.apply().await,
        }
    }

    async fn destroy(&mut self) -> Result<()> {
        match self {
            Self::Infrastructure(p) => p.destroy().await,
            Self::Configuration(p) => p.destroy().await,
        }
    }
}

impl From<InfrastructureProvisioner> for ClusterProvisioner {
    fn from(p: InfrastructureProvisioner) -> Self {
        Self::Infrastructure(p)
    }
}

impl From<ConfigurationProvisioner> for ClusterProvisioner {
    fn from(p: ConfigurationProvisioner) -> Self {
        Self::Configuration(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, ClusterPaths};
    use crate::ui::MockUi;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_names() {
        let config: Arc<ClusterConfig> = Arc::new(
            serde_yaml::from_str(
                "cluster: {name: lab}\nhosts: [{name: localhost}]\nnetwork: {cidr: 10.0.0.0/24}\nnodes: {master: [{id: m1}]}\nkubernetes: {version: v1.28.6}\n",
            )
            .expect("config"),
        );
        let paths = ClusterPaths::resolve(Some("/tmp/home".into()), None, "lab").expect("paths");
        let ui: Arc<dyn crate::ui::Ui> = Arc::new(MockUi::new());

        let infra: ClusterProvisioner = InfrastructureProvisioner::new(&paths, config.clone(), ui.clone())
            .expect("infra")
            .into();
        let conf: ClusterProvisioner =
            ConfigurationProvisioner::new(&paths, "site.yaml", config, ui).into();

        assert_eq!(infra.name(), "infrastructure");
        assert_eq!(conf.name(), "configuration");
        assert!(!infra.applies_metadata());
        assert!(conf.applies_metadata());
    }

    #[test]
    fn test_outcome() {
        assert!(ProvisionOutcome::Cancelled.is_cancelled());
        assert!(!ProvisionOutcome::Applied { had_changes: true }.is_cancelled());
        assert_eq!(LifecycleState::BinaryResolved.to_string(), "binary resolved");
    }
}
