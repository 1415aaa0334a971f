//! Configuration provisioner driving `ansible-playbook`.
//!
//! Node software is converged by a playbook run against a generated
//! inventory. Check mode has no change sentinel, so a successful check run
//! always reports pending changes.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ClusterConfig, ClusterPaths, NodeInstance};
use crate::error::{ProvisionError, Result};
use crate::ui::{Level, Ui};

use super::command::{CommandRunner, EngineCommand, ProcessRunner};
use super::files::{remove_file_if_exists, write_private_file};
use super::{LifecycleState, ProvisionOutcome, Provisioner};

/// Playbook runner binary.
pub const PLAYBOOK_BINARY: &str = "ansible-playbook";

/// Name of the generated inventory.
pub const INVENTORY_FILE: &str = "inventory.yaml";

/// Name of the generated cluster variables.
pub const CLUSTER_VARS_FILE: &str = "cluster.yaml";

/// Confirmation asked before converging nodes.
const APPLY_PROMPT: &str = "Proceed with playbook run?";

/// Generated inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inventory {
    /// Root group.
    pub all: InventoryRoot,
}

/// Root inventory group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryRoot {
    /// Variables shared by every host.
    pub vars: BTreeMap<String, String>,
    /// Node groups.
    pub children: BTreeMap<String, InventoryGroup>,
}

/// A group of inventory hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryGroup {
    /// Hosts by node id.
    pub hosts: BTreeMap<String, InventoryHost>,
}

/// Connection details of one inventory host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryHost {
    /// Address the runner connects to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_host: Option<String>,
}

impl Inventory {
    /// Builds the inventory of a cluster.
    #[must_use]
    pub fn from_config(config: &ClusterConfig) -> Self {
        fn group<'a>(nodes: impl Iterator<Item = (&'a str, Option<String>)>) -> InventoryGroup {
            InventoryGroup {
                hosts: nodes
                    .map(|(id, ip)| (id.to_string(), InventoryHost { ansible_host: ip }))
                    .collect(),
            }
        }
        fn nodes(list: &[NodeInstance]) -> impl Iterator<Item = (&str, Option<String>)> {
            list.iter().map(|n| (n.id.as_str(), n.ip.map(|ip| ip.to_string())))
        }

        let mut children = BTreeMap::new();
        children.insert(String::from("masters"), group(nodes(&config.nodes.master)));
        children.insert(String::from("workers"), group(nodes(&config.nodes.worker)));
        if let Some(lb) = &config.load_balancer {
            let instances = lb
                .instances
                .iter()
                .map(|i| (i.id.as_str(), i.ip.map(|ip| ip.to_string())));
            children.insert(String::from("loadbalancers"), group(instances));
        }

        let mut vars = BTreeMap::new();
        vars.insert(String::from("ansible_user"), config.node_template.user.clone());
        vars.insert(String::from("cluster_name"), config.name().to_string());

        Self {
            all: InventoryRoot { vars, children },
        }
    }
}

/// Looks for `name` in `search_paths`, then in `PATH`.
#[must_use]
pub fn find_binary(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    search_paths
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
        .or_else(|| which::which(name).ok())
}

/// Converges node software with a playbook.
pub struct ConfigurationProvisioner {
    project_dir: PathBuf,
    playbook: PathBuf,
    search_paths: Vec<PathBuf>,
    bin_path: Option<PathBuf>,
    show_plan: bool,
    config: Arc<ClusterConfig>,
    ui: Arc<dyn Ui>,
    runner: Arc<dyn CommandRunner>,
    initialized: bool,
    state: LifecycleState,
}

impl std::fmt::Debug for ConfigurationProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationProvisioner")
            .field("project_dir", &self.project_dir)
            .field("playbook", &self.playbook)
            .field("bin_path", &self.bin_path)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ConfigurationProvisioner {
    /// Creates a provisioner running `playbook`.
    #[must_use]
    pub fn new(
        paths: &ClusterPaths,
        playbook: impl Into<PathBuf>,
        config: Arc<ClusterConfig>,
        ui: Arc<dyn Ui>,
    ) -> Self {
        Self {
            project_dir: paths.configuration_dir(),
            playbook: playbook.into(),
            search_paths: Vec::new(),
            bin_path: None,
            show_plan: true,
            config,
            ui,
            runner: Arc::new(ProcessRunner::new()),
            initialized: false,
            state: LifecycleState::Uninitialized,
        }
    }

    /// Sets whether the check run is shown and confirmed.
    #[must_use]
    pub const fn with_show_plan(mut self, show_plan: bool) -> Self {
        self.show_plan = show_plan;
        self
    }

    /// Adds directories searched for the binary.
    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Replaces the command runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Returns the project directory.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    fn resolve_binary(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.bin_path {
            return Ok(path.clone());
        }

        let path = find_binary(PLAYBOOK_BINARY, &self.search_paths)
            .ok_or_else(|| ProvisionError::binary(PLAYBOOK_BINARY, "any", "not found in search paths or PATH"))?;
        info!("Using {}", path.display());

        self.bin_path = Some(path.clone());
        self.state = LifecycleState::BinaryResolved;
        Ok(path)
    }

    async fn write_inputs(&mut self) -> Result<()> {
        let inventory_path = self.project_dir.join(INVENTORY_FILE);
        let inventory = serde_yaml::to_string(&Inventory::from_config(&self.config))
            .map_err(|e| ProvisionError::input_file(&inventory_path, e.to_string()))?;
        write_private_file(&inventory_path, inventory.as_bytes()).await?;

        let vars_path = self.project_dir.join(CLUSTER_VARS_FILE);
        let vars = serde_yaml::to_string(self.config.as_ref())
            .map_err(|e| ProvisionError::input_file(&vars_path, e.to_string()))?;
        write_private_file(&vars_path, vars.as_bytes()).await?;

        self.state = LifecycleState::FilesWritten;
        Ok(())
    }

    /// Runs the playbook, in check mode when `check` is set.
    async fn run_playbook(&self, check: bool, show_output: bool) -> Result<()> {
        let program = self
            .bin_path
            .clone()
            .ok_or_else(|| ProvisionError::binary(PLAYBOOK_BINARY, "any", "binary not resolved"))?;
        let action = if check { "check" } else { "converge" };

        let mut cmd = EngineCommand::new(program, action, &self.project_dir)
            .args(["-i", INVENTORY_FILE, "-e"])
            .arg(format!("@{CLUSTER_VARS_FILE}"))
            .with_output(show_output || self.ui.debug());
        if check {
            cmd = cmd.arg("--check");
        }
        cmd = cmd.arg(self.playbook.display().to_string());
        if !self.ui.has_color() {
            cmd = cmd.env("ANSIBLE_NOCOLOR", "1");
        }

        match self.runner.run(&cmd).await? {
            0 => Ok(()),
            code => Err(ProvisionError::Subprocess {
                action: action.to_string(),
                exit_code: code,
            }
            .into()),
        }
    }
}

#[async_trait]
impl Provisioner for ConfigurationProvisioner {
    fn name(&self) -> &'static str {
        "configuration"
    }

    fn applies_metadata(&self) -> bool {
        true
    }

    async fn init(&mut self) -> Result<()> {
        self.resolve_binary()?;
        self.write_inputs().await?;
        self.initialized = true;
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    async fn plan(&mut self) -> Result<bool> {
        if !self.initialized {
            self.init().await?;
        }

        self.run_playbook(true, self.show_plan).await?;
        self.state = LifecycleState::Planned;
        Ok(true)
    }

    async fn apply(&mut self) -> Result<ProvisionOutcome> {
        let changes = self.plan().await?;

        if changes && self.show_plan && !self.ui.ask(APPLY_PROMPT)? {
            self.ui.print(Level::Warn, "Playbook run cancelled");
            return Ok(ProvisionOutcome::Cancelled);
        }

        self.run_playbook(false, true).await?;
        self.state = LifecycleState::Applied;
        Ok(ProvisionOutcome::Applied { had_changes: changes })
    }

    async fn destroy(&mut self) -> Result<()> {
        for file in [INVENTORY_FILE, CLUSTER_VARS_FILE] {
            remove_file_if_exists(&self.project_dir.join(file)).await?;
        }
        debug!("Removed configuration inputs from {}", self.project_dir.display());

        self.state = LifecycleState::Destroyed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::command::MockCommandRunner;
    use crate::ui::MockUi;
    use tempfile::TempDir;

    const CONFIG: &str = r"
cluster:
  name: lab
hosts:
  - name: localhost
network:
  cidr: 192.168.113.0/24
nodes:
  master:
    - id: m1
      ip: 192.168.113.10
  worker:
    - id: w1
      ip: 192.168.113.20
    - id: w2
loadBalancer:
  vip: 192.168.113.200
  instances:
    - id: lb1
      ip: 192.168.113.5
kubernetes:
  version: v1.28.6
";

    fn config() -> Arc<ClusterConfig> {
        Arc::new(serde_yaml::from_str(CONFIG).expect("config"))
    }

    fn ui(color: bool) -> MockUi {
        let mut ui = MockUi::new();
        ui.expect_has_color().return_const(color);
        ui.expect_debug().return_const(false);
        ui.expect_print().return_const(());
        ui
    }

    fn provisioner(dir: &TempDir, ui: MockUi, runner: MockCommandRunner) -> ConfigurationProvisioner {
        let paths = ClusterPaths::resolve(Some(dir.path().join("home")), Some(dir.path().join("lab")), "lab")
            .expect("paths");
        let bin_dir = dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).expect("bin dir");
        std::fs::write(bin_dir.join(PLAYBOOK_BINARY), "").expect("binary");

        ConfigurationProvisioner::new(&paths, "/playbooks/site.yaml", config(), Arc::new(ui))
            .with_search_paths(vec![bin_dir])
            .with_runner(Arc::new(runner))
    }

    #[test]
    fn test_inventory_groups() {
        let inventory = Inventory::from_config(&config());
        let children = &inventory.all.children;

        assert_eq!(children["masters"].hosts["m1"].ansible_host.as_deref(), Some("192.168.113.10"));
        assert_eq!(children["workers"].hosts.len(), 2);
        assert_eq!(children["workers"].hosts["w2"].ansible_host, None);
        assert!(children["loadbalancers"].hosts.contains_key("lb1"));
        assert_eq!(inventory.all.vars["ansible_user"], "k8s");
    }

    #[test]
    fn test_find_binary_prefers_search_paths() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("kestrel-lookup"), "").expect("write");

        let found = find_binary("kestrel-lookup", &[dir.path().to_path_buf()]);
        assert_eq!(found, Some(dir.path().join("kestrel-lookup")));
        assert_eq!(find_binary("kestrel-missing-binary", &[dir.path().to_path_buf()]), None);
    }

    #[tokio::test]
    async fn test_plan_runs_check_mode() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| {
                cmd.action == "check"
                    && cmd.args
                        == vec!["-i", "inventory.yaml", "-e", "@cluster.yaml", "--check", "/playbooks/site.yaml"]
                    && cmd.envs.iter().any(|(k, _)| k == "ANSIBLE_NOCOLOR")
            })
            .times(1)
            .returning(|_| Ok(0));

        let mut p = provisioner(&dir, ui(false), runner);
        assert!(p.plan().await.expect("plan"));
        assert_eq!(p.state(), LifecycleState::Planned);

        for file in [INVENTORY_FILE, CLUSTER_VARS_FILE] {
            assert!(p.project_dir().join(file).exists());
        }
    }

    #[tokio::test]
    async fn test_apply_confirms_then_converges() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner.expect_run().withf(|cmd| cmd.action == "check").returning(|_| Ok(0));
        runner
            .expect_run()
            .withf(|cmd| cmd.action == "converge" && !cmd.has_arg("--check"))
            .times(1)
            .returning(|_| Ok(0));

        let mut ui = ui(true);
        ui.expect_ask().times(1).returning(|_| Ok(true));

        let mut p = provisioner(&dir, ui, runner);
        let outcome = p.apply().await.expect("apply");

        assert_eq!(outcome, ProvisionOutcome::Applied { had_changes: true });
    }

    #[tokio::test]
    async fn test_apply_declined_is_cancelled() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner.expect_run().withf(|cmd| cmd.action == "check").returning(|_| Ok(0));
        runner.expect_run().withf(|cmd| cmd.action == "converge").never();

        let mut ui = ui(true);
        ui.expect_ask().returning(|_| Ok(false));

        let mut p = provisioner(&dir, ui, runner);
        assert_eq!(p.apply().await.expect("apply"), ProvisionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_check_is_subprocess_error() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| Ok(4));

        let mut p = provisioner(&dir, ui(true), runner);
        let err = p.plan().await.unwrap_err();

        assert_eq!(err.exit_code(), Some(4));
    }

    #[tokio::test]
    async fn test_destroy_removes_inputs() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| Ok(0));

        let mut p = provisioner(&dir, ui(true), runner);
        p.init().await.expect("init");
        p.destroy().await.expect("destroy");

        assert_eq!(p.state(), LifecycleState::Destroyed);
        assert!(!p.project_dir().join(INVENTORY_FILE).exists());
    }
}
