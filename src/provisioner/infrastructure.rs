//! Infrastructure provisioner driving a pinned terraform binary.
//!
//! The provisioner owns a project directory holding the generated
//! `variables.yaml` and `main.tf` plus the host module under `modules/host`. The engine is bootstrapped once per
//! instance; every plan, apply and destroy runs in that directory.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{ClusterConfig, ClusterPaths};
use crate::error::{ProvisionError, Result};
use crate::ui::{Level, Ui};

use super::command::{CommandRunner, EngineCommand, ProcessRunner, flag, flag_with};
use super::files::write_private_file;
use super::installer::{BinaryInstaller, Product, ReleaseInstaller};
use super::template::{HOST_MODULE, HOST_MODULE_DIR, MAIN_FILE, VARIABLES_FILE, render_main};
use super::{LifecycleState, ProvisionOutcome, Provisioner};

/// Pinned engine version.
pub const ENGINE_VERSION: &str = "1.5.7";

/// Engine product name.
pub const ENGINE_PRODUCT: &str = "terraform";

/// Plan exit code signalling pending changes.
const PLAN_CHANGES_EXIT_CODE: i32 = 2;

/// Engine parallelism.
const PARALLELISM: u32 = 10;

/// Confirmation asked before applying changes.
const APPLY_PROMPT: &str = "Proceed with terraform apply?";

/// Provisions cluster machines through terraform.
pub struct InfrastructureProvisioner {
    version: String,
    project_dir: PathBuf,
    bin_dir: PathBuf,
    search_paths: Vec<PathBuf>,
    bin_path: Option<PathBuf>,
    show_plan: bool,
    config: Arc<ClusterConfig>,
    ui: Arc<dyn Ui>,
    runner: Arc<dyn CommandRunner>,
    installer: Arc<dyn BinaryInstaller>,
    initialized: bool,
    state: LifecycleState,
}

impl std::fmt::Debug for InfrastructureProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfrastructureProvisioner")
            .field("version", &self.version)
            .field("project_dir", &self.project_dir)
            .field("bin_path", &self.bin_path)
            .field("show_plan", &self.show_plan)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl InfrastructureProvisioner {
    /// Creates a provisioner for a cluster.
    ///
    /// # Errors
    ///
    /// Returns an error if the release installer cannot be created.
    pub fn new(paths: &ClusterPaths, config: Arc<ClusterConfig>, ui: Arc<dyn Ui>) -> Result<Self> {
        let installer = ReleaseInstaller::new(Product::new(ENGINE_PRODUCT))?;

        Ok(Self {
            version: ENGINE_VERSION.to_string(),
            project_dir: paths.infrastructure_dir(),
            bin_dir: paths.share_dir(ENGINE_PRODUCT, ENGINE_VERSION),
            search_paths: Vec::new(),
            bin_path: None,
            show_plan: true,
            config,
            ui,
            runner: Arc::new(ProcessRunner::new()),
            installer: Arc::new(installer),
            initialized: false,
            state: LifecycleState::Uninitialized,
        })
    }

    /// Sets whether the plan output is shown and confirmed.
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

    /// Replaces the binary installer.
    #[must_use]
    pub fn with_installer(mut self, installer: Arc<dyn BinaryInstaller>) -> Self {
        self.installer = installer;
        self
    }

    /// Returns the project directory.
    #[must_use]
    pub fn project_dir(&self) -> &std::path::Path {
        &self.project_dir
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Finds the pinned binary or installs it.
    async fn find_or_install(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.bin_path {
            return Ok(path.clone());
        }

        self.ui.print(
            Level::Info,
            &format!("Ensuring {ENGINE_PRODUCT} {} is installed...", self.version),
        );

        let mut search = vec![self.bin_dir.clone()];
        search.extend(self.search_paths.iter().cloned());

        let path = match self.installer.find(&self.version, &search).await {
            Ok(path) => {
                info!("{ENGINE_PRODUCT} {} found at {}", self.version, path.display());
                path
            }
            Err(e) => {
                debug!("Lookup failed: {e}");
                self.ui.print(
                    Level::Info,
                    &format!(
                        "Installing {ENGINE_PRODUCT} {} in '{}'...",
                        self.version,
                        self.bin_dir.display()
                    ),
                );
                self.installer
                    .install(&self.version, &self.bin_dir)
                    .await
                    .map_err(|e| ProvisionError::binary(ENGINE_PRODUCT, &self.version, e.to_string()))?
            }
        };

        self.bin_path = Some(path.clone());
        self.state = LifecycleState::BinaryResolved;
        Ok(path)
    }

    /// Writes `variables.yaml` and `main.tf`.
    async fn write_inputs(&mut self) -> Result<()> {
        let variables_path = self.project_dir.join(VARIABLES_FILE);
        let variables = serde_yaml::to_string(self.config.as_ref())
            .map_err(|e| ProvisionError::input_file(&variables_path, e.to_string()))?;
        write_private_file(&variables_path, variables.as_bytes()).await?;

        let main_path = self.project_dir.join(MAIN_FILE);
        write_private_file(&main_path, render_main(&self.config).as_bytes()).await?;

        let module_path = self.project_dir.join(HOST_MODULE_DIR).join(MAIN_FILE);
        write_private_file(&module_path, HOST_MODULE.as_bytes()).await?;

        self.state = LifecycleState::FilesWritten;
        Ok(())
    }

    /// Builds a command for an action.
    fn command(&self, program: PathBuf, action: &str, args: Vec<String>, show_output: bool) -> EngineCommand {
        let mut cmd = EngineCommand::new(program, action, &self.project_dir)
            .arg(action)
            .args(args)
            .with_output(show_output || self.ui.debug());

        if !self.ui.has_color() {
            cmd = cmd.arg(flag("no-color"));
        }
        cmd
    }

    /// Runs an action and fails on any exit code not in `accepted`.
    async fn run(&self, action: &str, args: Vec<String>, show_output: bool, accepted: &[i32]) -> Result<i32> {
        let program = self
            .bin_path
            .clone()
            .ok_or_else(|| ProvisionError::binary(ENGINE_PRODUCT, &self.version, "binary not resolved"))?;
        let cmd = self.command(program, action, args, show_output);

        let code = self.runner.run(&cmd).await?;
        if accepted.contains(&code) {
            Ok(code)
        } else {
            Err(ProvisionError::Subprocess {
                action: action.to_string(),
                exit_code: code,
            }
            .into())
        }
    }

    async fn ensure_initialized(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.init().await
    }
}

/// Flags shared by plan, apply and destroy.
fn run_flags() -> Vec<String> {
    vec![
        flag_with("input", false),
        flag_with("lock", true),
        flag_with("lock-timeout", "0s"),
        flag_with("parallelism", PARALLELISM),
        flag_with("refresh", true),
    ]
}

/// Flags of plan.
#[must_use]
pub fn plan_args() -> Vec<String> {
    let mut args = vec![flag("detailed-exitcode")];
    args.extend(run_flags());
    args
}

/// Flags of apply and destroy.
#[must_use]
pub fn apply_args() -> Vec<String> {
    let mut args = vec![flag("auto-approve")];
    args.extend(run_flags());
    args
}

/// Flags of the bootstrap.
#[must_use]
pub fn init_args() -> Vec<String> {
    vec![
        flag("force-copy"),
        flag_with("input", false),
        flag_with("get", true),
    ]
}

#[async_trait]
impl Provisioner for InfrastructureProvisioner {
    fn name(&self) -> &'static str {
        "infrastructure"
    }

    fn applies_metadata(&self) -> bool {
        false
    }

    async fn init(&mut self) -> Result<()> {
        self.find_or_install().await?;
        self.write_inputs().await?;

        if !self.initialized {
            info!("Bootstrapping {} project in {}", ENGINE_PRODUCT, self.project_dir.display());
            self.run("init", init_args(), true, &[0]).await?;
            self.initialized = true;
        }

        self.state = LifecycleState::Initialized;
        Ok(())
    }

    async fn plan(&mut self) -> Result<bool> {
        self.ensure_initialized().await?;

        let code = self
            .run("plan", plan_args(), self.show_plan, &[0, PLAN_CHANGES_EXIT_CODE])
            .await?;
        self.state = LifecycleState::Planned;

        let changes = code == PLAN_CHANGES_EXIT_CODE;
        debug!("Infrastructure plan: changes pending = {changes}");
        Ok(changes)
    }

    async fn apply(&mut self) -> Result<ProvisionOutcome> {
        let changes = self.plan().await?;

        if changes && self.show_plan && !self.ui.ask(APPLY_PROMPT)? {
            self.ui.print(Level::Warn, "Infrastructure apply cancelled");
            return Ok(ProvisionOutcome::Cancelled);
        }

        self.run("apply", apply_args(), true, &[0]).await?;
        self.state = LifecycleState::Applied;
        Ok(ProvisionOutcome::Applied { had_changes: changes })
    }

    async fn destroy(&mut self) -> Result<()> {
        self.ensure_initialized().await?;

        self.run("destroy", apply_args(), true, &[0]).await?;
        self.state = LifecycleState::Destroyed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KestrelError;
    use crate::provisioner::command::MockCommandRunner;
    use crate::provisioner::installer::MockBinaryInstaller;
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

    fn found_installer() -> MockBinaryInstaller {
        let mut installer = MockBinaryInstaller::new();
        installer
            .expect_find()
            .returning(|_, _| Ok(PathBuf::from("/opt/terraform")));
        installer.expect_install().never();
        installer
    }

    fn provisioner(
        dir: &TempDir,
        ui: MockUi,
        runner: MockCommandRunner,
        installer: MockBinaryInstaller,
    ) -> InfrastructureProvisioner {
        let paths = ClusterPaths::resolve(Some(dir.path().join("home")), Some(dir.path().join("lab")), "lab")
            .expect("paths");
        InfrastructureProvisioner::new(&paths, config(), Arc::new(ui))
            .expect("provisioner")
            .with_runner(Arc::new(runner))
            .with_installer(Arc::new(installer))
    }

    fn action_is(action: &'static str) -> impl Fn(&EngineCommand) -> bool {
        move |cmd| cmd.action == action
    }

    #[test]
    fn test_argument_sets() {
        assert_eq!(init_args(), vec!["-force-copy", "-input=false", "-get=true"]);
        assert_eq!(
            plan_args(),
            vec![
                "-detailed-exitcode",
                "-input=false",
                "-lock=true",
                "-lock-timeout=0s",
                "-parallelism=10",
                "-refresh=true"
            ]
        );
        assert_eq!(apply_args()[0], "-auto-approve");
        assert_eq!(apply_args().len(), 6);
    }

    #[tokio::test]
    async fn test_init_writes_private_inputs_and_bootstraps_once() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(action_is("init"))
            .times(1)
            .returning(|_| Ok(0));

        let mut p = provisioner(&dir, ui(true), runner, found_installer());
        p.init().await.expect("init");
        std::fs::remove_file(p.project_dir().join(MAIN_FILE)).expect("remove");
        std::fs::remove_dir_all(p.project_dir().join("modules")).expect("remove module");
        p.init().await.expect("second init");

        assert_eq!(p.state(), LifecycleState::Initialized);
        let module = format!("{HOST_MODULE_DIR}/{MAIN_FILE}");
        for file in [VARIABLES_FILE, MAIN_FILE, module.as_str()] {
            let path = p.project_dir().join(file);
            assert!(path.exists(), "{file} regenerated");
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
                assert_eq!(mode & 0o777, 0o600);
            }
        }
        let variables = std::fs::read_to_string(p.project_dir().join(VARIABLES_FILE)).expect("read");
        assert!(variables.contains("name: lab"));
        let module = std::fs::read_to_string(p.project_dir().join(HOST_MODULE_DIR).join(MAIN_FILE)).expect("read");
        assert_eq!(module, HOST_MODULE);
    }

    #[tokio::test]
    async fn test_plan_exit_codes() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(action_is("init"))
            .times(1)
            .returning(|_| Ok(0));
        let mut codes = vec![2, 0, 1].into_iter();
        runner
            .expect_run()
            .withf(|cmd| cmd.action == "plan" && cmd.has_arg("-detailed-exitcode"))
            .times(3)
            .returning(move |_| Ok(codes.next().unwrap_or(0)));

        let mut p = provisioner(&dir, ui(true), runner, found_installer());
        assert!(p.plan().await.expect("changes"));
        assert!(!p.plan().await.expect("no changes"));

        let err = p.plan().await.unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
        assert!(matches!(
            err,
            KestrelError::Provision(ProvisionError::Subprocess { ref action, .. }) if action == "plan"
        ));
    }

    #[tokio::test]
    async fn test_apply_declined_is_cancelled() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner.expect_run().withf(action_is("init")).returning(|_| Ok(0));
        runner.expect_run().withf(action_is("plan")).returning(|_| Ok(2));
        runner.expect_run().withf(action_is("apply")).never();

        let mut ui = ui(true);
        ui.expect_ask()
            .withf(|prompt| prompt == "Proceed with terraform apply?")
            .times(1)
            .returning(|_| Ok(false));

        let mut p = provisioner(&dir, ui, runner, found_installer());
        let outcome = p.apply().await.expect("apply");

        assert_eq!(outcome, ProvisionOutcome::Cancelled);
        assert_eq!(p.state(), LifecycleState::Planned);
    }

    #[tokio::test]
    async fn test_apply_without_changes_skips_prompt() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner.expect_run().withf(action_is("init")).returning(|_| Ok(0));
        runner.expect_run().withf(action_is("plan")).returning(|_| Ok(0));
        runner
            .expect_run()
            .withf(|cmd| {
                cmd.action == "apply"
                    && cmd.args[0] == "apply"
                    && cmd.has_arg("-auto-approve")
                    && cmd.has_arg("-parallelism=10")
                    && cmd.has_arg("-no-color")
            })
            .times(1)
            .returning(|_| Ok(0));

        let mut ui = ui(false);
        ui.expect_ask().never();

        let mut p = provisioner(&dir, ui, runner, found_installer());
        let outcome = p.apply().await.expect("apply");

        assert_eq!(outcome, ProvisionOutcome::Applied { had_changes: false });
        assert_eq!(p.state(), LifecycleState::Applied);
    }

    #[tokio::test]
    async fn test_apply_with_hidden_plan_skips_prompt() {
        let dir = TempDir::new().expect("tempdir");
        let mut runner = MockCommandRunner::new();
        runner.expect_run().withf(action_is("init")).returning(|_| Ok(0));
        runner
            .expect_run()
            .withf(|cmd| cmd.action == "plan" && !cmd.show_output)
            .returning(|_| Ok(2));
        runner
            .expect_run()
            .withf(|cmd| cmd.action == "apply" && cmd.show_output)
            .times(1)
            .returning(|_| Ok(0));

        let mut ui = ui(true);
        ui.expect_ask().never();

        let mut p = provisioner(&dir, ui, runner, found_installer()).with_show_plan(false);
        let outcome = p.apply().await.expect("apply");

        assert_eq!(outcome, ProvisionOutcome::Applied { had_changes: true });
    }

    #[tokio::test]
    async fn test_missing_binary_is_installed() {
        let dir = TempDir::new().expect("tempdir");
        let mut installer = MockBinaryInstaller::new();
        installer
            .expect_find()
            .returning(|_, _| Err(ProvisionError::binary("terraform", "1.5.7", "not found").into()));
        installer
            .expect_install()
            .withf(|version, dir| version == "1.5.7" && dir.ends_with("share/terraform/1.5.7"))
            .times(1)
            .returning(|_, dir| Ok(dir.join("terraform")));

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.action == "init" && cmd.program.ends_with("share/terraform/1.5.7/terraform"))
            .returning(|_| Ok(0));
        runner.expect_run().withf(action_is("destroy")).times(1).returning(|_| Ok(0));

        let mut p = provisioner(&dir, ui(true), runner, installer);
        p.destroy().await.expect("destroy");

        assert_eq!(p.state(), LifecycleState::Destroyed);
    }

    #[tokio::test]
    async fn test_install_failure_is_fatal() {
        let dir = TempDir::new().expect("tempdir");
        let mut installer = MockBinaryInstaller::new();
        installer
            .expect_find()
            .returning(|_, _| Err(ProvisionError::binary("terraform", "1.5.7", "not found").into()));
        installer
            .expect_install()
            .times(1)
            .returning(|_, _| Err(KestrelError::internal("offline")));

        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        let mut p = provisioner(&dir, ui(true), runner, installer);
        let err = p.init().await.unwrap_err();

        assert!(matches!(
            err,
            KestrelError::Provision(ProvisionError::BinaryResolution { .. })
        ));
    }
}
