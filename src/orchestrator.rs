//! Orchestrator driving the cluster lifecycle pipeline.
//!
//! A pipeline run locks the working directory, loads the applied state,
//! classifies the new configuration against it and only then touches any
//! provisioner. The applied state changes after a fully successful run, and
//! as soon as a recreate has destroyed the old cluster.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{ClusterConfig, ConfigTree};
use crate::error::{PipelineError, Result};
use crate::planner::{ChangeClassifier, ClusterPlan, RequiredAction, SeverityClass};
use crate::provisioner::{ProvisionOutcome, Provisioner};
use crate::state::{AppliedState, HistoryEntry, Operation, StateStore, generate_holder_id};
use crate::ui::{Level, Ui};

/// Confirmation asked before recreating the cluster.
const RECREATE_PROMPT: &str = "Destroy and recreate the cluster?";

/// Confirmation asked before destroying the cluster.
const DESTROY_PROMPT: &str = "Destroy the cluster? This cannot be undone.";

/// Result of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PipelineOutcome {
    /// The configuration matches the applied state.
    NoChanges,
    /// The configuration was recorded without provisioning.
    Recorded {
        /// Severity of the plan.
        severity: SeverityClass,
    },
    /// The provisioners applied the configuration.
    Applied {
        /// Severity of the plan.
        severity: SeverityClass,
        /// Whether the cluster was destroyed first.
        recreated: bool,
    },
    /// The operator declined a confirmation.
    Cancelled,
    /// The cluster was torn down.
    Destroyed,
}

impl std::fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChanges => write!(f, "No changes required - cluster is up to date"),
            Self::Recorded { severity } => {
                write!(f, "Configuration recorded ({severity} changes, nothing to provision)")
            }
            Self::Applied {
                severity,
                recreated: true,
            } => write!(f, "Cluster recreated ({severity})"),
            Self::Applied { severity, .. } => write!(f, "Cluster applied ({severity})"),
            Self::Cancelled => write!(f, "Cancelled by operator"),
            Self::Destroyed => write!(f, "Cluster destroyed"),
        }
    }
}

/// Result of a provisioner plan run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionerPlan {
    /// Provisioner name.
    pub name: &'static str,
    /// Whether the engine reported pending changes.
    pub changes: bool,
}

/// Drives classification, confirmation and provisioning.
pub struct Orchestrator<'a, S: StateStore> {
    /// State store of the working directory.
    state_store: &'a S,
    /// Change classifier.
    classifier: ChangeClassifier,
    /// Operator interface.
    ui: Arc<dyn Ui>,
    /// Cluster working directory.
    working_dir: PathBuf,
    /// Whether recreation was acknowledged up front.
    allow_recreate: bool,
    /// Lock holder identifier.
    holder: String,
    /// Receives the classified plan before anything is provisioned.
    plan_report: Option<Box<dyn Fn(&ClusterPlan) + Send + Sync + 'a>>,
}

impl<'a, S: StateStore> Orchestrator<'a, S> {
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(
        state_store: &'a S,
        classifier: ChangeClassifier,
        ui: Arc<dyn Ui>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state_store,
            classifier,
            ui,
            working_dir: working_dir.into(),
            allow_recreate: false,
            holder: generate_holder_id(),
            plan_report: None,
        }
    }

    /// Hands the plan classified under the lock to `report` before an apply
    /// acts on it.
    #[must_use]
    pub fn with_plan_report(mut self, report: impl Fn(&ClusterPlan) + Send + Sync + 'a) -> Self {
        self.plan_report = Some(Box::new(report));
        self
    }

    /// Acknowledges recreate-class plans up front.
    #[must_use]
    pub const fn with_allow_recreate(mut self, allow_recreate: bool) -> Self {
        self.allow_recreate = allow_recreate;
        self
    }

    /// Classifies a configuration against the applied state.
    ///
    /// Takes no lock and runs no provisioner.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or classification fails.
    pub async fn plan(&self, config: &ClusterConfig) -> Result<ClusterPlan> {
        let state = self.load_state(config).await?;
        self.classify(&state, config)
    }

    /// Classifies a configuration, then asks every provisioner for its plan.
    ///
    /// # Errors
    ///
    /// Returns an error if classification or a provisioner plan fails.
    pub async fn preview<P: Provisioner>(
        &self,
        config: &ClusterConfig,
        provisioners: &mut [P],
    ) -> Result<(ClusterPlan, Vec<ProvisionerPlan>)> {
        self.locked(async {
            let state = self.load_state(config).await?;
            let plan = self.classify(&state, config)?;

            let mut results = Vec::with_capacity(provisioners.len());
            for p in provisioners.iter_mut() {
                p.init().await?;
                let changes = p.plan().await?;
                debug!("{}: changes pending = {changes}", p.name());
                results.push(ProvisionerPlan {
                    name: p.name(),
                    changes,
                });
            }
            Ok((plan, results))
        })
        .await
    }

    /// Applies a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere, classification fails,
    /// recreation is not acknowledged, or a provisioner fails.
    pub async fn apply<P: Provisioner>(
        &self,
        config: &ClusterConfig,
        provisioners: &mut [P],
    ) -> Result<PipelineOutcome> {
        info!("Starting apply for cluster {}", config.name());
        self.locked(self.apply_locked(config, provisioners)).await
    }

    /// Destroys the cluster through every provisioner, in reverse order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere or a provisioner fails.
    pub async fn destroy<P: Provisioner>(
        &self,
        config: &ClusterConfig,
        provisioners: &mut [P],
    ) -> Result<PipelineOutcome> {
        info!("Starting destroy for cluster {}", config.name());
        self.locked(self.destroy_locked(config, provisioners)).await
    }

    /// Runs `work` while holding the working-directory lock.
    async fn locked<T>(&self, work: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        let lock = self.state_store.acquire_lock(&self.holder).await?;
        let result = work.await;

        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release lock {}: {e}", lock.lock_id);
        }
        result
    }

    async fn load_state(&self, config: &ClusterConfig) -> Result<AppliedState> {
        Ok(self
            .state_store
            .load()
            .await?
            .unwrap_or_else(|| AppliedState::new(config.name())))
    }

    fn classify(&self, state: &AppliedState, config: &ClusterConfig) -> Result<ClusterPlan> {
        let old = state.applied_tree()?;
        let new = ConfigTree::from_config(config)?;
        self.classifier.plan(old.as_ref(), &new, &self.working_dir)
    }

    async fn apply_locked<P: Provisioner>(
        &self,
        config: &ClusterConfig,
        provisioners: &mut [P],
    ) -> Result<PipelineOutcome> {
        let mut state = self.load_state(config).await?;
        let plan = self.classify(&state, config)?;
        if let Some(report) = &self.plan_report {
            report(&plan);
        }

        let severity = plan.severity();
        let action = plan.required_action();
        info!("Plan severity {severity}, action {action}");

        let mut targets: Vec<&mut P> = match action {
            RequiredAction::Nothing => return Ok(PipelineOutcome::NoChanges),
            RequiredAction::RecordOnly => {
                let targets: Vec<&mut P> =
                    provisioners.iter_mut().filter(|p| p.applies_metadata()).collect();
                if targets.is_empty() {
                    state.set_applied(config.clone(), &plan.config_hash);
                    state.add_history(HistoryEntry::new(Operation::Record, &plan.config_hash, plan.sections()));
                    self.state_store.save(&state).await?;
                    return Ok(PipelineOutcome::Recorded { severity });
                }
                targets
            }
            RequiredAction::Apply => provisioners.iter_mut().collect(),
            RequiredAction::Recreate => {
                if !self.acknowledge_recreate(&plan)? {
                    return Ok(PipelineOutcome::Cancelled);
                }
                provisioners.iter_mut().collect()
            }
        };
        let operation = match action {
            RequiredAction::Recreate => Operation::Recreate,
            _ if plan.first_apply => Operation::Create,
            _ => Operation::Update,
        };

        let result = self.provision(&mut targets, operation, &mut state).await;

        match result {
            Ok(true) => {
                state.set_applied(config.clone(), &plan.config_hash);
                state.add_history(HistoryEntry::new(operation, &plan.config_hash, plan.sections()));
                self.state_store.save(&state).await?;
                info!("Cluster {} applied", config.name());
                Ok(PipelineOutcome::Applied {
                    severity,
                    recreated: operation == Operation::Recreate,
                })
            }
            Ok(false) => Ok(PipelineOutcome::Cancelled),
            Err(e) => {
                self.record_failure(&mut state, operation, &plan.config_hash, plan.sections(), &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    /// Runs the target provisioners. Returns false if the operator cancelled.
    ///
    /// A recreate destroys every target in reverse order first and then
    /// forgets the applied configuration, so a run that stops afterwards
    /// leaves a state that plans a first apply.
    async fn provision<P: Provisioner>(
        &self,
        targets: &mut [&mut P],
        operation: Operation,
        state: &mut AppliedState,
    ) -> Result<bool> {
        for p in targets.iter_mut() {
            p.init().await?;
        }

        if operation == Operation::Recreate {
            for p in targets.iter_mut().rev() {
                info!("Destroying {}", p.name());
                p.destroy().await?;
            }
            let hash = state.config_hash.clone();
            state.clear_applied();
            state.add_history(HistoryEntry::new(Operation::Destroy, &hash, Vec::new()));
            self.state_store.save(state).await?;
        }

        for p in targets.iter_mut() {
            info!("Applying {}", p.name());
            match p.apply().await? {
                ProvisionOutcome::Applied { had_changes } => {
                    debug!("{} applied (changes: {had_changes})", p.name());
                }
                ProvisionOutcome::Cancelled => {
                    warn!("{} cancelled by operator", p.name());
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn acknowledge_recreate(&self, plan: &ClusterPlan) -> Result<bool> {
        let paths = plan.recreate_paths();
        if self.allow_recreate {
            info!("Recreation acknowledged by flag");
            return Ok(true);
        }
        if !self.ui.is_interactive() {
            return Err(PipelineError::RecreateNotAcknowledged { paths }.into());
        }

        self.ui.print(
            Level::Warn,
            &format!("These changes require recreating the cluster: {}", paths.join(", ")),
        );
        self.ui.ask(RECREATE_PROMPT)
    }

    async fn destroy_locked<P: Provisioner>(
        &self,
        config: &ClusterConfig,
        provisioners: &mut [P],
    ) -> Result<PipelineOutcome> {
        let mut state = self.load_state(config).await?;

        if !self.ui.ask(DESTROY_PROMPT)? {
            return Ok(PipelineOutcome::Cancelled);
        }

        let result: Result<()> = async {
            for p in provisioners.iter_mut().rev() {
                info!("Destroying {}", p.name());
                p.destroy().await?;
            }
            Ok(())
        }
        .await;

        let hash = state.config_hash.clone();
        let sections = Vec::new();
        match result {
            Ok(()) => {
                state.clear_applied();
                state.add_history(HistoryEntry::new(Operation::Destroy, &hash, sections));
                self.state_store.save(&state).await?;
                Ok(PipelineOutcome::Destroyed)
            }
            Err(e) => {
                self.record_failure(&mut state, Operation::Destroy, &hash, sections, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn record_failure(
        &self,
        state: &mut AppliedState,
        operation: Operation,
        config_hash: &str,
        sections: Vec<String>,
        message: &str,
    ) {
        error!("{operation} failed: {message}");
        state.add_history(HistoryEntry::failed(operation, config_hash, sections, message));
        if let Err(e) = self.state_store.save(state).await {
            error!("Failed to save state: {e}");
        }
    }
}
