//! Cluster plan types.
//!
//! A [`ClusterPlan`] is the fully classified result handed to the
//! orchestrator: events per section plus the summary that decides which
//! pipeline runs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::event::Event;
use super::policy::SeverityClass;

/// What the orchestrator has to do for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredAction {
    /// Nothing changed.
    Nothing,
    /// Only the recorded configuration changes.
    RecordOnly,
    /// Provisioners apply the new configuration.
    Apply,
    /// Everything is destroyed and applied again.
    Recreate,
}

impl std::fmt::Display for RequiredAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Nothing => "nothing",
            Self::RecordOnly => "record only",
            Self::Apply => "apply",
            Self::Recreate => "recreate",
        };
        write!(f, "{s}")
    }
}

/// A classified cluster plan.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the new configuration.
    pub config_hash: String,
    /// True when no configuration was applied before.
    pub first_apply: bool,
    /// Events, one per changed section.
    pub events: Vec<Event>,
}

impl ClusterPlan {
    /// Creates a plan.
    #[must_use]
    pub fn new(events: Vec<Event>, config_hash: String, first_apply: bool) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash,
            first_apply,
            events,
        }
    }

    /// Returns true if the plan has no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns the total number of changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.events.iter().map(|e| e.changes().len()).sum()
    }

    /// Returns the highest severity over every event.
    #[must_use]
    pub fn severity(&self) -> SeverityClass {
        self.events
            .iter()
            .map(Event::severity)
            .max()
            .unwrap_or_default()
    }

    /// Returns the paths of recreate-class changes.
    #[must_use]
    pub fn recreate_paths(&self) -> Vec<String> {
        self.events
            .iter()
            .flat_map(Event::changes)
            .filter(|c| c.severity >= SeverityClass::Recreate)
            .map(|c| c.change.path.to_string())
            .collect()
    }

    /// Returns the names of the changed sections.
    #[must_use]
    pub fn sections(&self) -> Vec<String> {
        self.events.iter().map(|e| e.section().to_string()).collect()
    }

    /// Decides what the orchestrator has to do.
    #[must_use]
    pub fn required_action(&self) -> RequiredAction {
        if self.is_empty() {
            return RequiredAction::Nothing;
        }
        if self.first_apply {
            return RequiredAction::Apply;
        }
        match self.severity() {
            SeverityClass::None | SeverityClass::Info => RequiredAction::RecordOnly,
            SeverityClass::Scale | SeverityClass::Reconfigure => RequiredAction::Apply,
            SeverityClass::Recreate | SeverityClass::Forbidden => RequiredAction::Recreate,
        }
    }
}

impl std::fmt::Display for ClusterPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.events.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(
            f,
            "Cluster plan ({} change(s), severity: {}, action: {}):",
            self.change_count(),
            self.severity(),
            self.required_action()
        )?;
        for event in &self.events {
            write!(f, "{event}")?;
        }

        Ok(())
    }
}
