//! State types for tracking the applied cluster configuration.
//!
//! The applied configuration is the baseline of the next classification. It
//! changes only after a fully successful pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, ConfigTree};
use crate::error::Result;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete state of a cluster working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedState {
    /// State format version.
    pub version: String,
    /// Cluster name.
    pub cluster: String,
    /// Last successfully applied configuration.
    #[serde(default)]
    pub applied: Option<ClusterConfig>,
    /// Hash of the applied configuration tree.
    #[serde(default)]
    pub config_hash: String,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Pipeline history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// A single entry in the pipeline history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Hash of the configuration the run used.
    pub config_hash: String,
    /// Sections that changed.
    pub sections: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of pipeline operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// First apply of a cluster.
    Create,
    /// In-place apply of changes.
    Update,
    /// Destroy followed by a full apply.
    Recreate,
    /// Configuration recorded without provisioning.
    Record,
    /// Teardown.
    Destroy,
}

impl AppliedState {
    /// Creates an empty state for a cluster.
    #[must_use]
    pub fn new(cluster: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            cluster: cluster.to_string(),
            applied: None,
            config_hash: String::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Returns the tree of the applied configuration, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored configuration cannot be normalized.
    pub fn applied_tree(&self) -> Result<Option<ConfigTree>> {
        self.applied.as_ref().map(ConfigTree::from_config).transpose()
    }

    /// Records a successfully applied configuration.
    pub fn set_applied(&mut self, config: ClusterConfig, config_hash: &str) {
        self.applied = Some(config);
        self.config_hash = config_hash.to_string();
        self.last_updated = Utc::now();
    }

    /// Forgets the applied configuration after a teardown.
    pub fn clear_applied(&mut self) {
        self.applied = None;
        self.config_hash.clear();
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, dropping the oldest beyond the cap.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.last_updated = Utc::now();
    }

    /// Returns the most recent history entry.
    #[must_use]
    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }
}

impl HistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: Operation, config_hash: &str, sections: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            sections,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(operation: Operation, config_hash: &str, sections: Vec<String>, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            sections,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Recreate => "recreate",
            Self::Record => "record",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClusterConfig {
        serde_yaml::from_str(
            "cluster: {name: lab}\nhosts: [{name: localhost}]\nnetwork: {cidr: 10.0.0.0/24}\nnodes: {master: [{id: m1}]}\nkubernetes: {version: v1.28.6}\n",
        )
        .expect("config")
    }

    #[test]
    fn test_history_is_capped() {
        let mut state = AppliedState::new("lab");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(Operation::Update, &i.to_string(), Vec::new()));
        }

        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
        assert_eq!(state.last_entry().map(|e| e.config_hash.as_str()), Some("104"));
    }

    #[test]
    fn test_applied_tree() {
        let mut state = AppliedState::new("lab");
        assert!(state.applied_tree().expect("tree").is_none());

        state.set_applied(config(), "abc");
        let tree = state.applied_tree().expect("tree").expect("applied");
        assert!(tree.canonical_json().contains("\"name\":\"lab\""));

        state.clear_applied();
        assert!(state.applied.is_none());
        assert!(state.config_hash.is_empty());
    }

    #[test]
    fn test_failed_entry() {
        let entry = HistoryEntry::failed(Operation::Create, "abc", vec!["nodes".into()], "boom");

        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("boom"));
        assert_eq!(entry.operation.to_string(), "create");
    }
}
