//! Change classification: diff plus severity policy.

use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::config::{ConfigHasher, ConfigTree};
use crate::error::{ClassifyError, Result};

use super::change::Change;
use super::diff::DiffEngine;
use super::event::group_events;
use super::plan::ClusterPlan;
use super::policy::{SeverityClass, SeverityPolicy};
use super::schema::TreeSchema;

/// A change with its assigned severity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedChange {
    /// The change.
    #[serde(flatten)]
    pub change: Change,
    /// Severity assigned by the policy.
    pub severity: SeverityClass,
}

/// Ordered, classified changes between two trees.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Changes in diff order.
    pub changes: Vec<ClassifiedChange>,
    /// True when there was no old tree.
    pub first_apply: bool,
}

/// Diffs two configuration trees and assigns a severity to every change.
#[derive(Debug, Clone)]
pub struct ChangeClassifier {
    engine: DiffEngine,
    policy: SeverityPolicy,
}

impl ChangeClassifier {
    /// Creates a classifier from a schema and a policy.
    #[must_use]
    pub const fn new(schema: TreeSchema, policy: SeverityPolicy) -> Self {
        Self {
            engine: DiffEngine::new(schema),
            policy,
        }
    }

    /// Creates a classifier for cluster configurations with the built-in policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in schema or policy is malformed.
    pub fn for_cluster() -> Result<Self> {
        Ok(Self::new(TreeSchema::cluster()?, SeverityPolicy::builtin()?))
    }

    /// Returns the policy.
    #[must_use]
    pub const fn policy(&self) -> &SeverityPolicy {
        &self.policy
    }

    /// Classifies the changes from `old` to `new`.
    ///
    /// Without an old tree this is a full create: every leaf is an addition
    /// with [`SeverityClass::Scale`] and the policy is not consulted.
    ///
    /// # Errors
    ///
    /// Returns the diff errors, or [`ClassifyError::Forbidden`] naming every
    /// forbidden path.
    pub fn classify(&self, old: Option<&ConfigTree>, new: &ConfigTree) -> Result<Classification> {
        let first_apply = old.is_none();
        let changes: Vec<ClassifiedChange> = self
            .engine
            .diff(old, new)?
            .into_iter()
            .map(|change| {
                let severity = if first_apply {
                    SeverityClass::Scale
                } else {
                    self.policy.severity_in(&change, self.engine.schema())
                };
                ClassifiedChange { change, severity }
            })
            .collect();

        let forbidden: Vec<String> = changes
            .iter()
            .filter(|c| c.severity == SeverityClass::Forbidden)
            .map(|c| c.change.path.to_string())
            .collect();

        if !forbidden.is_empty() {
            warn!("Refusing {} forbidden change(s)", forbidden.len());
            return Err(ClassifyError::Forbidden { paths: forbidden }.into());
        }

        Ok(Classification {
            changes,
            first_apply,
        })
    }

    /// Classifies and groups the changes into a plan.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::classify`].
    pub fn plan(
        &self,
        old: Option<&ConfigTree>,
        new: &ConfigTree,
        working_dir: &Path,
    ) -> Result<ClusterPlan> {
        let classification = self.classify(old, new)?;
        let config_hash = ConfigHasher::new().hash_tree(new);
        let first_apply = classification.first_apply;
        let events = group_events(classification.changes, working_dir, first_apply);

        let plan = ClusterPlan::new(events, config_hash, first_apply);
        info!(
            "Classified {} change(s) in {} section(s), severity {}",
            plan.change_count(),
            plan.events.len(),
            plan.severity()
        );
        Ok(plan)
    }
}
