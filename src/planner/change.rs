//! Atomic configuration changes.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{ConfigPath, Value};

/// What happened at a path.
///
/// Ordered by disruptiveness, so the maximum over a set of changes is the
/// dominant action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// The path exists only in the new tree.
    Add,
    /// The path exists in both trees with different values.
    Modify,
    /// The path exists only in the old tree.
    Remove,
}

/// One atomic difference between two configuration trees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    /// Where the difference is.
    pub path: ConfigPath,
    /// What kind of difference it is.
    pub action: ChangeAction,
    /// Value in the old tree; absent for additions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value in the new tree; absent for removals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

impl Change {
    /// Creates an addition.
    #[must_use]
    pub const fn add(path: ConfigPath, value: Value) -> Self {
        Self {
            path,
            action: ChangeAction::Add,
            old_value: None,
            new_value: Some(value),
        }
    }

    /// Creates a modification.
    #[must_use]
    pub const fn modify(path: ConfigPath, old: Value, new: Value) -> Self {
        Self {
            path,
            action: ChangeAction::Modify,
            old_value: Some(old),
            new_value: Some(new),
        }
    }

    /// Creates a removal.
    #[must_use]
    pub const fn remove(path: ConfigPath, value: Value) -> Self {
        Self {
            path,
            action: ChangeAction::Remove,
            old_value: Some(value),
            new_value: None,
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Modify => write!(f, "modify"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old_value, &self.new_value) {
            (Some(old), Some(new)) if old.is_scalar() && new.is_scalar() => {
                write!(f, "~ {}: {old} -> {new}", self.path)
            }
            _ => {
                let symbol = match self.action {
                    ChangeAction::Add => '+',
                    ChangeAction::Modify => '~',
                    ChangeAction::Remove => '-',
                };
                write!(f, "{symbol} {}", self.path)
            }
        }
    }
}
