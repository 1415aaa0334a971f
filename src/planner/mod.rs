//! Planning module for cluster changes.
//!
//! This module compares the applied and desired configuration trees,
//! classifies every change by severity and groups the result into events.

mod change;
mod classifier;
mod diff;
mod event;
mod plan;
mod policy;
mod schema;

pub use change::{Change, ChangeAction};
pub use classifier::{ChangeClassifier, ClassifiedChange, Classification};
pub use diff::DiffEngine;
pub use event::{Event, EventType, group_events};
pub use plan::{ClusterPlan, RequiredAction};
pub use policy::{PolicyRule, SeverityClass, SeverityPolicy};
pub use schema::TreeSchema;
