//! Events: classified changes grouped by top-level configuration section.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::change::ChangeAction;
use super::classifier::ClassifiedChange;
use super::policy::SeverityClass;

/// Kind of an event, derived from its dominant severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Part of a first-ever apply.
    Create,
    /// Metadata-only changes.
    Info,
    /// Instances added or removed.
    Scale,
    /// Resources reconfigured in place.
    Reconfigure,
    /// Resources destroyed and created again.
    Recreate,
    /// Disallowed changes.
    Forbidden,
}

impl EventType {
    /// Derives the event type.
    #[must_use]
    pub const fn derive(severity: SeverityClass, first_apply: bool) -> Self {
        if first_apply {
            return Self::Create;
        }
        match severity {
            SeverityClass::None | SeverityClass::Info => Self::Info,
            SeverityClass::Scale => Self::Scale,
            SeverityClass::Reconfigure => Self::Reconfigure,
            SeverityClass::Recreate => Self::Recreate,
            SeverityClass::Forbidden => Self::Forbidden,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Info => "info",
            Self::Scale => "scale",
            Self::Reconfigure => "reconfigure",
            Self::Recreate => "recreate",
            Self::Forbidden => "forbidden",
        };
        write!(f, "{name}")
    }
}

/// Related changes with their dominant action and severity.
///
/// Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    event_type: EventType,
    section: String,
    changes: Vec<ClassifiedChange>,
    action: ChangeAction,
    severity: SeverityClass,
    path: PathBuf,
    message: String,
}

impl Event {
    /// Builds an event from a non-empty group of changes.
    ///
    /// Returns `None` for an empty group.
    #[must_use]
    pub fn new(
        section: impl Into<String>,
        changes: Vec<ClassifiedChange>,
        working_dir: &Path,
        first_apply: bool,
    ) -> Option<Self> {
        let action = changes.iter().map(|c| c.change.action).max()?;
        let severity = changes
            .iter()
            .map(|c| c.severity)
            .max()
            .unwrap_or_default();
        let section = section.into();
        let event_type = EventType::derive(severity, first_apply);
        let message = format!("{section}: {} change(s), {event_type}", changes.len());

        Some(Self {
            event_type,
            section,
            changes,
            action,
            severity,
            path: working_dir.to_path_buf(),
            message,
        })
    }

    /// Returns the event type.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Returns the top-level section.
    #[must_use]
    pub fn section(&self) -> &str {
        &self.section
    }

    /// Returns the grouped changes.
    #[must_use]
    pub fn changes(&self) -> &[ClassifiedChange] {
        &self.changes
    }

    /// Returns the most disruptive action.
    #[must_use]
    pub const fn action(&self) -> ChangeAction {
        self.action
    }

    /// Returns the highest severity.
    #[must_use]
    pub const fn severity(&self) -> SeverityClass {
        self.severity
    }

    /// Returns the working directory the event applies to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the human-readable summary.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  {}", self.message)?;
        for classified in &self.changes {
            writeln!(f, "    {} [{}]", classified.change, classified.severity)?;
        }
        Ok(())
    }
}

/// Groups changes by top-level section, in order of first appearance.
#[must_use]
pub fn group_events(
    changes: Vec<ClassifiedChange>,
    working_dir: &Path,
    first_apply: bool,
) -> Vec<Event> {
    let mut groups: Vec<(String, Vec<ClassifiedChange>)> = Vec::new();

    for change in changes {
        let section = change.change.path.section().unwrap_or_default().to_string();
        match groups.iter_mut().find(|(name, _)| *name == section) {
            Some((_, group)) => group.push(change),
            None => groups.push((section, vec![change])),
        }
    }

    groups
        .into_iter()
        .filter_map(|(section, group)| Event::new(section, group, working_dir, first_apply))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPath, Value};
    use crate::planner::change::Change;

    fn classified(section: &str, field: &str, action: ChangeAction, severity: SeverityClass) -> ClassifiedChange {
        let path = ConfigPath::root().key(section).key(field);
        let change = match action {
            ChangeAction::Add => Change::add(path, Value::Integer(1)),
            ChangeAction::Modify => Change::modify(path, Value::Integer(1), Value::Integer(2)),
            ChangeAction::Remove => Change::remove(path, Value::Integer(1)),
        };
        ClassifiedChange { change, severity }
    }

    #[test]
    fn test_grouping_by_section_in_order() {
        let changes = vec![
            classified("nodes", "a", ChangeAction::Add, SeverityClass::Scale),
            classified("kubernetes", "version", ChangeAction::Modify, SeverityClass::Reconfigure),
            classified("nodes", "b", ChangeAction::Remove, SeverityClass::Scale),
        ];
        let events = group_events(changes, Path::new("/work"), false);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].section(), "nodes");
        assert_eq!(events[0].changes().len(), 2);
        assert_eq!(events[0].action(), ChangeAction::Remove);
        assert_eq!(events[0].event_type(), EventType::Scale);
        assert_eq!(events[1].section(), "kubernetes");
        assert_eq!(events[1].path(), Path::new("/work"));
    }

    #[test]
    fn test_dominant_severity_is_monotonic() {
        let base = vec![
            classified("nodes", "a", ChangeAction::Modify, SeverityClass::Info),
            classified("nodes", "b", ChangeAction::Modify, SeverityClass::Reconfigure),
        ];
        let before = Event::new("nodes", base.clone(), Path::new("/work"), false).expect("event");

        let mut grown = base;
        grown.push(classified("nodes", "c", ChangeAction::Add, SeverityClass::Scale));
        let after = Event::new("nodes", grown, Path::new("/work"), false).expect("event");

        assert_eq!(before.severity(), SeverityClass::Reconfigure);
        assert!(after.severity() >= before.severity());
    }

    #[test]
    fn test_empty_group_has_no_event() {
        assert!(Event::new("nodes", Vec::new(), Path::new("/work"), false).is_none());
    }

    #[test]
    fn test_first_apply_events_are_create() {
        let changes = vec![classified("cluster", "name", ChangeAction::Add, SeverityClass::Scale)];
        let events = group_events(changes, Path::new("/work"), true);

        assert_eq!(events[0].event_type(), EventType::Create);
        assert_eq!(events[0].message(), "cluster: 1 change(s), create");
    }
}
