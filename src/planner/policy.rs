//! Severity classes and the policy table that assigns them.
//!
//! The policy is configuration: an ordered list of path-pattern rules loaded
//! from YAML. The first rule matching a change's path and action decides its
//! severity. An added or removed subtree without a rule of its own takes the
//! highest severity found among its descendants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::config::{ConfigPath, PathPattern, Value};
use crate::error::{ConfigError, KestrelError, Result};

use super::change::{Change, ChangeAction};
use super::schema::TreeSchema;

/// Built-in policy table.
const DEFAULT_POLICY: &str = include_str!("default_policy.yaml");

/// Operational impact of a change, totally ordered.
///
/// Combining severities takes the maximum.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SeverityClass {
    /// No operational impact.
    #[default]
    None,
    /// Recorded only.
    Info,
    /// Instances are added or removed.
    Scale,
    /// Running resources are reconfigured in place.
    Reconfigure,
    /// Resources are destroyed and created again.
    Recreate,
    /// Not allowed at all.
    Forbidden,
}

impl fmt::Display for SeverityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Info => "info",
            Self::Scale => "scale",
            Self::Reconfigure => "reconfigure",
            Self::Recreate => "recreate",
            Self::Forbidden => "forbidden",
        };
        write!(f, "{name}")
    }
}

/// One row of the policy table.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    /// Paths the rule applies to.
    pub path: PathPattern,
    /// Actions the rule applies to; empty means every action.
    #[serde(default)]
    pub actions: Vec<ChangeAction>,
    /// Severity assigned to matching changes.
    pub severity: SeverityClass,
}

impl PolicyRule {
    /// Returns true if the rule applies to the change.
    #[must_use]
    pub fn applies_to(&self, change: &Change) -> bool {
        self.matches(&change.path, change.action)
    }

    fn matches(&self, path: &ConfigPath, action: ChangeAction) -> bool {
        (self.actions.is_empty() || self.actions.contains(&action)) && self.path.matches(path)
    }
}

/// Ordered severity policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityPolicy {
    /// Severity of changes no rule matches.
    #[serde(default = "default_severity")]
    pub default_severity: SeverityClass,
    /// Rules in priority order.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

const fn default_severity() -> SeverityClass {
    SeverityClass::Reconfigure
}

impl SeverityPolicy {
    /// Returns the built-in policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded table is malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(DEFAULT_POLICY)
    }

    /// Parses a policy from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML or a path pattern is invalid.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let policy: Self = serde_yaml::from_str(content).map_err(|e| {
            KestrelError::Config(ConfigError::ParseError {
                message: format!("Invalid severity policy: {e}"),
                location: None,
            })
        })?;
        debug!("Loaded severity policy with {} rule(s)", policy.rules.len());
        Ok(policy)
    }

    /// Loads a policy file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading severity policy from: {}", path.display());

        if !path.exists() {
            return Err(KestrelError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            KestrelError::Config(ConfigError::ParseError { message, .. }) => {
                KestrelError::Config(ConfigError::ParseError {
                    message,
                    location: Some(path.display().to_string()),
                })
            }
            other => other,
        })
    }

    /// Returns the severity of a change from the rule matching its own path.
    #[must_use]
    pub fn severity_of(&self, change: &Change) -> SeverityClass {
        self.rule_severity(&change.path, change.action)
            .unwrap_or(self.default_severity)
    }

    /// Returns the severity of a change, looking into added or removed subtrees.
    ///
    /// A rule matching the change's own path decides. Otherwise an added or
    /// removed map or list takes the highest severity of its children, each
    /// classified as the same action at its own path. List children are
    /// addressed the way the diff addresses them.
    #[must_use]
    pub fn severity_in(&self, change: &Change, schema: &TreeSchema) -> SeverityClass {
        match change.action {
            ChangeAction::Modify => self.severity_of(change),
            ChangeAction::Add => {
                self.subtree_severity(&change.path, change.action, change.new_value.as_ref(), schema)
            }
            ChangeAction::Remove => {
                self.subtree_severity(&change.path, change.action, change.old_value.as_ref(), schema)
            }
        }
    }

    fn rule_severity(&self, path: &ConfigPath, action: ChangeAction) -> Option<SeverityClass> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path, action))
            .map(|rule| rule.severity)
    }

    fn subtree_severity(
        &self,
        path: &ConfigPath,
        action: ChangeAction,
        value: Option<&Value>,
        schema: &TreeSchema,
    ) -> SeverityClass {
        if let Some(severity) = self.rule_severity(path, action) {
            return severity;
        }

        let children: Vec<(ConfigPath, &Value)> = match value {
            Some(Value::Map(map)) => map.iter().map(|(key, v)| (path.key(key), v)).collect(),
            Some(Value::List(items)) => {
                let key = schema.identity_key(path);
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let identity = key.and_then(|key| {
                            item.as_map().and_then(|map| map.get(key)).and_then(Value::as_identity)
                        });
                        let child = identity.map_or_else(|| path.index(i), |id| path.id(&id));
                        (child, item)
                    })
                    .collect()
            }
            _ => Vec::new(),
        };

        children
            .into_iter()
            .map(|(child, v)| self.subtree_severity(&child, action, Some(v), schema))
            .max()
            .unwrap_or(self.default_severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPath, Value};

    fn path(segments: &[&str]) -> ConfigPath {
        segments.iter().fold(ConfigPath::root(), |p, s| p.key(s))
    }

    fn worker(id: &str) -> ConfigPath {
        path(&["nodes", "worker"]).id(id)
    }

    fn modify(path: ConfigPath) -> Change {
        Change::modify(path, Value::Integer(1), Value::Integer(2))
    }

    #[test]
    fn test_severity_order() {
        assert!(SeverityClass::None < SeverityClass::Info);
        assert!(SeverityClass::Info < SeverityClass::Scale);
        assert!(SeverityClass::Scale < SeverityClass::Reconfigure);
        assert!(SeverityClass::Reconfigure < SeverityClass::Recreate);
        assert!(SeverityClass::Recreate < SeverityClass::Forbidden);
        assert_eq!(
            SeverityClass::Scale.max(SeverityClass::Recreate),
            SeverityClass::Recreate
        );
    }

    #[test]
    fn test_builtin_policy() {
        let policy = SeverityPolicy::builtin().expect("policy");

        let add_worker = Change::add(worker("w3"), Value::Map(Default::default()));
        assert_eq!(policy.severity_of(&add_worker), SeverityClass::Scale);

        let remove_worker = Change::remove(worker("w1"), Value::Map(Default::default()));
        assert_eq!(policy.severity_of(&remove_worker), SeverityClass::Scale);

        assert_eq!(
            policy.severity_of(&modify(worker("w1").key("cpu"))),
            SeverityClass::Reconfigure
        );
        assert_eq!(
            policy.severity_of(&modify(path(&["kubernetes", "networkPlugin"]))),
            SeverityClass::Recreate
        );
        assert_eq!(
            policy.severity_of(&modify(path(&["cluster", "name"]))),
            SeverityClass::Forbidden
        );
        assert_eq!(
            policy.severity_of(&modify(worker("w1").key("labels").key("zone"))),
            SeverityClass::Info
        );
    }

    #[test]
    fn test_unmatched_change_takes_default() {
        let policy = SeverityPolicy::builtin().expect("policy");
        assert_eq!(
            policy.severity_of(&modify(path(&["kubernetes", "version"]))),
            SeverityClass::Reconfigure
        );
    }

    #[test]
    fn test_first_rule_wins_and_actions_filter() {
        let policy = SeverityPolicy::from_yaml(
            r"
defaultSeverity: info
rules:
  - path: nodes.worker[*]
    actions: [remove]
    severity: recreate
  - path: nodes.worker[*]
    severity: scale
  - path: nodes.**
    severity: forbidden
",
        )
        .expect("policy");

        let remove = Change::remove(worker("w1"), Value::Integer(0));
        let add = Change::add(worker("w1"), Value::Integer(0));
        assert_eq!(policy.severity_of(&remove), SeverityClass::Recreate);
        assert_eq!(policy.severity_of(&add), SeverityClass::Scale);
        assert_eq!(policy.severity_of(&modify(worker("w1").key("cpu"))), SeverityClass::Forbidden);
        assert_eq!(policy.severity_of(&modify(path(&["cluster"]))), SeverityClass::Info);
    }

    fn subtree(yaml: &str) -> Value {
        crate::config::ConfigTree::from_yaml(yaml).expect("tree").root().clone()
    }

    #[test]
    fn test_removed_subtree_takes_highest_descendant_rule() {
        let policy = SeverityPolicy::builtin().expect("policy");
        let schema = TreeSchema::cluster().expect("schema");
        let load_balancer = subtree(
            "vip: 192.168.113.5\nvirtualRouterId: 51\ninstances:\n  - id: lb1\n  - id: lb2\n",
        );

        let remove = Change::remove(path(&["loadBalancer"]), load_balancer.clone());
        assert_eq!(policy.severity_of(&remove), SeverityClass::Reconfigure);
        assert_eq!(policy.severity_in(&remove, &schema), SeverityClass::Recreate);

        let add = Change::add(path(&["loadBalancer"]), load_balancer);
        assert_eq!(policy.severity_in(&add, &schema), SeverityClass::Recreate);
    }

    #[test]
    fn test_subtree_rule_on_root_decides() {
        let policy = SeverityPolicy::builtin().expect("policy");
        let schema = TreeSchema::cluster().expect("schema");
        let node = subtree("id: w3\ncpu: 2\nip: 192.168.113.30\nlabels: {zone: a}\n");

        let add_worker = Change::add(worker("w3"), node);
        assert_eq!(policy.severity_in(&add_worker, &schema), SeverityClass::Scale);

        let instances = subtree("items:\n  - id: lb1\n  - id: lb2\n");
        let items = instances.as_map().and_then(|m| m.get("items")).cloned().expect("items");
        let remove_all = Change::remove(path(&["loadBalancer", "instances"]), items);
        assert_eq!(policy.severity_in(&remove_all, &schema), SeverityClass::Scale);
    }

    #[test]
    fn test_removed_section_with_forbidden_field_is_forbidden() {
        let policy = SeverityPolicy::from_yaml(
            r"
defaultSeverity: info
rules:
  - path: storage.pool.name
    severity: forbidden
",
        )
        .expect("policy");
        let schema = TreeSchema::permissive().expect("schema");
        let storage = subtree("pool: {name: default, size: 10}\nreadonly: false\n");

        let remove = Change::remove(path(&["storage"]), storage);
        assert_eq!(policy.severity_in(&remove, &schema), SeverityClass::Forbidden);
        assert_eq!(
            policy.severity_in(&Change::remove(path(&["storage"]), Value::Integer(1)), &schema),
            SeverityClass::Info
        );
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = SeverityPolicy::from_yaml("rules:\n  - path: 'a..b'\n    severity: info\n");
        assert!(result.is_err());
    }
}
