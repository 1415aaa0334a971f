//! Structural diff of configuration trees.
//!
//! The diff walks the old and new trees together and emits one [`Change`] per
//! difference, shallowest first: a removed or added subtree yields a single
//! change at its root. Identity-keyed lists are aligned by identity, so
//! reordering them is not a change.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::config::{ConfigPath, ConfigTree, Value};
use crate::error::{ClassifyError, Result};

use super::change::Change;
use super::schema::TreeSchema;

/// Engine for computing changes between two configuration trees.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    /// Known paths and list identities.
    schema: TreeSchema,
}

impl DiffEngine {
    /// Creates a diff engine over a schema.
    #[must_use]
    pub const fn new(schema: TreeSchema) -> Self {
        Self { schema }
    }

    /// Returns the schema.
    #[must_use]
    pub const fn schema(&self) -> &TreeSchema {
        &self.schema
    }

    /// Computes the ordered changes from `old` to `new`.
    ///
    /// Without an old tree every leaf of the new tree is an addition.
    ///
    /// # Errors
    ///
    /// Returns an error on schema drift in either tree, or when an
    /// identity-keyed list element has a missing or duplicated identity.
    pub fn diff(&self, old: Option<&ConfigTree>, new: &ConfigTree) -> Result<Vec<Change>> {
        if let Some(old) = old {
            self.schema.check(old.root())?;
        }
        self.schema.check(new.root())?;

        let mut changes = Vec::new();
        match old {
            Some(old) => self.diff_values(&ConfigPath::root(), old.root(), new.root(), &mut changes)?,
            None => self.collect_leaves(&ConfigPath::root(), new.root(), &mut changes)?,
        }

        debug!("Computed {} change(s)", changes.len());
        Ok(changes)
    }

    fn diff_values(
        &self,
        path: &ConfigPath,
        old: &Value,
        new: &Value,
        changes: &mut Vec<Change>,
    ) -> Result<()> {
        if old == new {
            return Ok(());
        }

        match (old, new) {
            (Value::Map(old_map), Value::Map(new_map)) => {
                let keys: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();
                for key in keys {
                    let child = path.key(key);
                    match (old_map.get(key), new_map.get(key)) {
                        (Some(o), Some(n)) => self.diff_values(&child, o, n, changes)?,
                        (Some(o), None) => changes.push(Change::remove(child, o.clone())),
                        (None, Some(n)) => changes.push(Change::add(child, n.clone())),
                        (None, None) => {}
                    }
                }
            }
            (Value::List(old_items), Value::List(new_items)) => match self.schema.identity_key(path) {
                Some(key) => self.diff_identified(path, key, old_items, new_items, changes)?,
                None => self.diff_positional(path, old_items, new_items, changes)?,
            },
            _ => changes.push(Change::modify(path.clone(), old.clone(), new.clone())),
        }

        Ok(())
    }

    fn diff_identified(
        &self,
        path: &ConfigPath,
        key: &str,
        old_items: &[Value],
        new_items: &[Value],
        changes: &mut Vec<Change>,
    ) -> Result<()> {
        let old_index = index_by_identity(path, key, old_items)?;
        let new_index = index_by_identity(path, key, new_items)?;
        let new_by_id: HashMap<&str, &Value> =
            new_index.iter().map(|(id, v)| (id.as_str(), *v)).collect();
        let old_ids: HashSet<&str> = old_index.iter().map(|(id, _)| id.as_str()).collect();

        for (id, old_item) in &old_index {
            let child = path.id(id);
            match new_by_id.get(id.as_str()) {
                Some(new_item) => self.diff_values(&child, old_item, new_item, changes)?,
                None => changes.push(Change::remove(child, (*old_item).clone())),
            }
        }

        for (id, new_item) in &new_index {
            if !old_ids.contains(id.as_str()) {
                changes.push(Change::add(path.id(id), (*new_item).clone()));
            }
        }

        Ok(())
    }

    fn diff_positional(
        &self,
        path: &ConfigPath,
        old_items: &[Value],
        new_items: &[Value],
        changes: &mut Vec<Change>,
    ) -> Result<()> {
        for i in 0..old_items.len().max(new_items.len()) {
            let child = path.index(i);
            match (old_items.get(i), new_items.get(i)) {
                (Some(o), Some(n)) => self.diff_values(&child, o, n, changes)?,
                (Some(o), None) => changes.push(Change::remove(child, o.clone())),
                (None, Some(n)) => changes.push(Change::add(child, n.clone())),
                (None, None) => {}
            }
        }
        Ok(())
    }

    /// Emits an addition for every leaf: scalars and empty containers.
    fn collect_leaves(&self, path: &ConfigPath, value: &Value, changes: &mut Vec<Change>) -> Result<()> {
        match value {
            Value::Map(map) if !map.is_empty() => {
                for (key, child) in map {
                    self.collect_leaves(&path.key(key), child, changes)?;
                }
            }
            Value::List(items) if !items.is_empty() => match self.schema.identity_key(path) {
                Some(key) => {
                    for (id, item) in index_by_identity(path, key, items)? {
                        self.collect_leaves(&path.id(&id), item, changes)?;
                    }
                }
                None => {
                    for (i, item) in items.iter().enumerate() {
                        self.collect_leaves(&path.index(i), item, changes)?;
                    }
                }
            },
            _ if path.is_root() => {}
            _ => changes.push(Change::add(path.clone(), value.clone())),
        }
        Ok(())
    }
}

/// Pairs each list element with its identity, in list order.
fn index_by_identity<'a>(
    path: &ConfigPath,
    key: &str,
    items: &'a [Value],
) -> Result<Vec<(String, &'a Value)>> {
    let mut seen = HashSet::new();
    let mut indexed = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let id = item
            .as_map()
            .and_then(|map| map.get(key))
            .and_then(Value::as_identity)
            .ok_or_else(|| ClassifyError::InvalidIdentity {
                path: path.index(i).to_string(),
                reason: format!("missing scalar identity key '{key}'"),
            })?;

        if !seen.insert(id.clone()) {
            return Err(ClassifyError::InvalidIdentity {
                path: path.id(&id).to_string(),
                reason: format!("duplicate identity '{id}'"),
            }
            .into());
        }
        indexed.push((id, item));
    }

    Ok(indexed)
}
