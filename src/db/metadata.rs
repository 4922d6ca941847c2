//! Nested metadata mutation addressed by dot-notation paths.
//!
//! Unlike `update_task`, which replaces the metadata map wholesale, these
//! operations merge into it: `set` creates intermediate maps as needed,
//! `remove` is a no-op success on absent paths, and `append` grows arrays
//! (converting a scalar into a two-element array on first append).

use super::Database;
use crate::error::{StoreError, StoreResult};
use crate::types::{Task, SIMILARITY_KEY};
use serde_json::{Map, Value};

fn split_path(path: &str) -> StoreResult<Vec<&str>> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(StoreError::invalid_input(format!(
            "Invalid metadata path: {:?}",
            path
        )));
    }
    Ok(path.split('.').collect())
}

/// Walk the path through nested maps. `None` for a missing path segment,
/// distinguishable from a present-but-null value (`Some(Value::Null)`).
pub(crate) fn path_get<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set the value at a path, creating intermediate maps as needed. A scalar
/// sitting where an intermediate map belongs is replaced by a map.
pub(crate) fn path_set(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let (last, intermediate) = path.split_last().expect("path is non-empty");

    let mut current = map;
    for segment in intermediate {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().expect("just ensured object");
    }
    current.insert(last.to_string(), value);
}

/// Remove the value at a path. Returns whether anything was removed.
pub(crate) fn path_remove(map: &mut Map<String, Value>, path: &[&str]) -> bool {
    let (last, intermediate) = path.split_last().expect("path is non-empty");

    let mut current = map;
    for segment in intermediate {
        match current.get_mut(*segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return false,
        }
    }
    current.remove(*last).is_some()
}

/// Append to the array at a path: absent becomes `[value]`, an array is
/// pushed to, and a scalar `s` becomes `[s, value]`.
pub(crate) fn path_append(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let joined = path.join(".");
    match path_get(map, &joined).cloned() {
        None => path_set(map, path, Value::Array(vec![value])),
        Some(Value::Array(mut items)) => {
            items.push(value);
            path_set(map, path, Value::Array(items));
        }
        Some(existing) => path_set(map, path, Value::Array(vec![existing, value])),
    }
}

fn reject_reserved(path: &[&str]) -> StoreResult<()> {
    if path.first() == Some(&SIMILARITY_KEY) {
        return Err(StoreError::invalid_input(format!(
            "{} is reserved for transient similarity scores",
            SIMILARITY_KEY
        )));
    }
    Ok(())
}

impl Database {
    /// Read metadata. With no path the whole map is returned; with a path,
    /// `None` means the path is absent.
    pub fn get_metadata(&self, task_id: &str, path: Option<&str>) -> StoreResult<Option<Value>> {
        let task = self.get_task(task_id)?;
        match path {
            None | Some("") => Ok(Some(Value::Object(task.metadata))),
            Some(p) => {
                split_path(p)?;
                Ok(path_get(&task.metadata, p).cloned())
            }
        }
    }

    /// Set a metadata value, creating intermediate maps as needed.
    pub fn set_metadata(&self, task_id: &str, path: &str, value: Value) -> StoreResult<Task> {
        let segments = split_path(path)?;
        reject_reserved(&segments)?;

        let mut task = self.get_task(task_id)?;
        path_set(&mut task.metadata, &segments, value);
        self.write_task_fields(&task)?;
        self.get_task(task_id)
    }

    /// Remove a metadata value. Succeeds even if the path does not exist.
    pub fn remove_metadata(&self, task_id: &str, path: &str) -> StoreResult<Task> {
        let segments = split_path(path)?;
        reject_reserved(&segments)?;

        let mut task = self.get_task(task_id)?;
        if path_remove(&mut task.metadata, &segments) {
            self.write_task_fields(&task)?;
        }
        self.get_task(task_id)
    }

    /// Append a metadata value at a path.
    pub fn append_metadata(&self, task_id: &str, path: &str, value: Value) -> StoreResult<Task> {
        let segments = split_path(path)?;
        reject_reserved(&segments)?;

        let mut task = self.get_task(task_id)?;
        path_append(&mut task.metadata, &segments, value);
        self.write_task_fields(&task)?;
        self.get_task(task_id)
    }
}
