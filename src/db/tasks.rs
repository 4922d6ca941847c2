//! Task CRUD and tree operations.

use super::ids::{self, compare_ids, last_segment, parent_of, task_exists};
use super::{now_ms, Database};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    CreateTaskOptions, DepType, Readiness, Status, Task, TaskTree, UpdateTaskOptions,
    SIMILARITY_KEY,
};
use rusqlite::{params, Connection, Row};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Trim tags, drop empties, and dedupe while preserving insertion order.
pub(crate) fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

/// Strip reserved keys so transient annotations never round-trip to disk.
fn normalize_metadata(mut metadata: Map<String, Value>) -> Map<String, Value> {
    metadata.remove(SIMILARITY_KEY);
    metadata
}

pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let title: String = row.get("title")?;
    let description: Option<String> = row.get("description")?;
    let status: String = row.get("status")?;
    let readiness: String = row.get("readiness")?;
    let tags_json: String = row.get("tags")?;
    let metadata_json: String = row.get("metadata")?;
    let parent_id: Option<String> = row.get("parent_id")?;
    let created_at: i64 = row.get("created_at")?;
    let updated_at: i64 = row.get("updated_at")?;

    Ok(Task {
        id,
        title,
        description,
        status: Status::parse(&status).unwrap_or_default(),
        readiness: Readiness::parse(&readiness).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        parent_id,
        created_at,
        updated_at,
    })
}

/// Internal helper to get a task using an existing connection.
pub(crate) fn get_task_internal(conn: &Connection, task_id: &str) -> StoreResult<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
    let result = stmt.query_row(params![task_id], parse_task_row);

    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete a task and its whole subtree, plus every dependency edge touching
/// a deleted ID. Returns the number of task rows removed.
pub(crate) fn remove_subtree(conn: &Connection, task_id: &str) -> StoreResult<usize> {
    let like = format!("{}.%", task_id);
    conn.execute(
        "DELETE FROM dependencies
         WHERE from_id = ?1 OR from_id LIKE ?2 OR to_id = ?1 OR to_id LIKE ?2",
        params![task_id, like],
    )?;
    let removed = conn.execute(
        "DELETE FROM tasks WHERE id = ?1 OR id LIKE ?2",
        params![task_id, like],
    )?;
    Ok(removed)
}

pub(crate) fn all_tasks_internal(conn: &Connection) -> StoreResult<Vec<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks")?;
    let mut tasks: Vec<Task> = stmt
        .query_map([], parse_task_row)?
        .collect::<Result<_, _>>()?;
    tasks.sort_by(|a, b| compare_ids(&a.id, &b.id));
    Ok(tasks)
}

impl Database {
    /// Create a new task, resolving its ID through the allocator.
    ///
    /// `child_of` takes precedence over `after` when both are given. When an
    /// `after`-derived ID collides with an existing sibling, later siblings
    /// are shifted up by one and the new task takes the slot.
    ///
    /// The task row is committed first; the `child`/`after` dependency edge
    /// is inserted afterwards and its failure is logged, not rolled back.
    pub fn create_task(&self, opts: CreateTaskOptions) -> StoreResult<Task> {
        let title = opts.title.trim().to_string();
        if title.is_empty() {
            return Err(StoreError::missing_field("title"));
        }

        let child_of = opts.child_of.as_deref();
        let after = if child_of.is_some() {
            if opts.after.is_some() {
                debug!("create_task: both child_of and after given, ignoring after");
            }
            None
        } else {
            opts.after.as_deref()
        };

        let status = opts.status.unwrap_or_default();
        let readiness = opts.readiness.unwrap_or_default();
        let tags = normalize_tags(opts.tags.unwrap_or_default());
        let metadata = normalize_metadata(opts.metadata.unwrap_or_default());
        let tags_json = serde_json::to_string(&tags)?;
        let metadata_json = serde_json::to_string(&metadata)?;
        let now = now_ms();

        let task_id = self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;

            let id = ids::next_id(&tx, child_of, after)?;
            if after.is_some() && task_exists(&tx, &id)? {
                // Occupied slot: true insertion, shift later siblings up.
                ids::shift_siblings_up(&tx, parent_of(&id).as_deref(), last_segment(&id)?)?;
            }

            tx.execute(
                "INSERT INTO tasks (id, title, description, status, readiness, tags, metadata,
                                    parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    &id,
                    &title,
                    &opts.description,
                    status.as_str(),
                    readiness.as_str(),
                    &tags_json,
                    &metadata_json,
                    parent_of(&id),
                    now,
                    now,
                ],
            )?;

            tx.commit().map_err(StoreError::database)?;
            Ok(id)
        })?;

        // Lenient by policy: a failed edge insert leaves the task in place.
        let edge = match (child_of, after) {
            (Some(parent), _) => Some((parent.to_string(), DepType::Child)),
            (None, Some(anchor)) => Some((anchor.to_string(), DepType::After)),
            _ => None,
        };
        if let Some((from, dep_type)) = edge {
            if let Err(err) = self.add_dependency(&from, &task_id, dep_type) {
                warn!(
                    from = %from,
                    to = %task_id,
                    dep_type = dep_type.as_str(),
                    error = %err,
                    "task created but dependency edge could not be recorded"
                );
            }
        }

        self.get_task(&task_id)
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: &str) -> StoreResult<Task> {
        self.with_conn(|conn| {
            get_task_internal(conn, task_id)?.ok_or_else(|| StoreError::task_not_found(task_id))
        })
    }

    /// Get all tasks in segment-wise ID order.
    pub fn get_all_tasks(&self) -> StoreResult<Vec<Task>> {
        self.with_conn(all_tasks_internal)
    }

    /// Get the direct children of a task, in sibling order.
    pub fn get_child_tasks(&self, task_id: &str) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            if !task_exists(conn, task_id)? {
                return Err(StoreError::task_not_found(task_id));
            }
            let mut stmt = conn.prepare("SELECT * FROM tasks WHERE parent_id = ?1")?;
            let mut tasks: Vec<Task> = stmt
                .query_map(params![task_id], parse_task_row)?
                .collect::<Result<_, _>>()?;
            tasks.sort_by(|a, b| compare_ids(&a.id, &b.id));
            Ok(tasks)
        })
    }

    /// Apply a partial update. `metadata` replaces the whole map; the path
    /// editor operations merge instead.
    pub fn update_task(&self, task_id: &str, opts: UpdateTaskOptions) -> StoreResult<Task> {
        let mut task = self.get_task(task_id)?;

        if let Some(title) = opts.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(StoreError::missing_field("title"));
            }
            task.title = title;
        }
        if let Some(description) = opts.description {
            task.description = Some(description);
        }
        if let Some(status) = opts.status {
            task.status = status;
        }
        if let Some(readiness) = opts.readiness {
            task.readiness = readiness;
        }
        if let Some(tags) = opts.tags {
            task.tags = normalize_tags(tags);
        }
        if let Some(metadata) = opts.metadata {
            task.metadata = normalize_metadata(metadata);
        }

        self.write_task_fields(&task)?;
        self.get_task(task_id)
    }

    /// Persist the mutable fields of a task row.
    pub(crate) fn write_task_fields(&self, task: &Task) -> StoreResult<()> {
        let tags_json = serde_json::to_string(&task.tags)?;
        let metadata_json = serde_json::to_string(&task.metadata)?;
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET title = ?2, description = ?3, status = ?4, readiness = ?5,
                                  tags = ?6, metadata = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    &task.id,
                    &task.title,
                    &task.description,
                    task.status.as_str(),
                    task.readiness.as_str(),
                    &tags_json,
                    &metadata_json,
                    now_ms(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::task_not_found(&task.id));
            }
            Ok(())
        })
    }

    /// Remove a task and its subtree, then renumber the remaining siblings
    /// so their last segments stay contiguous. One transaction end to end.
    pub fn remove_task(&self, task_id: &str) -> StoreResult<bool> {
        let deleted_seg = last_segment(task_id)?;
        let parent = parent_of(task_id);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;

            if !task_exists(&tx, task_id)? {
                return Err(StoreError::task_not_found(task_id));
            }

            remove_subtree(&tx, task_id)?;
            ids::renumber_siblings(&tx, parent.as_deref(), deleted_seg)?;

            tx.commit().map_err(StoreError::database)?;
            Ok(true)
        })
    }

    /// Build the full task forest, children nested and sibling-ordered.
    pub fn build_hierarchy(&self) -> StoreResult<Vec<TaskTree>> {
        let tasks = self.get_all_tasks()?;

        let mut by_parent: HashMap<Option<String>, Vec<Task>> = HashMap::new();
        for task in tasks {
            by_parent.entry(task.parent_id.clone()).or_default().push(task);
        }

        fn attach(parent: Option<&str>, by_parent: &mut HashMap<Option<String>, Vec<Task>>) -> Vec<TaskTree> {
            let Some(tasks) = by_parent.remove(&parent.map(str::to_string)) else {
                return Vec::new();
            };
            tasks
                .into_iter()
                .map(|task| {
                    let children = attach(Some(&task.id), by_parent);
                    TaskTree { task, children }
                })
                .collect()
        }

        Ok(attach(None, &mut by_parent))
    }
}
