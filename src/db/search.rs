//! Filtered task search.

use super::metadata::path_get;
use super::tasks::{all_tasks_internal, parse_task_row};
use super::{ids::compare_ids, Database};
use crate::error::StoreResult;
use crate::types::{SearchFilters, SearchOutcome, Task};
use tracing::warn;

/// Conservative bound on SQL parameters per statement. Beyond this the
/// query degrades to a full scan instead of failing the caller.
const MAX_BOUND_PARAMS: usize = 999;

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn metadata_matches(task: &Task, filters: &SearchFilters) -> bool {
    filters
        .metadata
        .iter()
        .all(|(path, expected)| path_get(&task.metadata, path) == Some(expected))
}

impl Database {
    /// Search tasks by status, readiness, tags, metadata values, and a
    /// free-text substring over title/description. All filters must match.
    ///
    /// If the filters would bind more SQL parameters than the store
    /// accepts, the query degrades to returning all tasks with a non-fatal
    /// warning instead of erroring.
    pub fn search_tasks(&self, filters: &SearchFilters) -> StoreResult<SearchOutcome> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(status) = filters.status {
                sql.push_str(" AND status = ?");
                params_vec.push(Box::new(status.as_str().to_string()));
            }
            if let Some(readiness) = filters.readiness {
                sql.push_str(" AND readiness = ?");
                params_vec.push(Box::new(readiness.as_str().to_string()));
            }
            for tag in &filters.tags {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM json_each(tasks.tags) WHERE json_each.value = ?)",
                );
                params_vec.push(Box::new(tag.clone()));
            }
            if let Some(query) = filters.query.as_deref() {
                let pattern = format!("%{}%", escape_like(query));
                sql.push_str(
                    " AND (title LIKE ? ESCAPE '\\' OR IFNULL(description, '') LIKE ? ESCAPE '\\')",
                );
                params_vec.push(Box::new(pattern.clone()));
                params_vec.push(Box::new(pattern));
            }

            if params_vec.len() > MAX_BOUND_PARAMS {
                let message = format!(
                    "search used {} bound parameters (limit {}); returning all tasks unfiltered",
                    params_vec.len(),
                    MAX_BOUND_PARAMS
                );
                warn!("{}", message);
                return Ok(SearchOutcome {
                    tasks: all_tasks_internal(conn)?,
                    warning: Some(message),
                });
            }

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let mut tasks: Vec<Task> = stmt
                .query_map(params_refs.as_slice(), parse_task_row)?
                .collect::<Result<_, _>>()?;

            // Metadata paths are matched in memory; nesting does not map
            // cleanly onto SQL.
            if !filters.metadata.is_empty() {
                tasks.retain(|task| metadata_matches(task, filters));
            }

            tasks.sort_by(|a, b| compare_ids(&a.id, &b.id));
            Ok(SearchOutcome {
                tasks,
                warning: None,
            })
        })
    }
}
