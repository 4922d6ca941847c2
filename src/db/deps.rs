//! Dependency ledger: typed edges between task IDs.
//!
//! Edges are rewritten (never left dangling) whenever an endpoint's ID
//! changes, and deleted when either endpoint task is deleted; both happen
//! inside the rename/removal transactions in the allocator and task store.

use super::ids::task_exists;
use super::{now_ms, Database};
use crate::error::{StoreError, StoreResult};
use crate::types::{DepType, Dependency};
use rusqlite::{params, Connection, Row};

fn parse_dep_row(row: &Row) -> rusqlite::Result<Dependency> {
    let from_id: String = row.get(0)?;
    let to_id: String = row.get(1)?;
    let dep_type: String = row.get(2)?;
    Ok(Dependency {
        from_id,
        to_id,
        dep_type: DepType::parse(&dep_type).unwrap_or(DepType::Sibling),
    })
}

pub(crate) fn add_dependency_internal(
    conn: &Connection,
    from_id: &str,
    to_id: &str,
    dep_type: DepType,
) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO dependencies (from_id, to_id, dep_type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![from_id, to_id, dep_type.as_str(), now_ms()],
    )?;
    Ok(())
}

impl Database {
    /// Record an edge between two existing tasks. Duplicate triples are
    /// ignored; missing endpoints fail with `NotFound`.
    pub fn add_dependency(
        &self,
        from_id: &str,
        to_id: &str,
        dep_type: DepType,
    ) -> StoreResult<()> {
        if from_id == to_id {
            return Err(StoreError::invalid_input(
                "A task cannot depend on itself",
            ));
        }
        self.with_conn(|conn| {
            if !task_exists(conn, from_id)? {
                return Err(StoreError::task_not_found(from_id));
            }
            if !task_exists(conn, to_id)? {
                return Err(StoreError::task_not_found(to_id));
            }
            add_dependency_internal(conn, from_id, to_id, dep_type)
        })
    }

    /// Remove one edge.
    pub fn remove_dependency(
        &self,
        from_id: &str,
        to_id: &str,
        dep_type: DepType,
    ) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM dependencies WHERE from_id = ?1 AND to_id = ?2 AND dep_type = ?3",
                params![from_id, to_id, dep_type.as_str()],
            )?;
            Ok(removed > 0)
        })
    }

    /// All edges in the store.
    pub fn get_all_dependencies(&self) -> StoreResult<Vec<Dependency>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT from_id, to_id, dep_type FROM dependencies")?;
            let deps = stmt
                .query_map([], parse_dep_row)?
                .collect::<Result<_, _>>()?;
            Ok(deps)
        })
    }

    /// Every edge referencing the given task on either end.
    pub fn get_dependencies_for(&self, task_id: &str) -> StoreResult<Vec<Dependency>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT from_id, to_id, dep_type FROM dependencies
                 WHERE from_id = ?1 OR to_id = ?1",
            )?;
            let deps = stmt
                .query_map(params![task_id], parse_dep_row)?
                .collect::<Result<_, _>>()?;
            Ok(deps)
        })
    }
}
