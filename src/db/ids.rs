//! Hierarchical identifier allocation and renumbering.
//!
//! IDs are dot-separated sequences of positive integers (`"3.2.1"`). The
//! allocator computes new IDs at creation time, shifts siblings to make
//! room for `after`-insertions, and renumbers siblings after a deletion so
//! that every level stays contiguous starting at 1. Renames cascade through
//! descendants and dependency edges.

use super::{now_ms, Database};
use crate::error::{StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::cmp::Ordering;

/// Parse an ID into its numeric segments.
///
/// Fails with `InvalidInput` on empty segments, non-numeric segments, zero,
/// or non-canonical forms with leading zeros.
pub(crate) fn id_segments(id: &str) -> StoreResult<Vec<u64>> {
    if id.is_empty() {
        return Err(StoreError::invalid_id(id));
    }
    id.split('.')
        .map(|seg| {
            if seg.is_empty() || (seg.len() > 1 && seg.starts_with('0')) {
                return Err(StoreError::invalid_id(id));
            }
            match seg.parse::<u64>() {
                Ok(n) if n >= 1 => Ok(n),
                _ => Err(StoreError::invalid_id(id)),
            }
        })
        .collect()
}

/// All but the last dot-segment, or `None` for a root-level ID.
pub(crate) fn parent_of(id: &str) -> Option<String> {
    id.rsplit_once('.').map(|(prefix, _)| prefix.to_string())
}

/// The last dot-segment as a number.
pub(crate) fn last_segment(id: &str) -> StoreResult<u64> {
    Ok(*id_segments(id)?.last().unwrap())
}

/// Segment-wise numeric ordering ("2" < "10", "1.2" < "1.10").
pub(crate) fn compare_ids(a: &str, b: &str) -> Ordering {
    let pa: Vec<u64> = a.split('.').map(|s| s.parse().unwrap_or(0)).collect();
    let pb: Vec<u64> = b.split('.').map(|s| s.parse().unwrap_or(0)).collect();
    pa.cmp(&pb)
}

pub(crate) fn task_exists(conn: &Connection, id: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Compute the next ID for a new task.
///
/// - `child_of = P`: `P.(max child segment + 1)`, or `P.1` if childless.
/// - `after = A`: `A`'s last segment incremented under the same prefix.
/// - neither: root count + 1.
pub(crate) fn next_id(
    conn: &Connection,
    child_of: Option<&str>,
    after: Option<&str>,
) -> StoreResult<String> {
    if let Some(parent) = child_of {
        id_segments(parent)?;
        if !task_exists(conn, parent)? {
            return Err(StoreError::task_not_found(parent));
        }
        let max = sibling_ids(conn, Some(parent))?
            .into_iter()
            .map(|(_, seg)| seg)
            .max()
            .unwrap_or(0);
        return Ok(format!("{}.{}", parent, max + 1));
    }

    if let Some(anchor) = after {
        let segs = id_segments(anchor)?;
        if !task_exists(conn, anchor)? {
            return Err(StoreError::task_not_found(anchor));
        }
        let next = segs.last().unwrap() + 1;
        return Ok(match parent_of(anchor) {
            Some(prefix) => format!("{}.{}", prefix, next),
            None => next.to_string(),
        });
    }

    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE parent_id IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok((count + 1).to_string())
}

/// IDs and last segments of all tasks under `parent` (root level if `None`).
pub(crate) fn sibling_ids(
    conn: &Connection,
    parent: Option<&str>,
) -> StoreResult<Vec<(String, u64)>> {
    let ids: Vec<String> = match parent {
        Some(p) => {
            let mut stmt = conn.prepare("SELECT id FROM tasks WHERE parent_id = ?1")?;
            let rows = stmt.query_map(params![p], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        }
        None => {
            let mut stmt = conn.prepare("SELECT id FROM tasks WHERE parent_id IS NULL")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        }
    };

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let seg = last_segment(&id)?;
        out.push((id, seg));
    }
    Ok(out)
}

fn renumbered(id: &str, new_last: u64) -> String {
    match parent_of(id) {
        Some(prefix) => format!("{}.{}", prefix, new_last),
        None => new_last.to_string(),
    }
}

/// Shift every sibling whose last segment is >= `from_seg` up by one to
/// open the slot for an `after`-insertion. Processed in descending order so
/// no rename collides with a still-occupied ID.
pub(crate) fn shift_siblings_up(
    conn: &Connection,
    parent: Option<&str>,
    from_seg: u64,
) -> StoreResult<()> {
    let mut sibs: Vec<(String, u64)> = sibling_ids(conn, parent)?
        .into_iter()
        .filter(|(_, seg)| *seg >= from_seg)
        .collect();
    sibs.sort_by(|a, b| b.1.cmp(&a.1));

    for (id, seg) in sibs {
        rename_task(conn, &id, &renumbered(&id, seg + 1))?;
    }
    Ok(())
}

/// Close the gap left by a deletion: every sibling whose last segment is
/// greater than the deleted task's is decremented by one, in ascending
/// order so no rename collides mid-sequence.
pub(crate) fn renumber_siblings(
    conn: &Connection,
    parent: Option<&str>,
    deleted_seg: u64,
) -> StoreResult<()> {
    let mut sibs: Vec<(String, u64)> = sibling_ids(conn, parent)?
        .into_iter()
        .filter(|(_, seg)| *seg > deleted_seg)
        .collect();
    sibs.sort_by(|a, b| a.1.cmp(&b.1));

    for (id, seg) in sibs {
        rename_task(conn, &id, &renumbered(&id, seg - 1))?;
    }
    Ok(())
}

/// Rewrite every dependency edge referencing `old_id` to `new_id`.
///
/// `UPDATE OR IGNORE` plus a sweep of leftovers respects the
/// `(from_id, to_id, dep_type)` primary key when the rewritten edge
/// already exists.
pub(crate) fn repoint_edges(conn: &Connection, old_id: &str, new_id: &str) -> StoreResult<()> {
    conn.execute(
        "UPDATE OR IGNORE dependencies SET from_id = ?2 WHERE from_id = ?1",
        params![old_id, new_id],
    )?;
    conn.execute(
        "DELETE FROM dependencies WHERE from_id = ?1",
        params![old_id],
    )?;
    conn.execute(
        "UPDATE OR IGNORE dependencies SET to_id = ?2 WHERE to_id = ?1",
        params![old_id, new_id],
    )?;
    conn.execute("DELETE FROM dependencies WHERE to_id = ?1", params![old_id])?;
    Ok(())
}

/// Rename a task and cascade through its subtree.
///
/// Inserts a copy under `new_id`, repoints children's `parent_id`, rewrites
/// dependency edges, recursively renames every descendant still carrying
/// the old prefix, then deletes the old row. Callers own the transaction.
pub(crate) fn rename_task(conn: &Connection, old_id: &str, new_id: &str) -> StoreResult<()> {
    if !task_exists(conn, old_id)? {
        return Err(StoreError::task_not_found(old_id));
    }

    let new_parent = parent_of(new_id);
    conn.execute(
        "INSERT INTO tasks (id, title, description, status, readiness, tags, metadata,
                            parent_id, created_at, updated_at)
         SELECT ?2, title, description, status, readiness, tags, metadata, ?3, created_at, ?4
         FROM tasks WHERE id = ?1",
        params![old_id, new_id, new_parent, now_ms()],
    )?;

    conn.execute(
        "UPDATE tasks SET parent_id = ?2 WHERE parent_id = ?1",
        params![old_id, new_id],
    )?;

    repoint_edges(conn, old_id, new_id)?;

    // Direct children were repointed above but their own IDs still carry
    // the old prefix; recursion renames each subtree in turn.
    let like = format!("{}.%", old_id);
    let children: Vec<String> = {
        let mut stmt =
            conn.prepare("SELECT id FROM tasks WHERE parent_id = ?1 AND id LIKE ?2")?;
        let rows = stmt.query_map(params![new_id, like], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };

    for child in children {
        let suffix = &child[old_id.len()..];
        let renamed = format!("{}{}", new_id, suffix);
        rename_task(conn, &child, &renamed)?;
    }

    conn.execute("DELETE FROM tasks WHERE id = ?1", params![old_id])?;
    Ok(())
}

/// Where `id` ends up after `deleted_id`'s subtree is removed and its
/// siblings renumbered. `None` means `id` itself was inside the subtree.
pub(crate) fn shift_after_removal(id: &str, deleted_id: &str) -> Option<String> {
    if id == deleted_id || id.starts_with(&format!("{}.", deleted_id)) {
        return None;
    }

    let dsegs: Vec<u64> = match id_segments(deleted_id) {
        Ok(s) => s,
        Err(_) => return Some(id.to_string()),
    };
    let mut isegs: Vec<u64> = match id_segments(id) {
        Ok(s) => s,
        Err(_) => return Some(id.to_string()),
    };

    let depth = dsegs.len();
    if isegs.len() >= depth
        && isegs[..depth - 1] == dsegs[..depth - 1]
        && isegs[depth - 1] > dsegs[depth - 1]
    {
        isegs[depth - 1] -= 1;
    }

    Some(
        isegs
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("."),
    )
}

impl Database {
    /// Rename a task, cascading through descendants and dependency edges.
    ///
    /// Fails with `NotFound` if `old_id` is absent and `InvalidInput` if
    /// `new_id` is malformed, taken, parentless, or inside the old subtree.
    /// The whole cascade runs in one transaction.
    pub fn update_task_id(&self, old_id: &str, new_id: &str) -> StoreResult<bool> {
        id_segments(new_id)?;
        if old_id == new_id {
            return Err(StoreError::invalid_input("Old and new IDs are identical"));
        }
        if new_id.starts_with(&format!("{}.", old_id)) {
            return Err(StoreError::invalid_input(format!(
                "Cannot move {} inside its own subtree ({})",
                old_id, new_id
            )));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;

            if !task_exists(&tx, old_id)? {
                return Err(StoreError::task_not_found(old_id));
            }
            if task_exists(&tx, new_id)? {
                return Err(StoreError::invalid_input(format!(
                    "Task ID already exists: {}",
                    new_id
                )));
            }
            if let Some(parent) = parent_of(new_id) {
                if !task_exists(&tx, &parent)? {
                    return Err(StoreError::task_not_found(&parent));
                }
            }

            rename_task(&tx, old_id, new_id)?;
            tx.commit().map_err(StoreError::database)?;
            Ok(true)
        })
    }

    /// Renumber children of `parent_id` after `deleted_id` was removed.
    pub fn reorder_siblings_after_deletion(
        &self,
        parent_id: &str,
        deleted_id: &str,
    ) -> StoreResult<()> {
        let deleted_seg = last_segment(deleted_id)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;
            renumber_siblings(&tx, Some(parent_id), deleted_seg)?;
            tx.commit().map_err(StoreError::database)?;
            Ok(())
        })
    }

    /// Renumber root-level tasks after `deleted_id` was removed.
    pub fn reorder_root_after_deletion(&self, deleted_id: &str) -> StoreResult<()> {
        let deleted_seg = last_segment(deleted_id)?;
        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;
            renumber_siblings(&tx, None, deleted_seg)?;
            tx.commit().map_err(StoreError::database)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_reject_malformed_ids() {
        assert!(id_segments("1.2.3").is_ok());
        assert!(id_segments("").is_err());
        assert!(id_segments("1..2").is_err());
        assert!(id_segments("1.0").is_err());
        assert!(id_segments("1.02").is_err());
        assert!(id_segments("a.b").is_err());
        assert!(id_segments("-1").is_err());
    }

    #[test]
    fn parent_and_last_segment() {
        assert_eq!(parent_of("3.2.1"), Some("3.2".to_string()));
        assert_eq!(parent_of("7"), None);
        assert_eq!(last_segment("3.2.10").unwrap(), 10);
    }

    #[test]
    fn ids_compare_numerically_per_segment() {
        assert_eq!(compare_ids("2", "10"), Ordering::Less);
        assert_eq!(compare_ids("1.10", "1.2"), Ordering::Greater);
        assert_eq!(compare_ids("1.2", "1.2.1"), Ordering::Less);
    }

    #[test]
    fn shift_after_removal_tracks_sibling_renumbering() {
        assert_eq!(shift_after_removal("1.3", "1.2"), Some("1.2".to_string()));
        assert_eq!(shift_after_removal("1.1", "1.2"), Some("1.1".to_string()));
        assert_eq!(
            shift_after_removal("1.3.2", "1.2"),
            Some("1.2.2".to_string())
        );
        assert_eq!(shift_after_removal("2.1", "1.2"), Some("2.1".to_string()));
        assert_eq!(shift_after_removal("1.2", "1.2"), None);
        assert_eq!(shift_after_removal("1.2.5", "1.2"), None);
        assert_eq!(shift_after_removal("3", "2"), Some("2".to_string()));
    }
}
