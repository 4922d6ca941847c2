//! Duplicate grouping and merge operations.
//!
//! Groups form by connected components over the pairwise similarity graph:
//! an edge exists wherever similarity meets the threshold, so grouping is
//! transitive rather than anchored on one task. Merging consolidates tags,
//! metadata, and dependency references onto a chosen primary and removes
//! the rest, riding the same renumbering cascade as ordinary deletion.

use crate::db::ids::{
    compare_ids, last_segment, parent_of, renumber_siblings, repoint_edges, shift_after_removal,
};
use crate::db::tasks::{get_task_internal, normalize_tags, remove_subtree};
use crate::db::{now_ms, Database};
use crate::error::{StoreError, StoreResult};
use crate::similarity::similarity;
use crate::types::{DuplicateGroup, MergeOptions, MergeReport, Task, SIMILARITY_KEY};
use rusqlite::params;
use tracing::info;

/// Pairwise similarity between two tasks: best of title-title and the
/// title-description cross checks.
fn pair_similarity(a: &Task, b: &Task) -> f64 {
    let mut score = similarity(&a.title, &b.title);
    if let Some(desc) = b.description.as_deref() {
        score = score.max(similarity(&a.title, desc));
    }
    if let Some(desc) = a.description.as_deref() {
        score = score.max(similarity(&b.title, desc));
    }
    score
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Cluster tasks whose pairwise similarity reaches `min_similarity` into
/// connected components. Only components with at least two tasks are
/// returned; each carries its internal similarity submatrix and the
/// maximum edge weight.
pub fn group_duplicates(tasks: &[Task], min_similarity: f64) -> Vec<DuplicateGroup> {
    let n = tasks.len();
    let mut matrix = vec![vec![0.0f64; n]; n];
    let mut uf = UnionFind::new(n);

    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let score = pair_similarity(&tasks[i], &tasks[j]);
            matrix[i][j] = score;
            matrix[j][i] = score;
            if score >= min_similarity {
                uf.union(i, j);
            }
        }
    }

    let mut components: std::collections::HashMap<usize, Vec<usize>> =
        std::collections::HashMap::new();
    for i in 0..n {
        let root = uf.find(i);
        components.entry(root).or_default().push(i);
    }

    let mut groups: Vec<DuplicateGroup> = components
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|mut members| {
            members.sort();
            let mut max_similarity = 0.0f64;
            let size = members.len();
            let mut sub = vec![vec![0.0f64; size]; size];
            for (gi, &i) in members.iter().enumerate() {
                for (gj, &j) in members.iter().enumerate() {
                    sub[gi][gj] = matrix[i][j];
                    if i != j && matrix[i][j] > max_similarity {
                        max_similarity = matrix[i][j];
                    }
                }
            }
            DuplicateGroup {
                tasks: members.iter().map(|&i| tasks[i].clone()).collect(),
                max_similarity,
                similarity_matrix: sub,
            }
        })
        .collect();

    groups.sort_by(|a, b| compare_ids(&a.tasks[0].id, &b.tasks[0].id));
    groups
}

fn check_threshold(name: &str, value: f64) -> StoreResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(StoreError::invalid_input(format!(
            "{} must be in [0, 1], got {}",
            name, value
        ))
        .with_field(name));
    }
    Ok(())
}

impl Database {
    /// Compute duplicate groups over the current task set. Ephemeral; no
    /// state is stored.
    pub fn find_duplicates(&self, min_similarity: f64) -> StoreResult<Vec<DuplicateGroup>> {
        check_threshold("min_similarity", min_similarity)?;
        let tasks = self.get_all_tasks()?;
        Ok(group_duplicates(&tasks, min_similarity))
    }

    /// Merge a group of tasks into `primary_id`.
    ///
    /// The primary absorbs the union of all tags, metadata is shallow-merged
    /// (`combine_metadata` lets later values overwrite the primary's),
    /// every dependency edge referencing a non-primary member is rewritten
    /// to the primary, and the non-primary members are deleted with their
    /// subtrees. The whole merge is one transaction; the returned report
    /// carries the primary as re-read after renumbering settled.
    pub fn merge_duplicates(
        &self,
        member_ids: &[String],
        primary_id: &str,
        opts: MergeOptions,
    ) -> StoreResult<MergeReport> {
        let mut seen = std::collections::HashSet::new();
        let absorbed: Vec<String> = member_ids
            .iter()
            .filter(|id| id.as_str() != primary_id && seen.insert(id.as_str()))
            .cloned()
            .collect();
        if absorbed.is_empty() {
            return Err(StoreError::invalid_input(
                "merge requires at least one non-primary member",
            ));
        }
        for id in &absorbed {
            if primary_id.starts_with(&format!("{}.", id)) {
                return Err(StoreError::invalid_input(format!(
                    "primary {} is inside the subtree of member {}",
                    primary_id, id
                )));
            }
        }

        let (final_primary_id, deleted_count) = self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(StoreError::database)?;

            let mut primary = get_task_internal(&tx, primary_id)?
                .ok_or_else(|| StoreError::task_not_found(primary_id))?;
            let mut members = Vec::with_capacity(absorbed.len());
            for id in &absorbed {
                let task = get_task_internal(&tx, id)?
                    .ok_or_else(|| StoreError::task_not_found(id))?;
                members.push(task);
            }

            // Consolidate tags and metadata onto the primary.
            let mut tags = primary.tags.clone();
            for member in &members {
                tags.extend(member.tags.iter().cloned());
            }
            primary.tags = normalize_tags(tags);
            for member in &members {
                for (key, value) in &member.metadata {
                    if key == SIMILARITY_KEY {
                        continue;
                    }
                    if opts.combine_metadata {
                        primary.metadata.insert(key.clone(), value.clone());
                    } else {
                        primary
                            .metadata
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
            }

            tx.execute(
                "UPDATE tasks SET tags = ?2, metadata = ?3, updated_at = ?4 WHERE id = ?1",
                params![
                    &primary.id,
                    serde_json::to_string(&primary.tags)?,
                    serde_json::to_string(&primary.metadata)?,
                    now_ms(),
                ],
            )?;

            // Repoint edges, then drop the self-edges created where a
            // member referenced another group member.
            for member in &members {
                repoint_edges(&tx, &member.id, &primary.id)?;
            }
            tx.execute(
                "DELETE FROM dependencies WHERE from_id = to_id",
                [],
            )?;

            // Delete in descending ID order: renumbering only shifts IDs
            // greater than the deleted one, so pending members are stable
            // and only the primary needs tracking.
            let mut doomed: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
            doomed.sort_by(|a, b| compare_ids(b, a));

            let mut current_primary = primary.id.clone();
            let mut deleted = 0usize;
            for id in doomed {
                // An earlier deletion may have taken this member out as
                // part of an ancestor member's subtree.
                if get_task_internal(&tx, &id)?.is_none() {
                    continue;
                }
                deleted += remove_subtree(&tx, &id)?;
                renumber_siblings(&tx, parent_of(&id).as_deref(), last_segment(&id)?)?;
                current_primary = shift_after_removal(&current_primary, &id)
                    .expect("primary is never inside an absorbed subtree");
            }

            tx.commit().map_err(StoreError::database)?;
            Ok((current_primary, deleted))
        })?;

        info!(
            primary = %final_primary_id,
            merged = absorbed.len(),
            deleted = deleted_count,
            "merged duplicate group"
        );

        Ok(MergeReport {
            primary: self.get_task(&final_primary_id)?,
            merged_ids: absorbed,
            deleted_count,
        })
    }

    /// Merge every duplicate group whose strongest internal similarity
    /// reaches `auto_threshold`, without confirmation. The primary is the
    /// earliest-created member (ties: smallest ID). Groups are recomputed
    /// after each merge because deletions renumber IDs.
    pub fn auto_merge_duplicates(
        &self,
        min_similarity: f64,
        auto_threshold: f64,
    ) -> StoreResult<Vec<MergeReport>> {
        check_threshold("min_similarity", min_similarity)?;
        check_threshold("auto_threshold", auto_threshold)?;

        let mut reports = Vec::new();
        // Each pass deletes at least one task, so this terminates; the
        // bound guards against a pathological store.
        for _ in 0..1000 {
            let groups = self.find_duplicates(min_similarity)?;
            let Some(group) = groups
                .into_iter()
                .find(|g| g.max_similarity >= auto_threshold)
            else {
                break;
            };

            let primary = group
                .tasks
                .iter()
                .min_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| compare_ids(&a.id, &b.id))
                })
                .expect("groups have at least two members")
                .id
                .clone();
            let member_ids: Vec<String> = group.tasks.iter().map(|t| t.id.clone()).collect();

            reports.push(self.merge_duplicates(
                &member_ids,
                &primary,
                MergeOptions {
                    combine_metadata: true,
                },
            )?);
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status: Default::default(),
            readiness: Default::default(),
            tags: Vec::new(),
            metadata: Map::new(),
            parent_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn grouping_is_transitive() {
        // a~b and b~c puts all three in one component even if a~c is weak.
        let tasks = vec![
            task("1", "Implement OAuth login"),
            task("2", "Implement OAuth login flow"),
            task("3", "Add OAuth based login flow support"),
            task("4", "Update README typo"),
        ];
        let groups = group_duplicates(&tasks, 0.3);
        assert_eq!(groups.len(), 1);
        let ids: Vec<&str> = groups[0].tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert!(groups[0].max_similarity >= 0.3);
    }

    #[test]
    fn unrelated_tasks_form_no_groups() {
        let tasks = vec![
            task("1", "Implement OAuth login"),
            task("2", "Update README typo"),
        ];
        assert!(group_duplicates(&tasks, 0.3).is_empty());
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let tasks = vec![
            task("1", "Implement OAuth login"),
            task("2", "Add OAuth based login flow"),
        ];
        let groups = group_duplicates(&tasks, 0.3);
        assert_eq!(groups.len(), 1);
        let m = &groups[0].similarity_matrix;
        assert_eq!(m[0][0], 1.0);
        assert_eq!(m[1][1], 1.0);
        assert_eq!(m[0][1], m[1][0]);
    }
}
