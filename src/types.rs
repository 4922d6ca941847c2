//! Core types for the hierarchical task store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved metadata key carrying a transient similarity score on task
/// copies returned from similarity queries. Never persisted.
pub const SIMILARITY_KEY: &str = "_similarity";

/// Completion status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::InProgress => "in-progress",
            Status::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Status::Todo),
            "in-progress" => Some(Status::InProgress),
            "done" => Some(Status::Done),
            _ => None,
        }
    }
}

/// Workflow gating state, distinct from completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Readiness {
    #[default]
    Draft,
    Ready,
    Blocked,
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::Draft => "draft",
            Readiness::Ready => "ready",
            Readiness::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Readiness::Draft),
            "ready" => Some(Readiness::Ready),
            "blocked" => Some(Readiness::Blocked),
            _ => None,
        }
    }
}

/// A task in the hierarchy.
///
/// `id` is a dot-separated sequence of positive integers encoding ancestry
/// (e.g. `"3.2.1"`); `parent_id` is all but the last segment, or `None` for
/// root tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    pub readiness: Readiness,
    /// Insertion order preserved for display; duplicates removed.
    pub tags: Vec<String>,
    /// Arbitrarily nested map addressed by dot-notation paths.
    pub metadata: Map<String, Value>,
    pub parent_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Transient similarity score attached by similarity queries, if any.
    pub fn similarity_score(&self) -> Option<f64> {
        self.metadata.get(SIMILARITY_KEY).and_then(Value::as_f64)
    }
}

/// A task with its children for tree operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTree>,
}

/// Type of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    /// Containment, redundant with the ID prefix but kept for traversal.
    Child,
    /// Requested insertion-order successor at creation time.
    After,
    /// Same-level non-ordering link.
    Sibling,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Child => "child",
            DepType::After => "after",
            DepType::Sibling => "sibling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "child" => Some(DepType::Child),
            "after" => Some(DepType::After),
            "sibling" => Some(DepType::Sibling),
            _ => None,
        }
    }
}

/// A typed dependency edge between two tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub from_id: String,
    pub to_id: String,
    pub dep_type: DepType,
}

/// Options for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskOptions {
    pub title: String,
    pub description: Option<String>,
    /// Create as a child of this task. Takes precedence over `after`.
    pub child_of: Option<String>,
    /// Insert directly after this sibling, shifting later siblings up.
    pub after: Option<String>,
    pub status: Option<Status>,
    pub readiness: Option<Readiness>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
}

/// Options for a partial task update. `None` fields are left unchanged;
/// `metadata` replaces the whole map (path edits live in the metadata editor).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub readiness: Option<Readiness>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
}

/// Filters for `search_tasks`. All present filters must match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub status: Option<Status>,
    pub readiness: Option<Readiness>,
    /// Task must carry every listed tag.
    pub tags: Vec<String>,
    /// Dot-path / expected-value pairs matched against metadata.
    pub metadata: Vec<(String, Value)>,
    /// Substring match against title and description.
    pub query: Option<String>,
}

/// Search results, with a non-fatal warning when the store degraded the
/// query instead of failing it.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub tasks: Vec<Task>,
    pub warning: Option<String>,
}

/// A cluster of tasks mutually similar above a threshold. Ephemeral.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub tasks: Vec<Task>,
    /// Maximum pairwise similarity inside the group.
    pub max_similarity: f64,
    /// Pairwise similarity over the group's tasks, indexed like `tasks`.
    pub similarity_matrix: Vec<Vec<f64>>,
}

/// Options for merging a duplicate group into a primary task.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// If set, non-primary metadata values overwrite the primary's on
    /// conflicting keys; otherwise the primary wins and only missing keys
    /// are filled in.
    pub combine_metadata: bool,
}

/// Result of a merge operation.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    /// The surviving task, re-read after all renumbering settled.
    pub primary: Task,
    /// IDs (as they were at merge time) of the absorbed tasks.
    pub merged_ids: Vec<String>,
    /// Number of task rows deleted, subtrees included.
    pub deleted_count: usize,
}
