//! Plain-text output formatting for the CLI.

use crate::types::{DuplicateGroup, Task, TaskTree};

/// Format a single task in long form.
pub fn format_task(task: &Task) -> String {
    let mut out = String::new();

    out.push_str(&format!("{}  {}\n", task.id, task.title));
    out.push_str(&format!(
        "  status: {}  readiness: {}\n",
        task.status.as_str(),
        task.readiness.as_str()
    ));

    if !task.tags.is_empty() {
        out.push_str(&format!("  tags: {}\n", task.tags.join(", ")));
    }

    if let Some(score) = task.similarity_score() {
        out.push_str(&format!("  similarity: {:.2}\n", score));
    }

    if !task.metadata.is_empty() {
        let rendered = serde_json::to_string_pretty(&task.metadata)
            .unwrap_or_else(|_| "{}".to_string());
        out.push_str("  metadata: ");
        out.push_str(&rendered.replace('\n', "\n  "));
        out.push('\n');
    }

    if let Some(ref desc) = task.description {
        out.push_str(&format!("  {}\n", desc));
    }

    out
}

/// Format a task in short form for lists.
pub fn format_task_line(task: &Task) -> String {
    let tags = if task.tags.is_empty() {
        String::new()
    } else {
        format!("  [{}]", task.tags.join(", "))
    };

    let score = task
        .similarity_score()
        .map(|s| format!("  ({:.2})", s))
        .unwrap_or_default();

    format!(
        "{:<10} {:<12} {}{}{}\n",
        task.id,
        task.status.as_str(),
        task.title,
        tags,
        score,
    )
}

/// Format a list of tasks, one per line.
pub fn format_task_list(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&format_task_line(task));
    }
    out
}

/// Format the task forest with indentation per depth.
pub fn format_tree(trees: &[TaskTree]) -> String {
    fn walk(out: &mut String, trees: &[TaskTree], depth: usize) {
        for tree in trees {
            out.push_str(&format!(
                "{}{}  {} ({})\n",
                "  ".repeat(depth),
                tree.task.id,
                tree.task.title,
                tree.task.status.as_str(),
            ));
            walk(out, &tree.children, depth + 1);
        }
    }

    let mut out = String::new();
    walk(&mut out, trees, 0);
    out
}

/// Format duplicate groups with their pairwise scores.
pub fn format_duplicate_groups(groups: &[DuplicateGroup]) -> String {
    let mut out = String::new();
    for (i, group) in groups.iter().enumerate() {
        out.push_str(&format!(
            "group {} (max similarity {:.2})\n",
            i + 1,
            group.max_similarity
        ));
        for task in &group.tasks {
            out.push_str(&format!("  {}  {}\n", task.id, task.title));
        }
    }
    out
}
