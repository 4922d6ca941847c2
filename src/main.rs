//! Thin command-line dispatch over the task store.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use task_trellis::config::Config;
use task_trellis::db::Database;
use task_trellis::error::StoreResult;
use task_trellis::format;
use task_trellis::types::{
    CreateTaskOptions, DepType, MergeOptions, Readiness, SearchFilters, Status,
    UpdateTaskOptions,
};

#[derive(Parser)]
#[command(name = "trellis", version, about = "Hierarchical task tracker")]
struct Cli {
    /// Path to the database file (defaults to config / data dir).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose logging to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a task.
    Add {
        title: String,
        /// Create as a child of this task.
        #[arg(long)]
        child_of: Option<String>,
        /// Insert directly after this sibling.
        #[arg(long)]
        after: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<Status>,
        #[arg(long, value_parser = parse_readiness)]
        readiness: Option<Readiness>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        /// Metadata entries as key=value (value parsed as JSON when possible).
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, Value)>,
    },
    /// Show one task.
    Show { id: String },
    /// List all tasks.
    List,
    /// Print the task hierarchy.
    Tree,
    /// List the direct children of a task.
    Children { id: String },
    /// Update fields of a task.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, value_parser = parse_status)]
        status: Option<Status>,
        #[arg(long, value_parser = parse_readiness)]
        readiness: Option<Readiness>,
        /// Replace the tag set.
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a task (and its subtree), renumbering siblings.
    Remove { id: String },
    /// Rename a task ID, cascading through descendants and edges.
    Rename { old_id: String, new_id: String },
    /// Search tasks by filters.
    Search {
        #[arg(long, value_parser = parse_status)]
        status: Option<Status>,
        #[arg(long, value_parser = parse_readiness)]
        readiness: Option<Readiness>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, Value)>,
        /// Substring match against title and description.
        query: Option<String>,
    },
    /// Rank stored tasks by similarity to a title.
    Similar {
        title: String,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        no_fuzzy: bool,
    },
    /// Show groups of near-duplicate tasks.
    Duplicates {
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Merge tasks into a primary, absorbing tags/metadata/edges.
    Merge {
        primary: String,
        /// The other member IDs to absorb.
        ids: Vec<String>,
        /// Let absorbed metadata overwrite the primary's on conflicts.
        #[arg(long)]
        combine_metadata: bool,
    },
    /// Merge every duplicate group above the auto threshold.
    Automerge {
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        auto_threshold: Option<f64>,
    },
    /// Read or edit nested metadata by dot path.
    Meta {
        #[command(subcommand)]
        command: MetaCommand,
    },
    /// List dependency edges touching a task.
    Deps { id: String },
    /// Add a dependency edge.
    Link {
        from: String,
        to: String,
        #[arg(long, default_value = "sibling", value_parser = parse_dep_type)]
        dep_type: DepType,
    },
    /// Remove a dependency edge.
    Unlink {
        from: String,
        to: String,
        #[arg(long, default_value = "sibling", value_parser = parse_dep_type)]
        dep_type: DepType,
    },
}

#[derive(Subcommand)]
enum MetaCommand {
    Get {
        id: String,
        path: Option<String>,
    },
    Set {
        id: String,
        path: String,
        /// Parsed as JSON when possible, otherwise taken as a string.
        value: String,
    },
    Remove {
        id: String,
        path: String,
    },
    Append {
        id: String,
        path: String,
        value: String,
    },
}

fn parse_status(s: &str) -> Result<Status, String> {
    Status::parse(s).ok_or_else(|| format!("unknown status: {} (todo|in-progress|done)", s))
}

fn parse_readiness(s: &str) -> Result<Readiness, String> {
    Readiness::parse(s).ok_or_else(|| format!("unknown readiness: {} (draft|ready|blocked)", s))
}

fn parse_dep_type(s: &str) -> Result<DepType, String> {
    DepType::parse(s).ok_or_else(|| format!("unknown dependency type: {} (child|after|sibling)", s))
}

fn parse_meta(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", s))?;
    Ok((key.to_string(), parse_value(raw)))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn open_db(config: &Config, cli_db: Option<PathBuf>) -> anyhow::Result<Database> {
    let path = match cli_db {
        Some(path) => path,
        None => {
            config.ensure_db_dir()?;
            config.store.db_path.clone()
        }
    };
    Database::open(path)
}

fn run(db: &Database, config: &Config, command: Command) -> StoreResult<String> {
    match command {
        Command::Add {
            title,
            child_of,
            after,
            status,
            readiness,
            tags,
            description,
            meta,
        } => {
            let metadata = if meta.is_empty() {
                None
            } else {
                Some(meta.into_iter().collect())
            };
            let task = db.create_task(CreateTaskOptions {
                title,
                description,
                child_of,
                after,
                status,
                readiness,
                tags: if tags.is_empty() { None } else { Some(tags) },
                metadata,
            })?;
            Ok(format::format_task(&task))
        }
        Command::Show { id } => Ok(format::format_task(&db.get_task(&id)?)),
        Command::List => Ok(format::format_task_list(&db.get_all_tasks()?)),
        Command::Tree => Ok(format::format_tree(&db.build_hierarchy()?)),
        Command::Children { id } => Ok(format::format_task_list(&db.get_child_tasks(&id)?)),
        Command::Update {
            id,
            title,
            status,
            readiness,
            tags,
            description,
        } => {
            let task = db.update_task(
                &id,
                UpdateTaskOptions {
                    title,
                    description,
                    status,
                    readiness,
                    tags: if tags.is_empty() { None } else { Some(tags) },
                    metadata: None,
                },
            )?;
            Ok(format::format_task(&task))
        }
        Command::Remove { id } => {
            db.remove_task(&id)?;
            Ok(format!("removed {}\n", id))
        }
        Command::Rename { old_id, new_id } => {
            db.update_task_id(&old_id, &new_id)?;
            Ok(format!("renamed {} -> {}\n", old_id, new_id))
        }
        Command::Search {
            status,
            readiness,
            tags,
            meta,
            query,
        } => {
            let outcome = db.search_tasks(&SearchFilters {
                status,
                readiness,
                tags,
                metadata: meta,
                query,
            })?;
            let mut out = format::format_task_list(&outcome.tasks);
            if let Some(warning) = outcome.warning {
                out.push_str(&format!("warning: {}\n", warning));
            }
            Ok(out)
        }
        Command::Similar {
            title,
            threshold,
            no_fuzzy,
        } => {
            let threshold = threshold.unwrap_or(config.similarity.threshold);
            let fuzzy = !no_fuzzy && config.similarity.fuzzy;
            let tasks = db.find_similar_tasks(&title, threshold, fuzzy)?;
            Ok(format::format_task_list(&tasks))
        }
        Command::Duplicates { threshold } => {
            let threshold = threshold.unwrap_or(config.similarity.threshold);
            Ok(format::format_duplicate_groups(
                &db.find_duplicates(threshold)?,
            ))
        }
        Command::Merge {
            primary,
            ids,
            combine_metadata,
        } => {
            let report = db.merge_duplicates(&ids, &primary, MergeOptions { combine_metadata })?;
            Ok(format!(
                "merged {} task(s) into {} ({} row(s) deleted)\n{}",
                report.merged_ids.len(),
                report.primary.id,
                report.deleted_count,
                format::format_task(&report.primary),
            ))
        }
        Command::Automerge {
            threshold,
            auto_threshold,
        } => {
            let threshold = threshold.unwrap_or(config.similarity.threshold);
            let auto_threshold =
                auto_threshold.unwrap_or(config.similarity.auto_merge_threshold);
            let reports = db.auto_merge_duplicates(threshold, auto_threshold)?;
            if reports.is_empty() {
                return Ok("nothing to merge\n".to_string());
            }
            let mut out = String::new();
            for report in reports {
                out.push_str(&format!(
                    "merged {} task(s) into {}\n",
                    report.merged_ids.len(),
                    report.primary.id
                ));
            }
            Ok(out)
        }
        Command::Meta { command } => match command {
            MetaCommand::Get { id, path } => {
                match db.get_metadata(&id, path.as_deref())? {
                    Some(value) => Ok(format!("{}\n", serde_json::to_string_pretty(&value)?)),
                    None => Ok("(not set)\n".to_string()),
                }
            }
            MetaCommand::Set { id, path, value } => {
                let task = db.set_metadata(&id, &path, parse_value(&value))?;
                Ok(format::format_task(&task))
            }
            MetaCommand::Remove { id, path } => {
                let task = db.remove_metadata(&id, &path)?;
                Ok(format::format_task(&task))
            }
            MetaCommand::Append { id, path, value } => {
                let task = db.append_metadata(&id, &path, parse_value(&value))?;
                Ok(format::format_task(&task))
            }
        },
        Command::Deps { id } => {
            let mut out = String::new();
            for dep in db.get_dependencies_for(&id)? {
                out.push_str(&format!(
                    "{} -> {} ({})\n",
                    dep.from_id,
                    dep.to_id,
                    dep.dep_type.as_str()
                ));
            }
            Ok(out)
        }
        Command::Link { from, to, dep_type } => {
            db.add_dependency(&from, &to, dep_type)?;
            Ok(format!("linked {} -> {} ({})\n", from, to, dep_type.as_str()))
        }
        Command::Unlink { from, to, dep_type } => {
            let removed = db.remove_dependency(&from, &to, dep_type)?;
            if removed {
                Ok(format!("unlinked {} -> {}\n", from, to))
            } else {
                Ok("no such edge\n".to_string())
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    task_trellis::logging::init(cli.verbose);

    let config = Config::load_or_default();
    let db = match open_db(&config, cli.db) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(&db, &config, cli.command) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error ({:?}): {}", err.code, err);
            ExitCode::FAILURE
        }
    }
}
