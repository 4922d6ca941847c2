//! Integration tests for similarity queries, duplicate grouping, and merge.

use serde_json::{json, Map};
use std::thread::sleep;
use std::time::Duration;
use task_trellis::db::Database;
use task_trellis::error::ErrorCode;
use task_trellis::types::{CreateTaskOptions, DepType, MergeOptions};

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn add(db: &Database, title: &str) -> String {
    db.create_task(CreateTaskOptions {
        title: title.to_string(),
        ..Default::default()
    })
    .unwrap()
    .id
}

fn add_child(db: &Database, parent: &str, title: &str) -> String {
    db.create_task(CreateTaskOptions {
        title: title.to_string(),
        child_of: Some(parent.to_string()),
        ..Default::default()
    })
    .unwrap()
    .id
}

mod similar {
    use super::*;

    #[test]
    fn results_are_annotated_and_filtered() {
        let db = setup_db();
        add(&db, "Implement OAuth login");
        add(&db, "Add OAuth based login flow");
        add(&db, "Update README typo");

        let results = db
            .find_similar_tasks("Implement OAuth login", 0.3, true)
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&"1"));
        assert!(!ids.contains(&"3"));

        for task in &results {
            let score = task.similarity_score().unwrap();
            assert!((0.3..=1.0).contains(&score), "score {}", score);
        }
        // The exact-title match scores 1.0 and ranks first.
        assert_eq!(results[0].id, "1");
        assert_eq!(results[0].similarity_score(), Some(1.0));
    }

    #[test]
    fn annotation_is_never_persisted() {
        let db = setup_db();
        add(&db, "Implement OAuth login");
        db.find_similar_tasks("Implement OAuth login", 0.3, true)
            .unwrap();

        let stored = db.get_task("1").unwrap();
        assert!(stored.similarity_score().is_none());
        assert!(stored.metadata.is_empty());
    }

    #[test]
    fn reserved_key_is_stripped_on_create() {
        let db = setup_db();
        let mut metadata = Map::new();
        metadata.insert("_similarity".to_string(), json!(0.99));
        metadata.insert("kept".to_string(), json!(true));
        let task = db
            .create_task(CreateTaskOptions {
                title: "task".to_string(),
                metadata: Some(metadata),
                ..Default::default()
            })
            .unwrap();
        assert!(task.similarity_score().is_none());
        assert_eq!(task.metadata.get("kept"), Some(&json!(true)));
    }

    #[test]
    fn out_of_range_threshold_is_invalid_input() {
        let db = setup_db();
        for threshold in [-0.1, 1.5] {
            let err = db.find_similar_tasks("anything", threshold, true).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidInput);
        }
    }

    #[test]
    fn fuzzy_pass_catches_typo_only_matches() {
        let db = setup_db();
        add(&db, "Implement OAuth logon");

        let without = db
            .find_similar_tasks("Implement OAuth login", 0.9, false)
            .unwrap();
        assert!(without.is_empty());

        // Edit distance over the titles clears min(0.9 + 0.2, 0.8) = 0.8.
        let with = db
            .find_similar_tasks("Implement OAuth login", 0.9, true)
            .unwrap();
        assert_eq!(with.len(), 1);
    }
}

mod duplicates {
    use super::*;

    #[test]
    fn groups_similar_tasks_and_excludes_the_rest() {
        let db = setup_db();
        add(&db, "Implement OAuth login");
        add(&db, "Add OAuth based login flow");
        add(&db, "Update README typo");

        let groups = db.find_duplicates(0.3).unwrap();
        assert_eq!(groups.len(), 1);
        let ids: Vec<&str> = groups[0].tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(groups[0].max_similarity >= 0.3);
        assert_eq!(groups[0].similarity_matrix.len(), 2);
    }

    #[test]
    fn out_of_range_threshold_is_invalid_input() {
        let db = setup_db();
        let err = db.find_duplicates(2.0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }
}

mod merge {
    use super::*;

    #[test]
    fn primary_absorbs_tag_union() {
        let db = setup_db();
        db.create_task(CreateTaskOptions {
            title: "primary".to_string(),
            tags: Some(vec!["auth".to_string(), "backend".to_string()]),
            ..Default::default()
        })
        .unwrap();
        db.create_task(CreateTaskOptions {
            title: "dup".to_string(),
            tags: Some(vec!["backend".to_string(), "login".to_string()]),
            ..Default::default()
        })
        .unwrap();

        let report = db
            .merge_duplicates(
                &["2".to_string()],
                "1",
                MergeOptions {
                    combine_metadata: false,
                },
            )
            .unwrap();
        assert_eq!(report.primary.tags, vec!["auth", "backend", "login"]);
        assert_eq!(report.deleted_count, 1);
    }

    #[test]
    fn metadata_conflicts_follow_combine_flag() {
        for (combine, expected) in [(false, "primary"), (true, "member")] {
            let db = setup_db();
            let mut pm = Map::new();
            pm.insert("owner".to_string(), json!("primary"));
            pm.insert("primary_only".to_string(), json!(1));
            db.create_task(CreateTaskOptions {
                title: "primary".to_string(),
                metadata: Some(pm),
                ..Default::default()
            })
            .unwrap();
            let mut mm = Map::new();
            mm.insert("owner".to_string(), json!("member"));
            mm.insert("member_only".to_string(), json!(2));
            db.create_task(CreateTaskOptions {
                title: "dup".to_string(),
                metadata: Some(mm),
                ..Default::default()
            })
            .unwrap();

            let report = db
                .merge_duplicates(
                    &["2".to_string()],
                    "1",
                    MergeOptions {
                        combine_metadata: combine,
                    },
                )
                .unwrap();
            assert_eq!(
                report.primary.metadata.get("owner"),
                Some(&json!(expected)),
                "combine_metadata = {}",
                combine
            );
            // Non-conflicting keys flow in either way.
            assert_eq!(report.primary.metadata.get("primary_only"), Some(&json!(1)));
            assert_eq!(report.primary.metadata.get("member_only"), Some(&json!(2)));
        }
    }

    #[test]
    fn edges_are_repointed_to_the_primary() {
        let db = setup_db();
        add(&db, "primary");
        add(&db, "dup");
        add(&db, "other");
        db.add_dependency("3", "2", DepType::Sibling).unwrap();

        db.merge_duplicates(
            &["2".to_string()],
            "1",
            MergeOptions {
                combine_metadata: false,
            },
        )
        .unwrap();

        // Task 3 renumbered to 2 after the deletion; its edge now targets
        // the primary.
        let deps = db.get_dependencies_for("1").unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].from_id, "2");
        assert_eq!(deps[0].to_id, "1");
        assert_eq!(deps[0].dep_type, DepType::Sibling);
    }

    #[test]
    fn edges_between_members_do_not_become_self_edges() {
        let db = setup_db();
        add(&db, "primary");
        add(&db, "dup");
        db.add_dependency("1", "2", DepType::Sibling).unwrap();

        db.merge_duplicates(
            &["1".to_string(), "2".to_string()],
            "1",
            MergeOptions {
                combine_metadata: false,
            },
        )
        .unwrap();

        assert!(db.get_dependencies_for("1").unwrap().is_empty());
        assert!(db.get_all_dependencies().unwrap().is_empty());
    }

    #[test]
    fn merge_tracks_primary_through_renumbering() {
        let db = setup_db();
        add(&db, "dup a");
        add(&db, "bystander");
        add(&db, "dup b");

        let report = db
            .merge_duplicates(
                &["1".to_string(), "3".to_string()],
                "3",
                MergeOptions {
                    combine_metadata: false,
                },
            )
            .unwrap();

        // Deleting task 1 shifted 2 -> 1 and 3 -> 2, so the surviving
        // primary answers to its renumbered ID.
        assert_eq!(report.primary.id, "2");
        assert_eq!(report.primary.title, "dup b");
        assert_eq!(db.get_task("1").unwrap().title, "bystander");
        assert!(db.get_task("3").is_err());
    }

    #[test]
    fn absorbed_subtrees_are_deleted_whole() {
        let db = setup_db();
        add(&db, "primary");
        add(&db, "dup");
        add_child(&db, "2", "dup child");

        let report = db
            .merge_duplicates(
                &["2".to_string()],
                "1",
                MergeOptions {
                    combine_metadata: false,
                },
            )
            .unwrap();
        assert_eq!(report.deleted_count, 2);
        assert_eq!(db.get_all_tasks().unwrap().len(), 1);
    }

    #[test]
    fn merged_groups_stay_merged() {
        let db = setup_db();
        add(&db, "Implement OAuth login");
        add(&db, "Implement OAuth login");
        add(&db, "Update README typo");

        db.merge_duplicates(
            &["1".to_string(), "2".to_string()],
            "1",
            MergeOptions {
                combine_metadata: false,
            },
        )
        .unwrap();

        // The duplicate pair is gone, and the README task renumbered from
        // 3 to 2; re-running against the now-stale id 3 fails without
        // touching the store.
        assert!(db.find_duplicates(0.3).unwrap().is_empty());
        let err = db
            .merge_duplicates(
                &["3".to_string()],
                "1",
                MergeOptions {
                    combine_metadata: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(db.get_all_tasks().unwrap().len(), 2);
    }

    #[test]
    fn merge_without_non_primary_members_is_rejected() {
        let db = setup_db();
        add(&db, "only");
        let err = db
            .merge_duplicates(
                &["1".to_string()],
                "1",
                MergeOptions {
                    combine_metadata: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn primary_inside_member_subtree_is_rejected() {
        let db = setup_db();
        add(&db, "root");
        add_child(&db, "1", "child");
        let err = db
            .merge_duplicates(
                &["1".to_string()],
                "1.1",
                MergeOptions {
                    combine_metadata: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn missing_member_is_not_found_and_nothing_changes() {
        let db = setup_db();
        add(&db, "primary");
        let err = db
            .merge_duplicates(
                &["9".to_string()],
                "1",
                MergeOptions {
                    combine_metadata: false,
                },
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(db.get_all_tasks().unwrap().len(), 1);
    }
}

mod auto_merge {
    use super::*;

    #[test]
    fn merges_high_confidence_groups_onto_earliest_created() {
        let db = setup_db();
        add(&db, "Update README typo");
        add(&db, "Implement OAuth login");
        sleep(Duration::from_millis(5));
        add(&db, "Implement OAuth login");

        let reports = db.auto_merge_duplicates(0.3, 0.8).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].primary.id, "2");
        assert_eq!(reports[0].merged_ids, vec!["3".to_string()]);

        let remaining = db.get_all_tasks().unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[1].title, "Implement OAuth login");
    }

    #[test]
    fn leaves_groups_below_the_auto_threshold_alone() {
        let db = setup_db();
        // Similar enough to group at 0.3, nowhere near 0.95.
        add(&db, "Implement OAuth login");
        add(&db, "Add OAuth based login flow support");

        assert!(!db.find_duplicates(0.3).unwrap().is_empty());
        let reports = db.auto_merge_duplicates(0.3, 0.95).unwrap();
        assert!(reports.is_empty());
        assert_eq!(db.get_all_tasks().unwrap().len(), 2);
    }

    #[test]
    fn empty_store_merges_nothing() {
        let db = setup_db();
        assert!(db.auto_merge_duplicates(0.3, 0.8).unwrap().is_empty());
    }
}
