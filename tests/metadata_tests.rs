//! Integration tests for dot-path metadata editing.

use serde_json::{json, Value};
use task_trellis::db::Database;
use task_trellis::error::ErrorCode;
use task_trellis::types::CreateTaskOptions;

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

#[test]
fn set_then_get_round_trips() {
    let db = setup_db();
    add(&db, "task");

    db.set_metadata("1", "a.b.c", json!(42)).unwrap();
    assert_eq!(db.get_metadata("1", Some("a.b.c")).unwrap(), Some(json!(42)));
    // Intermediate maps were created along the way.
    assert!(db
        .get_metadata("1", Some("a.b"))
        .unwrap()
        .unwrap()
        .is_object());
}

#[test]
fn get_without_path_returns_whole_map() {
    let db = setup_db();
    add(&db, "task");
    db.set_metadata("1", "x", json!(1)).unwrap();
    db.set_metadata("1", "y", json!("two")).unwrap();

    let whole = db.get_metadata("1", None).unwrap().unwrap();
    assert_eq!(whole, json!({"x": 1, "y": "two"}));
}

#[test]
fn absent_path_is_distinguishable_from_null() {
    let db = setup_db();
    add(&db, "task");
    db.set_metadata("1", "present", Value::Null).unwrap();

    assert_eq!(
        db.get_metadata("1", Some("present")).unwrap(),
        Some(Value::Null)
    );
    assert_eq!(db.get_metadata("1", Some("absent")).unwrap(), None);
    assert_eq!(db.get_metadata("1", Some("present.deeper")).unwrap(), None);
}

#[test]
fn remove_is_noop_success_on_absent_path() {
    let db = setup_db();
    add(&db, "task");

    db.remove_metadata("1", "never.set").unwrap();

    db.set_metadata("1", "gone", json!(true)).unwrap();
    db.remove_metadata("1", "gone").unwrap();
    assert_eq!(db.get_metadata("1", Some("gone")).unwrap(), None);
}

#[test]
fn append_creates_array_then_grows_it() {
    let db = setup_db();
    add(&db, "task");

    db.append_metadata("1", "log", json!("first")).unwrap();
    assert_eq!(
        db.get_metadata("1", Some("log")).unwrap(),
        Some(json!(["first"]))
    );

    db.append_metadata("1", "log", json!("second")).unwrap();
    assert_eq!(
        db.get_metadata("1", Some("log")).unwrap(),
        Some(json!(["first", "second"]))
    );
}

#[test]
fn append_to_scalar_converts_to_pair() {
    let db = setup_db();
    add(&db, "task");

    db.set_metadata("1", "note", json!("original")).unwrap();
    db.append_metadata("1", "note", json!("addendum")).unwrap();
    assert_eq!(
        db.get_metadata("1", Some("note")).unwrap(),
        Some(json!(["original", "addendum"]))
    );
}

#[test]
fn edits_against_missing_task_are_not_found() {
    let db = setup_db();
    let err = db.set_metadata("3", "a", json!(1)).unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    let err = db.get_metadata("3", None).unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[test]
fn malformed_paths_are_invalid_input() {
    let db = setup_db();
    add(&db, "task");
    for path in ["", "a..b", ".a", "a."] {
        let err = db.set_metadata("1", path, json!(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput, "path {:?}", path);
    }
}

#[test]
fn reserved_similarity_key_is_rejected() {
    let db = setup_db();
    add(&db, "task");
    let err = db.set_metadata("1", "_similarity", json!(0.9)).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[test]
fn metadata_survives_rename_cascade() {
    let db = setup_db();
    add(&db, "root");
    db.create_task(CreateTaskOptions {
        title: "child".to_string(),
        child_of: Some("1".to_string()),
        ..Default::default()
    })
    .unwrap();
    db.set_metadata("1.1", "carried.along", json!(true)).unwrap();

    db.update_task_id("1", "2").unwrap();

    assert_eq!(
        db.get_metadata("2.1", Some("carried.along")).unwrap(),
        Some(json!(true))
    );
}
