use serde_json::json;
use upsertkit_core::db::open_db_in_memory;
use upsertkit_core::{FieldMap, ListQuery, RecordService, UpsertError, UpsertOutcome};

fn fields(value: serde_json::Value) -> FieldMap {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

fn service() -> RecordService {
    RecordService::try_new(open_db_in_memory().unwrap()).unwrap()
}

#[test]
fn request_bodies_upsert_by_key() {
    let mut service = service();

    let created = service
        .upsert(fields(json!({"key": "5", "data": "5"})))
        .unwrap();
    assert_eq!(created.outcome, UpsertOutcome::Created);

    let merged = service
        .upsert(fields(json!({"key": "5", "data": "five"})))
        .unwrap();
    assert_eq!(merged.outcome, UpsertOutcome::Merged);
    assert_eq!(merged.entity.id, created.entity.id);

    let stored = service.get_by_key("5").unwrap().unwrap();
    assert_eq!(stored, merged.entity);
    assert_eq!(service.count().unwrap(), 1);
    assert_eq!(service.get_by_key("6").unwrap(), None);
}

#[test]
fn unknown_or_missing_fields_are_rejected() {
    let mut service = service();

    let err = service
        .upsert(fields(json!({"key": "5", "data": "5", "color": "red"})))
        .unwrap_err();
    assert!(matches!(err, UpsertError::InvalidFields(_)));
    assert!(err.is_misuse());

    let err = service.upsert(fields(json!({"data": "5"}))).unwrap_err();
    assert!(matches!(err, UpsertError::InvalidFields(_)));

    assert_eq!(service.count().unwrap(), 0);
}

#[test]
fn naive_and_typed_entry_points_share_the_table() {
    let mut service = service();

    service
        .upsert_naive(fields(json!({"key": "1", "data": "one"})))
        .unwrap();
    service
        .upsert_naive(fields(json!({"key": "1", "data": "uno"})))
        .unwrap();
    let typed = service
        .upsert_record(upsertkit_core::KeyedRecord::new("2", "two"))
        .unwrap();

    assert_eq!(service.count().unwrap(), 2);
    assert_eq!(service.get_by_key("1").unwrap().unwrap().data, "uno");
    assert_eq!(service.get_by_key("2").unwrap(), Some(typed));

    let page = service
        .list(&ListQuery {
            limit: Some(1),
            offset: 0,
        })
        .unwrap();
    assert_eq!(page.len(), 1);
}
