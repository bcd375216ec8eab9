use rusqlite::Connection;
use upsertkit_core::db::open_db_in_memory;
use upsertkit_core::{
    EntityRepository, ExternalMapping, KeyedRecord, ListQuery, RepoError, SqliteEntityRepository,
};

#[test]
fn insert_get_and_find_by_key_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::<KeyedRecord>::try_new(&conn).unwrap();

    let mut record = KeyedRecord::new("alpha", "first");
    record.updated_at = 10;
    let inserted = repo.insert(&record).unwrap();
    assert_eq!(inserted, record);

    assert_eq!(repo.get(record.id).unwrap(), Some(record.clone()));

    let probe = KeyedRecord::new("alpha", "ignored");
    let found = repo
        .find_by_key(KeyedRecord::KEY_COLUMNS, &probe)
        .unwrap()
        .unwrap();
    assert_eq!(found.id, record.id);

    let missing = KeyedRecord::new("beta", "");
    assert_eq!(repo.find_by_key(KeyedRecord::KEY_COLUMNS, &missing).unwrap(), None);
}

#[test]
fn find_by_key_uses_every_key_column() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::<ExternalMapping>::try_new(&conn).unwrap();

    repo.insert(&ExternalMapping::new("github", "42", "repo/a")).unwrap();
    repo.insert(&ExternalMapping::new("gitlab", "42", "repo/b")).unwrap();

    let probe = ExternalMapping::new("gitlab", "42", "");
    let found = repo
        .find_by_key(ExternalMapping::KEY_COLUMNS, &probe)
        .unwrap()
        .unwrap();
    assert_eq!(found.local_ref, "repo/b");
}

#[test]
fn find_by_key_rejects_null_key_values() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::<ExternalMapping>::new(&conn);

    let probe = ExternalMapping::new("github", "42", "repo/a");
    let err = repo.find_by_key(&["record_id"], &probe).unwrap_err();
    assert!(matches!(err, RepoError::MissingKeyValue { ref column, .. } if column == "record_id"));
}

#[test]
fn update_rewrites_row_and_reports_missing_rows() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::<KeyedRecord>::new(&conn);

    let mut record = repo.insert(&KeyedRecord::new("k", "v1")).unwrap();
    record.data = "v2".to_string();
    record.updated_at += 1;
    let updated = repo.update(&record).unwrap();
    assert_eq!(updated, record);

    let ghost = KeyedRecord::new("ghost", "boo");
    let err = repo.update(&ghost).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { id, .. } if id == ghost.id));
}

#[test]
fn list_orders_by_updated_at_and_paginates() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEntityRepository::<KeyedRecord>::new(&conn);

    for (index, key) in ["a", "b", "c"].iter().enumerate() {
        let mut record = KeyedRecord::new(*key, "x");
        record.updated_at = index as i64;
        repo.insert(&record).unwrap();
    }

    let all = repo.list(&ListQuery::default()).unwrap();
    let keys = all.iter().map(|r| r.key.as_str()).collect::<Vec<_>>();
    assert_eq!(keys, vec!["c", "b", "a"]);
    assert_eq!(repo.count().unwrap(), 3);

    let page = repo
        .list(&ListQuery {
            limit: Some(1),
            offset: 1,
        })
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].key, "b");

    let tail = repo
        .list(&ListQuery {
            limit: None,
            offset: 2,
        })
        .unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].key, "a");
}

#[test]
fn try_new_requires_table_columns_and_unique_groups() {
    let conn = Connection::open_in_memory().unwrap();
    let err = SqliteEntityRepository::<KeyedRecord>::try_new(&conn).err().unwrap();
    assert!(matches!(err, RepoError::MissingRequiredTable("keyed_records")));

    conn.execute_batch(
        "CREATE TABLE keyed_records (id TEXT PRIMARY KEY, key TEXT NOT NULL, updated_at INTEGER);",
    )
    .unwrap();
    let err = SqliteEntityRepository::<KeyedRecord>::try_new(&conn).err().unwrap();
    assert!(matches!(
        err,
        RepoError::MissingRequiredColumn {
            column: "data",
            ..
        }
    ));

    conn.execute_batch("ALTER TABLE keyed_records ADD COLUMN data TEXT;")
        .unwrap();
    let err = SqliteEntityRepository::<KeyedRecord>::try_new(&conn).err().unwrap();
    assert!(matches!(err, RepoError::MissingUniqueIndex { columns, .. } if columns == ["key"]));

    conn.execute_batch("CREATE UNIQUE INDEX ux_keyed_records_key ON keyed_records (key);")
        .unwrap();
    assert!(SqliteEntityRepository::<KeyedRecord>::try_new(&conn).is_ok());
}
