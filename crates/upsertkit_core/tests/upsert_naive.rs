use upsertkit_core::db::open_db_in_memory;
use upsertkit_core::{
    Candidate, EntityRepository, KeyedRecord, NaiveUpsertEngine, SqliteEntityRepository,
    UpsertError, WriteFailure,
};

#[test]
fn sequential_upserts_create_then_update_in_place() {
    let mut conn = open_db_in_memory().unwrap();
    let engine = NaiveUpsertEngine::<KeyedRecord>::new();

    let first = KeyedRecord::new("5", "first");
    engine
        .upsert(
            &mut conn,
            Candidate::from_entity(first.clone()),
            KeyedRecord::KEY_COLUMNS,
        )
        .unwrap();
    engine
        .upsert(
            &mut conn,
            Candidate::from_entity(KeyedRecord::new("5", "second")),
            KeyedRecord::KEY_COLUMNS,
        )
        .unwrap();

    let repo = SqliteEntityRepository::<KeyedRecord>::new(&conn);
    assert_eq!(repo.count().unwrap(), 1);
    let stored = repo.get(first.id).unwrap().unwrap();
    assert_eq!(stored.data, "second");
}

#[test]
fn stale_lookup_surfaces_the_uniqueness_violation() {
    let mut conn = open_db_in_memory().unwrap();
    let engine = NaiveUpsertEngine::<KeyedRecord>::new();

    engine
        .upsert(
            &mut conn,
            Candidate::from_entity(KeyedRecord::new("5", "winner")),
            KeyedRecord::KEY_COLUMNS,
        )
        .unwrap();

    let err = engine
        .upsert_after_lookup(
            &mut conn,
            None,
            Candidate::from_entity(KeyedRecord::new("5", "loser")),
            KeyedRecord::KEY_COLUMNS,
        )
        .unwrap_err();

    assert!(matches!(err, UpsertError::Repo(_)));
    assert!(matches!(
        err.failure::<KeyedRecord>(KeyedRecord::KEY_COLUMNS),
        Some(WriteFailure::KeyCollision(_))
    ));

    let repo = SqliteEntityRepository::<KeyedRecord>::new(&conn);
    assert_eq!(repo.count().unwrap(), 1);
    let probe = KeyedRecord::new("5", "");
    let stored = repo
        .find_by_key(KeyedRecord::KEY_COLUMNS, &probe)
        .unwrap()
        .unwrap();
    assert_eq!(stored.data, "winner");
}

#[test]
fn misuse_is_rejected_like_the_safe_engine() {
    let mut conn = open_db_in_memory().unwrap();
    let engine = NaiveUpsertEngine::<KeyedRecord>::new();

    let err = engine
        .upsert(
            &mut conn,
            Candidate::from_entity(KeyedRecord::new("5", "x")),
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, UpsertError::EmptyKeyColumns));
}
