use roundtrack_model::{Round, StorageConfig};
use roundtrack_storage::{TrackerDb, TrackerDbError};
use tempfile::tempdir;

#[derive(Debug)]
struct Boom;

impl From<TrackerDbError> for Boom {
    fn from(_: TrackerDbError) -> Self {
        Boom
    }
}

#[test]
fn test_failed_transaction_leaves_nothing() {
    let db = TrackerDb::open(&StorageConfig::InMemory).unwrap();

    let result: Result<(), Boom> = db.transact(|tx| {
        tx.set_db_round(Round(7)).map_err(Boom::from)?;
        tx.put_round("rows", Round(7), b"seven").map_err(Boom::from)?;
        Err(Boom)
    });
    assert!(result.is_err());

    assert_eq!(db.db_round().unwrap(), Round::ZERO);
    assert_eq!(db.get_round("rows", Round(7)).unwrap(), None);
}

#[test]
fn test_db_round_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = StorageConfig::File(dir.path().join("trackers"));

    {
        let db = TrackerDb::open(&config).unwrap();
        let scope = db.begin().unwrap();
        scope.set_db_round(Round(42)).unwrap();
        scope.put_round("rows", Round(42), b"answer").unwrap();
        assert_eq!(scope.db_round().unwrap(), Round(42));
        scope.commit().unwrap();
    }

    let db = TrackerDb::open(&config).unwrap();
    assert_eq!(db.db_round().unwrap(), Round(42));
    assert_eq!(db.get_round("rows", Round(42)).unwrap().as_deref(), Some(&b"answer"[..]));
}

#[test]
fn test_dropped_scope_rolls_back() {
    let db = TrackerDb::open(&StorageConfig::InMemory).unwrap();
    {
        let scope = db.begin().unwrap();
        scope.set_db_round(Round(3)).unwrap();
        // dropped without commit
    }
    assert_eq!(db.db_round().unwrap(), Round::ZERO);
}
