mod common;

use common::{MemLedger, RecordingTracker};
use roundtrack_tracker::{
    BlockTail, BulletinDisk, BulletinMem, CommitOutcome, DeferredCommitContext,
    DeferredCommitRange, LedgerTracker, Round, StorageConfig, TrackerConfig, TrackerDb,
    TrackerError, TrackerRegistry, TABLE_BLOCK_TAIL,
};
use std::sync::Arc;
use tempfile::tempdir;

struct Harness {
    db: Arc<TrackerDb>,
    ledger: MemLedger,
    mem: Arc<BulletinMem>,
    disk: Arc<BulletinDisk>,
    tail: Arc<BlockTail>,
    recorder: Arc<RecordingTracker>,
    registry: TrackerRegistry,
}

fn harness(storage: StorageConfig, retain: u64) -> Harness {
    let config = TrackerConfig {
        block_tail_retain: retain,
        ..TrackerConfig::default()
    }
    .with_storage(storage);
    let db = Arc::new(TrackerDb::open(&config.storage).unwrap());
    let mem = Arc::new(BulletinMem::new());
    let disk = Arc::new(BulletinDisk::new());
    let tail = Arc::new(BlockTail::new(db.clone(), retain));
    let recorder = Arc::new(RecordingTracker::new("recorder"));

    // recorder runs last so the tail has already written when a commit fails
    let trackers: Vec<Arc<dyn LedgerTracker>> =
        vec![mem.clone(), disk.clone(), tail.clone(), recorder.clone()];
    let registry = TrackerRegistry::new(db.clone(), trackers, config).unwrap();

    Harness {
        db,
        ledger: MemLedger::new(),
        mem,
        disk,
        tail,
        recorder,
        registry,
    }
}

impl Harness {
    fn apply_blocks(&self, count: u64) {
        for _ in 0..count {
            let (block, delta) = self.ledger.append();
            self.registry.new_block(&block, &delta);
        }
    }
}

#[test]
fn test_cycle_commits_and_notifies_disk_after_transaction() {
    let h = harness(StorageConfig::InMemory, 2);
    h.registry.load_from_disk(&h.ledger).unwrap();
    h.apply_blocks(6);

    assert_eq!(h.mem.latest_round(), Round(6));
    assert_eq!(h.disk.latest_round(), Round::ZERO);
    assert!(!h.disk.wait(Round(4)).is_ready());

    let mut dcc = h.registry.schedule_commit(Round(6), 2).unwrap();
    assert_eq!(dcc.range, DeferredCommitRange::new(Round(0), 4, 2));

    let outcome = h.registry.commit_round(&mut dcc).unwrap();
    assert_eq!(outcome, CommitOutcome::Committed { new_base: Round(4) });
    assert!(dcc.flush_time.is_some());

    assert_eq!(h.registry.db_round(), Round(4));
    assert_eq!(h.db.db_round().unwrap(), Round(4));
    // Durable only up to what the transaction wrote, not the reported round
    assert_eq!(h.disk.latest_round(), Round(4));
    assert!(h.disk.wait(Round(4)).is_ready());
    assert!(!h.disk.wait(Round(5)).is_ready());

    // Durable rows keep the retained window only; memory keeps it plus everything newer
    assert_eq!(h.db.get_round(TABLE_BLOCK_TAIL, Round(2)).unwrap(), None);
    assert!(h.db.get_round(TABLE_BLOCK_TAIL, Round(4)).unwrap().is_some());
    assert_eq!(h.tail.rounds_in_memory(), vec![Round(3), Round(4), Round(5), Round(6)]);

    assert_eq!(
        h.recorder.events()[7..],
        ["produce_committing_task", "prepare_commit", "commit_round", "post_commit", "post_commit_unlocked"]
    );
}

#[test]
fn test_prepare_failure_unwinds_every_tracker() {
    let h = harness(StorageConfig::InMemory, 2);
    h.registry.load_from_disk(&h.ledger).unwrap();
    h.apply_blocks(6);
    h.recorder.fail_prepare(true);

    let mut dcc = h.registry.schedule_commit(Round(6), 2).unwrap();
    let err = h.registry.commit_round(&mut dcc).unwrap_err();
    assert!(matches!(err, TrackerError::Prepare { tracker: "recorder", .. }));

    assert!(h.recorder.saw("handle_prepare_commit_error"));
    assert!(!h.recorder.saw("commit_round"));
    assert_eq!(h.registry.db_round(), Round::ZERO);
    assert_eq!(h.disk.latest_round(), Round::ZERO);
    assert_eq!(h.db.get_round(TABLE_BLOCK_TAIL, Round(1)).unwrap(), None);

    // Retry succeeds from the same durable round
    h.recorder.fail_prepare(false);
    let mut dcc = h.registry.schedule_commit(Round(6), 2).unwrap();
    assert_eq!(
        h.registry.commit_round(&mut dcc).unwrap(),
        CommitOutcome::Committed { new_base: Round(4) }
    );
}

#[test]
fn test_commit_failure_rolls_back_shared_transaction() {
    let h = harness(StorageConfig::InMemory, 2);
    h.registry.load_from_disk(&h.ledger).unwrap();
    h.apply_blocks(6);
    h.recorder.fail_commit(true);

    let mut dcc = h.registry.schedule_commit(Round(6), 2).unwrap();
    let err = h.registry.commit_round(&mut dcc).unwrap_err();
    assert!(matches!(err, TrackerError::Commit { tracker: "recorder", .. }));

    assert!(h.recorder.saw("handle_commit_error"));
    assert!(!h.recorder.saw("post_commit"));
    // The tail wrote before the recorder failed; nothing of it survived
    assert_eq!(h.db.get_round(TABLE_BLOCK_TAIL, Round(4)).unwrap(), None);
    assert_eq!(h.db.db_round().unwrap(), Round::ZERO);
    assert_eq!(h.registry.db_round(), Round::ZERO);
    assert!(!h.disk.wait(Round(6)).is_ready());
    assert_eq!(h.tail.entry(Round(4)).unwrap().map(|e| e.txn_count), Some(1));
}

#[test]
fn test_stale_range_is_handled_as_unordered() {
    let h = harness(StorageConfig::InMemory, 1);
    h.registry.load_from_disk(&h.ledger).unwrap();
    h.apply_blocks(5);

    let mut first = h.registry.schedule_commit(Round(5), 1).unwrap();
    h.registry.commit_round(&mut first).unwrap();
    assert_eq!(h.disk.latest_round(), Round(4));
    h.recorder.clear();

    let mut stale = DeferredCommitContext::new(DeferredCommitRange::new(Round(0), 2, 0), Round(2));
    assert_eq!(h.registry.commit_round(&mut stale).unwrap(), CommitOutcome::Unordered);
    assert_eq!(h.recorder.events(), vec!["handle_unordered_commit"]);
    assert_eq!(h.registry.db_round(), Round(4));
    assert_eq!(h.disk.latest_round(), Round(4));
}

#[test]
fn test_schedule_respects_in_flight_veto_and_empty_ranges() {
    let h = harness(StorageConfig::InMemory, 2);
    h.registry.load_from_disk(&h.ledger).unwrap();

    // Nothing beyond the lookback yet
    h.apply_blocks(2);
    assert!(h.registry.schedule_commit(Round(2), 2).is_none());
    assert!(!h.registry.is_committing());

    h.apply_blocks(4);
    let mut dcc = h.registry.schedule_commit(Round(6), 2).unwrap();
    assert!(h.registry.is_committing());
    assert!(h.registry.schedule_commit(Round(6), 2).is_none());
    h.registry.commit_round(&mut dcc).unwrap();
    assert!(!h.registry.is_committing());

    h.apply_blocks(2);
    h.recorder.veto(true);
    assert!(h.registry.schedule_commit(Round(8), 2).is_none());
    assert!(!h.registry.is_committing());
}

#[test]
fn test_commit_before_load_is_rejected() {
    let h = harness(StorageConfig::InMemory, 2);
    let mut dcc = DeferredCommitContext::new(DeferredCommitRange::new(Round(0), 1, 0), Round(1));
    assert!(matches!(h.registry.commit_round(&mut dcc), Err(TrackerError::NotInitialized)));
}

#[test]
fn test_committed_up_to_reports_lowest_needed_round() {
    let h = harness(StorageConfig::InMemory, 3);
    h.registry.load_from_disk(&h.ledger).unwrap();
    h.apply_blocks(10);
    // The tail still needs its window below the committed round
    assert_eq!(h.registry.committed_up_to(Round(10)), Round(8));
}

#[test]
fn test_reload_restores_tail_and_replays_ledger() {
    let dir = tempdir().unwrap();
    let storage = StorageConfig::File(dir.path().join("trackers"));

    let ledger = {
        let h = harness(storage.clone(), 2);
        h.registry.load_from_disk(&h.ledger).unwrap();
        h.apply_blocks(8);
        let mut dcc = h.registry.schedule_commit(Round(7), 2).unwrap();
        h.registry.commit_round(&mut dcc).unwrap();
        assert_eq!(h.registry.db_round(), Round(5));
        h.registry.close();
        assert!(h.recorder.saw("close"));
        h.ledger
    };

    let h = harness(storage, 2);
    h.registry.load_from_disk(&ledger).unwrap();
    assert_eq!(h.registry.db_round(), Round(5));
    assert_eq!(h.mem.latest_round(), Round(8));
    assert_eq!(h.disk.latest_round(), Round(5));
    assert!(h.disk.wait(Round(5)).is_ready());
    assert!(!h.disk.wait(Round(6)).is_ready());
    assert_eq!(
        h.tail.rounds_in_memory(),
        vec![Round(4), Round(5), Round(6), Round(7), Round(8)]
    );
    assert_eq!(
        h.recorder.events(),
        vec!["load_from_disk", "new_block", "new_block", "new_block"]
    );
}

#[test]
fn test_durable_releases_match_rows_on_disk_after_reopen() {
    let dir = tempdir().unwrap();
    let storage = StorageConfig::File(dir.path().join("trackers"));
    let rounds = || (1..=10u64).map(Round);

    let (ledger, released) = {
        let h = harness(storage.clone(), 4);
        h.registry.load_from_disk(&h.ledger).unwrap();
        h.apply_blocks(10);
        let mut dcc = h.registry.schedule_commit(Round(10), 4).unwrap();
        h.registry.commit_round(&mut dcc).unwrap();

        let released: Vec<Round> = rounds().filter(|r| h.disk.wait(*r).is_ready()).collect();
        (h.ledger, released)
    };
    assert_eq!(released, (1..=6u64).map(Round).collect::<Vec<_>>());

    let db = TrackerDb::open(&storage).unwrap();
    let db_round = db.db_round().unwrap();
    assert_eq!(db_round, Round(6));
    for round in &released {
        assert!(*round <= db_round);
    }
    assert!(db.get_round(TABLE_BLOCK_TAIL, Round(6)).unwrap().is_some());
    assert_eq!(db.get_round(TABLE_BLOCK_TAIL, Round(7)).unwrap(), None);
    drop(db);

    // A reloaded durable bulletin releases the same rounds, not the ledger's
    let h = harness(storage, 4);
    h.registry.load_from_disk(&ledger).unwrap();
    let reloaded: Vec<Round> = rounds().filter(|r| h.disk.wait(*r).is_ready()).collect();
    assert_eq!(reloaded, released);
    assert_eq!(h.mem.latest_round(), Round(10));
}

#[test]
fn test_db_ahead_of_ledger_fails_load() {
    let dir = tempdir().unwrap();
    let storage = StorageConfig::File(dir.path().join("trackers"));
    {
        let h = harness(storage.clone(), 1);
        h.registry.load_from_disk(&h.ledger).unwrap();
        h.apply_blocks(4);
        let mut dcc = h.registry.schedule_commit(Round(4), 1).unwrap();
        h.registry.commit_round(&mut dcc).unwrap();
    }

    let h = harness(storage, 1);
    h.apply_blocks(1);
    assert!(matches!(
        h.registry.load_from_disk(&h.ledger),
        Err(TrackerError::DbAheadOfLedger { db_round: Round(3), latest: Round(1) })
    ));
}
