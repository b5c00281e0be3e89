use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use roundtrack_model::{Round, StorageConfig};
use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::debug;

// Meta table: well-known key -> u64
pub const TABLE_META: TableDefinition<&str, u64> = TableDefinition::new("meta");

// Meta Keys
pub const KEY_DB_ROUND: &str = "db_round";

/// File name used inside a `StorageConfig::File` directory.
pub const DB_FILE_NAME: &str = "tracker.db";

#[derive(Debug, Error)]
pub enum TrackerDbError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

fn round_table(name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(name)
}

/// Shared durable store for all trackers.
pub struct TrackerDb {
    db: Database,
}

impl TrackerDb {
    /// Open or create the database described by `config`.
    pub fn open(config: &StorageConfig) -> Result<Self, TrackerDbError> {
        let db = match config {
            StorageConfig::File(dir) => {
                if !dir.exists() {
                    std::fs::create_dir_all(dir)?;
                }
                Database::builder().create(dir.join(DB_FILE_NAME))?
            }
            StorageConfig::InMemory => {
                Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?
            }
        };

        // Make sure the meta table exists so readers never see TableDoesNotExist for it
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(TABLE_META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Round the durable tracker state covers. 0 for a fresh database.
    pub fn db_round(&self) -> Result<Round, TrackerDbError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TABLE_META)?;
        let round = table.get(KEY_DB_ROUND)?.map(|v| v.value()).unwrap_or(0);
        Ok(Round(round))
    }

    /// Start the write transaction for one commit cycle.
    pub fn begin(&self) -> Result<TransactionScope, TrackerDbError> {
        Ok(TransactionScope {
            txn: self.db.begin_write()?,
        })
    }

    /// Run `f` inside a write transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn transact<T, E>(
        &self,
        f: impl FnOnce(&TransactionScope) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<TrackerDbError>,
    {
        let scope = self.begin()?;
        match f(&scope) {
            Ok(value) => {
                scope.commit()?;
                Ok(value)
            }
            Err(e) => {
                scope.rollback();
                Err(e)
            }
        }
    }

    /// Read one row of a round-keyed table.
    pub fn get_round(&self, table: &str, round: Round) -> Result<Option<Vec<u8>>, TrackerDbError> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(round_table(table)) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(table.get(round.0)?.map(|v| v.value().to_vec()))
    }

    /// Read every row of a round-keyed table within `rounds`, ascending.
    pub fn rounds_in(
        &self,
        table: &str,
        rounds: RangeInclusive<Round>,
    ) -> Result<Vec<(Round, Vec<u8>)>, TrackerDbError> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(round_table(table)) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut rows = Vec::new();
        for entry in table.range(rounds.start().0..=rounds.end().0)? {
            let (k, v) = entry?;
            rows.push((Round(k.value()), v.value().to_vec()));
        }
        Ok(rows)
    }
}

/// The write transaction shared by every tracker during one commit cycle.
///
/// Dropping a scope without calling [`commit`](Self::commit) discards every write.
pub struct TransactionScope {
    txn: WriteTransaction,
}

impl TransactionScope {
    /// Record the round the durable state now covers.
    pub fn set_db_round(&self, round: Round) -> Result<(), TrackerDbError> {
        let mut table = self.txn.open_table(TABLE_META)?;
        table.insert(KEY_DB_ROUND, round.0)?;
        Ok(())
    }

    /// `db_round` as seen from inside this transaction.
    pub fn db_round(&self) -> Result<Round, TrackerDbError> {
        let table = self.txn.open_table(TABLE_META)?;
        let round = table.get(KEY_DB_ROUND)?.map(|v| v.value()).unwrap_or(0);
        Ok(Round(round))
    }

    pub fn put_round(&self, table: &str, round: Round, value: &[u8]) -> Result<(), TrackerDbError> {
        let mut table = self.txn.open_table(round_table(table))?;
        table.insert(round.0, value)?;
        Ok(())
    }

    pub fn get_round(&self, table: &str, round: Round) -> Result<Option<Vec<u8>>, TrackerDbError> {
        let table = self.txn.open_table(round_table(table))?;
        let value = table.get(round.0)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    /// Delete every row keyed below `floor`. Returns how many rows went.
    pub fn prune_below(&self, table: &str, floor: Round) -> Result<usize, TrackerDbError> {
        let mut table = self.txn.open_table(round_table(table))?;
        let doomed = table
            .range(..floor.0)?
            .map(|entry| entry.map(|(k, _)| k.value()))
            .collect::<Result<Vec<u64>, _>>()?;
        for key in &doomed {
            table.remove(key)?;
        }
        Ok(doomed.len())
    }

    pub fn commit(self) -> Result<(), TrackerDbError> {
        self.txn.commit()?;
        Ok(())
    }

    /// Discard every write made through this scope.
    pub fn rollback(self) {
        if let Err(e) = self.txn.abort() {
            debug!(error = %e, "Abort of tracker transaction failed; writes are dropped anyway");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_db_starts_at_genesis() {
        let db = TrackerDb::open(&StorageConfig::InMemory).unwrap();
        assert_eq!(db.db_round().unwrap(), Round::ZERO);
        assert_eq!(db.get_round("missing", Round(1)).unwrap(), None);
        assert!(db.rounds_in("missing", Round(0)..=Round(9)).unwrap().is_empty());
    }

    #[test]
    fn prune_keeps_floor() {
        let db = TrackerDb::open(&StorageConfig::InMemory).unwrap();
        db.transact(|tx| {
            for r in 1..=6 {
                tx.put_round("rows", Round(r), &[r as u8])?;
            }
            Ok::<_, TrackerDbError>(())
        })
        .unwrap();

        let removed = db
            .transact(|tx| tx.prune_below("rows", Round(4)))
            .unwrap();
        assert_eq!(removed, 3);

        let rounds: Vec<Round> = db
            .rounds_in("rows", Round(0)..=Round(10))
            .unwrap()
            .into_iter()
            .map(|(r, _)| r)
            .collect();
        assert_eq!(rounds, vec![Round(4), Round(5), Round(6)]);
    }
}
