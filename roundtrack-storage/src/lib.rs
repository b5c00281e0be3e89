//! Durable tracker database.
//!
//! One redb database holds the rows of every tracker plus the persisted
//! `db_round`. A commit cycle writes all of them through one
//! [`TransactionScope`], so a failed cycle leaves nothing behind.
pub mod tracker_db;

pub use tracker_db::{TrackerDb, TrackerDbError, TransactionScope, KEY_DB_ROUND, TABLE_META};
