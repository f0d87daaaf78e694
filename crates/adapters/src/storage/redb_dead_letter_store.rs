use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use domain::common::error::DomainError;
use domain::ingest::entity::DeadLetter;
use ports::secondary::dead_letter_store::DeadLetterStore;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};

use super::redb_err;

/// redb table: key = `(timestamp_ms, sequence)`, value = JSON `DeadLetter`.
const DEAD_LETTERS_TABLE: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("dead_letters");

/// Durable dead-letter queue.
///
/// Letters keep their original payload for replay. The table is capped
/// at `max_entries`; the oldest letters go first.
pub struct RedbDeadLetterStore {
    db: Arc<Database>,
    max_entries: usize,
    seq: AtomicU64,
    write_lock: Mutex<()>,
}

impl RedbDeadLetterStore {
    pub fn open(db: Arc<Database>, max_entries: usize) -> Result<Self, DomainError> {
        let txn = db.begin_write().map_err(redb_err("redb txn begin"))?;
        let last_seq = {
            let table = txn
                .open_table(DEAD_LETTERS_TABLE)
                .map_err(redb_err("redb table create"))?;
            table
                .last()
                .map_err(redb_err("redb last"))?
                .map_or(0, |(k, _v)| k.value().1)
        };
        txn.commit().map_err(redb_err("redb commit"))?;
        Ok(Self {
            db,
            max_entries: max_entries.max(1),
            seq: AtomicU64::new(last_seq + 1),
            write_lock: Mutex::new(()),
        })
    }
}

impl DeadLetterStore for RedbDeadLetterStore {
    fn store(&self, letter: &DeadLetter) -> Result<(), DomainError> {
        let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (letter.timestamp_ms, self.seq.fetch_add(1, Ordering::Relaxed));
        let value = serde_json::to_vec(letter)
            .map_err(|e| DomainError::EngineError(format!("serialize dead letter: {e}")))?;

        let txn = self.db.begin_write().map_err(redb_err("redb write txn"))?;
        {
            let mut table = txn
                .open_table(DEAD_LETTERS_TABLE)
                .map_err(redb_err("redb write table"))?;
            table
                .insert(key, value.as_slice())
                .map_err(redb_err("redb insert"))?;

            let count = usize::try_from(table.len().map_err(redb_err("redb count"))?)
                .unwrap_or(usize::MAX);
            if count > self.max_entries {
                let evict: Vec<(u64, u64)> = table
                    .iter()
                    .map_err(redb_err("redb iter"))?
                    .filter_map(Result::ok)
                    .take(count - self.max_entries)
                    .map(|(k, _v)| k.value())
                    .collect();
                for old in evict {
                    table.remove(old).map_err(redb_err("redb evict"))?;
                }
            }
        }
        txn.commit().map_err(redb_err("redb write commit"))?;
        Ok(())
    }

    /// Newest first.
    fn list(&self, limit: usize) -> Result<Vec<DeadLetter>, DomainError> {
        let txn = self.db.begin_read().map_err(redb_err("redb read txn"))?;
        let table = txn
            .open_table(DEAD_LETTERS_TABLE)
            .map_err(redb_err("redb read table"))?;
        let letters = table
            .iter()
            .map_err(redb_err("redb iter"))?
            .rev()
            .filter_map(Result::ok)
            .filter_map(|(_k, v)| serde_json::from_slice::<DeadLetter>(v.value()).ok())
            .take(limit)
            .collect();
        Ok(letters)
    }

    fn count(&self) -> Result<usize, DomainError> {
        let txn = self.db.begin_read().map_err(redb_err("redb count txn"))?;
        let table = txn
            .open_table(DEAD_LETTERS_TABLE)
            .map_err(redb_err("redb count table"))?;
        let count = table.len().map_err(redb_err("redb count"))?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }
}
