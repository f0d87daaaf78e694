use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use domain::audit::change::ChangeEntry;
use domain::common::error::DomainError;
use ports::secondary::change_log::ChangeLogSink;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::redb_err;

/// redb table: key = append sequence, value = JSON `ChangeEntry`.
const CHANGES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("change_log");

/// Persistent log of runtime mutations (flag patches, source CRUD).
pub struct RedbChangeLog {
    db: Arc<Database>,
    seq: AtomicU64,
    write_lock: Mutex<()>,
}

impl RedbChangeLog {
    pub fn open(db: Arc<Database>) -> Result<Self, DomainError> {
        let txn = db.begin_write().map_err(redb_err("redb txn begin"))?;
        let last = {
            let table = txn
                .open_table(CHANGES_TABLE)
                .map_err(redb_err("redb table create"))?;
            table
                .last()
                .map_err(redb_err("redb last"))?
                .map_or(0, |(k, _v)| k.value())
        };
        txn.commit().map_err(redb_err("redb commit"))?;
        Ok(Self {
            db,
            seq: AtomicU64::new(last + 1),
            write_lock: Mutex::new(()),
        })
    }
}

impl ChangeLogSink for RedbChangeLog {
    fn record(&self, entry: &ChangeEntry) -> Result<(), DomainError> {
        let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let value = serde_json::to_vec(entry)
            .map_err(|e| DomainError::EngineError(format!("serialize change: {e}")))?;
        let key = self.seq.fetch_add(1, Ordering::Relaxed);

        let txn = self.db.begin_write().map_err(redb_err("redb write txn"))?;
        {
            let mut table = txn
                .open_table(CHANGES_TABLE)
                .map_err(redb_err("redb write table"))?;
            table
                .insert(key, value.as_slice())
                .map_err(redb_err("redb insert"))?;
        }
        txn.commit().map_err(redb_err("redb write commit"))?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<ChangeEntry>, DomainError> {
        let txn = self.db.begin_read().map_err(redb_err("redb read txn"))?;
        let table = txn
            .open_table(CHANGES_TABLE)
            .map_err(redb_err("redb read table"))?;
        let entries = table
            .iter()
            .map_err(redb_err("redb iter"))?
            .rev()
            .filter_map(Result::ok)
            .filter_map(|(_k, v)| serde_json::from_slice::<ChangeEntry>(v.value()).ok())
            .take(limit)
            .collect();
        Ok(entries)
    }
}
