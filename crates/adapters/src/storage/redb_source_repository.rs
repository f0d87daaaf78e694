use std::sync::{Arc, Mutex, PoisonError};

use domain::common::error::DomainError;
use domain::source::entity::Source;
use ports::secondary::source_repository::SourceRepository;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::redb_err;

/// redb table: key = source id, value = JSON-serialized `Source`.
const SOURCES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sources");

/// Source registry backing store.
///
/// Existence checks and writes happen in the same write transaction, so
/// a create racing another create for the same id fails cleanly.
pub struct RedbSourceRepository {
    db: Arc<Database>,
    write_lock: Mutex<()>,
}

impl RedbSourceRepository {
    pub fn open(db: Arc<Database>) -> Result<Self, DomainError> {
        let txn = db.begin_write().map_err(redb_err("redb txn begin"))?;
        {
            let _table = txn
                .open_table(SOURCES_TABLE)
                .map_err(redb_err("redb table create"))?;
        }
        txn.commit().map_err(redb_err("redb commit"))?;
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Insert or replace. `must_exist` picks update semantics, otherwise
    /// the id must be free.
    fn write(&self, source: &Source, must_exist: bool) -> Result<(), DomainError> {
        let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let value = serde_json::to_vec(source)
            .map_err(|e| DomainError::EngineError(format!("serialize source: {e}")))?;

        let txn = self.db.begin_write().map_err(redb_err("redb write txn"))?;
        {
            let mut table = txn
                .open_table(SOURCES_TABLE)
                .map_err(redb_err("redb write table"))?;
            let exists = table
                .get(source.id.as_str())
                .map_err(redb_err("redb get"))?
                .is_some();
            if must_exist && !exists {
                return Err(DomainError::NotFound(format!("source {}", source.id)));
            }
            if !must_exist && exists {
                return Err(DomainError::Duplicate(format!("source {}", source.id)));
            }
            table
                .insert(source.id.as_str(), value.as_slice())
                .map_err(redb_err("redb insert"))?;
        }
        txn.commit().map_err(redb_err("redb write commit"))?;
        Ok(())
    }
}

impl SourceRepository for RedbSourceRepository {
    fn list(&self) -> Result<Vec<Source>, DomainError> {
        let txn = self.db.begin_read().map_err(redb_err("redb read txn"))?;
        let table = txn
            .open_table(SOURCES_TABLE)
            .map_err(redb_err("redb read table"))?;
        let sources = table
            .iter()
            .map_err(redb_err("redb iter"))?
            .filter_map(Result::ok)
            .filter_map(|(k, v)| match serde_json::from_slice::<Source>(v.value()) {
                Ok(source) => Some(source),
                Err(e) => {
                    tracing::warn!(source_id = k.value(), error = %e, "skipping unreadable source row");
                    None
                }
            })
            .collect();
        Ok(sources)
    }

    fn get(&self, id: &str) -> Result<Option<Source>, DomainError> {
        let txn = self.db.begin_read().map_err(redb_err("redb read txn"))?;
        let table = txn
            .open_table(SOURCES_TABLE)
            .map_err(redb_err("redb read table"))?;
        let Some(value) = table.get(id).map_err(redb_err("redb get"))? else {
            return Ok(None);
        };
        serde_json::from_slice(value.value())
            .map(Some)
            .map_err(|e| DomainError::EngineError(format!("deserialize source {id}: {e}")))
    }

    fn create(&self, source: &Source) -> Result<(), DomainError> {
        self.write(source, false)
    }

    fn update(&self, source: &Source) -> Result<(), DomainError> {
        self.write(source, true)
    }

    fn delete(&self, id: &str) -> Result<(), DomainError> {
        let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let txn = self.db.begin_write().map_err(redb_err("redb write txn"))?;
        let removed = {
            let mut table = txn
                .open_table(SOURCES_TABLE)
                .map_err(redb_err("redb write table"))?;
            table.remove(id).map_err(redb_err("redb remove"))?.is_some()
        };
        if !removed {
            return Err(DomainError::NotFound(format!("source {id}")));
        }
        txn.commit().map_err(redb_err("redb write commit"))?;
        Ok(())
    }
}
