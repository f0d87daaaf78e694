//! redb-backed persistence. Sources, dead letters and the change log
//! share one database file, each in its own table.

use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use domain::common::error::DomainError;
use redb::Database;
use redb::backends::InMemoryBackend;

pub mod redb_change_log;
pub mod redb_dead_letter_store;
pub mod redb_source_repository;

/// Open (or create) the gateway database. `None` keeps everything in
/// memory for the life of the process.
pub fn open_database(path: Option<&Path>) -> Result<Arc<Database>, DomainError> {
    let db = match path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DomainError::Unavailable(format!("creating {}: {e}", parent.display()))
                })?;
            }
            Database::create(path).map_err(redb_err("redb open failed"))?
        }
        None => Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(redb_err("redb in-memory open failed"))?,
    };
    Ok(Arc::new(db))
}

/// Map a redb error into the domain, keeping the failing step in the text.
pub(crate) fn redb_err<E: Display>(context: &'static str) -> impl FnOnce(E) -> DomainError {
    move |e| DomainError::Unavailable(format!("{context}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_database_opens() {
        assert!(open_database(None).is_ok());
    }

    #[test]
    fn file_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("flowgate.redb");
        open_database(Some(&path)).unwrap();
        assert!(path.exists());
    }
}
