//! Exclusive right to drain a queue file.
//!
//! Only the holder may requeue interrupted work or claim operations, so two
//! processes sharing one database never hand the same row to the server twice.
//! The lock is an OS advisory lock on `<db>.lock` and is released when the
//! holder is dropped or its process exits.

use std::ffi::OsString;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct DrainLock {
    _file: Option<File>,
}

impl DrainLock {
    /// Take the drain lock for the queue at `db_path`, failing fast with
    /// [`Error::Busy`] when another handle holds it.
    pub fn acquire(db_path: &Path) -> Result<Self> {
        let path = lock_path(db_path);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {
                tracing::debug!("Acquired drain lock {}", path.display());
                Ok(Self { _file: Some(file) })
            }
            Err(TryLockError::WouldBlock) => Err(Error::Busy(format!(
                "{} is being drained by another process",
                db_path.display()
            ))),
            Err(TryLockError::Error(error)) => Err(error.into()),
        }
    }

    /// In-memory queues are private to their handle.
    pub const fn in_memory() -> Self {
        Self { _file: None }
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = OsString::from(db_path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_holder_is_refused_until_first_drops() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("queue.db");

        let first = DrainLock::acquire(&db_path).unwrap();
        assert!(matches!(DrainLock::acquire(&db_path), Err(Error::Busy(_))));

        drop(first);
        DrainLock::acquire(&db_path).unwrap();
    }

    #[test]
    fn lock_file_sits_next_to_database() {
        assert_eq!(
            lock_path(Path::new("/var/lib/fieldsync/queue.db")),
            PathBuf::from("/var/lib/fieldsync/queue.db.lock")
        );
    }
}
