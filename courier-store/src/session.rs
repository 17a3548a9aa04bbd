use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::StoreError;

/// File name of the current session slot.
const CURRENT_SESSION_FILE: &str = "session.json";
/// File name of the crashed session slot.
const CRASHED_SESSION_FILE: &str = "crashed-session.json";

/// Single-file slots for session state, separate from the envelope queue.
///
/// The current session is overwritten on every update. When a crash is
/// detected on the next launch, the current slot is moved to the crashed slot
/// so the crash handler can close and report the session that was running
/// when the process died.
#[derive(Debug)]
pub struct SessionStore {
    directory: PathBuf,
}

impl SessionStore {
    /// Opens the session store in the given cache directory.
    pub fn open(cache_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(cache_dir).map_err(StoreError::CreateDirFailed)?;
        Ok(Self {
            directory: cache_dir.to_owned(),
        })
    }

    /// Overwrites the current session slot with the given serialized session.
    pub fn write_current_session(&self, data: &[u8]) -> Result<(), StoreError> {
        let path = self.current_path();
        let partial = path.with_extension("partial");

        fs::write(&partial, data).map_err(StoreError::WriteFailed)?;
        fs::rename(&partial, &path).map_err(StoreError::WriteFailed)?;
        Ok(())
    }

    /// Reads the current session slot, if present.
    pub fn read_current_session(&self) -> Result<Option<Bytes>, StoreError> {
        Self::read_slot(&self.current_path())
    }

    /// Deletes the current session slot.
    pub fn delete_current_session(&self) -> Result<(), StoreError> {
        Self::delete_slot(&self.current_path())
    }

    /// Moves the current session into the crashed session slot.
    ///
    /// Returns `true` when a current session existed. An existing crashed
    /// session is overwritten; only the most recent crash is reported.
    pub fn stash_crashed_session(&self) -> Result<bool, StoreError> {
        let current = self.current_path();
        if !current.exists() {
            return Ok(false);
        }

        fs::rename(&current, self.crashed_path()).map_err(StoreError::WriteFailed)?;
        Ok(true)
    }

    /// Reads the crashed session slot, if present.
    pub fn read_crashed_session(&self) -> Result<Option<Bytes>, StoreError> {
        Self::read_slot(&self.crashed_path())
    }

    /// Deletes the crashed session slot.
    pub fn delete_crashed_session(&self) -> Result<(), StoreError> {
        Self::delete_slot(&self.crashed_path())
    }

    fn current_path(&self) -> PathBuf {
        self.directory.join(CURRENT_SESSION_FILE)
    }

    fn crashed_path(&self) -> PathBuf {
        self.directory.join(CRASHED_SESSION_FILE)
    }

    fn read_slot(path: &Path) -> Result<Option<Bytes>, StoreError> {
        match fs::read(path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::ReadFailed(error)),
        }
    }

    fn delete_slot(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::DeleteFailed(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_session_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        assert_eq!(store.read_current_session().unwrap(), None);

        store.write_current_session(b"{\"status\":\"ok\"}").unwrap();
        store
            .write_current_session(b"{\"status\":\"exited\"}")
            .unwrap();

        let data = store.read_current_session().unwrap().unwrap();
        assert_eq!(&data[..], b"{\"status\":\"exited\"}");
    }

    #[test]
    fn test_stash_crashed_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        store.write_current_session(b"{\"status\":\"ok\"}").unwrap();
        assert!(store.stash_crashed_session().unwrap());

        // the current slot is now empty, the crashed slot holds the session
        assert_eq!(store.read_current_session().unwrap(), None);
        let crashed = store.read_crashed_session().unwrap().unwrap();
        assert_eq!(&crashed[..], b"{\"status\":\"ok\"}");

        // stashing again without a current session is a no-op
        assert!(!store.stash_crashed_session().unwrap());
    }

    #[test]
    fn test_delete_slots() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();

        store.write_current_session(b"x").unwrap();
        store.delete_current_session().unwrap();
        assert_eq!(store.read_current_session().unwrap(), None);

        // deleting empty slots is fine
        store.delete_current_session().unwrap();
        store.delete_crashed_session().unwrap();
    }
}
