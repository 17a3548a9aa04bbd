use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use courier_envelope::Envelope;

use crate::StoreError;

/// File extension of stored envelopes.
const ENVELOPE_EXT: &str = "envelope";
/// File extension of in-progress writes, ignored by reads.
const PARTIAL_EXT: &str = "partial";

/// An envelope read back from the store, together with its file path.
///
/// The path acts as the deletion handle once the envelope was delivered.
#[derive(Debug)]
pub struct StoredEnvelope {
    /// Path of the backing file.
    pub path: PathBuf,
    /// The parsed envelope.
    pub envelope: Envelope,
}

/// A bounded, ordered, crash-durable queue of envelopes on disk.
///
/// Each envelope lives in its own file. File names start with a zero-padded
/// millisecond timestamp followed by a monotonic counter, so lexicographic
/// order is insertion order and reads come back oldest-first without extra
/// bookkeeping.
#[derive(Debug)]
pub struct EnvelopeStore {
    directory: PathBuf,
    max_envelopes: usize,
    counter: AtomicU64,
}

impl EnvelopeStore {
    /// Opens the envelope store under the given cache directory.
    ///
    /// Envelopes are kept in an `envelopes` subdirectory, which is created if
    /// it does not exist.
    pub fn open(cache_dir: &Path, max_envelopes: usize) -> Result<Self, StoreError> {
        let directory = cache_dir.join("envelopes");
        fs::create_dir_all(&directory).map_err(StoreError::CreateDirFailed)?;

        Ok(Self {
            directory,
            max_envelopes,
            counter: AtomicU64::new(0),
        })
    }

    /// Returns the directory holding the envelope files.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Persists an envelope and returns the path of its file.
    ///
    /// The file is written atomically: a crash mid-write leaves a `.partial`
    /// file that reads ignore. After a successful write, the oldest envelopes
    /// are evicted until the configured bound holds again, so storing never
    /// fails due to capacity.
    pub fn store(&self, envelope: &Envelope) -> Result<PathBuf, StoreError> {
        let data = envelope.to_vec()?;

        let path = self.directory.join(self.next_file_name());
        let partial = path.with_extension(PARTIAL_EXT);

        fs::write(&partial, &data).map_err(StoreError::WriteFailed)?;
        fs::rename(&partial, &path).map_err(StoreError::WriteFailed)?;

        courier_log::debug!(
            path = %path.display(),
            size = data.len(),
            "stored envelope"
        );

        self.enforce_limit()?;

        Ok(path)
    }

    /// Reads all stored envelopes, ordered oldest-first.
    ///
    /// Files that fail to parse are skipped and deleted instead of aborting
    /// the read. This matters right after an uncontrolled crash, where the
    /// directory may contain a torn file.
    pub fn get_all_envelopes(&self) -> Result<Vec<StoredEnvelope>, StoreError> {
        let mut envelopes = Vec::new();

        for path in self.envelope_paths()? {
            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(error) => {
                    courier_log::warn!(
                        path = %path.display(),
                        error = %error,
                        "could not read stored envelope, skipping"
                    );
                    continue;
                }
            };

            match Envelope::parse_bytes(Bytes::from(data)) {
                Ok(envelope) => envelopes.push(StoredEnvelope { path, envelope }),
                Err(error) => {
                    courier_log::warn!(
                        path = %path.display(),
                        error = %error,
                        "dropping malformed stored envelope"
                    );
                    fs::remove_file(&path).ok();
                }
            }
        }

        Ok(envelopes)
    }

    /// Returns the number of stored envelopes.
    pub fn envelope_count(&self) -> Result<usize, StoreError> {
        Ok(self.envelope_paths()?.len())
    }

    /// Deletes a single stored envelope.
    ///
    /// Deleting an already removed envelope is a no-op.
    pub fn delete_envelope(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StoreError::DeleteFailed(error)),
        }
    }

    /// Deletes all stored envelopes.
    pub fn delete_all_envelopes(&self) -> Result<(), StoreError> {
        for path in self.envelope_paths()? {
            self.delete_envelope(&path)?;
        }
        Ok(())
    }

    /// Deletes stored envelopes older than the given age.
    ///
    /// Called on SDK start so telemetry that could not be delivered for a
    /// long time does not accumulate forever.
    pub fn delete_old_envelopes(&self, max_age: Duration) -> Result<(), StoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        for path in self.envelope_paths()? {
            let modified = fs::metadata(&path)
                .and_then(|metadata| metadata.modified())
                .map_err(StoreError::ReadFailed)?;

            if modified < cutoff {
                courier_log::debug!(path = %path.display(), "deleting expired envelope");
                self.delete_envelope(&path)?;
            }
        }

        Ok(())
    }

    /// Returns the paths of all stored envelopes in insertion order.
    fn envelope_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = fs::read_dir(&self.directory).map_err(StoreError::ListFailed)?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(ENVELOPE_EXT))
            .collect();

        paths.sort();
        Ok(paths)
    }

    fn next_file_name(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);

        format!("{millis:020}-{counter:010}.{ENVELOPE_EXT}")
    }

    fn enforce_limit(&self) -> Result<(), StoreError> {
        let paths = self.envelope_paths()?;
        let excess = paths.len().saturating_sub(self.max_envelopes);
        if excess == 0 {
            return Ok(());
        }

        courier_log::debug!(count = excess, "evicting oldest envelopes over limit");
        for path in &paths[..excess] {
            self.delete_envelope(path)?;
        }

        Ok(())
    }
}
