//! Encrypted license store.
//!
//! Owns the envelope file exclusively. Reads never crash on bad data: any
//! envelope that cannot be parsed, authenticated or decoded is `Corrupt`.

use crate::error::{StoreError, StoreResult};
use crate::persist::{remove_if_present, write_atomic};
use crate::record::{EncryptedEnvelope, LicenseRecord};
use hearth_crypto::Codec;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Reads and writes the versioned, encrypted license envelope.
#[derive(Debug)]
pub struct LicenseStore {
    path: PathBuf,
    codec: Codec,
    // Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl LicenseStore {
    pub fn new(path: impl Into<PathBuf>, codec: Codec) -> Self {
        Self {
            path: path.into(),
            codec,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if an envelope file is present, without decrypting it.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads and decrypts the stored record.
    pub fn load(&self) -> StoreResult<LicenseRecord> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(corrupt("envelope is not UTF-8"));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        self.decode(&raw).inspect_err(|e| {
            warn!(path = %self.path.display(), error = %e, "stored license is unusable");
        })
    }

    fn decode(&self, raw: &str) -> StoreResult<LicenseRecord> {
        if raw.trim().is_empty() {
            return Err(corrupt("envelope file is empty"));
        }

        let envelope: EncryptedEnvelope =
            serde_json::from_str(raw).map_err(|e| corrupt(format!("invalid envelope: {e}")))?;
        envelope.check().map_err(corrupt)?;

        let plaintext = self
            .codec
            .decrypt(&envelope.payload)
            .map_err(|e| corrupt(e.to_string()))?;

        serde_json::from_slice(&plaintext).map_err(|e| corrupt(format!("invalid record: {e}")))
    }

    /// Encrypts and atomically replaces the stored record.
    pub fn save(&self, record: &LicenseRecord) -> StoreResult<()> {
        let _guard = self.lock();
        self.write(record)
    }

    /// Read-modify-write of the stored record under the writer lock.
    ///
    /// `f` sees the current record (or why it could not be loaded) and
    /// returns the record to write. An error from `f` leaves the file alone.
    pub fn update<E, F>(&self, f: F) -> Result<LicenseRecord, E>
    where
        E: From<StoreError>,
        F: FnOnce(StoreResult<LicenseRecord>) -> Result<LicenseRecord, E>,
    {
        let _guard = self.lock();
        let record = f(self.load())?;
        self.write(&record)?;
        Ok(record)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self, record: &LicenseRecord) -> StoreResult<()> {
        let plaintext =
            serde_json::to_vec(record).map_err(|e| StoreError::Encode(e.to_string()))?;
        let payload = self
            .codec
            .encrypt(&plaintext)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        let envelope = serde_json::to_vec_pretty(&EncryptedEnvelope::new(payload))
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        write_atomic(&self.path, &envelope)?;

        debug!(
            path = %self.path.display(),
            domain = %record.domain,
            valid = record.data.valid,
            "license envelope written"
        );
        Ok(())
    }

    /// Removes the stored record.
    ///
    /// A record that decrypts with `data.valid == true` is never removed
    /// here; that requires deleting the file out of band. A corrupt envelope
    /// is not provably valid and may be removed.
    pub fn delete(&self) -> StoreResult<()> {
        let _guard = self.lock();

        match self.load() {
            Ok(record) if record.is_valid() => return Err(StoreError::Forbidden),
            Ok(_) | Err(StoreError::Corrupt(_)) => {}
            Err(e) => return Err(e),
        }

        if !remove_if_present(&self.path)? {
            return Err(StoreError::NotFound);
        }
        info!(path = %self.path.display(), "license envelope removed");
        Ok(())
    }
}

fn corrupt(reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt(reason.into())
}
