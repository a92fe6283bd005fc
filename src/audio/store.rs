//! # Waveform Storage Slots
//!
//! The normalizer hands the canonical waveform to the feature extractor through
//! the filesystem. A slot is the pair of paths one pipeline run uses:
//! the staged upload and the canonical WAV.
//!
//! ## Slot Modes:
//! - **PerRequest**: files are named after the run's recording id, so concurrent
//!   runs never touch each other's audio
//! - **Shared**: one fixed pair of files that every run overwrites. Runs are
//!   serialized through [`WaveformStore::lock_shared`] so the single slot is
//!   never read by a run that did not write it.

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

const SHARED_UPLOAD_NAME: &str = "current_upload";
const SHARED_WAVEFORM_NAME: &str = "current_recording.wav";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotMode {
    #[default]
    PerRequest,
    Shared,
}

/// Paths used by a single pipeline run.
#[derive(Debug, Clone)]
pub struct WaveformSlot {
    pub id: Uuid,
    pub upload_path: PathBuf,
    pub waveform_path: PathBuf,
}

/// Directory-backed slot allocator.
#[derive(Debug)]
pub struct WaveformStore {
    dir: PathBuf,
    mode: SlotMode,
    shared_lock: Mutex<()>,
}

impl WaveformStore {
    /// Open (and create if needed) the audio directory.
    pub fn open(dir: impl Into<PathBuf>, mode: SlotMode) -> PipelineResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        Ok(Self {
            dir,
            mode,
            shared_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> SlotMode {
        self.mode
    }

    /// Paths for the run identified by `id`.
    pub fn slot(&self, id: Uuid) -> WaveformSlot {
        let (upload, waveform) = match self.mode {
            SlotMode::PerRequest => (format!("{}.upload", id), format!("{}.wav", id)),
            SlotMode::Shared => (
                SHARED_UPLOAD_NAME.to_string(),
                SHARED_WAVEFORM_NAME.to_string(),
            ),
        };
        WaveformSlot {
            id,
            upload_path: self.dir.join(upload),
            waveform_path: self.dir.join(waveform),
        }
    }

    /// Hold this for a whole run in shared mode; `None` in per-request mode.
    pub fn lock_shared(&self) -> Option<MutexGuard<'_, ()>> {
        match self.mode {
            SlotMode::PerRequest => None,
            // A panicked run leaves nothing behind that the next run depends on
            SlotMode::Shared => Some(
                self.shared_lock
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            ),
        }
    }

    /// Remove the staged upload if it is still around.
    pub fn discard_upload(&self, slot: &WaveformSlot) {
        remove_if_present(&slot.upload_path);
    }

    /// Remove the canonical waveform if it is still around.
    pub fn discard_waveform(&self, slot: &WaveformSlot) {
        remove_if_present(&slot.waveform_path);
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove audio file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_request_slots_do_not_alias() {
        let dir = tempfile::tempdir().unwrap();
        let store = WaveformStore::open(dir.path().join("audio"), SlotMode::PerRequest).unwrap();
        assert!(store.dir().is_dir());

        let a = store.slot(Uuid::new_v4());
        let b = store.slot(Uuid::new_v4());
        assert_ne!(a.waveform_path, b.waveform_path);
        assert_ne!(a.upload_path, b.upload_path);
        assert!(store.lock_shared().is_none());
    }

    #[test]
    fn test_shared_slot_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let store = WaveformStore::open(dir.path(), SlotMode::Shared).unwrap();

        let a = store.slot(Uuid::new_v4());
        let b = store.slot(Uuid::new_v4());
        assert_eq!(a.waveform_path, b.waveform_path);
        assert!(a.waveform_path.ends_with(SHARED_WAVEFORM_NAME));
        assert!(store.lock_shared().is_some());
    }

    #[test]
    fn test_discard_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = WaveformStore::open(dir.path(), SlotMode::PerRequest).unwrap();
        let slot = store.slot(Uuid::new_v4());

        std::fs::write(&slot.upload_path, b"bytes").unwrap();
        store.discard_upload(&slot);
        assert!(!slot.upload_path.exists());
        store.discard_upload(&slot);
        store.discard_waveform(&slot);
    }

    #[test]
    fn test_slot_mode_serde_names() {
        assert_eq!(serde_json::to_string(&SlotMode::PerRequest).unwrap(), "\"per_request\"");
        let mode: SlotMode = serde_json::from_str("\"shared\"").unwrap();
        assert_eq!(mode, SlotMode::Shared);
    }
}
