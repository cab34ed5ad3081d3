//! Snapshot-file-backed sync applier.
//!
//! The mirror is restored from a JSON snapshot at open and the file is
//! rewritten after every applied page, so an interrupted session resumes
//! from the last confirmed version with its unsent edits still dirty.

use crate::error::{SyncError, SyncResult};
use crate::state::SyncApplier;
use keepsync_model::{IdGenerator, Mirror, Snapshot};
use parking_lot::{Mutex, MutexGuard};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A sync applier that persists the mirror to a snapshot file.
pub struct SnapshotFileApplier {
    path: PathBuf,
    mirror: Mutex<Mirror>,
}

impl SnapshotFileApplier {
    /// Opens `path`, restoring the mirror if the file exists.
    pub fn open(path: impl AsRef<Path>, ids: IdGenerator) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut mirror = Mirror::new(ids);
        if path.exists() {
            let text = fs::read_to_string(&path)?;
            let snapshot = Snapshot::from_json(&text)
                .map_err(|e| SyncError::Persistence(format!("{}: {e}", path.display())))?;
            mirror.restore(&snapshot)?;
            info!(path = %path.display(), version = mirror.version().unwrap_or(""), "restored mirror");
        }
        Ok(Self {
            path,
            mirror: Mutex::new(mirror),
        })
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current mirror, e.g. after local edits.
    pub fn flush(&self) -> SyncResult<()> {
        let mut mirror = self.mirror.lock();
        self.write(&mut mirror)
    }

    fn write(&self, mirror: &mut Mirror) -> SyncResult<()> {
        let encoded = mirror.dump().to_json()?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "wrote snapshot");
        Ok(())
    }
}

impl SyncApplier for SnapshotFileApplier {
    fn lock(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock()
    }

    fn persist(&self, mirror: &mut Mirror) -> SyncResult<()> {
        self.write(mirror)
    }
}
