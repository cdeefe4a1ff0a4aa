//! Local persistence for scheduled reinvestments.
//!
//! The single piece of state that outlives a session: the map of
//! `bond id -> ReinvestmentConfig`. Persisted as one JSON file via a
//! temp-file-then-rename write so a crash mid-write can never leave a
//! half-written schedule. A file that fails to parse is logged and treated
//! as empty rather than blocking startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use bondflow_types::{BondId, ReinvestmentConfig};

pub struct ReinvestStore {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<BondId, ReinvestmentConfig>>,
}

impl ReinvestStore {
    /// A store that never touches disk. Used by tests and by embedders
    /// that handle persistence themselves.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Open a store backed by `path`, loading any existing schedule.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match load(&path) {
                Ok(entries) => entries,
                Err(error) => {
                    warn!(path = %path.display(), %error, "could not load reinvestment schedule, starting empty");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Self {
            path: Some(path),
            entries: Mutex::new(entries),
        }
    }

    /// Schedule automatic reinvestment for `id`, replacing any earlier
    /// config for the same bond.
    pub fn schedule(&self, id: BondId, config: ReinvestmentConfig) {
        let mut entries = self.lock();
        entries.insert(id, config);
        self.autosave(&entries);
    }

    /// Remove `id`'s config. Returns whether one existed.
    pub fn cancel(&self, id: BondId) -> bool {
        let mut entries = self.lock();
        let removed = entries.remove(&id).is_some();
        if removed {
            self.autosave(&entries);
        }
        removed
    }

    #[must_use]
    pub fn get(&self, id: BondId) -> Option<ReinvestmentConfig> {
        self.lock().get(&id).cloned()
    }

    /// Stable snapshot of the whole schedule, ordered by bond id so sweeps
    /// are deterministic.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(BondId, ReinvestmentConfig)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, config)| (*id, config.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BondId, ReinvestmentConfig>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist after each mutation. Failure is logged, not propagated: a
    /// broken disk must not break scheduling for the rest of the session.
    fn autosave(&self, entries: &HashMap<BondId, ReinvestmentConfig>) {
        let Some(path) = &self.path else { return };
        if let Err(error) = persist(path, entries) {
            warn!(path = %path.display(), %error, "could not persist reinvestment schedule");
        }
    }
}

fn load(path: &Path) -> anyhow::Result<HashMap<BondId, ReinvestmentConfig>> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn persist(path: &Path, entries: &HashMap<BondId, ReinvestmentConfig>) -> anyhow::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)?;
    }

    // Write to a temp file in the same directory, then rename into place.
    let mut tmp = match parent {
        Some(parent) => tempfile::NamedTempFile::new_in(parent)?,
        None => tempfile::NamedTempFile::new()?,
    };
    serde_json::to_writer_pretty(&mut tmp, entries)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
