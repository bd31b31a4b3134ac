use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::document::DocumentId;
use crate::viewport::{FitMode, DEFAULT_ZOOM_PERCENT};

/// The part of the view that survives restarts. Search state is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedViewState {
    pub current_page: usize,
    pub zoom_percent: u32,
    #[serde(default)]
    pub fit_mode: FitMode,
}

impl Default for PersistedViewState {
    fn default() -> Self {
        Self {
            current_page: 1,
            zoom_percent: DEFAULT_ZOOM_PERCENT,
            fit_mode: FitMode::None,
        }
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, id: DocumentId) -> Result<Option<PersistedViewState>>;
    fn save(&self, id: DocumentId, state: &PersistedViewState) -> Result<()>;
}

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, id: DocumentId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, id: DocumentId) -> Result<Option<PersistedViewState>> {
        let path = self.state_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let state = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        Ok(Some(state))
    }

    fn save(&self, id: DocumentId, state: &PersistedViewState) -> Result<()> {
        let path = self.state_path(id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(state)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to move {:?} into place", tmp))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<DocumentId, PersistedViewState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, id: DocumentId) -> Result<Option<PersistedViewState>> {
        Ok(self.inner.lock().get(&id).cloned())
    }

    fn save(&self, id: DocumentId, state: &PersistedViewState) -> Result<()> {
        self.inner.lock().insert(id, state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    use crate::document::document_id_for_path;

    #[test]
    fn file_state_store_restores_state_with_stable_id() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sample.pdf");
        std::fs::write(&file_path, b"dummy").unwrap();
        let id = document_id_for_path(&file_path);

        let store = FileStateStore::new(dir.path().join("state")).unwrap();
        let state = PersistedViewState {
            current_page: 7,
            zoom_percent: 150,
            fit_mode: FitMode::Width,
        };
        store.save(id, &state).unwrap();

        let restored = store.load(document_id_for_path(&file_path)).unwrap().unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn missing_state_is_none() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.load(uuid::Uuid::nil()).unwrap().is_none());
    }

    #[test]
    fn older_files_without_fit_mode_still_decode() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        let id = uuid::Uuid::nil();
        std::fs::write(
            dir.path().join(format!("{id}.json")),
            r#"{"current_page": 3, "zoom_percent": 80}"#,
        )
        .unwrap();

        let restored = store.load(id).unwrap().unwrap();
        assert_eq!(restored.fit_mode, FitMode::None);
        assert_eq!(restored.current_page, 3);
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStateStore::new();
        let id = uuid::Uuid::nil();
        store.save(id, &PersistedViewState::default()).unwrap();
        assert_eq!(store.load(id).unwrap(), Some(PersistedViewState::default()));
    }
}
