use crate::error::StoreResult;
use crate::integral_accumulator::PersistedIntegral;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Keeps the last written attributes of each integral sensor so they can be
/// restored after a restart.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> StoreResult<Option<PersistedIntegral>>;
    async fn save(&self, key: &str, state: &PersistedIntegral) -> StoreResult<()>;
}

#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, PersistedIntegral>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(key: &str, state: PersistedIntegral) -> Self {
        let store = Self::new();
        store.insert(key, state);
        store
    }

    fn insert(&self, key: &str, state: PersistedIntegral) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.insert(key.to_string(), state);
    }

    pub fn get(&self, key: &str) -> Option<PersistedIntegral> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states.get(key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &str) -> StoreResult<Option<PersistedIntegral>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, state: &PersistedIntegral) -> StoreResult<()> {
        self.insert(key, state.clone());
        Ok(())
    }
}

/// All sensors in one JSON object on disk, rewritten on every save.
pub struct JsonFileStateStore {
    path: PathBuf,
    states: tokio::sync::Mutex<HashMap<String, PersistedIntegral>>,
}

impl JsonFileStateStore {
    /// Opens the store, a missing file starts empty.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let states = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            states: tokio::sync::Mutex::new(states),
        })
    }
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self, key: &str) -> StoreResult<Option<PersistedIntegral>> {
        Ok(self.states.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, state: &PersistedIntegral) -> StoreResult<()> {
        let mut states = self.states.lock().await;
        states.insert(key.to_string(), state.clone());
        let bytes = serde_json::to_vec_pretty(&*states)?;

        // Write then rename so a crash never leaves a truncated file behind
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
