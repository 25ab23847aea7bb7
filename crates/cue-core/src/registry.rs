//! Known-sensor registry.
//!
//! The set of sensor ids paired with this station. It gates every strategy:
//! listening and calibration only act on known sensors, pairing only on
//! unknown ones. Every mutation is written through a [`RegistryStore`]
//! before it returns.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use cue_types::SensorId;

use crate::error::{Error, Result};

/// Durable storage for the registry.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load the stored set. A missing store loads as empty.
    async fn load(&self) -> Result<BTreeSet<SensorId>>;

    /// Replace the stored set.
    async fn save(&self, ids: &BTreeSet<SensorId>) -> Result<()>;
}

/// Set of paired sensor ids, persisted after every mutation.
pub struct KnownSensorRegistry {
    ids: RwLock<BTreeSet<SensorId>>,
    store: Box<dyn RegistryStore>,
}

impl std::fmt::Debug for KnownSensorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnownSensorRegistry").finish_non_exhaustive()
    }
}

impl KnownSensorRegistry {
    /// Open a registry, loading its contents from `store`.
    pub async fn open(store: impl RegistryStore + 'static) -> Result<Self> {
        let ids = store.load().await?;
        info!("Loaded {} known sensors", ids.len());
        Ok(Self {
            ids: RwLock::new(ids),
            store: Box::new(store),
        })
    }

    /// Whether `id` is paired with this station.
    pub async fn knows(&self, id: &SensorId) -> bool {
        self.ids.read().await.contains(id)
    }

    /// Number of known sensors.
    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    /// Whether no sensor is known.
    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }

    /// Copy of the current set.
    pub async fn snapshot(&self) -> BTreeSet<SensorId> {
        self.ids.read().await.clone()
    }

    /// Add a sensor and persist.
    ///
    /// Returns `Ok(false)` without touching the store if the sensor was
    /// already known. An `Err` means the sensor was added in memory but could
    /// not be persisted.
    pub async fn remember(&self, id: SensorId) -> Result<bool> {
        let mut ids = self.ids.write().await;
        if !ids.insert(id.clone()) {
            debug!(sensor = %id, "Already known");
            return Ok(false);
        }
        info!(sensor = %id, "Remembering sensor");
        self.store.save(&ids).await?;
        Ok(true)
    }

    /// Replace the whole set and persist.
    pub async fn replace(&self, sensors: impl IntoIterator<Item = SensorId>) -> Result<()> {
        let mut ids = self.ids.write().await;
        *ids = sensors.into_iter().collect();
        info!("Synchronized {} known sensors", ids.len());
        self.store.save(&ids).await
    }

    /// Forget every sensor and persist.
    pub async fn forget_all(&self) -> Result<()> {
        let mut ids = self.ids.write().await;
        ids.clear();
        info!("Forgot all sensors");
        self.store.save(&ids).await
    }
}

/// Registry store backed by a JSON array file.
///
/// Writes go to a sibling temp file that is renamed over the target. An
/// optional shell hook runs after every successful write, e.g. to sync the
/// filesystem on a read-mostly device.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    persist_hook: Option<String>,
}

impl JsonFileStore {
    /// Store the registry at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            persist_hook: None,
        }
    }

    /// Run `command` through `sh -c` after every save.
    #[must_use]
    pub fn persist_hook(mut self, command: impl Into<String>) -> Self {
        self.persist_hook = Some(command.into());
        self
    }

    /// Path of the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run_hook(&self, command: &str) -> Result<()> {
        debug!("Running persist hook: {}", command);
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
            .map_err(|e| Error::registry_persist(format!("persist hook failed to start: {e}")))?;
        if !status.success() {
            return Err(Error::registry_persist(format!(
                "persist hook exited with {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn load(&self) -> Result<BTreeSet<SensorId>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No registry file at {}", self.path.display());
                Ok(BTreeSet::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, ids: &BTreeSet<SensorId>) -> Result<()> {
        let content = serde_json::to_string_pretty(ids)?;
        let tmp = self.path.with_extension("json.tmp");

        let write = async {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        write.await.map_err(|e| {
            Error::registry_persist(format!("writing {}: {e}", self.path.display()))
        })?;

        if let Some(hook) = &self.persist_hook {
            self.run_hook(hook).await?;
        }
        Ok(())
    }
}

/// In-memory registry store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ids: std::sync::Mutex<BTreeSet<SensorId>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `ids`.
    pub fn with_ids(ids: impl IntoIterator<Item = SensorId>) -> Self {
        Self {
            ids: std::sync::Mutex::new(ids.into_iter().collect()),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn load(&self) -> Result<BTreeSet<SensorId>> {
        Ok(self
            .ids
            .lock()
            .map_err(|_| Error::registry_persist("store poisoned"))?
            .clone())
    }

    async fn save(&self, ids: &BTreeSet<SensorId>) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            warn!("Memory store refusing save");
            return Err(Error::registry_persist("memory store failure"));
        }
        *self
            .ids
            .lock()
            .map_err(|_| Error::registry_persist("store poisoned"))? = ids.clone();
        Ok(())
    }
}

#[async_trait]
impl<S: RegistryStore + ?Sized> RegistryStore for std::sync::Arc<S> {
    async fn load(&self) -> Result<BTreeSet<SensorId>> {
        (**self).load().await
    }

    async fn save(&self, ids: &BTreeSet<SensorId>) -> Result<()> {
        (**self).save(ids).await
    }
}
