//! Preference storage. The engine persists exactly one boolean; every read
//! failure resolves to the configured fail-safe default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::BlockerConfig;
use crate::error::StoreError;

/// Key/value preference store
#[allow(async_fn_in_trait)]
pub trait PreferenceStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// In-memory store; failures can be switched on to exercise the fallbacks
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl PreferenceStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(key.to_string()));
        }
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Preferences kept as one JSON object in a file
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    async fn load(&self) -> Result<Map<String, Value>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

impl PreferenceStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value);
        let raw = serde_json::to_string_pretty(&values)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

/// Stored blocking preference, or the default when absent or unreadable
pub async fn read_blocking_state<S: PreferenceStore>(store: &S, config: &BlockerConfig) -> bool {
    match store.get(&config.storage_key).await {
        Ok(Some(value)) => truthy(&value),
        Ok(None) => config.default_blocking,
        Err(e) => {
            error!(error = %e, "Error getting blocking state");
            config.default_blocking
        }
    }
}

pub async fn write_blocking_state<S: PreferenceStore>(
    store: &S,
    config: &BlockerConfig,
    blocking: bool,
) -> Result<(), StoreError> {
    store
        .set(&config.storage_key, Value::Bool(blocking))
        .await
        .inspect(|_| info!(blocking, "Blocking state saved"))
        .inspect_err(|e| error!(error = %e, "Error setting blocking state"))
}

/// Write the default preference when none is stored yet. Returns whether
/// the default was written.
pub async fn initialize_settings<S: PreferenceStore>(store: &S, config: &BlockerConfig) -> bool {
    match store.get(&config.storage_key).await {
        Ok(Some(_)) => false,
        Ok(None) => {
            let written = write_blocking_state(store, config, config.default_blocking)
                .await
                .is_ok();
            if written {
                info!("Default settings initialized");
            }
            written
        }
        Err(e) => {
            error!(error = %e, "Error initializing settings");
            false
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
