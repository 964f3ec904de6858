//! Persistence for bucket state.
//!
//! The store is a pluggable key-to-[`Bandwidth`] map. The engine mandates
//! no on-disk format, only the get/put contract; failures propagate and
//! are never retried here. All engine access goes through the
//! [`StoreFacade`], which serializes readers and writers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::Bandwidth;
use crate::error::{Result, TollgateError};

/// A persisted key-to-bucket map.
pub trait BandwidthsStore: Send + Sync {
    /// Fetch the bucket stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Bandwidth>>;

    /// Store `bandwidth` under `key`, replacing any previous state.
    fn put(&self, key: &str, bandwidth: &Bandwidth) -> Result<()>;
}

impl<S: BandwidthsStore + ?Sized> BandwidthsStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Bandwidth>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, bandwidth: &Bandwidth) -> Result<()> {
        (**self).put(key, bandwidth)
    }
}

/// The default store: process-local, in-memory.
#[derive(Debug, Default)]
pub struct InMemoryBandwidthsStore {
    data: Mutex<HashMap<String, Bandwidth>>,
}

impl InMemoryBandwidthsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl BandwidthsStore for InMemoryBandwidthsStore {
    fn get(&self, key: &str) -> Result<Option<Bandwidth>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn put(&self, key: &str, bandwidth: &Bandwidth) -> Result<()> {
        self.data.lock().insert(key.to_string(), bandwidth.clone());
        Ok(())
    }
}

/// Durable store: one JSON document holding the whole key-to-bucket map.
///
/// Suited to modest key counts; every put rewrites the document. Callers
/// needing an external cache implement [`BandwidthsStore`] against it
/// instead.
#[derive(Debug, Clone)]
pub struct JsonFileBandwidthsStore {
    path: PathBuf,
}

impl JsonFileBandwidthsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, Bandwidth>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|err| TollgateError::Store(format!("corrupt bandwidth store: {}", err)))
    }
}

impl BandwidthsStore for JsonFileBandwidthsStore {
    fn get(&self, key: &str) -> Result<Option<Bandwidth>> {
        Ok(self.load()?.remove(key))
    }

    fn put(&self, key: &str, bandwidth: &Bandwidth) -> Result<()> {
        let mut map = self.load()?;
        map.insert(key.to_string(), bandwidth.clone());
        let bytes = serde_json::to_vec(&map)
            .map_err(|err| TollgateError::Store(format!("serialize bandwidth store: {}", err)))?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Lock-disciplined front for a store: reads share a read lock, writes
/// take the write lock, so readers never run concurrently with a writer.
pub struct StoreFacade {
    store: Arc<dyn BandwidthsStore>,
    lock: RwLock<()>,
}

impl StoreFacade {
    pub fn new(store: Arc<dyn BandwidthsStore>) -> Self {
        Self {
            store,
            lock: RwLock::new(()),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<Bandwidth>> {
        let _guard = self.lock.read();
        self.store.get(key)
    }

    pub fn put(&self, key: &str, bandwidth: &Bandwidth) -> Result<()> {
        let _guard = self.lock.write();
        self.store.put(key, bandwidth)
    }
}

impl std::fmt::Debug for StoreFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreFacade").finish_non_exhaustive()
    }
}
