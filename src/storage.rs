//! Profile persistence
//!
//! A small key-value contract (`ProfileStore`) with a JSON-file and an
//! in-memory implementation, plus a background worker so checkpoints never
//! block a cycle. Failed saves stay queued and are retried at the next
//! checkpoint.

use crate::error::EngineError;
use crate::session::PersistedState;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

pub const KEY_BASELINE: &str = "baseline";
pub const KEY_COOLDOWNS: &str = "cooldowns";
pub const KEY_PATTERNS: &str = "patterns";
pub const KEY_ACHIEVEMENTS: &str = "achievements";

/// Queued worker commands before `checkpoint` starts refusing
const CHANNEL_CAPACITY: usize = 32;

/// Key-value persistence per profile
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` when nothing is stored under the key
    fn load(&self, profile_id: &str, key: &str) -> Result<Option<String>, EngineError>;

    fn save(&self, profile_id: &str, key: &str, value: &str) -> Result<(), EngineError>;
}

/// Stores each key as `<root>/<profile>/<key>.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, profile_id: &str, key: &str) -> Result<PathBuf, EngineError> {
        for part in [profile_id, key] {
            let valid = !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(EngineError::Storage(format!(
                    "invalid storage name {part:?}"
                )));
            }
        }
        Ok(self.root.join(profile_id).join(format!("{key}.json")))
    }
}

impl ProfileStore for JsonFileStore {
    fn load(&self, profile_id: &str, key: &str) -> Result<Option<String>, EngineError> {
        let path = self.path_for(profile_id, key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, profile_id: &str, key: &str, value: &str) -> Result<(), EngineError> {
        let path = self.path_for(profile_id, key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        // replace atomically
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory store, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for MemoryStore {
    fn load(&self, profile_id: &str, key: &str) -> Result<Option<String>, EngineError> {
        let values = self
            .values
            .lock()
            .map_err(|_| EngineError::Storage("memory store poisoned".to_string()))?;
        Ok(values
            .get(&(profile_id.to_string(), key.to_string()))
            .cloned())
    }

    fn save(&self, profile_id: &str, key: &str, value: &str) -> Result<(), EngineError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| EngineError::Storage("memory store poisoned".to_string()))?;
        values.insert((profile_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

/// Counters kept by the persistence worker
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub saves_succeeded: AtomicU64,
    pub saves_failed: AtomicU64,
    /// Checkpoints refused because the queue was full
    pub checkpoints_dropped: AtomicU64,
}

enum WorkerCmd {
    Checkpoint {
        profile_id: String,
        state: Box<PersistedState>,
    },
    Flush {
        response_tx: Sender<Result<(), EngineError>>,
    },
    Shutdown,
}

/// Background thread that writes checkpoints to a `ProfileStore`
pub struct PersistenceWorker {
    tx: Sender<WorkerCmd>,
    metrics: Arc<WorkerMetrics>,
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl PersistenceWorker {
    pub fn start(store: Arc<dyn ProfileStore>) -> Self {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let metrics = Arc::new(WorkerMetrics::default());
        let metrics_clone = Arc::clone(&metrics);

        let worker_thread = thread::spawn(move || {
            Self::run(store, rx, metrics_clone);
        });

        Self {
            tx,
            metrics,
            worker_thread: Some(worker_thread),
        }
    }

    /// Queue a checkpoint without blocking.
    ///
    /// A full queue refuses the checkpoint; the next one carries the same
    /// state forward.
    pub fn checkpoint(&self, profile_id: &str, state: PersistedState) -> Result<(), EngineError> {
        let cmd = WorkerCmd::Checkpoint {
            profile_id: profile_id.to_string(),
            state: Box::new(state),
        };
        match self.tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.metrics.checkpoints_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("persistence queue full, checkpoint for {profile_id} dropped");
                Err(EngineError::Storage("persistence queue full".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(EngineError::Storage("persistence worker stopped".to_string()))
            }
        }
    }

    /// Retry anything pending and wait; errors if some profile is still unsaved
    pub fn flush(&self) -> Result<(), EngineError> {
        let (response_tx, response_rx) = bounded(1);
        self.tx
            .send(WorkerCmd::Flush { response_tx })
            .map_err(|_| EngineError::Storage("persistence worker stopped".to_string()))?;
        response_rx
            .recv()
            .map_err(|_| EngineError::Storage("flush response channel closed".to_string()))?
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Stop the worker after a final save attempt
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(WorkerCmd::Shutdown);
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }

    fn run(store: Arc<dyn ProfileStore>, rx: Receiver<WorkerCmd>, metrics: Arc<WorkerMetrics>) {
        // Latest unsaved state per profile; newer checkpoints replace older ones
        let mut pending: BTreeMap<String, PersistedState> = BTreeMap::new();

        while let Ok(cmd) = rx.recv() {
            match cmd {
                WorkerCmd::Checkpoint { profile_id, state } => {
                    pending.insert(profile_id, *state);
                    Self::save_pending(store.as_ref(), &mut pending, &metrics);
                }
                WorkerCmd::Flush { response_tx } => {
                    Self::save_pending(store.as_ref(), &mut pending, &metrics);
                    let result = if pending.is_empty() {
                        Ok(())
                    } else {
                        Err(EngineError::Storage(format!(
                            "{} profile(s) still unsaved",
                            pending.len()
                        )))
                    };
                    let _ = response_tx.send(result);
                }
                WorkerCmd::Shutdown => break,
            }
        }

        Self::save_pending(store.as_ref(), &mut pending, &metrics);
        if !pending.is_empty() {
            log::warn!(
                "persistence worker stopping with {} unsaved profile(s)",
                pending.len()
            );
        }
    }

    fn save_pending(
        store: &dyn ProfileStore,
        pending: &mut BTreeMap<String, PersistedState>,
        metrics: &WorkerMetrics,
    ) {
        pending.retain(|profile_id, state| match state.save(store, profile_id) {
            Ok(()) => {
                metrics.saves_succeeded.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(e) => {
                metrics.saves_failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("checkpoint for {profile_id} failed, will retry: {e}");
                true
            }
        });
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{Baseline, ReferenceValue};
    use std::sync::atomic::AtomicBool;

    /// Store that fails while `offline` is set
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        offline: AtomicBool,
    }

    impl ProfileStore for FlakyStore {
        fn load(&self, profile_id: &str, key: &str) -> Result<Option<String>, EngineError> {
            self.inner.load(profile_id, key)
        }

        fn save(&self, profile_id: &str, key: &str, value: &str) -> Result<(), EngineError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(EngineError::Storage("disk unavailable".to_string()));
            }
            self.inner.save(profile_id, key, value)
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("gamebuddy-store-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let root = temp_root();
        let store = JsonFileStore::new(&root);

        assert_eq!(store.load("alice", KEY_BASELINE).unwrap(), None);
        store.save("alice", KEY_BASELINE, "{\"x\":1}").unwrap();
        assert_eq!(
            store.load("alice", KEY_BASELINE).unwrap().as_deref(),
            Some("{\"x\":1}")
        );
        assert!(root.join("alice").join("baseline.json").exists());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_json_file_store_rejects_path_escape() {
        let store = JsonFileStore::new(temp_root());
        assert!(matches!(
            store.save("../evil", KEY_BASELINE, "{}"),
            Err(EngineError::Storage(_))
        ));
    }

    #[test]
    fn test_worker_saves_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let worker = PersistenceWorker::start(store.clone());

        let state = PersistedState {
            baseline: Some(Baseline {
                head_pitch: Some(ReferenceValue::new(-2.0, 8)),
                ..Default::default()
            }),
            ..Default::default()
        };
        worker.checkpoint("alice", state.clone()).unwrap();
        worker.flush().unwrap();

        assert_eq!(PersistedState::load(store.as_ref(), "alice"), state);
        worker.shutdown();
    }

    /// Store whose saves wait until `gate` is closed
    struct GatedStore {
        inner: MemoryStore,
        gate: Receiver<()>,
    }

    impl ProfileStore for GatedStore {
        fn load(&self, profile_id: &str, key: &str) -> Result<Option<String>, EngineError> {
            self.inner.load(profile_id, key)
        }

        fn save(&self, profile_id: &str, key: &str, value: &str) -> Result<(), EngineError> {
            let _ = self.gate.recv();
            self.inner.save(profile_id, key, value)
        }
    }

    #[test]
    fn test_full_queue_refuses_checkpoint() {
        let (release, gate) = bounded::<()>(0);
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate,
        });
        let worker = PersistenceWorker::start(store.clone());

        // the worker holds at most one command while blocked in save
        let refused = (0..CHANNEL_CAPACITY + 2)
            .map(|_| worker.checkpoint("carol", PersistedState::default()))
            .filter(|result| matches!(result, Err(EngineError::Storage(_))))
            .count();
        assert!(refused >= 1);
        assert_eq!(
            worker.metrics().checkpoints_dropped.load(Ordering::Relaxed),
            refused as u64
        );

        drop(release);
        worker.flush().unwrap();
        assert!(store.load("carol", KEY_COOLDOWNS).unwrap().is_some());
        worker.shutdown();
    }

    #[test]
    fn test_worker_retries_failed_save() {
        let store = Arc::new(FlakyStore::default());
        store.offline.store(true, Ordering::SeqCst);
        let worker = PersistenceWorker::start(store.clone());

        worker.checkpoint("bob", PersistedState::default()).unwrap();
        assert!(worker.flush().is_err());
        assert!(worker.metrics().saves_failed.load(Ordering::Relaxed) >= 1);

        store.offline.store(false, Ordering::SeqCst);
        worker.flush().unwrap();
        assert!(store.load("bob", KEY_COOLDOWNS).unwrap().is_some());
        assert_eq!(worker.metrics().saves_succeeded.load(Ordering::Relaxed), 1);
    }
}
