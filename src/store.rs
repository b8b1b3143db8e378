//! Local persisted state and debounced autosave.
//!
//! `LocalStore` is a directory of JSON files, one per key. The `Autosaver`
//! writes the session's flow and settings once changes have been quiet for
//! the debounce delay.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{FluxError, Result};
use crate::session::Session;

pub const API_KEY_KEY: &str = "FLUX_OPENAI_API_KEY";
pub const REACT_FLOW_KEY: &str = "FLUX_REACT_FLOW_DATA";
pub const MODEL_SETTINGS_KEY: &str = "FLUX_MODEL_SETTINGS";

/// Default quiet period before an autosave.
pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// `Ok(None)` when the key was never written.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write atomically: a temp file renamed over the old value.
    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the session's flow and settings.
    pub fn save_session(&self, session: &Arc<Mutex<Session>>) -> Result<()> {
        let (flow, settings) = {
            let guard = session
                .lock()
                .map_err(|_| FluxError::Config("internal: session lock poisoned".to_string()))?;
            (guard.to_flow(), guard.settings().clone())
        };
        self.write(REACT_FLOW_KEY, &flow)?;
        self.write(MODEL_SETTINGS_KEY, &settings)?;
        tracing::debug!(nodes = flow.nodes.len(), dir = %self.dir.display(), "session saved");
        Ok(())
    }
}

/// Debounced background saver.
pub struct Autosaver {
    tx: mpsc::UnboundedSender<()>,
    pending: Arc<AtomicBool>,
    store: LocalStore,
    session: Arc<Mutex<Session>>,
    handle: JoinHandle<()>,
}

impl Autosaver {
    /// Spawn the saver task. Must be called inside a tokio runtime.
    pub fn spawn(session: Arc<Mutex<Session>>, store: LocalStore, delay: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let pending = Arc::new(AtomicBool::new(false));

        let task_pending = pending.clone();
        let task_store = store.clone();
        let task_session = session.clone();
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Restart the timer on every change until it goes quiet.
                loop {
                    match tokio::time::timeout(delay, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => break,
                        Err(_elapsed) => break,
                    }
                }
                if let Err(e) = task_store.save_session(&task_session) {
                    tracing::warn!(error = %e, "autosave failed");
                }
                task_pending.store(false, Ordering::SeqCst);
            }
        });

        Self { tx, pending, store, session, handle }
    }

    /// Note a change; the save happens after `delay` without further calls.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    /// True while a change is waiting to be written.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Save immediately.
    pub fn flush(&self) -> Result<()> {
        self.store.save_session(&self.session)?;
        self.pending.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Flush and stop the background task.
    pub fn shutdown(&self) -> Result<()> {
        self.flush()?;
        self.handle.abort();
        Ok(())
    }
}
