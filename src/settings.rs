//! Runtime settings and their change stream.
//!
//! The store is the in-process stand-in for whatever persists user settings;
//! the orchestrator only reads snapshots and reacts to published changes.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::{Arc, Mutex};

use crate::defaults;

/// Settings the assistant reacts to at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub silence_threshold_ms: u64,
    pub volume_threshold: u32,
    pub server_url: String,
    pub wake_keyword: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            silence_threshold_ms: defaults::SILENCE_THRESHOLD_MS,
            volume_threshold: defaults::VOLUME_THRESHOLD,
            server_url: defaults::SERVER_URL.to_string(),
            wake_keyword: defaults::WAKE_KEYWORD.to_string(),
        }
    }
}

struct StoreInner {
    current: Settings,
    subscribers: Vec<Sender<Settings>>,
}

/// Shared settings holder with a change stream.
///
/// Cloning yields another handle to the same settings.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl SettingsStore {
    pub fn new(initial: Settings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                current: initial,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Current snapshot.
    pub fn current(&self) -> Settings {
        self.lock().current.clone()
    }

    /// Subscribe to future changes. Each change is delivered as a full snapshot.
    pub fn subscribe(&self) -> Receiver<Settings> {
        let (tx, rx) = unbounded();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Modify the settings; subscribers are notified only if something changed.
    ///
    /// Returns true when the settings changed.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> bool {
        let mut inner = self.lock();
        let mut next = inner.current.clone();
        f(&mut next);
        if next == inner.current {
            return false;
        }
        inner.current = next.clone();
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(next.clone()).is_ok());
        tracing::debug!(settings = ?next, "settings changed");
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
