//! Publish/subscribe relay for remote desktop frames.
//!
//! Frames are handed to every registered listener synchronously and
//! never buffered: a frame that arrives while nobody listens is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::remote::types::RemoteFrame;

type FrameListener = Arc<dyn Fn(&RemoteFrame) + Send + Sync + 'static>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, FrameListener>>,
}

/// Fan-out point for validated frames.
#[derive(Default, Clone)]
pub struct FrameRelay {
    registry: Arc<Registry>,
}

impl FrameRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned
    /// subscription is unsubscribed or dropped.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe<F>(&self, listener: F) -> FrameSubscription
    where
        F: Fn(&RemoteFrame) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.registry.listeners.lock() {
            listeners.insert(id, Arc::new(listener));
        }
        FrameSubscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver a frame to every listener. Returns how many received it.
    pub fn publish(&self, frame: &RemoteFrame) -> usize {
        // Snapshot so a listener may unsubscribe from inside its callback.
        let listeners: Vec<FrameListener> = match self.registry.listeners.lock() {
            Ok(listeners) => listeners.values().cloned().collect(),
            Err(_) => return 0,
        };
        for listener in &listeners {
            listener(frame);
        }
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for FrameRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRelay")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by [`FrameRelay::subscribe`].
#[derive(Debug)]
pub struct FrameSubscription {
    id: u64,
    registry: Weak<Registry>,
}

impl FrameSubscription {
    /// Remove the listener. Safe to call after the relay is gone.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut listeners) = registry.listeners.lock() {
                listeners.remove(&self.id);
            }
        }
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}
