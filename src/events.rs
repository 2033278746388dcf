//! Publish/subscribe dispatch for gesture events.
//!
//! Listeners are plain synchronous callbacks invoked in subscription order on
//! the emitting task. A listener that needs to do slow work (an API call)
//! spawns it and returns, so the gesture monitor never waits on consumers.
//! Errors and panics from one listener are logged and do not stop delivery
//! to the rest. There is no replay: events emitted with no listener are lost.

use crate::gesture::{GestureEvent, GestureKind};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

/// Callback registered for one event kind.
pub type Listener<P> = Arc<dyn Fn(&P) -> anyhow::Result<()> + Send + Sync>;

/// Dispatcher for gesture events.
pub type GestureDispatcher = EventDispatcher<GestureKind, GestureEvent>;

pub struct EventDispatcher<K, P> {
    listeners: RwLock<HashMap<K, Vec<Listener<P>>>>,
}

impl<K, P> Default for EventDispatcher<K, P>
where
    K: Eq + Hash + Copy + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> EventDispatcher<K, P>
where
    K: Eq + Hash + Copy + Debug,
{
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Register `listener` for events of `kind`.
    pub fn on<F>(&self, kind: K, listener: F)
    where
        F: Fn(&P) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.listeners.write() {
            Ok(mut listeners) => {
                listeners.entry(kind).or_default().push(Arc::new(listener));
                debug!("Listener registered for {:?}", kind);
            }
            Err(_) => error!("Listener registry poisoned; dropping listener for {:?}", kind),
        }
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: K) -> usize {
        self.listeners
            .read()
            .map(|l| l.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Deliver `payload` to every listener of `kind`.
    ///
    /// Returns how many listeners completed without error.
    pub fn emit(&self, kind: K, payload: &P) -> usize {
        // Snapshot so listeners may subscribe from inside a callback
        let listeners: Vec<Listener<P>> = match self.listeners.read() {
            Ok(l) => l.get(&kind).cloned().unwrap_or_default(),
            Err(_) => {
                error!("Listener registry poisoned; dropping {:?} event", kind);
                return 0;
            }
        };

        if listeners.is_empty() {
            debug!("No listeners for {:?}", kind);
            return 0;
        }

        let mut delivered = 0;
        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Listener {} for {:?} failed: {:#}", index, kind, e),
                Err(_) => error!("Listener {} for {:?} panicked", index, kind),
            }
        }
        delivered
    }
}
