//! Typed event subscriptions.
//!
//! Every event category has its own listener registry. Registering a
//! callback returns a [`Subscription`] handle; dropping the handle (or calling
//! [`Subscription::unsubscribe`]) removes the callback.
//!
//! # Example
//!
//! ```ignore
//! let subscription = client.on_device_discovered(|device| {
//!     println!("found {} ({:?})", device.address, device.name);
//! });
//!
//! // ... later
//! subscription.unsubscribe();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

/// Listener callback type.
type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Map of subscription ids to callbacks.
type ListenerMap<T> = FxHashMap<SubscriptionId, Callback<T>>;

// ============================================================================
// Listeners
// ============================================================================

/// Fan-out registry for one event category.
pub(crate) struct Listeners<T> {
    inner: Arc<Mutex<ListenerMap<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FxHashMap::default())),
        }
    }
}

impl<T: 'static> Listeners<T> {
    /// Registers a callback.
    pub(crate) fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.inner.lock().insert(id, Arc::new(callback));

        let registry: Weak<Mutex<ListenerMap<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            remove: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().remove(&id);
                }
            })),
        }
    }

    /// Invokes every registered callback.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe freely.
    pub(crate) fn emit(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = self.inner.lock().values().cloned().collect();
        if callbacks.is_empty() {
            return;
        }

        trace!(listeners = callbacks.len(), "Emitting event");
        for callback in callbacks {
            callback(event);
        }
    }

    /// Returns the number of registered callbacks.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle to a registered listener.
///
/// Dropping the handle removes the listener. Use [`Subscription::detach`] to
/// keep it registered for the lifetime of its source.
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    id: SubscriptionId,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Returns the subscription id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keeps the listener registered and discards the handle.
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.remove.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
