//! Signal/slot system for udpchannel.
//!
//! Sockets, listener endpoints and channel contexts publish their lifecycle
//! through signals: a listener emits `closed` when it stops, a channel emits
//! its disconnect notification at teardown, and so on. Interested parties
//! connect slots (callbacks) and are invoked when the signal is emitted.
//!
//! # Key Types
//!
//! - [`Signal<Args>`] - The signal type for emitting notifications
//! - [`ConnectionId`] - Unique identifier returned when connecting a slot
//!
//! # Re-entrancy
//!
//! Slots are invoked after the connection table lock has been released, so a
//! slot may freely connect, disconnect, or emit on the same signal. This is
//! what lets a registry subscribe to an endpoint's `closed` signal with a
//! one-shot slot that removes the endpoint while the signal is firing.
//!
//! # Example
//!
//! ```
//! use udpchannel_core::Signal;
//!
//! // Create a signal that passes a port number
//! let bound = Signal::<u16>::new();
//!
//! // Connect a slot (closure)
//! let conn_id = bound.connect(|port| {
//!     println!("Bound to port {}", port);
//! });
//!
//! // Emit the signal
//! bound.emit(9999);
//!
//! // Disconnect when done
//! bound.disconnect(conn_id);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// A unique identifier for a signal-slot connection.
    ///
    /// Use this ID to disconnect a specific connection via [`Signal::disconnect`].
    /// The ID remains valid until the connection is explicitly disconnected,
    /// a one-shot connection fires, or the signal is dropped.
    pub struct ConnectionId;
}

/// Internal storage for a single connection.
struct Connection<Args> {
    /// The slot function to invoke.
    slot: Arc<dyn Fn(&Args) + Send + Sync>,
    /// Remove the connection the first time it fires.
    once: bool,
}

/// A type-safe signal that can have multiple connected slots.
///
/// When a signal is emitted, all connected slots are invoked on the emitting
/// task in connection order.
///
/// # Type Parameter
///
/// - `Args`: The argument type passed to connected slots. Use `()` for signals
///   with no arguments, or a tuple for multiple arguments.
pub struct Signal<Args> {
    /// All active connections.
    connections: Mutex<SlotMap<ConnectionId, Connection<Args>>>,
    /// Whether signal emission is temporarily blocked.
    blocked: AtomicBool,
}

static_assertions::assert_impl_all!(Signal<()>: Send, Sync);

impl<Args: Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Send + 'static> Signal<Args> {
    /// Create a new signal with no connections.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(SlotMap::with_key()),
            blocked: AtomicBool::new(false),
        }
    }

    /// Connect a slot (closure) to this signal.
    ///
    /// Returns a `ConnectionId` that can be used to disconnect the slot later.
    ///
    /// # Example
    ///
    /// ```
    /// use udpchannel_core::Signal;
    ///
    /// let signal = Signal::<String>::new();
    /// let id = signal.connect(|s| println!("Got: {}", s));
    /// signal.emit("Hello".to_string());
    /// ```
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.insert(Arc::new(slot), false)
    }

    /// Connect a slot that is disconnected automatically after its first
    /// invocation.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use udpchannel_core::Signal;
    ///
    /// let closed = Signal::<()>::new();
    /// let hits = Arc::new(AtomicUsize::new(0));
    /// let hits_clone = hits.clone();
    /// closed.connect_once(move |_| {
    ///     hits_clone.fetch_add(1, Ordering::SeqCst);
    /// });
    ///
    /// closed.emit(());
    /// closed.emit(());
    /// assert_eq!(hits.load(Ordering::SeqCst), 1);
    /// ```
    pub fn connect_once<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.insert(Arc::new(slot), true)
    }

    fn insert(&self, slot: Arc<dyn Fn(&Args) + Send + Sync>, once: bool) -> ConnectionId {
        self.connections.lock().insert(Connection { slot, once })
    }

    /// Disconnect a specific slot by its connection ID.
    ///
    /// Returns `true` if the connection was found and removed, `false` otherwise.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    /// Disconnect all slots from this signal.
    pub fn disconnect_all(&self) {
        self.connections.lock().clear();
    }

    /// Get the number of connected slots.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Block signal emission temporarily.
    ///
    /// While blocked, calls to `emit()` do nothing.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Check if signal emission is currently blocked.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Emit the signal, invoking all connected slots.
    ///
    /// If the signal is blocked, this does nothing. One-shot connections are
    /// removed before any slot runs, so a one-shot slot fires at most once
    /// even if a slot re-emits the signal.
    #[tracing::instrument(skip_all, target = "udpchannel_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        if self.is_blocked() {
            tracing::trace!(target: targets::SIGNAL, "signal blocked, skipping emit");
            return;
        }

        let slots: Vec<Arc<dyn Fn(&Args) + Send + Sync>> = {
            let mut connections = self.connections.lock();
            tracing::trace!(
                target: targets::SIGNAL,
                connection_count = connections.len(),
                "emitting signal"
            );

            let mut slots = Vec::with_capacity(connections.len());
            let mut fired_once = Vec::new();
            for (id, conn) in connections.iter() {
                slots.push(conn.slot.clone());
                if conn.once {
                    fired_once.push(id);
                }
            }
            for id in fired_once {
                connections.remove(id);
            }
            slots
        };

        for slot in slots {
            slot(&args);
        }
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.connections.lock().len())
            .field("blocked", &self.blocked.load(Ordering::SeqCst))
            .finish()
    }
}
