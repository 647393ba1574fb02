//! Cooperative cancellation with a recorded reason.
//!
//! Every channel carries a [`CancellationToken`]. Tearing the channel down
//! cancels the token with a reason string, and requests derived from the
//! channel hold child tokens so in-flight work can observe the teardown and
//! abandon itself. Propagating the cancellation further is up to whoever
//! holds the token.
//!
//! With the `tokio` feature enabled, [`CancellationToken::cancelled`] returns
//! a future that resolves once the token is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::logging::targets;

/// A cancellation token for cooperative task cancellation.
///
/// Cloning a token yields a handle to the same cancellation state. Child
/// tokens created with [`child_token`](Self::child_token) are cancelled
/// together with their parent, but cancelling a child leaves the parent
/// untouched.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancellationState>,
}

#[derive(Debug)]
struct CancellationState {
    cancelled: AtomicBool,
    state: Mutex<TokenState>,
    #[cfg(feature = "tokio")]
    notify: tokio::sync::Notify,
}

#[derive(Debug, Default)]
struct TokenState {
    reason: Option<String>,
    children: Vec<Weak<CancellationState>>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TokenState::default()),
                #[cfg(feature = "tokio")]
                notify: tokio::sync::Notify::new(),
            }),
        }
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The reason passed to the first successful [`cancel`](Self::cancel).
    pub fn reason(&self) -> Option<String> {
        self.inner.state.lock().reason.clone()
    }

    /// Request cancellation with the given reason.
    ///
    /// Returns `true` if this call cancelled the token, `false` if it was
    /// already cancelled (the original reason is kept).
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let children = {
            let mut state = self.inner.state.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason.clone());
            self.inner.cancelled.store(true, Ordering::Release);
            std::mem::take(&mut state.children)
        };
        tracing::trace!(
            target: targets::CORE,
            reason = %reason,
            children = children.len(),
            "token cancelled"
        );

        #[cfg(feature = "tokio")]
        self.inner.notify.notify_waiters();

        for child in children.iter().filter_map(Weak::upgrade) {
            CancellationToken { inner: child }.cancel(reason.clone());
        }
        true
    }

    /// Create a token that is cancelled whenever this one is.
    ///
    /// If this token is already cancelled the child starts out cancelled with
    /// the same reason.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let inherited = {
            let mut state = self.inner.state.lock();
            match &state.reason {
                Some(reason) => Some(reason.clone()),
                None => {
                    state.children.retain(|weak| weak.strong_count() > 0);
                    state.children.push(Arc::downgrade(&child.inner));
                    None
                }
            }
        };
        if let Some(reason) = inherited {
            child.cancel(reason);
        }
        child
    }

    /// Wait until the token is cancelled.
    #[cfg(feature = "tokio")]
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_records_first_reason() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);

        assert!(token.cancel("disconnect"));
        assert!(!token.cancel("again"));

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("disconnect"));
    }

    #[test]
    fn test_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel("stop");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();

        parent.cancel("disconnect");

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.reason().as_deref(), Some("disconnect"));
    }

    #[test]
    fn test_child_cancel_leaves_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel("disposed");

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel("closed");

        let child = parent.child_token();
        assert!(child.is_cancelled());
        assert_eq!(child.reason().as_deref(), Some("closed"));
    }

    #[test]
    fn test_dropped_children_are_pruned() {
        let parent = CancellationToken::new();
        for _ in 0..16 {
            drop(parent.child_token());
        }
        let _live = parent.child_token();
        assert_eq!(parent.inner.state.lock().children.len(), 1);
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.reason()
        });

        tokio::task::yield_now().await;
        token.cancel("disconnect");

        let reason = handle.await.unwrap();
        assert_eq!(reason.as_deref(), Some("disconnect"));
    }
}
