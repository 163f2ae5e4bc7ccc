//! Edge-triggered wakeup signal for long-poll readers.
//!
//! Built on [`tokio::sync::Notify::notify_waiters`], which wakes every
//! task registered at the moment of the call and stores no permit. A
//! fire with nobody waiting is therefore lost, and a wait that starts
//! after a fire blocks until the next one. There is no residual
//! "signaled" state to reset.
//!
//! Readers that must not miss a fire between checking their data and
//! blocking call [`WakeupSignal::listen`] first, check, then
//! [`Listener::wait`]: the listener is registered from the moment it is
//! created.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::futures::Notified;

/// Why a wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The signal fired.
    Fired,
    /// The timeout elapsed first. Normal control flow, not an error.
    TimedOut,
    /// The owning room was removed.
    Closed,
}

/// Binary edge-triggered signal scoped to one room and one purpose.
#[derive(Debug, Default)]
pub struct WakeupSignal {
    notify: Notify,
    closed: AtomicBool,
}

impl WakeupSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next fire without blocking yet.
    pub fn listen(&self) -> Listener<'_> {
        let mut notified = Box::pin(self.notify.notified());
        notified.as_mut().enable();
        Listener {
            notified,
            signal: self,
        }
    }

    /// Block until the next fire, closure, or `timeout`.
    pub async fn wait(&self, timeout: Duration) -> Wake {
        self.listen().wait(timeout).await
    }

    /// Release every task currently waiting. Call only after the data
    /// mutation this fire announces is visible to other tasks.
    pub fn fire(&self) {
        self.notify.notify_waiters();
    }

    /// Release every waiter and make all future waits return immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A registered, not-yet-awaited wait on a [`WakeupSignal`].
pub struct Listener<'a> {
    notified: Pin<Box<Notified<'a>>>,
    signal: &'a WakeupSignal,
}

impl Listener<'_> {
    /// Block until the signal fires or closes, or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Wake {
        if self.signal.is_closed() {
            return Wake::Closed;
        }
        match tokio::time::timeout(timeout, self.notified.as_mut()).await {
            Ok(()) if self.signal.is_closed() => Wake::Closed,
            Ok(()) => Wake::Fired,
            Err(_) => Wake::TimedOut,
        }
    }
}
