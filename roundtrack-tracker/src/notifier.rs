//! Single-shot broadcast signal.
//!
//! A [`Notifier`] fires at most once. Every [`WaitHandle`] taken from it,
//! before or after the fact, observes that one event.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
struct Signal {
    notified: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Trigger side of a single-shot signal.
#[derive(Debug, Clone)]
pub struct Notifier {
    signal: Arc<Signal>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// A signal that has not fired yet.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            signal: Arc::new(Signal {
                notified: AtomicBool::new(false),
                tx,
            }),
        }
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it;
    /// later (or racing) calls are no-ops.
    pub fn notify(&self) -> bool {
        if self
            .signal
            .notified
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.signal.tx.send_replace(true);
            true
        } else {
            false
        }
    }

    pub fn is_notified(&self) -> bool {
        self.signal.notified.load(Ordering::Acquire)
    }

    /// A handle any number of observers can wait on.
    pub fn handle(&self) -> WaitHandle {
        WaitHandle {
            rx: self.signal.tx.subscribe(),
            _signal: self.signal.clone(),
        }
    }
}

/// Observer side of a single-shot signal. Resolves once, with no payload.
///
/// The handle keeps its signal alive: if the registry that created it forgets
/// the signal, the handle stays pending instead of erroring.
#[derive(Debug, Clone)]
pub struct WaitHandle {
    rx: watch::Receiver<bool>,
    _signal: Arc<Signal>,
}

impl WaitHandle {
    /// A handle that is already satisfied.
    pub fn ready() -> Self {
        let notifier = Notifier::new();
        notifier.notify();
        notifier.handle()
    }

    /// Whether the signal has fired. Never blocks.
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Suspend until the signal fires. Returns immediately if it already has.
    pub async fn wait(mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender gone without firing; unreachable while `_signal` is held
                std::future::pending::<()>().await;
            }
        }
    }

    /// Wait at most `timeout`. Returns whether the signal fired in time.
    ///
    /// Losing the race leaves the registry untouched; other waiters on the
    /// same round are unaffected.
    pub async fn wait_timeout(self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl IntoFuture for WaitHandle {
    type Output = ();
    type IntoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
