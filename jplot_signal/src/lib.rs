//! One-shot phase signal for jplot.
//!
//! jplot runs a sampler and a render scheduler side by side. When the sampler
//! runs out of input, or the user interrupts the process, the scheduler must
//! be told to draw its last frame and the main flow must wait until it has
//! done so. This crate provides that coordination.
//!
//! A [`signal`] call produces one [`Broadcaster`] and one [`Watcher`]. The
//! `Broadcaster` fires exactly once. The `Watcher` may be cloned and every
//! clone observes the firing, but only the original is waited on:
//! [`Broadcaster::signal_and_wait`] does not return until it has observed the
//! signal or been dropped.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use tokio::sync::{
    Notify,
    broadcast::{self, error},
};
use tracing::debug;

/// State shared between a `Broadcaster` and all of its `Watcher` instances.
#[derive(Debug)]
struct Shared {
    /// Number of registered watchers that have not yet checked out.
    peers: AtomicU32,
    /// Wakes the `Broadcaster` whenever a registered watcher checks out.
    checked_out: Notify,
}

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    // Only the closing of the channel is meaningful, no value is ever sent.
    let (sender, receiver) = broadcast::channel(1);
    let shared = Arc::new(Shared {
        peers: AtomicU32::new(1),
        checked_out: Notify::new(),
    });

    let watcher = Watcher {
        shared: Arc::clone(&shared),
        receiver,
        received: false,
        registered: true,
        checked_out: false,
    };
    let broadcaster = Broadcaster { shared, sender };

    (watcher, broadcaster)
}

/// The firing half of a signal pair.
#[derive(Debug)]
pub struct Broadcaster {
    shared: Arc<Shared>,
    sender: broadcast::Sender<()>,
}

impl Broadcaster {
    /// Fire the signal and wait until every registered watcher has observed
    /// it or been dropped.
    pub async fn signal_and_wait(self) {
        drop(self.sender);

        loop {
            // Register interest before reading the peer count. A watcher that
            // checks out between the load and the await would otherwise be
            // missed and this loop would never wake.
            let notified = self.shared.checked_out.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let peers = self.shared.peers.load(Ordering::SeqCst);
            if peers == 0 {
                return;
            }
            debug!("waiting on {peers} watcher(s) to observe signal");
            notified.await;
        }
    }
}

/// The observing half of a signal pair.
///
/// The `Watcher` produced by [`signal`] is registered: the `Broadcaster`
/// waits on it in `signal_and_wait`. A `Watcher` produced by `clone` is not
/// registered and is never waited on.
#[derive(Debug)]
pub struct Watcher {
    shared: Arc<Shared>,
    receiver: broadcast::Receiver<()>,
    received: bool,
    registered: bool,
    checked_out: bool,
}

impl Watcher {
    /// Tell the `Broadcaster` this watcher no longer needs waiting on. Safe to
    /// call more than once.
    fn check_out(&mut self) {
        if !self.registered || self.checked_out {
            return;
        }
        self.checked_out = true;

        // Saturate at zero rather than wrap.
        let decremented = self
            .shared
            .peers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |peers| {
                peers.checked_sub(1)
            });
        if decremented.is_ok() {
            self.shared.checked_out.notify_waiters();
        }
    }

    fn observe(&mut self) {
        self.received = true;
        self.check_out();
    }

    /// Wait for the signal. Returns immediately if it was already observed.
    ///
    /// # Panics
    ///
    /// Panics if the underlying channel reports lag, which cannot happen as no
    /// value is ever sent through it.
    pub async fn recv(mut self) {
        if self.received {
            // Yield so a `select!` arm built on an already-fired watcher does
            // not starve its siblings.
            tokio::task::yield_now().await;
            return;
        }

        match self.receiver.recv().await {
            Ok(()) | Err(error::RecvError::Closed) => self.observe(),
            Err(error::RecvError::Lagged(_)) => {
                panic!("signal channel lagged, no value should ever be sent")
            }
        }
    }
}

impl Clone for Watcher {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            receiver: self.receiver.resubscribe(),
            received: self.received,
            registered: false,
            checked_out: false,
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.check_out();
    }
}
