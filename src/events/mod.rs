//! Lifecycle event bus
//!
//! The host platform announces imminent process replacement or termination
//! through named signals. The engine only ever subscribes; emission is the
//! host's (or a test's) job. Subscriptions are explicit handles passed into
//! whoever needs them at construction time, so there is no process-wide
//! singleton to tear down.

use tokio::sync::broadcast;

/// Signals delivered by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The host will soon replace this process; drain and persist
    Migrating,
    /// The host is terminating this process; drain and persist now
    Aborting,
}

/// Broadcast bus for lifecycle signals
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Emits a signal to all current subscribers
    ///
    /// Returns the number of subscribers that will observe it.
    pub fn emit(&self, event: PlatformEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => 0,
        }
    }

    /// Creates a new subscription handle
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's handle onto the bus
///
/// Dropping the handle unregisters it.
pub struct EventSubscription {
    rx: broadcast::Receiver<PlatformEvent>,
}

impl EventSubscription {
    /// Waits for the next signal; None once the bus is gone
    ///
    /// A lagged receiver skips to the most recent signals rather than
    /// erroring out: for shutdown-class events only the latest matters.
    pub async fn recv(&mut self) -> Option<PlatformEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
