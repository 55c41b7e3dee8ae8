//! Graceful shutdown on platform signals
//!
//! The host announces imminent process replacement (`Migrating`) or
//! termination (`Aborting`). On either, the coordinator pauses the
//! scheduler with the configured grace period and snapshots request-list
//! progress and statistics, concurrently. A snapshot that fails to write
//! is logged and dropped: a partial flush beats crashing mid-shutdown.

use crate::crawler::scheduler::SchedulerHandle;
use crate::events::{EventSubscription, PlatformEvent};
use crate::provider::RequestProvider;
use crate::stats::Statistics;
use crate::storage::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Listens for lifecycle signals and drains the crawl when they arrive
pub struct MigrationCoordinator {
    subscription: EventSubscription,
    scheduler: SchedulerHandle,
    provider: Arc<RequestProvider>,
    stats: Arc<Statistics>,
    state_store: Option<Arc<dyn KeyValueStore>>,
    grace_period: Duration,
}

impl MigrationCoordinator {
    pub fn new(
        subscription: EventSubscription,
        scheduler: SchedulerHandle,
        provider: Arc<RequestProvider>,
        stats: Arc<Statistics>,
        state_store: Option<Arc<dyn KeyValueStore>>,
        grace_period: Duration,
    ) -> Self {
        Self {
            subscription,
            scheduler,
            provider,
            stats,
            state_store,
            grace_period,
        }
    }

    /// Spawns the listener task; aborting the handle tears it down
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = self.subscription.recv().await {
                match event {
                    PlatformEvent::Migrating => {
                        tracing::info!("Migration signal received, draining crawl");
                    }
                    PlatformEvent::Aborting => {
                        tracing::info!("Abort signal received, draining crawl");
                    }
                }

                self.scheduler.pause(self.grace_period).await;
                self.flush_state().await;

                if event == PlatformEvent::Aborting {
                    // The process is going away; stay paused and stop
                    // listening
                    break;
                }
            }
        })
    }

    /// Persists provider and statistics state, best effort
    async fn flush_state(&self) {
        let stats_flush = async {
            match &self.state_store {
                Some(store) => self.stats.persist_state(store.as_ref()).await,
                None => Ok(()),
            }
        };

        let (provider_result, stats_result) =
            tokio::join!(self.provider.persist_state(), stats_flush);

        match provider_result {
            Ok(()) => tracing::info!("Request state persisted"),
            Err(error) => {
                tracing::warn!(error = %error, "Failed to persist request state")
            }
        }
        if let Err(error) = stats_result {
            tracing::warn!(error = %error, "Failed to persist statistics");
        }
    }
}
