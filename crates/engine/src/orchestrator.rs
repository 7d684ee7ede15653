use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, info_span, Instrument};

use common::ExchangeClient;
use strategy::AssetConfig;

use crate::retry::RetryPolicy;
use crate::worker::Worker;

/// Supervises the worker pool: one task per asset, started with a fixed
/// stagger so the fleet never bursts the exchange rate limiter at boot.
///
/// Workers are fully independent; one worker failing (or panicking) is
/// logged and leaves the rest of the fleet running. `run` returns only
/// once every worker task has finished — absent a shutdown signal that is
/// never, by design.
pub struct Orchestrator {
    assets: Vec<Arc<AssetConfig>>,
    client: Arc<dyn ExchangeClient>,
    policy: RetryPolicy,
    stagger: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        assets: Vec<Arc<AssetConfig>>,
        client: Arc<dyn ExchangeClient>,
        policy: RetryPolicy,
        stagger: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            assets,
            client,
            policy,
            stagger,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut handles = Vec::with_capacity(self.assets.len());

        for (i, asset) in self.assets.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = sleep(self.stagger) => {}
                    _ = self.shutdown.changed() => {
                        info!("shutdown during startup stagger — no further workers started");
                        break;
                    }
                }
            }

            let worker = Worker::new(
                Arc::clone(asset),
                Arc::clone(&self.client),
                self.policy.clone(),
                self.shutdown.clone(),
            );

            info!(symbol = %asset.symbol, mode = ?asset.mode, "starting worker");
            let span = info_span!("worker", symbol = %asset.symbol);
            handles.push(tokio::spawn(worker.run().instrument(span)));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                // A panic in one worker must not take down its siblings.
                error!(error = %e, "worker task aborted");
            }
        }
        info!("all workers stopped");
    }
}
