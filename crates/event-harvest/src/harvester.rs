// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scheduled harvest loop.
//!
//! Every interval the harvester drains all feature streams, sends the
//! payloads concurrently and reports the outcomes back so retryable batches
//! can be re-queued. Cancellation triggers one last harvest without retry,
//! since nothing would be left to resend it.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use crate::aggregator::HarvestOutcome;
use crate::aggregator_service::AggregatorHandle;
use crate::error::ServiceError;
use crate::features::FeatureName;
use crate::transport::Transport;

pub struct Harvester {
    handle: AggregatorHandle,
    transport: Arc<dyn Transport>,
    harvest_interval: Duration,
}

impl Harvester {
    #[must_use]
    pub fn new(
        handle: AggregatorHandle,
        transport: Arc<dyn Transport>,
        harvest_interval: Duration,
    ) -> Self {
        Harvester {
            handle,
            transport,
            harvest_interval,
        }
    }

    /// Runs one harvest cycle and returns the outcome per sent stream.
    pub async fn harvest_once(
        &self,
        retry: bool,
    ) -> Result<Vec<(FeatureName, HarvestOutcome)>, ServiceError> {
        let payloads = self.handle.harvest(retry).await?;
        if payloads.is_empty() {
            debug!("HARVEST | nothing to harvest");
            return Ok(Vec::new());
        }

        let sends = payloads.iter().map(|payload| {
            let span = info_span!("harvest", feature = %payload.feature);
            async move { (payload.feature, self.transport.send(payload).await) }.instrument(span)
        });
        let outcomes = join_all(sends).await;

        if retry {
            self.handle.harvest_finished(outcomes.clone())?;
        }
        Ok(outcomes)
    }

    /// Harvests on every tick until `cancel` fires, then drains once more.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.harvest_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.harvest_once(true).await {
                        error!("HARVEST | aggregator unavailable, stopping harvester: {e}");
                        return;
                    }
                }
                () = cancel.cancelled() => {
                    debug!("HARVEST | cancellation requested, running final harvest");
                    if let Err(e) = self.harvest_once(false).await {
                        error!("HARVEST | final harvest failed: {e}");
                    }
                    return;
                }
            }
        }
    }
}
