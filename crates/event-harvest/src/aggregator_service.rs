// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor that owns every feature buffer.
//!
//! Event buffers are single-writer. Producers run on arbitrary tasks, so the
//! buffers live inside one service task and everything else talks to it
//! through a cloneable [`AggregatorHandle`]:
//!
//! ```text
//!    ┌──────────────┐
//!    │   Handles    │ (instrumentation features, harvester)
//!    └──────┬───────┘
//!           │ AggregatorCommand over an unbounded channel
//!           v
//!    ┌──────────────┐
//!    │   Service    │ (single consumer, commands applied in order)
//!    └──────┬───────┘
//!           v
//!    ┌──────────────────────────────────────┐
//!    │ FeatureAggregator per FeatureName    │
//!    │ + SupportabilityMetrics              │
//!    └──────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let (service, handle) = AggregatorService::new();
//! tokio::spawn(service.run());
//!
//! handle.add_event(FeatureName::JsErrors, json!({"message": "boom"}))?;
//! let payloads = handle.harvest(true).await?;
//! ```

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::aggregator::{FeatureAggregator, HarvestOutcome, HarvestPayload};
use crate::error::ServiceError;
use crate::event_buffer::EventBuffer;
use crate::features::FeatureName;
use crate::generic_events::{now_ms, PageAction, PageContext};
use crate::logging::{LogEvent, LogLevel};
use crate::supportability::{self, SupportabilityMetrics};

/// Commands accepted by the [`AggregatorService`].
#[derive(Debug)]
pub enum AggregatorCommand {
    /// Push a raw event onto a feature stream.
    AddEvent(FeatureName, Value),
    AddPageAction(PageAction),
    AddLog(LogEvent),
    /// Merge a buffer built elsewhere into a feature stream.
    MergeBuffer {
        feature: FeatureName,
        buffer: EventBuffer,
        prepend: bool,
    },
    SetGlobalAttribute(String, Value),
    SetPageContext(PageContext),
    SetBlocked(FeatureName, bool),
    /// Take every stream that has data.
    Harvest {
        retry: bool,
        response: oneshot::Sender<Vec<HarvestPayload>>,
    },
    /// Report what the transport did with the last harvest.
    HarvestFinished(Vec<(FeatureName, HarvestOutcome)>),
    /// Read a supportability counter without draining it.
    GetMetric(String, oneshot::Sender<u64>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorCommand>,
}

impl AggregatorHandle {
    fn send(&self, command: AggregatorCommand) -> Result<(), ServiceError> {
        self.tx
            .send(command)
            .map_err(|e| ServiceError::Send(e.to_string()))
    }

    pub fn add_event(&self, feature: FeatureName, event: Value) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::AddEvent(feature, event))
    }

    pub fn add_page_action(&self, action: PageAction) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::AddPageAction(action))
    }

    /// Records a log event through the logging API.
    pub fn log(
        &self,
        message: impl Into<String>,
        attributes: Map<String, Value>,
        level: LogLevel,
    ) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::AddLog(LogEvent::new(
            message, attributes, level,
        )))
    }

    pub fn merge_buffer(
        &self,
        feature: FeatureName,
        buffer: EventBuffer,
        prepend: bool,
    ) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::MergeBuffer {
            feature,
            buffer,
            prepend,
        })
    }

    pub fn set_global_attribute(
        &self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::SetGlobalAttribute(key.into(), value))
    }

    pub fn set_page_context(&self, page: PageContext) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::SetPageContext(page))
    }

    pub fn set_blocked(&self, feature: FeatureName, blocked: bool) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::SetBlocked(feature, blocked))
    }

    /// Drains every feature stream that has data.
    ///
    /// With `retry` set, each taken batch is held until
    /// [`AggregatorHandle::harvest_finished`] reports its outcome.
    pub async fn harvest(&self, retry: bool) -> Result<Vec<HarvestPayload>, ServiceError> {
        let (response, response_rx) = oneshot::channel();
        self.send(AggregatorCommand::Harvest { retry, response })?;
        response_rx
            .await
            .map_err(|e| ServiceError::Receive(e.to_string()))
    }

    pub fn harvest_finished(
        &self,
        outcomes: Vec<(FeatureName, HarvestOutcome)>,
    ) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::HarvestFinished(outcomes))
    }

    pub async fn metric(&self, name: impl Into<String>) -> Result<u64, ServiceError> {
        let (response, response_rx) = oneshot::channel();
        self.send(AggregatorCommand::GetMetric(name.into(), response))?;
        response_rx
            .await
            .map_err(|e| ServiceError::Receive(e.to_string()))
    }

    pub fn shutdown(&self) -> Result<(), ServiceError> {
        self.send(AggregatorCommand::Shutdown)
    }
}

pub struct AggregatorService {
    aggregators: BTreeMap<FeatureName, FeatureAggregator>,
    metrics: SupportabilityMetrics,
    global_attributes: Map<String, Value>,
    page: PageContext,
    rx: mpsc::UnboundedReceiver<AggregatorCommand>,
}

impl AggregatorService {
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, AggregatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregators = FeatureName::ALL
            .into_iter()
            .map(|feature| (feature, FeatureAggregator::new(feature)))
            .collect();

        let service = Self {
            aggregators,
            metrics: SupportabilityMetrics::new(),
            global_attributes: Map::new(),
            // Page load is measured from agent start until a context says otherwise
            page: PageContext {
                loaded_at: now_ms(),
                ..Default::default()
            },
            rx,
        };
        (service, AggregatorHandle { tx })
    }

    /// Processes commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("HARVEST | aggregator service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                AggregatorCommand::AddEvent(feature, event) => {
                    self.add(feature, event);
                }
                AggregatorCommand::AddPageAction(action) => {
                    self.metrics.increment(supportability::PAGE_ACTION_API_CALLED);
                    let event = action.into_event(&self.global_attributes, &self.page);
                    self.add(FeatureName::GenericEvents, event);
                }
                AggregatorCommand::AddLog(log) => {
                    self.metrics
                        .increment(supportability::log_api_called(log.level.as_str()));
                    match serde_json::to_value(&log) {
                        Ok(event) => self.add(FeatureName::Logging, event),
                        Err(e) => warn!("HARVEST | failed to encode log event: {e}"),
                    }
                }
                AggregatorCommand::MergeBuffer {
                    feature,
                    buffer,
                    prepend,
                } => {
                    aggregator_mut(&mut self.aggregators, feature).merge_pending(
                        &buffer,
                        prepend,
                        &mut self.metrics,
                    );
                }
                AggregatorCommand::SetGlobalAttribute(key, value) => {
                    self.global_attributes.insert(key, value);
                }
                AggregatorCommand::SetPageContext(mut page) => {
                    if page.loaded_at == 0 {
                        page.loaded_at = self.page.loaded_at;
                    }
                    self.page = page;
                }
                AggregatorCommand::SetBlocked(feature, blocked) => {
                    aggregator_mut(&mut self.aggregators, feature).set_blocked(blocked);
                }
                AggregatorCommand::Harvest { retry, response } => {
                    let payloads = self.harvest(retry);
                    if response.send(payloads).is_err() {
                        error!("HARVEST | failed to send harvest response - receiver dropped");
                    }
                }
                AggregatorCommand::HarvestFinished(outcomes) => {
                    for (feature, outcome) in outcomes {
                        aggregator_mut(&mut self.aggregators, feature)
                            .post_harvest_cleanup(outcome, &mut self.metrics);
                    }
                }
                AggregatorCommand::GetMetric(name, response) => {
                    let _ = response.send(self.metrics.get(&name));
                }
                AggregatorCommand::Shutdown => {
                    debug!("HARVEST | aggregator service shutting down");
                    break;
                }
            }
        }
    }

    fn add(&mut self, feature: FeatureName, event: Value) {
        aggregator_mut(&mut self.aggregators, feature).add(event, &mut self.metrics);
    }

    fn harvest(&mut self, retry: bool) -> Vec<HarvestPayload> {
        // Supportability counters ride along on the metrics stream
        let metrics_aggregator = aggregator_mut(&mut self.aggregators, FeatureName::Metrics);
        if metrics_aggregator.is_blocked() {
            if !self.metrics.is_empty() {
                debug!("HARVEST | metrics blocked, holding supportability counters");
            }
        } else if !self.metrics.is_empty() {
            let mut overflow = SupportabilityMetrics::new();
            let mut lost = 0usize;
            for record in self.metrics.take() {
                if !metrics_aggregator.add(record, &mut overflow) {
                    lost += 1;
                }
            }
            if lost > 0 {
                debug!("HARVEST | {lost} supportability records did not fit and were dropped");
            }
        }

        let payloads: Vec<HarvestPayload> = self
            .aggregators
            .values_mut()
            .filter_map(|aggregator| aggregator.make_harvest_payload(retry))
            .collect();
        debug!("HARVEST | harvested {} streams", payloads.len());
        payloads
    }
}

fn aggregator_mut(
    aggregators: &mut BTreeMap<FeatureName, FeatureAggregator>,
    feature: FeatureName,
) -> &mut FeatureAggregator {
    aggregators
        .entry(feature)
        .or_insert_with(|| FeatureAggregator::new(feature))
}
