// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-feature event aggregation and retry bookkeeping.
//!
//! A [`FeatureAggregator`] owns the [`EventBuffer`] of one feature stream for
//! the current harvest interval. At harvest time the buffer is taken whole and
//! handed to the transport as a [`HarvestPayload`]. When the harvest may be
//! retried, a copy of the sent batch is held until the transport reports back:
//!
//! ```text
//!   add() ──> EventBuffer ──make_harvest_payload()──> HarvestPayload ──> Transport
//!                 ^                                          │
//!                 │                                   (held copy)
//!                 └──── merge(prepend) <── Retry ── post_harvest_cleanup()
//! ```
//!
//! A failed batch is replayed *before* anything collected while it was in
//! flight, and only if the combined batch still fits under the payload
//! ceiling. Anything that cannot be kept is counted in the supportability
//! metrics.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::event_buffer::{EventBuffer, MergeSource};
use crate::features::FeatureName;
use crate::supportability::{self, SupportabilityMetrics};

/// What the transport did with a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// Accepted by the collector.
    Sent,
    /// Temporary failure; the batch may be replayed on the next harvest.
    Retry,
    /// Permanent failure; the batch is discarded.
    Dropped,
}

/// One feature's batch, ready to be sent.
#[derive(Clone, Debug, PartialEq)]
pub struct HarvestPayload {
    pub feature: FeatureName,
    pub events: EventBuffer,
}

impl HarvestPayload {
    /// Request body: `{"<payload key>": [records...]}`.
    ///
    /// The buffer's byte count, and so [`MAX_PAYLOAD_SIZE`], only covers the
    /// records. The body is longer by the envelope plus `len() - 1` commas.
    ///
    /// [`MAX_PAYLOAD_SIZE`]: crate::constants::MAX_PAYLOAD_SIZE
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Serialize for HarvestPayload {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.feature.payload_key(), &self.events)?;
        map.end()
    }
}

/// Owns the buffer of a single feature stream.
#[derive(Debug, Clone)]
pub struct FeatureAggregator {
    feature: FeatureName,
    /// Events collected since the last harvest.
    pub(crate) events: EventBuffer,
    /// Copy of the batch currently being sent, kept for a possible retry.
    pub(crate) in_flight: Option<EventBuffer>,
    blocked: bool,
}

impl FeatureAggregator {
    #[must_use]
    pub fn new(feature: FeatureName) -> Self {
        FeatureAggregator {
            feature,
            events: EventBuffer::new(),
            in_flight: None,
            blocked: false,
        }
    }

    #[must_use]
    pub fn feature(&self) -> FeatureName {
        self.feature
    }

    #[must_use]
    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Stops (or resumes) collection for this stream.
    ///
    /// Blocking discards anything already buffered.
    pub fn set_blocked(&mut self, blocked: bool) {
        if blocked && !self.blocked {
            debug!(
                "HARVEST | {} blocked, discarding {} buffered events",
                self.feature,
                self.events.len()
            );
            self.events.clear();
            self.in_flight = None;
        }
        self.blocked = blocked;
    }

    /// Buffers `event`, returning whether it was kept.
    pub fn add(&mut self, event: Value, metrics: &mut SupportabilityMetrics) -> bool {
        if self.blocked {
            return false;
        }
        if self.events.try_add(event) {
            return true;
        }
        warn!(
            "HARVEST | {} event dropped: buffer at {} bytes cannot take it",
            self.feature,
            self.events.bytes()
        );
        metrics.increment(supportability::events_dropped(self.feature));
        false
    }

    /// Merges a sibling buffer into this stream.
    pub fn merge_pending<'a>(
        &mut self,
        other: impl Into<MergeSource<'a>>,
        prepend: bool,
        metrics: &mut SupportabilityMetrics,
    ) -> bool {
        let other = other.into();
        if self.blocked {
            return false;
        }
        let MergeSource::Buffer(buffer) = other else {
            debug!("HARVEST | {} ignoring merge of a non-buffer", self.feature);
            return false;
        };
        if self.events.try_merge(buffer, prepend) {
            return true;
        }
        warn!(
            "HARVEST | {} merge of {} bytes rejected, buffer at {} bytes",
            self.feature,
            buffer.bytes(),
            self.events.bytes()
        );
        metrics.increment_by(
            supportability::events_dropped(self.feature),
            buffer.len() as u64,
        );
        false
    }

    /// Takes the buffered events for sending.
    ///
    /// Returns `None` when there is nothing to send, when the stream is
    /// blocked, or while a previous retryable harvest is still outstanding.
    /// With `retry` set, a copy of the batch is held until
    /// [`FeatureAggregator::post_harvest_cleanup`] is called.
    pub fn make_harvest_payload(&mut self, retry: bool) -> Option<HarvestPayload> {
        if self.blocked || !self.events.has_data() {
            return None;
        }
        if self.in_flight.is_some() {
            debug!(
                "HARVEST | {} harvest still in flight, skipping",
                self.feature
            );
            return None;
        }
        let batch = self.events.take();
        if retry {
            self.in_flight = Some(batch.clone());
        }
        Some(HarvestPayload {
            feature: self.feature,
            events: batch,
        })
    }

    /// Settles the outstanding harvest.
    ///
    /// On [`HarvestOutcome::Retry`] the held batch is put back in front of
    /// newer events when it fits; otherwise it is dropped and counted.
    pub fn post_harvest_cleanup(
        &mut self,
        outcome: HarvestOutcome,
        metrics: &mut SupportabilityMetrics,
    ) {
        let Some(held) = self.in_flight.take() else {
            return;
        };
        match outcome {
            HarvestOutcome::Retry => {
                if self.events.can_merge(held.bytes()) && self.events.try_merge(&held, true) {
                    debug!(
                        "HARVEST | {} keeping {} events for retry",
                        self.feature,
                        held.len()
                    );
                } else {
                    warn!(
                        "HARVEST | {} dropping {} events: no room to retry",
                        self.feature,
                        held.len()
                    );
                    metrics.increment_by(
                        supportability::retry_dropped(self.feature),
                        held.len() as u64,
                    );
                }
            }
            HarvestOutcome::Sent => {
                debug!("HARVEST | {} sent {} events", self.feature, held.len());
            }
            HarvestOutcome::Dropped => {
                warn!(
                    "HARVEST | {} collector rejected {} events",
                    self.feature,
                    held.len()
                );
            }
        }
    }
}
