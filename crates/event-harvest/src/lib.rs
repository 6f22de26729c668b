// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Event Harvest
//!
//! Buffering and harvest core for a client-side telemetry agent.
//!
//! Instrumentation features push JSON events into per-feature
//! [`EventBuffer`]s. Each buffer tracks the serialized size of its contents
//! and refuses anything that would take the payload past
//! [`MAX_PAYLOAD_SIZE`]. On a schedule the [`Harvester`] drains every stream,
//! hands the batches to a [`Transport`] and re-queues batches that failed
//! with a retryable status.
//!
//! ## Modules
//!
//! - [`event_buffer`]: size-bounded event container
//! - [`aggregator`]: per-feature buffer plus in-flight retry batch
//! - [`aggregator_service`]: actor owning every feature stream
//! - [`generic_events`], [`logging`]: typed producers for two of the streams
//! - [`transport`], [`harvester`]: delivery
//! - [`config`], [`logger`]: ambient setup for the agent binary

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(missing_copy_implementations)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

pub mod aggregator;
pub mod aggregator_service;
pub mod config;
pub mod constants;
pub mod error;
pub mod event_buffer;
pub mod features;
pub mod generic_events;
pub mod harvester;
pub mod license_key;
pub mod logger;
pub mod logging;
pub mod payload_size;
pub mod supportability;
pub mod transport;

pub use aggregator::{FeatureAggregator, HarvestOutcome, HarvestPayload};
pub use aggregator_service::{AggregatorHandle, AggregatorService};
pub use config::HarvestConfig;
pub use constants::MAX_PAYLOAD_SIZE;
pub use event_buffer::{EventBuffer, EventRecord, MergeSource};
pub use features::FeatureName;
pub use harvester::Harvester;
pub use transport::{HttpTransport, Transport};
