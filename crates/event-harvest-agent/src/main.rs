// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use event_harvest::{
    aggregator_service::{AggregatorHandle, AggregatorService},
    config::HarvestConfig,
    error::ServiceError,
    features::FeatureName,
    generic_events::{PageAction, PageContext},
    harvester::Harvester,
    license_key::LicenseKeyFactory,
    logger,
    logging::LogLevel,
    transport::HttpTransport,
};

/// One line of agent input.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(untagged)]
enum InputLine {
    Event {
        feature: FeatureName,
        event: Value,
    },
    PageAction {
        #[serde(rename = "pageAction")]
        name: String,
        #[serde(default)]
        attributes: Map<String, Value>,
    },
    Log {
        #[serde(rename = "log")]
        message: String,
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        attributes: Map<String, Value>,
    },
    PageUrl {
        #[serde(rename = "pageUrl")]
        url: String,
    },
}

#[tokio::main]
pub async fn main() {
    let config = HarvestConfig::from_env();
    let log_level = match &config {
        Ok(config) => config.log_level.as_str(),
        Err(_) => "info",
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(logger::env_filter(log_level))
        .event_format(logger::Formatter)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }
    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e}. Shutting down harvest agent.");
            return;
        }
    };

    let Some(license_key) = config.license_key.as_deref() else {
        error!("NR_LICENSE_KEY is not set. Shutting down harvest agent.");
        return;
    };
    let license_key_factory = Arc::new(LicenseKeyFactory::from_static(license_key));

    let transport = match HttpTransport::new(&config, license_key_factory) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to create transport: {e}. Shutting down harvest agent.");
            return;
        }
    };

    let (service, handle) = AggregatorService::new();
    let service_task = tokio::spawn(service.run());
    if let Some(page_url) = config.page_url.as_deref() {
        if let Err(e) = handle.set_page_context(PageContext::for_url(page_url)) {
            error!("Failed to set page context: {e}");
        }
    }

    let cancel = CancellationToken::new();
    let harvester = Harvester::new(handle.clone(), Arc::new(transport), config.harvest_interval);
    let harvester_task = tokio::spawn(harvester.run(cancel.clone()));

    info!(
        "Harvest agent started, sending to {} every {}s",
        config.endpoint,
        config.harvest_interval.as_secs()
    );

    let mut lines = BufReader::new(stdin()).lines();
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = ingest(&handle, &line) {
                        error!("Aggregator service unavailable: {e}");
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {e}");
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Interrupt received");
                break;
            }
        }
    }

    cancel.cancel();
    if let Err(e) = harvester_task.await {
        error!("Harvester task failed: {e}");
    }
    if let Err(e) = handle.shutdown() {
        debug!("Aggregator already stopped: {e}");
    }
    if let Err(e) = service_task.await {
        error!("Aggregator task failed: {e}");
    }
    info!("Harvest agent stopped");
}

/// Parses one input line and forwards it. Malformed lines are skipped.
fn ingest(handle: &AggregatorHandle, line: &str) -> Result<(), ServiceError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let input = match serde_json::from_str::<InputLine>(line) {
        Ok(input) => input,
        Err(e) => {
            warn!("Skipping malformed input line: {e}");
            return Ok(());
        }
    };

    match input {
        InputLine::Event { feature, event } => handle.add_event(feature, event),
        InputLine::PageAction { name, attributes } => match PageAction::new(name) {
            Some(action) => handle.add_page_action(action.with_attributes(attributes)),
            None => {
                warn!("Skipping page action without a name");
                Ok(())
            }
        },
        InputLine::Log {
            message,
            level,
            attributes,
        } => {
            let level = match level.as_deref().map(str::parse::<LogLevel>) {
                None => LogLevel::default(),
                Some(Ok(level)) => level,
                Some(Err(e)) => {
                    warn!("Skipping log line: {e}");
                    return Ok(());
                }
            };
            handle.log(message, attributes, level)
        }
        InputLine::PageUrl { url } => handle.set_page_context(PageContext::for_url(url)),
    }
}
