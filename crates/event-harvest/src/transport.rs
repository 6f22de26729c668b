// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of harvest payloads to the collector.
//!
//! The transport sends each payload exactly once and classifies the result.
//! It never re-sends on its own: a [`HarvestOutcome::Retry`] goes back to the
//! owning [`FeatureAggregator`](crate::aggregator::FeatureAggregator), which
//! decides whether the batch still fits into the next harvest.
//!
//! # Status mapping
//!
//! | Response | Outcome |
//! |---|---|
//! | 2xx | `Sent` |
//! | 408, 429, 5xx, network error | `Retry` |
//! | any other status | `Dropped` |

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::aggregator::{HarvestOutcome, HarvestPayload};
use crate::config::HarvestConfig;
use crate::error::TransportError;
use crate::features::FeatureName;
use crate::license_key::LicenseKeyFactory;

/// Sends one payload and reports what happened to it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &HarvestPayload) -> HarvestOutcome;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    license_key_factory: Arc<LicenseKeyFactory>,
}

impl HttpTransport {
    pub fn new(
        config: &HarvestConfig,
        license_key_factory: Arc<LicenseKeyFactory>,
    ) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        Ok(HttpTransport {
            client: builder.build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            license_key_factory,
        })
    }

    fn url(&self, feature: FeatureName, license_key: &str) -> String {
        format!("{}/{}/1/{}", self.endpoint, feature.endpoint(), license_key)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &HarvestPayload) -> HarvestOutcome {
        let Some(license_key) = self.license_key_factory.license_key().await else {
            error!(
                "HARVEST | Skipping {} harvest: failed to resolve license key",
                payload.feature
            );
            return HarvestOutcome::Retry;
        };

        let body = match payload.to_body() {
            Ok(body) => body,
            Err(e) => {
                error!(
                    "HARVEST | Failed to prepare {} payload. Data dropped: {e}",
                    payload.feature
                );
                return HarvestOutcome::Dropped;
            }
        };

        let response = self
            .client
            .post(self.url(payload.feature, license_key.expose()))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                let outcome = outcome_for_status(status);
                match outcome {
                    HarvestOutcome::Sent => debug!(
                        "HARVEST | {} payload accepted ({status})",
                        payload.feature
                    ),
                    HarvestOutcome::Retry => warn!(
                        "HARVEST | {} payload failed with {status}, will retry",
                        payload.feature
                    ),
                    HarvestOutcome::Dropped => error!(
                        "HARVEST | {} payload rejected with {status}, dropping",
                        payload.feature
                    ),
                }
                outcome
            }
            Err(e) => {
                warn!(
                    "HARVEST | Error sending {} payload, will retry: {e}",
                    payload.feature
                );
                HarvestOutcome::Retry
            }
        }
    }
}

/// Classifies a collector response status.
#[must_use]
pub fn outcome_for_status(status: StatusCode) -> HarvestOutcome {
    if status.is_success() {
        HarvestOutcome::Sent
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        HarvestOutcome::Retry
    } else {
        HarvestOutcome::Dropped
    }
}
