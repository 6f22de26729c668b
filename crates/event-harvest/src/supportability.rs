// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters describing the agent's own behaviour.
//!
//! Supportability metrics are how the harvest side reports what the buffers
//! silently dropped, and how often each public API was called. They are
//! harvested like any other stream, on [`FeatureName::Metrics`].

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::features::FeatureName;

#[must_use]
pub fn events_dropped(feature: FeatureName) -> String {
    format!("Generic/Events/Dropped/{feature}")
}

#[must_use]
pub fn retry_dropped(feature: FeatureName) -> String {
    format!("Generic/Harvest/Retry/Dropped/{feature}")
}

#[must_use]
pub fn log_api_called(level: &str) -> String {
    format!("API/logging/{}/called", level.to_lowercase())
}

pub const PAGE_ACTION_API_CALLED: &str = "API/addPageAction/called";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportabilityMetrics {
    counters: BTreeMap<String, u64>,
}

impl SupportabilityMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: impl Into<String>) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&mut self, name: impl Into<String>, count: u64) {
        let counter = self.counters.entry(name.into()).or_insert(0);
        *counter = counter.saturating_add(count);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drains every counter into `{"name": .., "count": ..}` records.
    pub fn take(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.counters)
            .into_iter()
            .map(|(name, count)| json!({ "name": name, "count": count }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment() {
        let mut metrics = SupportabilityMetrics::new();
        metrics.increment(events_dropped(FeatureName::Logging));
        metrics.increment(events_dropped(FeatureName::Logging));
        metrics.increment_by(PAGE_ACTION_API_CALLED, 5);

        assert_eq!(metrics.get("Generic/Events/Dropped/logging"), 2);
        assert_eq!(metrics.get(PAGE_ACTION_API_CALLED), 5);
        assert_eq!(metrics.get("missing"), 0);
    }

    #[test]
    fn test_increment_saturates() {
        let mut metrics = SupportabilityMetrics::new();
        metrics.increment_by("x", u64::MAX);
        metrics.increment("x");
        assert_eq!(metrics.get("x"), u64::MAX);
    }

    #[test]
    fn test_take_drains_sorted_records() {
        let mut metrics = SupportabilityMetrics::new();
        metrics.increment(log_api_called("WARN"));
        metrics.increment(retry_dropped(FeatureName::JsErrors));

        let records = metrics.take();

        assert_eq!(
            records,
            vec![
                json!({"name": "API/logging/warn/called", "count": 1}),
                json!({"name": "Generic/Harvest/Retry/Dropped/jserrors", "count": 1}),
            ]
        );
        assert!(metrics.is_empty());
    }
}
