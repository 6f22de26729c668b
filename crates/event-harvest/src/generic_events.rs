// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Page action events.
//!
//! A page action is a named custom event recorded through the public API.
//! Its attributes come from three places, applied lowest precedence first:
//!
//! 1. global custom attributes set on the agent
//! 2. attributes passed with the action itself
//! 3. attributes owned by the agent (`eventType`, `actionName`, timing and
//!    page geometry), which custom attributes can never overwrite
//!
//! Nested objects and arrays are flattened to their JSON string form, since
//! the collector only stores scalar attribute values.

use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

pub const PAGE_ACTION_EVENT_TYPE: &str = "PageAction";

/// Page-level facts captured when the action is recorded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageContext {
    pub page_url: String,
    pub current_url: String,
    pub referrer_url: Option<String>,
    pub browser_width: Option<u32>,
    pub browser_height: Option<u32>,
    /// Epoch milliseconds of the page load. Zero means unknown.
    pub loaded_at: u64,
}

impl PageContext {
    /// Context for a page still at the URL it was loaded from.
    #[must_use]
    pub fn for_url(url: impl Into<String>) -> Self {
        let url = url.into();
        PageContext {
            current_url: url.clone(),
            page_url: url,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PageAction {
    name: String,
    attributes: Map<String, Value>,
    /// Epoch milliseconds.
    timestamp: u64,
}

impl PageAction {
    /// Starts a page action; blank names are rejected.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return None;
        }
        Some(PageAction {
            name,
            attributes: Map::new(),
            timestamp: now_ms(),
        })
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds the event record.
    #[must_use]
    pub fn into_event(self, global_attributes: &Map<String, Value>, page: &PageContext) -> Value {
        let mut event = Map::new();

        if let Some(referrer) = &page.referrer_url {
            event.insert("referrerUrl".to_string(), Value::from(referrer.as_str()));
        }
        for (key, value) in global_attributes {
            event.insert(key.clone(), flatten(value.clone()));
        }
        for (key, value) in self.attributes {
            event.insert(key, flatten(value));
        }

        #[allow(clippy::cast_precision_loss)]
        let time_since_load = self.timestamp.saturating_sub(page.loaded_at) as f64 / 1000.0;
        event.insert(
            "eventType".to_string(),
            Value::from(PAGE_ACTION_EVENT_TYPE),
        );
        event.insert("actionName".to_string(), Value::from(self.name));
        event.insert("timestamp".to_string(), Value::from(self.timestamp));
        event.insert("timeSinceLoad".to_string(), Value::from(time_since_load));
        event.insert(
            "currentUrl".to_string(),
            Value::from(page.current_url.as_str()),
        );
        event.insert("pageUrl".to_string(), Value::from(page.page_url.as_str()));
        match page.browser_width {
            Some(width) => event.insert("browserWidth".to_string(), Value::from(width)),
            None => event.remove("browserWidth"),
        };
        match page.browser_height {
            Some(height) => event.insert("browserHeight".to_string(), Value::from(height)),
            None => event.remove("browserHeight"),
        };

        Value::Object(event)
    }
}

fn flatten(value: Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
        scalar => scalar,
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
