// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Feature streams that own an event buffer.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A logical event stream, one per instrumentation feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureName {
    /// Page actions and other custom events.
    GenericEvents,
    JsErrors,
    Logging,
    /// Supportability metrics about the agent itself.
    Metrics,
}

impl FeatureName {
    pub const ALL: [FeatureName; 4] = [
        FeatureName::GenericEvents,
        FeatureName::JsErrors,
        FeatureName::Logging,
        FeatureName::Metrics,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureName::GenericEvents => "generic_events",
            FeatureName::JsErrors => "jserrors",
            FeatureName::Logging => "logging",
            FeatureName::Metrics => "metrics",
        }
    }

    /// Path segment of the collector endpoint that accepts this stream.
    #[must_use]
    pub fn endpoint(self) -> &'static str {
        match self {
            FeatureName::GenericEvents => "ins",
            FeatureName::JsErrors | FeatureName::Metrics => "jserrors",
            FeatureName::Logging => "browser/logs",
        }
    }

    /// Key the records are nested under in the request body.
    #[must_use]
    pub fn payload_key(self) -> &'static str {
        match self {
            FeatureName::GenericEvents => "ins",
            FeatureName::JsErrors => "err",
            FeatureName::Logging => "logs",
            FeatureName::Metrics => "sm",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureName {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic_events" | "ins" | "page_action" => Ok(FeatureName::GenericEvents),
            "jserrors" | "err" | "errors" => Ok(FeatureName::JsErrors),
            "logging" | "logs" | "log" => Ok(FeatureName::Logging),
            "metrics" | "sm" => Ok(FeatureName::Metrics),
            _ => Err(UnknownFeature(s.to_string())),
        }
    }
}

impl Serialize for FeatureName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FeatureName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
