// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log events recorded through the public logging API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::generic_events::now_ms;

/// Level attached to an API log event.
///
/// The wire form is upper case; parsing ignores case and surrounding
/// whitespace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid log level: {0}")]
pub struct InvalidLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = InvalidLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == upper)
            .ok_or_else(|| InvalidLogLevel(s.to_string()))
    }
}

/// Whether `level` names a known log level.
#[must_use]
pub fn is_valid_log_level(level: &str) -> bool {
    level.parse::<LogLevel>().is_ok()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogEvent {
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub message: String,
    pub attributes: Map<String, Value>,
    pub level: LogLevel,
}

impl LogEvent {
    #[must_use]
    pub fn new(message: impl Into<String>, attributes: Map<String, Value>, level: LogLevel) -> Self {
        LogEvent {
            timestamp: now_ms(),
            message: message.into(),
            attributes,
            level,
        }
    }
}
