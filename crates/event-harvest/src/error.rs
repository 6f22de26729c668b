// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised when the aggregator service cannot be reached
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to send command to aggregator service: {0}")]
    Send(String),

    #[error("Failed to receive response from aggregator service: {0}")]
    Receive(String),
}

/// Errors raised while preparing a harvest request
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::Invalid("harvest interval must be greater than 0".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: harvest interval must be greater than 0"
        );

        let error = ServiceError::Send("channel closed".to_string());
        assert_eq!(
            error.to_string(),
            "Failed to send command to aggregator service: channel closed"
        );
    }

    #[test]
    fn test_transport_error_from_serde() {
        let serde_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = TransportError::from(serde_error);
        assert!(error.to_string().starts_with("Failed to serialize payload"));
    }
}
