//! Error types and result aliases for the smolagents library.
//!
//! This module defines the core error type [`AgentError`] and the [`Result`] type alias
//! used throughout the library. All public APIs that can fail return `Result<T>` for
//! consistent error handling.
//!
//! [`AgentError::is_retryable`] is the default classification used by the
//! resilience layer to decide whether a failed model call is worth another attempt.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model gateway error: {0}")]
    GatewayError(String),

    #[error("API error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    ApiError {
        status: Option<u16>,
        message: String,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Could not parse action: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Circuit open for service '{service}'")]
    CircuitOpen { service: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: usize,
        last: Box<AgentError>,
    },

    #[error("All models failed: {}", format_failures(.failures))]
    FallbackExhausted { failures: Vec<(String, String)> },

    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("Request queue closed")]
    QueueClosed,
}

fn format_failures(failures: &[(String, String)]) -> String {
    if failures.is_empty() {
        return "no models configured".to_string();
    }
    failures
        .iter()
        .map(|(model, error)| format!("{}: {}", model, error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AgentError {
    /// Whether a model call that failed with this error is worth retrying.
    ///
    /// Transport failures, timeouts, rate limiting and server-side HTTP statuses
    /// (408, 429, 5xx) are transient. Authentication, validation, parse and tool
    /// failures are not, and neither is an open circuit.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::HttpError(e) => {
                if let Some(status) = e.status() {
                    is_retryable_status(status.as_u16())
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request()
                }
            }
            AgentError::ApiError { status, .. } => match status {
                Some(code) => is_retryable_status(*code),
                None => false,
            },
            AgentError::GatewayError(_)
            | AgentError::TimeoutError(_)
            | AgentError::RateLimited(_) => true,
            AgentError::RetriesExhausted { last, .. } => last.is_retryable(),
            _ => false,
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_display() {
        let err = AgentError::GatewayError("connection failed".to_string());
        assert_eq!(err.to_string(), "Model gateway error: connection failed");
    }

    #[test]
    fn test_api_error_display_with_status() {
        let err = AgentError::ApiError {
            status: Some(429),
            message: "rate limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "API error (429): rate limit exceeded");
    }

    #[test]
    fn test_api_error_display_without_status() {
        let err = AgentError::ApiError {
            status: None,
            message: "bad payload".to_string(),
        };
        assert_eq!(err.to_string(), "API error: bad payload");
    }

    #[test]
    fn test_circuit_open_display() {
        let err = AgentError::CircuitOpen {
            service: "openai".to_string(),
        };
        assert_eq!(err.to_string(), "Circuit open for service 'openai'");
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = AgentError::RetriesExhausted {
            attempts: 3,
            last: Box::new(AgentError::TimeoutError("slow".to_string())),
        };
        assert_eq!(err.to_string(), "Retries exhausted after 3 attempt(s): Timeout error: slow");
    }

    #[test]
    fn test_fallback_exhausted_display() {
        let err = AgentError::FallbackExhausted {
            failures: vec![
                ("primary".to_string(), "boom".to_string()),
                ("backup".to_string(), "down".to_string()),
            ],
        };
        assert_eq!(err.to_string(), "All models failed: primary: boom; backup: down");

        let empty = AgentError::FallbackExhausted { failures: vec![] };
        assert_eq!(empty.to_string(), "All models failed: no models configured");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::TimeoutError("t".into()).is_retryable());
        assert!(AgentError::RateLimited("r".into()).is_retryable());
        assert!(AgentError::GatewayError("g".into()).is_retryable());
        assert!(AgentError::ApiError {
            status: Some(503),
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(AgentError::ApiError {
            status: Some(429),
            message: "slow down".into()
        }
        .is_retryable());

        assert!(!AgentError::ApiError {
            status: Some(401),
            message: "unauthorized".into()
        }
        .is_retryable());
        assert!(!AgentError::ToolError("x".into()).is_retryable());
        assert!(!AgentError::ParseError("x".into()).is_retryable());
        assert!(!AgentError::CircuitOpen {
            service: "svc".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: AgentError = json_err.into();

        match err {
            AgentError::SerializationError(_) => {}
            _ => panic!("Expected SerializationError"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AgentError = io_err.into();

        match err {
            AgentError::IoError(_) => {}
            _ => panic!("Expected IoError"),
        }
    }
}
