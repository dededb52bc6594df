// src/errors.rs

/// Errors surfaced by the aggregation core.
///
/// Only `Encoding`, `Configuration`, `MisalignedBatch` and `AllEndpointsFailed`
/// ever reach a caller of the balance service. `Transport` describes a single
/// failed attempt against one endpoint and is absorbed by the invoker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("Batch of {expected} calls was answered with {actual} results")]
    MisalignedBatch { expected: usize, actual: usize },
    #[error("All {endpoints} RPC endpoints failed ({attempts} attempts this call)")]
    AllEndpointsFailed { endpoints: usize, attempts: usize },
}

impl AggregatorError {
    pub fn transport(endpoint: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }

    /// True for failures that the invoker retries instead of surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::MisalignedBatch { .. })
    }
}

pub type AggregatorResult<T> = std::result::Result<T, AggregatorError>;
