//! Error types for command and telemetry processing.
//!
//! One taxonomy covers the whole pipeline, and the retry loops in
//! [`CommandClient`](crate::CommandClient) lean on it:
//!
//! - **Codec**: malformed bytes; fatal to the decode call, never retried.
//! - **ResponseParse**: malformed command-response text; fatal to that
//!   batch attempt, retried with a fresh send.
//! - **Timeout**: no correlated response within the deadline; aborts retry
//!   loops immediately.
//! - **ResponseMismatch**: response ids entirely disjoint from the request;
//!   fatal. (Partial overlap is logged, not raised.)
//! - **Transport**: any other channel failure; retried up to the configured
//!   attempt count.

use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias for tracklink operations.
pub type Result<T, E = TrackError> = std::result::Result<T, E>;

/// Main error type for command and telemetry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TrackError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("malformed response field {field:?}: {details}")]
    ResponseParse { field: String, details: String },

    #[error("no response from {device} within {timeout:?}")]
    Timeout { device: String, timeout: Duration },

    #[error("response parameters {received:?} do not overlap requested {requested:?}")]
    ResponseMismatch { requested: Vec<u16>, received: Vec<u16> },

    #[error("a command is already in flight for {device}")]
    CommandInFlight { device: String },

    #[error("device id {device} is missing the {required} this transport correlates on")]
    MissingDeviceId { device: String, required: &'static str },

    #[error("parameter id {id} is not in the catalog")]
    UnknownParameter { id: u16 },

    #[error("invalid value for parameter {name:?}: {details}")]
    InvalidValue { name: String, details: String },

    #[error("transport failure: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TrackError {
    /// Helper constructor for transport failures without a source error.
    pub fn transport(context: impl Into<String>) -> Self {
        TrackError::Transport { context: context.into(), source: None }
    }

    /// Helper constructor for transport failures wrapping an underlying error.
    pub fn transport_with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        TrackError::Transport { context: context.into(), source: Some(Box::new(source)) }
    }

    /// Helper constructor for response-parse failures, naming the offending
    /// field.
    pub fn response_parse(field: impl Into<String>, details: impl Into<String>) -> Self {
        TrackError::ResponseParse { field: field.into(), details: details.into() }
    }

    /// Whether a retry loop may re-issue the failed operation.
    ///
    /// Timeouts are hard deadlines and abort retry loops immediately;
    /// reconciliation failures mean the response belongs to something else
    /// entirely, so resending the same request cannot help. Parse and
    /// transport failures may be transient corruption and are worth a fresh
    /// attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackError::Codec(_) => true,
            TrackError::ResponseParse { .. } => true,
            TrackError::Transport { .. } => true,
            TrackError::Timeout { .. } => false,
            TrackError::ResponseMismatch { .. } => false,
            TrackError::CommandInFlight { .. } => false,
            TrackError::MissingDeviceId { .. } => false,
            TrackError::UnknownParameter { .. } => false,
            TrackError::InvalidValue { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TrackError::Timeout { .. })
    }
}
