//! Error types for eimrun.

use std::path::PathBuf;

use thiserror::Error;

use crate::runner::protocol::SensorType;

#[derive(Error, Debug)]
pub enum EimrunError {
    // Model process startup and transport
    #[error("model process never created socket {socket}")]
    StartupTimeout { socket: PathBuf },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("no response from model within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("model error: {message}")]
    Model { message: String },

    #[error("runner is not ready for requests")]
    NotReady,

    // Pipelines
    #[error("model sensor is {actual}, expected {expected}")]
    SensorMismatch {
        expected: SensorType,
        actual: SensorType,
    },

    #[error("capture read failed: {message}")]
    Read { message: String },

    // Capture backends
    #[error("{tool} not found, install with: {hint}")]
    ToolNotFound { tool: String, hint: String },

    // Validation (filters, payloads, intervals)
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    // Ingestion
    #[error("http response error, code {code}: {status}")]
    Http { code: u16, status: String },

    // Configuration
    #[error("configuration error: {message}")]
    Config { message: String },

    // General I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, EimrunError>;
