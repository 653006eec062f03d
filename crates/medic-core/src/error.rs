//! Unified error types for Medic

use thiserror::Error;

/// Unified error type for all Medic operations
#[derive(Error, Debug)]
pub enum MedicError {
    // Supervisor errors
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Workload spawn failed: {0}")]
    Spawn(String),

    // Patch errors
    #[error("Patch error: {0}")]
    Patch(String),

    #[error("Unsafe patch target: {0}")]
    UnsafeTarget(String),

    #[error("Malformed diff: {0}")]
    MalformedDiff(String),

    // Fix provider errors
    #[error("Fix provider error: {0}")]
    Provider(String),

    #[error("Fix provider rate limited: {0}")]
    ProviderLimit(String),

    #[error("Unparseable provider response: {0}")]
    ProviderResponse(String),

    // State errors
    #[error("State error: {0}")]
    State(String),

    #[error("Lock held by live process {0}")]
    LockHeld(u32),

    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using MedicError
pub type Result<T> = std::result::Result<T, MedicError>;
