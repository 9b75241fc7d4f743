//! Error types for wavepipe-core
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation.
//!
//! Two classes matter to callers:
//! - `Config` / `UnknownTransport`: fatal, surfaced at device-open time.
//! - `Device`: transient I/O failure on an already-open device; feeds the
//!   automatic close+reopen retry loop and is not surfaced as a hard
//!   failure of the logical pipeline.
//!
//! Partial reads/writes are never errors — they are the normal
//! backpressure signal of the stream contract.

use thiserror::Error;

/// Main error type for wavepipe-core
#[derive(Error, Debug)]
pub enum Error {
    /// Bad device specification or unsupported format
    #[error("configuration error: {0}")]
    Config(String),

    /// Device key names a transport type with no registered factory
    #[error("unknown transport type: {0}")]
    UnknownTransport(String),

    /// I/O failure on an open device (triggers retry recovery)
    #[error("device error: {0}")]
    Device(String),
}

/// Convenience Result type using the wavepipe-core Error
pub type Result<T> = std::result::Result<T, Error>;
