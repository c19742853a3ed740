//! Errors shared by the host and the shell.

use std::path::PathBuf;

use thiserror::Error;

/// Errors reading or writing frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A payload does not fit in one receive on the other side.
    #[error("frame of {len} bytes exceeds the receiver capacity of {capacity} bytes")]
    FrameTooLarge {
        /// Payload length in bytes.
        len: usize,
        /// Receiver buffer capacity in bytes.
        capacity: usize,
    },
    /// Socket IO failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
}

/// The shell could not reach the host.
#[derive(Debug, Error)]
#[error("connection to {addr} failed: {source}")]
pub struct ConnectionError {
    /// Address that was dialed.
    pub addr: String,
    /// Underlying IO error.
    #[source]
    pub source: std::io::Error,
}

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid configuration JSON.
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}
