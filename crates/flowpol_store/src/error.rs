use std::time::Duration;

use flowpol_compile::CompileError;
use thiserror::Error;

use crate::transport::DeviceId;

/// Failure reported by a southbound [Transport](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device rejected the update: {0}")]
    Rejected(String),
    #[error("transport does not support `{0}`")]
    Unsupported(&'static str),
    #[error("device disconnected")]
    Disconnected,
}

/// Why a device did not take a table. The device keeps forwarding with its last confirmed
/// table, and the caller may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("transport call timed out after {0:?}")]
    Timeout(Duration),
    #[error("update cancelled")]
    Cancelled,
    #[error("generation {generation} is not newer than confirmed generation {confirmed}")]
    Stale { generation: u64, confirmed: u64 },
    #[error("unknown device `{0}`")]
    UnknownDevice(DeviceId),
    #[error("make-before-break needs {needed} priority levels, the device has {levels}")]
    PriorityExhausted { needed: u64, levels: u32 },
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// Another device of the same transaction could not be compiled.
    #[error("transaction aborted")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("cannot read `{path}`: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for `{0}`")]
    Invalid(&'static str),
}
