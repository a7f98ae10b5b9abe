// src/error.rs

//! Error kinds that callers are expected to match on.
//!
//! Plumbing failures (sockets, driver calls, library loading) travel as
//! `anyhow::Error` with context attached at each step. The enums below cover
//! the few conditions that are part of the compositor's contract: a setter
//! refusing an out-of-range value, a lookup that names no client, a transfer
//! request that cannot be honoured.

use log::warn;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Failures reported by client-facing operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// A derived transform component left its valid range. The previous
    /// value is retained.
    OutOfRange { what: &'static str, value: f32 },
    /// No client with this name is registered.
    UnknownClient(String),
    /// The client exists but its buffer has no imported image yet.
    NotReady(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::OutOfRange { what, value } => {
                write!(f, "{} out of range: {}", what, value)
            }
            ClientError::UnknownClient(name) => write!(f, "unknown client '{}'", name),
            ClientError::NotReady(name) => write!(f, "client '{}' has no imported image", name),
        }
    }
}

impl std::error::Error for ClientError {}

/// Failures of a single transfer-channel exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The channel failed to start earlier and stays off for this process.
    Disabled,
    /// The requested name matched no registered client; nothing was sent.
    UnknownClient(String),
    /// The peer sent something that is not a client name.
    Protocol(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Disabled => write!(f, "transfer channel is disabled"),
            TransferError::UnknownClient(name) => {
                write!(f, "no client named '{}' to transfer", name)
            }
            TransferError::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for TransferError {}

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("{} lock was poisoned; recovering state", what);
            poisoned.into_inner()
        }
    }
}
