// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Error types for CallRelay core operations.
//!
//! Authorization and storage failures are kept as separate types because callers treat them
//! very differently: an [`AuthFailure`] always collapses into one generic rejection, while a
//! [`StorageFailure`] aborts only the downstream effects of a single call.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Undifferentiated authorization failure.
///
/// Deliberately carries no detail; the specific [`AuthRejection`] is only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid API key or System ID")]
pub struct AuthFailure;

/// Internal reason an authorization attempt was rejected. Logged, never returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    UnknownSystem,
    Disabled,
    KeyMismatch,
    KindMismatch,
}

impl fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnknownSystem => "unknown system id",
            Self::Disabled => "system disabled",
            Self::KeyMismatch => "api key mismatch",
            Self::KindMismatch => "transport type mismatch",
        })
    }
}

/// Failure to persist a call's audio artifact.
#[derive(Debug, Error)]
pub enum StorageFailure {
    #[error("failed to create artifact directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing an in-memory payload (or an upload) to the staging area failed.
    #[error("failed to stage artifact payload at {}: {source}", path.display())]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to place artifact at {}: {source}", path.display())]
    Place {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no free artifact name for {} after {attempts} attempts", path.display())]
    Exhausted { path: PathBuf, attempts: u32 },
}

/// Errors raised while building core services from configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - Two systems sharing one id
    /// - A peer-link system without an address or port
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Convenience type alias for Results using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
