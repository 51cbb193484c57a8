// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crate-wide error taxonomy.
//!
//! Mirrors the shape used across the request/response surfaces in this
//! workspace: a small set of named variants plus a catch-all carrying a
//! human-readable message, with a `Display` impl and real `std::error::Error`
//! support so callers can bubble these through `anyhow`/`?` freely.

use std::fmt;

/// Errors surfaced by the attach manager, script engine, and service layers.
///
/// The port-probe's internal `AddressInUse` signal is deliberately not a
/// variant here — a `pub` enum can't restrict one variant's visibility, and
/// that state never needs to leave `attach_manager`'s probe loop. It is
/// modeled there as a private helper type instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No entry/script/session matches the given id.
    NotFound,
    /// An operation exceeded its deadline and was cancelled.
    TimedOut,
    /// Any other failure, with a human-readable message.
    Failed(String),
}

impl Error {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::TimedOut => "TIMED_OUT",
            Self::Failed(_) => "FAILED",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
