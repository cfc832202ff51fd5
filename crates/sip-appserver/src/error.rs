// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use crate::fork::ForkId;

/// Misuse of a transaction by its routing logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsxError {
    /// The transaction has terminated; nothing more may be sent.
    Terminated,
    /// A final response already went upstream.
    FinalResponseSent,
    /// No fork with this id exists in the transaction.
    UnknownFork(ForkId),
}

impl fmt::Display for TsxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated => write!(f, "transaction already terminated"),
            Self::FinalResponseSent => write!(f, "final response already sent upstream"),
            Self::UnknownFork(fork) => write!(f, "unknown fork {}", fork),
        }
    }
}

impl std::error::Error for TsxError {}
