// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use sip_core::StatusCode;
use smol_str::SmolStr;

use crate::{directory::DirectoryError, request_kind::RequestKind};

/// Terminal reasons the routing engine gives up on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteFailure {
    Directory(DirectoryError),
    /// Resolved server name is not a routable `sip:` URI.
    InvalidTarget { target: String, reason: &'static str },
    /// Resolved server is this node.
    Loop { target: SmolStr },
    /// No candidate satisfies the mandatory capabilities on the first attempt.
    NoSuitableServer,
    /// Attempt cap reached or candidates used up after at least one forward.
    Exhausted { attempts: usize },
    /// The request lacks the header naming its subscriber.
    MissingIdentity(&'static str),
}

impl RouteFailure {
    /// Final response sent upstream for this failure.
    pub fn status(&self, kind: RequestKind) -> StatusCode {
        match self {
            Self::Directory(DirectoryError::NotFound) => match kind {
                RequestKind::Register => StatusCode::FORBIDDEN,
                _ => StatusCode::NOT_FOUND,
            },
            Self::Directory(DirectoryError::Forbidden) => StatusCode::FORBIDDEN,
            Self::Directory(_) | Self::InvalidTarget { .. } => StatusCode::TEMPORARILY_UNAVAILABLE,
            Self::Loop { .. } => StatusCode::LOOP_DETECTED,
            Self::NoSuitableServer => StatusCode::BUSY_EVERYWHERE,
            Self::Exhausted { .. } => StatusCode::SERVER_TIMEOUT,
            Self::MissingIdentity(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<DirectoryError> for RouteFailure {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err)
    }
}

impl fmt::Display for RouteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(err) => write!(f, "{}", err),
            Self::InvalidTarget { target, reason } => {
                write!(f, "invalid S-CSCF {}: {}", target, reason)
            }
            Self::Loop { target } => write!(f, "S-CSCF {} is this node", target),
            Self::NoSuitableServer => write!(f, "no S-CSCF satisfies the mandatory capabilities"),
            Self::Exhausted { attempts } => {
                write!(f, "S-CSCF retries exhausted after {} attempts", attempts)
            }
            Self::MissingIdentity(header) => write!(f, "no subscriber identity in {}", header),
        }
    }
}

impl std::error::Error for RouteFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Directory(err) => Some(err),
            _ => None,
        }
    }
}
