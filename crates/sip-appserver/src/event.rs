// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use sip_core::{Request, Response, StatusCode};

use crate::{fork::ForkId, host::TransactionId, timer::TimerId};

/// Input delivered to a running transaction.
///
/// Events for one transaction are handled strictly one at a time.
#[derive(Debug)]
pub enum TsxEvent {
    /// Response received on a fork.
    Response { fork: ForkId, response: Response },
    /// The client transaction for a fork timed out.
    Timeout { fork: ForkId },
    /// The transport failed to deliver a fork.
    TransportError { fork: ForkId },
    /// The upstream side cancelled the request.
    Cancel {
        status: StatusCode,
        request: Option<Request>,
    },
    /// A timer scheduled by this transaction expired.
    TimerFired(TimerId),
}

/// Output produced by a transaction for the transport collaborator.
#[derive(Debug)]
pub enum TsxOutput {
    /// Send a new client transaction downstream.
    Request {
        tsx: TransactionId,
        fork: ForkId,
        request: Request,
    },
    /// Cancel the client transaction behind a fork.
    Cancel {
        tsx: TransactionId,
        fork: ForkId,
        reason: StatusCode,
    },
    /// Send a response upstream on the server transaction.
    Response {
        tsx: TransactionId,
        response: Response,
    },
}

impl TsxOutput {
    pub fn transaction(&self) -> TransactionId {
        match self {
            TsxOutput::Request { tsx, .. }
            | TsxOutput::Cancel { tsx, .. }
            | TsxOutput::Response { tsx, .. } => *tsx,
        }
    }
}
