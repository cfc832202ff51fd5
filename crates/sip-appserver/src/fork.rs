// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-transaction fork bookkeeping.
//!
//! Forks live in an arena owned by their transaction and are addressed by
//! [`ForkId`]; nothing outside the transaction holds a reference to them.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use smol_str::SmolStr;
use tracing::debug;

/// Index of a fork within its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ForkId(pub usize);

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fork-{}", self.0)
    }
}

/// Lifecycle of a single downstream attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkStatus {
    /// Request sent, nothing heard yet
    Pending,
    /// At least one provisional response received
    Provisional,
    /// Final response received
    FinalReceived,
    /// Final response received after a cancel was requested
    Cancelled,
    /// Transaction timeout or transport failure
    TimedOut,
}

impl ForkStatus {
    /// Pending and Provisional forks can still produce responses.
    pub fn is_live(self) -> bool {
        matches!(self, ForkStatus::Pending | ForkStatus::Provisional)
    }
}

/// Why a fork reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    Response(u16),
    Timeout,
    TransportError,
}

/// A forwarded copy of the transaction's request.
#[derive(Debug, Clone, Serialize)]
pub struct Fork {
    pub id: ForkId,
    /// Resolved next hop: the top Route of the forwarded request, else its Request-URI.
    pub target: SmolStr,
    pub status: ForkStatus,
    /// Highest-priority status code seen on this fork.
    pub best_code: Option<u16>,
    /// Set once a cancel has been issued; the status stays live until a final arrives.
    pub cancel_requested: bool,
}

impl Fork {
    fn new(id: ForkId, target: SmolStr) -> Self {
        Self {
            id,
            target,
            status: ForkStatus::Pending,
            best_code: None,
            cancel_requested: false,
        }
    }

    /// Records a provisional response. Returns `false` if the fork is already terminal.
    pub fn on_provisional(&mut self, code: u16) -> bool {
        if !self.status.is_live() {
            return false;
        }
        self.status = ForkStatus::Provisional;
        if self.best_code.map_or(true, |best| best < code) {
            self.best_code = Some(code);
        }
        true
    }

    /// Moves the fork to its terminal state. Returns `false` if it already was terminal.
    pub fn on_final(&mut self, outcome: ForkOutcome) -> bool {
        if !self.status.is_live() {
            return false;
        }
        self.status = match outcome {
            ForkOutcome::Response(code) => {
                self.best_code = Some(code);
                if self.cancel_requested {
                    ForkStatus::Cancelled
                } else {
                    ForkStatus::FinalReceived
                }
            }
            ForkOutcome::Timeout | ForkOutcome::TransportError => ForkStatus::TimedOut,
        };
        debug!(fork = %self.id, status = ?self.status, "fork terminated");
        true
    }

    /// Flags a cancel. Returns `false` if the fork is terminal or already cancelling.
    pub fn request_cancel(&mut self) -> bool {
        if !self.status.is_live() || self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        true
    }
}

/// Ordered arena of forks belonging to one transaction.
#[derive(Debug, Default, Serialize)]
pub struct ForkTable {
    forks: BTreeMap<ForkId, Fork>,
    #[serde(skip)]
    next: usize,
}

impl ForkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Pending fork and returns its id.
    pub fn allocate(&mut self, target: SmolStr) -> ForkId {
        let id = ForkId(self.next);
        self.next += 1;
        self.forks.insert(id, Fork::new(id, target));
        id
    }

    pub fn get(&self, id: ForkId) -> Option<&Fork> {
        self.forks.get(&id)
    }

    pub fn get_mut(&mut self, id: ForkId) -> Option<&mut Fork> {
        self.forks.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fork> {
        self.forks.values()
    }

    /// Ids of forks that may still produce responses, in creation order.
    pub fn live_ids(&self) -> Vec<ForkId> {
        self.forks
            .values()
            .filter(|fork| fork.status.is_live())
            .map(|fork| fork.id)
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.forks.values().all(|fork| !fork.status.is_live())
    }

    pub fn len(&self) -> usize {
        self.forks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forks.is_empty()
    }
}
