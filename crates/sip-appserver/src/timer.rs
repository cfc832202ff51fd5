// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot},
    time,
};
use tracing::trace;

use crate::{event::TsxEvent, fork::ForkId};

/// Opaque value handed back to the routing logic when its timer pops.
pub type TimerContext = u64;

/// Handle for a scheduled timer, unique within its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Scheduled by the routing logic.
    App(TimerContext),
    /// Bounds how long a cancelled fork may stay live.
    CancelGuard(ForkId),
}

/// Timers owned by one transaction.
///
/// Each timer is a spawned task racing a sleep against a cancel signal; on
/// expiry it posts [`TsxEvent::TimerFired`] back to the owning transaction.
pub(crate) struct TimerService {
    next: u64,
    running: HashMap<TimerId, (TimerKind, oneshot::Sender<()>)>,
    events: mpsc::UnboundedSender<TsxEvent>,
}

impl TimerService {
    pub(crate) fn new(events: mpsc::UnboundedSender<TsxEvent>) -> Self {
        Self {
            next: 0,
            running: HashMap::new(),
            events,
        }
    }

    pub(crate) fn schedule(&mut self, kind: TimerKind, duration: Duration) -> TimerId {
        let id = TimerId(self.next);
        self.next += 1;

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        self.running.insert(id, (kind, cancel_tx));

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(duration) => {
                    let _ = events.send(TsxEvent::TimerFired(id));
                }
                _ = &mut cancel_rx => {}
            }
        });
        trace!(timer = %id, ?kind, ?duration, "timer scheduled");
        id
    }

    /// Stops a running timer. Returns `false` if it already fired or was cancelled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.running.remove(&id) {
            Some((_, cancel_tx)) => {
                let _ = cancel_tx.send(());
                true
            }
            None => false,
        }
    }

    /// Claims an expired timer. Returns `None` when it was cancelled after
    /// the expiry was already queued.
    pub(crate) fn fire(&mut self, id: TimerId) -> Option<TimerKind> {
        self.running.remove(&id).map(|(kind, _)| kind)
    }

    pub(crate) fn is_running(&self, id: TimerId) -> bool {
        self.running.contains_key(&id)
    }

    /// Cancels the guard timer attached to `fork`, if any.
    pub(crate) fn cancel_guard(&mut self, fork: ForkId) {
        let guards: Vec<TimerId> = self
            .running
            .iter()
            .filter(|(_, (kind, _))| *kind == TimerKind::CancelGuard(fork))
            .map(|(id, _)| *id)
            .collect();
        for id in guards {
            self.cancel(id);
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, (_, cancel_tx)) in self.running.drain() {
            let _ = cancel_tx.send(());
        }
    }
}
