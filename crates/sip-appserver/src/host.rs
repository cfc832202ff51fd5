// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use sip_core::{pop_top_route, routes, Method, Request, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    adapter::TransactionAdapter,
    app::{AppServer, TransparentTsx},
    config::AdapterConfig,
    event::{TsxEvent, TsxOutput},
    fork::ForkId,
};

/// Identifier the host assigns to each server transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tsx-{}", self.0)
    }
}

/// Runs one [`TransactionAdapter`] task per inbound request.
///
/// The transport collaborator feeds requests in with [`AppServerHost::handle_request`],
/// delivers downstream events with [`AppServerHost::deliver`], and drains the
/// [`TsxOutput`] receiver returned by [`AppServerHost::new`].
pub struct AppServerHost {
    app: Arc<dyn AppServer>,
    config: Arc<AdapterConfig>,
    transactions: Arc<DashMap<TransactionId, mpsc::UnboundedSender<TsxEvent>>>,
    next_id: AtomicU64,
    output: mpsc::UnboundedSender<TsxOutput>,
}

impl AppServerHost {
    pub fn new(
        app: Arc<dyn AppServer>,
        config: AdapterConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TsxOutput>) {
        let (output, output_rx) = mpsc::unbounded_channel();
        let host = Self {
            app,
            config: Arc::new(config),
            transactions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            output,
        };
        (host, output_rx)
    }

    fn allocate_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Starts a transaction for `request`.
    ///
    /// Returns `None` when the request needs no transaction: an out-of-dialog
    /// ACK is dropped, an in-dialog ACK is relayed statelessly.
    pub fn handle_request(&self, request: Request) -> Result<Option<TransactionId>> {
        match request.method() {
            Method::Ack => {
                if request.is_in_dialog() {
                    self.relay_ack(request)?;
                } else {
                    debug!(call_id = ?request.call_id(), "dropping out-of-dialog ACK");
                }
                return Ok(None);
            }
            Method::Cancel => {
                return Err(anyhow!(
                    "CANCEL must be delivered to the transaction it cancels"
                ));
            }
            _ => {}
        }

        let id = self.allocate_id();
        let logic = self
            .app
            .get_app_tsx(&request)
            .unwrap_or_else(|| Box::new(TransparentTsx));
        info!(
            tsx = %id,
            service = self.app.service_name(),
            method = %request.method(),
            uri = %request.uri(),
            "new transaction"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let adapter = TransactionAdapter::new(
            id,
            logic,
            request,
            self.config.clone(),
            events_tx.clone(),
            self.output.clone(),
        );
        self.transactions.insert(id, events_tx);

        let transactions = self.transactions.clone();
        tokio::spawn(async move {
            adapter.run(events_rx).await;
            transactions.remove(&id);
        });
        Ok(Some(id))
    }

    /// Delivers a downstream event to a running transaction.
    pub fn deliver(&self, tsx: TransactionId, event: TsxEvent) -> Result<()> {
        let sender = self
            .transactions
            .get(&tsx)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow!("no active transaction {}", tsx))?;
        sender
            .send(event)
            .map_err(|_| anyhow!("transaction {} has finished", tsx))
    }

    /// Delivers an upstream cancel.
    pub fn cancel(
        &self,
        tsx: TransactionId,
        status: StatusCode,
        request: Option<Request>,
    ) -> Result<()> {
        self.deliver(tsx, TsxEvent::Cancel { status, request })
    }

    /// Number of transactions whose tasks are still running.
    pub fn active_transactions(&self) -> usize {
        self.transactions.len()
    }

    fn relay_ack(&self, mut request: Request) -> Result<()> {
        let addresses_us = routes(request.headers())
            .first()
            .map_or(false, |top| self.config.is_local(top.uri()));
        if addresses_us {
            pop_top_route(request.headers_mut());
        }
        let tsx = self.allocate_id();
        debug!(%tsx, "relaying in-dialog ACK");
        self.output
            .send(TsxOutput::Request {
                tsx,
                fork: ForkId(0),
                request,
            })
            .map_err(|_| anyhow!("transport channel closed"))
    }
}
