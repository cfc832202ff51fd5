// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bridges one server transaction to the routing logic that handles it.
//!
//! ```text
//! upstream request ─► TransactionAdapter ─► AppServerTsx callbacks
//!                          │   ▲                  │
//!                          │   └── TsxHelper ◄────┘ forward / send_response / timers
//!                          ▼
//!                    TsxOutput (requests, cancels, responses)
//! ```
//!
//! The adapter consumes the Route entry that addressed this node, captures the
//! remaining route set, and tracks every fork it creates. Events for a
//! transaction are processed one at a time on its own task.

use std::sync::Arc;
use std::time::Duration;

use sip_core::{
    pop_top_route, routes, NameAddr, Request, Response, RouteHeader, StatusCode, RECORD_ROUTE,
};
use smol_str::SmolStr;
use tokio::{sync::mpsc, time};
use tracing::{debug, info, trace, warn};

use crate::{
    app::AppServerTsx,
    config::AdapterConfig,
    error::TsxError,
    event::{TsxEvent, TsxOutput},
    fork::{Fork, ForkId, ForkOutcome, ForkTable},
    host::TransactionId,
    route_set::RouteSet,
    timer::{TimerContext, TimerId, TimerKind, TimerService},
};

/// URI parameter carrying the dialog tag on this node's Record-Route.
pub const DIALOG_ID_PARAM: &str = "dialog_id";

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsxState {
    Init,
    /// Routing logic is deciding; no fork exists yet.
    Routing,
    /// At least one fork has been created.
    Forked,
    /// Final response sent upstream and every fork terminal.
    Terminated,
}

/// Operations the routing logic performs on its transaction.
pub struct TsxHelper {
    id: TransactionId,
    config: Arc<AdapterConfig>,
    state: TsxState,
    original: Request,
    route_hdr: Option<RouteHeader>,
    route_set: RouteSet,
    dialog_tag: Option<SmolStr>,
    record_routed: bool,
    forks: ForkTable,
    final_sent: bool,
    timers: TimerService,
    events: mpsc::UnboundedSender<TsxEvent>,
    output: mpsc::UnboundedSender<TsxOutput>,
}

impl TsxHelper {
    fn new(
        id: TransactionId,
        mut request: Request,
        in_dialog: bool,
        config: Arc<AdapterConfig>,
        events: mpsc::UnboundedSender<TsxEvent>,
        output: mpsc::UnboundedSender<TsxOutput>,
    ) -> Self {
        let addresses_us = routes(request.headers())
            .first()
            .map_or(false, |top| config.is_local(top.uri()));
        let route_hdr = if addresses_us {
            pop_top_route(request.headers_mut())
        } else {
            None
        };

        let mut route_set = RouteSet::new();
        route_set.capture(request.headers());

        let dialog_tag = if in_dialog {
            route_hdr
                .as_ref()
                .and_then(|route| route.uri_param(DIALOG_ID_PARAM).flatten())
                .map(SmolStr::new)
        } else {
            None
        };

        trace!(
            tsx = %id,
            consumed = route_hdr.is_some(),
            onward_routes = route_set.len(),
            "transaction created"
        );

        Self {
            id,
            timers: TimerService::new(events.clone()),
            config,
            state: TsxState::Init,
            original: request,
            route_hdr,
            route_set,
            dialog_tag,
            record_routed: false,
            forks: ForkTable::new(),
            final_sent: false,
            events,
            output,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TsxState {
        self.state
    }

    /// The inbound request with this node's Route entry removed.
    pub fn original_request(&self) -> &Request {
        &self.original
    }

    /// The Route entry that addressed this node, if the request carried one.
    pub fn route_hdr(&self) -> Option<&RouteHeader> {
        self.route_hdr.as_ref()
    }

    pub fn route_set(&self) -> &RouteSet {
        &self.route_set
    }

    pub fn dialog_tag(&self) -> Option<&str> {
        self.dialog_tag.as_deref()
    }

    /// Record-routes this node on every subsequent fork, tagged with `tag`.
    pub fn set_dialog_tag(&mut self, tag: impl Into<SmolStr>) {
        self.dialog_tag = Some(tag.into());
        self.record_routed = true;
    }

    pub fn final_sent(&self) -> bool {
        self.final_sent
    }

    pub fn fork(&self, id: ForkId) -> Option<&Fork> {
        self.forks.get(id)
    }

    pub fn forks(&self) -> &ForkTable {
        &self.forks
    }

    /// Response to the original request carrying its transaction headers.
    pub fn create_response(&self, code: StatusCode) -> Response {
        Response::for_request(&self.original, code)
    }

    /// Forwards `request` on a new fork, replaying the captured route set.
    pub fn forward(&mut self, request: Request) -> Result<ForkId, TsxError> {
        self.forward_with_routes(request, Vec::new())
    }

    /// Forwards `request` with the captured route set followed by `extra_routes`.
    pub fn forward_with_routes(
        &mut self,
        mut request: Request,
        extra_routes: Vec<RouteHeader>,
    ) -> Result<ForkId, TsxError> {
        self.ensure_open()?;

        self.route_set.apply(request.headers_mut(), &extra_routes);
        if self.record_routed {
            let mut uri = self.config.local_uri.clone();
            uri.set_param("lr", None);
            if let Some(tag) = &self.dialog_tag {
                uri.set_param(DIALOG_ID_PARAM, Some(tag.as_str()));
            }
            request
                .headers_mut()
                .insert_first(RECORD_ROUTE, RouteHeader(NameAddr::new(uri)).to_string());
        }

        let target = routes(request.headers())
            .first()
            .map(|route| SmolStr::new(route.uri().to_string()))
            .unwrap_or_else(|| SmolStr::new(request.uri().to_string()));
        let fork = self.forks.allocate(target.clone());
        self.state = TsxState::Forked;
        debug!(tsx = %self.id, %fork, %target, method = %request.method(), "forwarding request");

        if self
            .output
            .send(TsxOutput::Request {
                tsx: self.id,
                fork,
                request,
            })
            .is_err()
        {
            warn!(tsx = %self.id, %fork, "transport channel closed; failing fork");
            let _ = self.events.send(TsxEvent::TransportError { fork });
        }
        Ok(fork)
    }

    /// Sends a response upstream. 100 Trying is absorbed here.
    pub fn send_response(&mut self, response: Response) -> Result<(), TsxError> {
        self.ensure_open()?;
        if response.code() == 100 {
            trace!(tsx = %self.id, "absorbing 100 Trying");
            return Ok(());
        }

        let is_final = response.is_final();
        if is_final {
            self.final_sent = true;
            info!(tsx = %self.id, code = response.code(), "sending final response");
        } else {
            debug!(tsx = %self.id, code = response.code(), "sending provisional response");
        }
        if self
            .output
            .send(TsxOutput::Response {
                tsx: self.id,
                response,
            })
            .is_err()
        {
            warn!(tsx = %self.id, "transport channel closed; response dropped");
        }
        if is_final {
            self.maybe_terminate();
        }
        Ok(())
    }

    /// Rejects the request with a locally generated response.
    pub fn reject(&mut self, code: StatusCode) -> Result<(), TsxError> {
        let response = self.create_response(code);
        self.send_response(response)
    }

    /// Asks the transport to cancel a live fork. Returns whether a cancel was issued.
    pub fn cancel_fork(&mut self, fork: ForkId, reason: StatusCode) -> Result<bool, TsxError> {
        let entry = self.forks.get_mut(fork).ok_or(TsxError::UnknownFork(fork))?;
        if !entry.request_cancel() {
            return Ok(false);
        }
        debug!(tsx = %self.id, %fork, %reason, "cancelling fork");
        if self
            .output
            .send(TsxOutput::Cancel {
                tsx: self.id,
                fork,
                reason,
            })
            .is_err()
        {
            warn!(tsx = %self.id, %fork, "transport channel closed; cancel guard will end fork");
        }
        self.timers
            .schedule(TimerKind::CancelGuard(fork), self.config.cancel_guard);
        Ok(true)
    }

    /// Cancels every live fork. Returns how many cancels were issued.
    pub fn cancel_pending_forks(&mut self, reason: StatusCode) -> usize {
        self.forks
            .live_ids()
            .into_iter()
            .filter(|fork| matches!(self.cancel_fork(*fork, reason), Ok(true)))
            .count()
    }

    /// Schedules a timer that calls back into the routing logic with `context`.
    pub fn schedule_timer(&mut self, context: TimerContext, duration: Duration) -> TimerId {
        self.timers.schedule(TimerKind::App(context), duration)
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.timers.cancel(id)
    }

    pub fn timer_running(&self, id: TimerId) -> bool {
        self.timers.is_running(id)
    }

    fn ensure_open(&self) -> Result<(), TsxError> {
        if self.state == TsxState::Terminated {
            Err(TsxError::Terminated)
        } else if self.final_sent {
            Err(TsxError::FinalResponseSent)
        } else {
            Ok(())
        }
    }

    fn maybe_terminate(&mut self) {
        if self.state != TsxState::Terminated && self.final_sent && self.forks.all_terminal() {
            self.state = TsxState::Terminated;
            debug!(tsx = %self.id, forks = self.forks.len(), "transaction terminated");
        }
    }

    /// Applies a downstream response to its fork. Returns it if the logic should see it.
    fn accept_response(&mut self, fork: ForkId, response: Response) -> Option<Response> {
        if self.state == TsxState::Terminated {
            debug!(
                tsx = %self.id,
                %fork,
                code = response.code(),
                "discarding response after termination"
            );
            return None;
        }
        let Some(entry) = self.forks.get_mut(fork) else {
            warn!(tsx = %self.id, %fork, "response for unknown fork");
            return None;
        };
        let accepted = if response.is_final() {
            entry.on_final(ForkOutcome::Response(response.code()))
        } else {
            entry.on_provisional(response.code())
        };
        if !accepted {
            debug!(tsx = %self.id, %fork, code = response.code(), "late response on terminal fork");
            return None;
        }
        if response.is_final() {
            self.timers.cancel_guard(fork);
        }
        Some(response)
    }

    /// Terminates a fork without a downstream response, synthesizing one for the logic.
    fn fail_fork(&mut self, fork: ForkId, outcome: ForkOutcome) -> Option<Response> {
        if self.state == TsxState::Terminated {
            return None;
        }
        let entry = self.forks.get_mut(fork)?;
        if !entry.on_final(outcome) {
            return None;
        }
        self.timers.cancel_guard(fork);
        let code = match outcome {
            ForkOutcome::Response(code) => {
                StatusCode::new(code).unwrap_or(StatusCode::SERVER_INTERNAL_ERROR)
            }
            ForkOutcome::Timeout => StatusCode::REQUEST_TIMEOUT,
            ForkOutcome::TransportError => StatusCode::SERVICE_UNAVAILABLE,
        };
        warn!(tsx = %self.id, %fork, ?outcome, code = code.as_u16(), "fork failed");
        Some(self.create_response(code))
    }

    /// Gives up on the transaction once its lifetime runs out.
    fn abandon(&mut self) {
        if self.state == TsxState::Terminated {
            return;
        }
        self.cancel_pending_forks(StatusCode::REQUEST_TIMEOUT);
        if !self.final_sent {
            if let Err(e) = self.reject(StatusCode::REQUEST_TIMEOUT) {
                warn!(tsx = %self.id, error = %e, "timeout response not sent");
            }
        }
        self.state = TsxState::Terminated;
    }
}

/// Owns one transaction's routing logic and its helper.
pub struct TransactionAdapter {
    logic: Box<dyn AppServerTsx>,
    helper: TsxHelper,
    in_dialog: bool,
}

impl TransactionAdapter {
    pub(crate) fn new(
        id: TransactionId,
        logic: Box<dyn AppServerTsx>,
        request: Request,
        config: Arc<AdapterConfig>,
        events: mpsc::UnboundedSender<TsxEvent>,
        output: mpsc::UnboundedSender<TsxOutput>,
    ) -> Self {
        let in_dialog = request.is_in_dialog();
        Self {
            logic,
            helper: TsxHelper::new(id, request, in_dialog, config, events, output),
            in_dialog,
        }
    }

    pub fn helper(&self) -> &TsxHelper {
        &self.helper
    }

    /// Terminated with no timers left outstanding.
    pub fn is_finished(&self) -> bool {
        self.helper.state == TsxState::Terminated && self.helper.timers.is_idle()
    }

    /// Hands the request to the routing logic.
    pub async fn start(&mut self) {
        self.helper.state = TsxState::Routing;
        let request = self.helper.original.clone();
        if self.in_dialog {
            self.logic
                .on_in_dialog_request(&mut self.helper, request)
                .await;
        } else {
            self.logic
                .on_initial_request(&mut self.helper, request)
                .await;
        }
        self.helper.maybe_terminate();
    }

    /// Processes one event to completion.
    pub async fn handle(&mut self, event: TsxEvent) {
        match event {
            TsxEvent::Response { fork, response } => {
                if let Some(response) = self.helper.accept_response(fork, response) {
                    self.logic
                        .on_response(&mut self.helper, response, fork)
                        .await;
                }
            }
            TsxEvent::Timeout { fork } => self.fork_failed(fork, ForkOutcome::Timeout).await,
            TsxEvent::TransportError { fork } => {
                self.fork_failed(fork, ForkOutcome::TransportError).await
            }
            TsxEvent::Cancel { status, request } => {
                if self.helper.state == TsxState::Terminated || self.helper.final_sent {
                    debug!(tsx = %self.helper.id, "ignoring cancel after final response");
                } else {
                    info!(tsx = %self.helper.id, %status, "upstream cancel");
                    self.logic.on_cancel(&mut self.helper, status, request).await;
                }
            }
            TsxEvent::TimerFired(id) => match self.helper.timers.fire(id) {
                Some(TimerKind::App(context)) => {
                    self.logic
                        .on_timer_expiry(&mut self.helper, context)
                        .await;
                }
                Some(TimerKind::CancelGuard(fork)) => {
                    self.fork_failed(
                        fork,
                        ForkOutcome::Response(StatusCode::REQUEST_TERMINATED.as_u16()),
                    )
                    .await
                }
                None => trace!(tsx = %self.helper.id, timer = %id, "stale timer expiry"),
            },
        }
        self.helper.maybe_terminate();
    }

    async fn fork_failed(&mut self, fork: ForkId, outcome: ForkOutcome) {
        if let Some(response) = self.helper.fail_fork(fork, outcome) {
            self.logic
                .on_response(&mut self.helper, response, fork)
                .await;
        }
    }

    /// Drives the transaction until it is finished or its lifetime runs out.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<TsxEvent>) {
        self.start().await;
        let deadline = time::Instant::now() + self.helper.config.max_lifetime;
        while !self.is_finished() {
            match time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => self.handle(event).await,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        tsx = %self.helper.id,
                        state = ?self.helper.state,
                        "transaction lifetime exceeded"
                    );
                    self.helper.abandon();
                    break;
                }
            }
        }
        self.helper.timers.cancel_all();
        trace!(tsx = %self.helper.id, "transaction task exiting");
    }
}
