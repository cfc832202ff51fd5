// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use async_trait::async_trait;
use sip_core::{Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::{adapter::TsxHelper, fork::ForkId, timer::TimerContext};

/// Routing logic attached to a single transaction.
///
/// Every callback runs to completion before the next event for the same
/// transaction is delivered. The default bodies forward transparently.
#[async_trait]
pub trait AppServerTsx: Send {
    /// First request of the transaction, outside any dialog.
    async fn on_initial_request(&mut self, helper: &mut TsxHelper, request: Request) {
        forward_transparently(helper, request);
    }

    /// Request within an established dialog (its To header carries a tag).
    async fn on_in_dialog_request(&mut self, helper: &mut TsxHelper, request: Request) {
        forward_transparently(helper, request);
    }

    /// Response on one of this transaction's forks, real or synthesized.
    async fn on_response(&mut self, helper: &mut TsxHelper, response: Response, fork: ForkId) {
        relay_response(helper, response, fork);
    }

    /// Upstream cancel before a final response went out.
    async fn on_cancel(
        &mut self,
        helper: &mut TsxHelper,
        status: StatusCode,
        _request: Option<Request>,
    ) {
        cancel_or_terminate(helper, status);
    }

    async fn on_timer_expiry(&mut self, _helper: &mut TsxHelper, _context: TimerContext) {}
}

/// Factory that decides which routing logic handles a request.
pub trait AppServer: Send + Sync + 'static {
    fn service_name(&self) -> &str;

    /// Returns `None` to have the request forwarded transparently.
    fn get_app_tsx(&self, request: &Request) -> Option<Box<dyn AppServerTsx>>;
}

/// Routing logic that forwards unchanged and relays what comes back.
#[derive(Debug, Default)]
pub struct TransparentTsx;

#[async_trait]
impl AppServerTsx for TransparentTsx {}

/// Forwards the request along its captured route set.
pub fn forward_transparently(helper: &mut TsxHelper, request: Request) {
    if let Err(e) = helper.forward(request) {
        warn!(tsx = %helper.id(), error = %e, "transparent forward refused");
    }
}

/// Relays a fork's response upstream, dropping what the transaction refuses.
pub fn relay_response(helper: &mut TsxHelper, response: Response, fork: ForkId) {
    let code = response.code();
    if let Err(e) = helper.send_response(response) {
        debug!(tsx = %helper.id(), %fork, code, error = %e, "response not relayed");
    }
}

/// Cancels live forks, or answers 487 directly when nothing was forked.
pub fn cancel_or_terminate(helper: &mut TsxHelper, status: StatusCode) {
    if helper.forks().live_ids().is_empty() {
        if let Err(e) = helper.reject(StatusCode::REQUEST_TERMINATED) {
            debug!(tsx = %helper.id(), error = %e, "cancel arrived too late");
        }
    } else {
        helper.cancel_pending_forks(status);
    }
}
