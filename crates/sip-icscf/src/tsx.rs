// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! I-CSCF routing logic plugged into the transaction adapter.

use async_trait::async_trait;
use sip_appserver::{
    cancel_or_terminate, relay_response, AppServer, AppServerTsx, ForkId, TsxHelper,
};
use sip_core::{Method, NameAddr, Request, Response, RouteHeader, StatusCode};
use tracing::{debug, info, warn};

use crate::{
    config::ConfigError,
    context::IcscfContext,
    error::RouteFailure,
    request_kind::{self, RequestKind, ORIG_PARAM},
    router::{ScscfRouter, ScscfTarget},
};

/// Application server creating an [`IcscfTsx`] per request.
pub struct IcscfAppServer {
    ctx: IcscfContext,
}

impl IcscfAppServer {
    /// Fails when the context's configuration cannot route anything.
    pub fn new(ctx: IcscfContext) -> Result<Self, ConfigError> {
        ctx.config.validate()?;
        Ok(Self { ctx })
    }
}

impl AppServer for IcscfAppServer {
    fn service_name(&self) -> &str {
        "icscf"
    }

    fn get_app_tsx(&self, request: &Request) -> Option<Box<dyn AppServerTsx>> {
        match request.method() {
            Method::Ack | Method::Cancel => None,
            _ => Some(Box::new(IcscfTsx::new(self.ctx.clone()))),
        }
    }
}

/// Routes one request to an S-CSCF, retrying on another when it fails.
pub struct IcscfTsx {
    ctx: IcscfContext,
    router: Option<ScscfRouter>,
    request: Option<Request>,
    active_fork: Option<ForkId>,
    cancelled: bool,
}

impl IcscfTsx {
    pub fn new(ctx: IcscfContext) -> Self {
        Self {
            ctx,
            router: None,
            request: None,
            active_fork: None,
            cancelled: false,
        }
    }

    fn forward_to(&mut self, helper: &mut TsxHelper, target: ScscfTarget) {
        let (Some(router), Some(request)) = (&self.router, &self.request) else {
            warn!(tsx = %helper.id(), "no routing state for S-CSCF forward");
            return self.abort(helper);
        };
        let mut request = request.clone();
        let result = match router.kind() {
            RequestKind::Register => {
                request.set_uri(target.uri.clone());
                helper.forward(request)
            }
            kind => {
                let mut uri = target.uri.clone();
                uri.set_param("lr", None);
                if kind == RequestKind::Originating {
                    uri.set_param(ORIG_PARAM, None);
                }
                helper.forward_with_routes(request, vec![RouteHeader(NameAddr::new(uri))])
            }
        };
        match result {
            Ok(fork) => {
                info!(
                    tsx = %helper.id(),
                    %fork,
                    scscf = %target.uri,
                    origin = ?target.origin,
                    "forwarded to S-CSCF"
                );
                self.active_fork = Some(fork);
            }
            Err(e) => {
                warn!(tsx = %helper.id(), error = %e, "forward to S-CSCF refused");
                self.abort(helper);
            }
        }
    }

    /// Ends routing with 500 when a forward cannot be made.
    fn abort(&mut self, helper: &mut TsxHelper) {
        if let Some(router) = self.router.as_mut() {
            router.finish();
        }
        self.active_fork = None;
        if let Err(e) = helper.reject(StatusCode::SERVER_INTERNAL_ERROR) {
            debug!(tsx = %helper.id(), error = %e, "rejection not sent");
        }
    }

    fn fail(&mut self, helper: &mut TsxHelper, kind: RequestKind, failure: RouteFailure) {
        let status = failure.status(kind);
        info!(tsx = %helper.id(), %failure, code = status.as_u16(), "rejecting request");
        if let Err(e) = helper.reject(status) {
            debug!(tsx = %helper.id(), error = %e, "rejection not sent");
        }
    }

    async fn retry(&mut self, helper: &mut TsxHelper, response: Response) {
        let Some(router) = self.router.as_mut() else {
            warn!(tsx = %helper.id(), "retry without routing state");
            return self.abort(helper);
        };
        let kind = router.kind();
        debug!(tsx = %helper.id(), code = response.code(), "retrying on another S-CSCF");
        match router.retry_target().await {
            Ok(target) => self.forward_to(helper, target),
            Err(failure) => self.fail(helper, kind, failure),
        }
    }

    fn forward_unrouted(&mut self, helper: &mut TsxHelper, request: Request) {
        match helper.forward(request) {
            Ok(fork) => self.active_fork = Some(fork),
            Err(e) => warn!(tsx = %helper.id(), error = %e, "transparent forward refused"),
        }
    }
}

#[async_trait]
impl AppServerTsx for IcscfTsx {
    async fn on_initial_request(&mut self, helper: &mut TsxHelper, request: Request) {
        let kind = RequestKind::classify(&request, helper.route_hdr());
        if kind.is_session() && !helper.route_set().is_empty() {
            debug!(tsx = %helper.id(), routes = helper.route_set().len(), "request already routed");
            self.forward_unrouted(helper, request);
            return;
        }

        let domain = self.ctx.config.identity.domain.clone();
        let subscriber = match request_kind::subscriber(kind, &request, &domain) {
            Ok(subscriber) => subscriber,
            Err(failure) => return self.fail(helper, kind, failure),
        };
        debug!(tsx = %helper.id(), ?kind, identity = subscriber.identity(), "routing to S-CSCF");

        let router = self
            .router
            .insert(ScscfRouter::new(self.ctx.clone(), kind, subscriber));
        let result = router.initial_target().await;
        self.request = Some(request);
        match result {
            Ok(target) => self.forward_to(helper, target),
            Err(failure) => self.fail(helper, kind, failure),
        }
    }

    async fn on_in_dialog_request(&mut self, helper: &mut TsxHelper, request: Request) {
        self.forward_unrouted(helper, request);
    }

    async fn on_response(&mut self, helper: &mut TsxHelper, response: Response, fork: ForkId) {
        if self.active_fork != Some(fork) {
            debug!(tsx = %helper.id(), %fork, code = response.code(), "response on inactive fork");
            return;
        }
        if !response.is_final() {
            relay_response(helper, response, fork);
            return;
        }

        self.active_fork = None;
        let retry = !self.cancelled
            && !response.is_success()
            && self
                .router
                .as_ref()
                .map_or(false, |router| router.is_retryable(response.code()));
        if retry {
            self.retry(helper, response).await;
        } else {
            if let Some(router) = self.router.as_mut() {
                router.finish();
            }
            relay_response(helper, response, fork);
        }
    }

    async fn on_cancel(
        &mut self,
        helper: &mut TsxHelper,
        status: StatusCode,
        _request: Option<Request>,
    ) {
        self.cancelled = true;
        cancel_or_terminate(helper, status);
    }
}
