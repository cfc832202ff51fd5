// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! S-CSCF routing engine.
//!
//! One [`ScscfRouter`] serves one transaction:
//!
//! ```text
//! NamedLookup ──name──► WaitResult ──retryable──► CapabilityLookup ──candidate──► WaitResult
//!      │                                               ▲        │
//!      └──────────────capabilities─────────────────────┘        └──none / cap──► Done
//! ```
//!
//! A server that has been tried is never selected again by the same router.
//! A name returned by the capabilities query is only checked for loops.

use std::collections::BTreeSet;

use sip_core::{SipUri, Uri};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::{
    context::IcscfContext,
    directory::{DirectoryAnswer, DirectoryQuery, QueryClass, Subscriber},
    error::RouteFailure,
    pool::server_key,
    request_kind::RequestKind,
    selector::{select, CapabilityRequirement},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterPhase {
    NamedLookup,
    WaitResult,
    CapabilityLookup,
    Done,
}

/// Where a target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOrigin {
    Named,
    Capabilities,
}

/// S-CSCF chosen for the next forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScscfTarget {
    pub uri: SipUri,
    pub key: SmolStr,
    pub origin: TargetOrigin,
}

/// Per-transaction retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    tried: Vec<SmolStr>,
    requirement: Option<CapabilityRequirement>,
    named_attempted: bool,
}

impl RetryState {
    /// Servers forwarded to, in order.
    pub fn tried(&self) -> &[SmolStr] {
        &self.tried
    }

    pub fn attempts(&self) -> usize {
        self.tried.len()
    }

    pub fn requirement(&self) -> Option<&CapabilityRequirement> {
        self.requirement.as_ref()
    }

    /// Whether the directory-assigned server has been forwarded to.
    pub fn named_attempted(&self) -> bool {
        self.named_attempted
    }

    fn excluded(&self) -> BTreeSet<SmolStr> {
        self.tried.iter().cloned().collect()
    }
}

pub struct ScscfRouter {
    ctx: IcscfContext,
    kind: RequestKind,
    subscriber: Subscriber,
    phase: RouterPhase,
    retry: RetryState,
}

impl ScscfRouter {
    pub fn new(ctx: IcscfContext, kind: RequestKind, subscriber: Subscriber) -> Self {
        Self {
            ctx,
            kind,
            subscriber,
            phase: RouterPhase::NamedLookup,
            retry: RetryState::default(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn phase(&self) -> RouterPhase {
        self.phase
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// Whether a downstream final response should be retried on another server.
    pub fn is_retryable(&self, code: u16) -> bool {
        self.ctx.config.retry.is_retryable(self.kind, code)
    }

    /// Marks the transaction as routed to completion.
    pub fn finish(&mut self) {
        self.phase = RouterPhase::Done;
    }

    /// First target: the assigned server if the directory names one,
    /// otherwise a capability-based choice.
    pub async fn initial_target(&mut self) -> Result<ScscfTarget, RouteFailure> {
        self.phase = RouterPhase::NamedLookup;
        let result = self.named_lookup().await;
        self.settle(result)
    }

    /// Next target after a retryable failure.
    pub async fn retry_target(&mut self) -> Result<ScscfTarget, RouteFailure> {
        self.phase = RouterPhase::CapabilityLookup;
        let result = self.capability_lookup().await;
        self.settle(result)
    }

    async fn named_lookup(&mut self) -> Result<ScscfTarget, RouteFailure> {
        let answer = self.query(QueryClass::Registration).await?;
        if let Some(requirement) = answer.requirement() {
            self.retry.requirement = Some(requirement);
        }

        if let Some(name) = answer.server_name() {
            let uri = self.resolve(name)?;
            info!(identity = self.subscriber.identity(), scscf = %uri, "directory named S-CSCF");
            return Ok(self.commit(uri, TargetOrigin::Named));
        }

        debug!(identity = self.subscriber.identity(), "no S-CSCF named, selecting by capabilities");
        self.retry.requirement.get_or_insert_with(CapabilityRequirement::default);
        self.select_candidate()
    }

    async fn capability_lookup(&mut self) -> Result<ScscfTarget, RouteFailure> {
        if self.retry.attempts() >= self.ctx.config.max_attempts {
            return Err(RouteFailure::Exhausted {
                attempts: self.retry.attempts(),
            });
        }
        if self.retry.requirement.is_none() {
            let answer = self.query(QueryClass::Capabilities).await?;
            if let Some(name) = answer.server_name() {
                // Never a target from this query; only guarded against loops.
                if let Some(uri) = SipUri::parse(name) {
                    if self.ctx.config.identity.is_self(&uri) {
                        return Err(RouteFailure::Loop {
                            target: server_key(&uri),
                        });
                    }
                }
                debug!(scscf = name, "ignoring S-CSCF named by capabilities query");
            }
            self.retry.requirement = Some(answer.requirement().unwrap_or_default());
        }
        self.select_candidate()
    }

    async fn query(&self, class: QueryClass) -> Result<DirectoryAnswer, RouteFailure> {
        let query = DirectoryQuery::new(self.subscriber.clone(), class);
        let result = self
            .ctx
            .directory
            .query(&query)
            .await
            .and_then(DirectoryAnswer::check);
        match &result {
            Ok(answer) => debug!(
                path = %query.path(),
                result_code = ?answer.result_code,
                "directory answered"
            ),
            Err(err) => warn!(path = %query.path(), %err, "directory query failed"),
        }
        result.map_err(RouteFailure::from)
    }

    fn select_candidate(&mut self) -> Result<ScscfTarget, RouteFailure> {
        let attempts = self.retry.attempts();
        if attempts >= self.ctx.config.max_attempts {
            return Err(RouteFailure::Exhausted { attempts });
        }
        let requirement = self.retry.requirement.clone().unwrap_or_default();
        let pool = self.ctx.pool();
        let excluded = self.retry.excluded();

        let Some(candidate) = select(&requirement, pool.candidates(), &excluded) else {
            return Err(if attempts == 0 {
                RouteFailure::NoSuitableServer
            } else {
                RouteFailure::Exhausted { attempts }
            });
        };
        if self.ctx.config.identity.is_self(&candidate.uri) {
            return Err(RouteFailure::Loop {
                target: candidate.key.clone(),
            });
        }
        info!(
            identity = self.subscriber.identity(),
            scscf = %candidate.uri,
            priority = candidate.priority,
            attempt = attempts + 1,
            "selected S-CSCF by capabilities"
        );
        let uri = candidate.uri.clone();
        Ok(self.commit(uri, TargetOrigin::Capabilities))
    }

    /// Validates a directory-supplied server name.
    fn resolve(&self, name: &str) -> Result<SipUri, RouteFailure> {
        let invalid = |reason| RouteFailure::InvalidTarget {
            target: name.to_string(),
            reason,
        };
        let uri = match Uri::parse(name) {
            Some(Uri::Sip(uri)) if uri.sips => return Err(invalid("sips URI")),
            Some(Uri::Sip(uri)) => uri,
            Some(Uri::Tel(_)) => return Err(invalid("tel URI")),
            Some(Uri::Absolute(_)) => return Err(invalid("unsupported URI scheme")),
            None => return Err(invalid("unparseable URI")),
        };
        if self.ctx.config.identity.is_self(&uri) {
            return Err(RouteFailure::Loop {
                target: server_key(&uri),
            });
        }
        Ok(uri)
    }

    fn commit(&mut self, uri: SipUri, origin: TargetOrigin) -> ScscfTarget {
        let key = server_key(&uri);
        self.retry.tried.push(key.clone());
        self.retry.named_attempted |= origin == TargetOrigin::Named;
        self.phase = RouterPhase::WaitResult;
        ScscfTarget { uri, key, origin }
    }

    fn settle(
        &mut self,
        result: Result<ScscfTarget, RouteFailure>,
    ) -> Result<ScscfTarget, RouteFailure> {
        if let Err(failure) = &result {
            self.phase = RouterPhase::Done;
            warn!(
                identity = self.subscriber.identity(),
                %failure,
                attempts = self.retry.attempts(),
                "S-CSCF routing failed"
            );
        }
        result
    }
}
