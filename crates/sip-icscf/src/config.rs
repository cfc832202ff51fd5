// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! I-CSCF configuration.

use std::collections::BTreeSet;
use std::fmt;

use sip_appserver::AdapterConfig;
use sip_core::SipUri;
use smol_str::SmolStr;

use crate::request_kind::RequestKind;

/// Configuration problems detected while validating or loading settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_attempts` must allow at least one forward.
    InvalidMaxAttempts(usize),
    /// The home domain is not a usable SIP host.
    InvalidDomain(String),
    /// S-CSCF pool document is not valid JSON.
    Json(String),
    /// S-CSCF pool document lacks the `s-cscfs` array.
    MissingServers,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMaxAttempts(n) => {
                write!(f, "max attempts must be at least 1 (got {})", n)
            }
            Self::InvalidDomain(domain) => write!(f, "invalid home domain: {}", domain),
            Self::Json(msg) => write!(f, "badly formed S-CSCF configuration: {}", msg),
            Self::MissingServers => {
                write!(f, "badly formed S-CSCF configuration: missing s-cscfs array")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// This node's routable identity.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    /// Home domain the I-CSCF is addressed by.
    pub domain: SmolStr,
    /// Listening port.
    pub port: u16,
    /// Other host names (or addresses) that reach this node.
    pub aliases: Vec<SmolStr>,
}

impl NodeIdentity {
    pub fn new(domain: impl Into<SmolStr>, port: u16) -> Self {
        Self {
            domain: SmolStr::new(domain.into().to_ascii_lowercase()),
            port,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: impl IntoIterator<Item = SmolStr>) -> Self {
        self.aliases.extend(aliases);
        self
    }

    /// True when `uri` resolves to this node's host and port.
    pub fn is_self(&self, uri: &SipUri) -> bool {
        let host_matches = uri.host.eq_ignore_ascii_case(&self.domain)
            || self
                .aliases
                .iter()
                .any(|alias| uri.host.eq_ignore_ascii_case(alias));
        host_matches && uri.effective_port() == self.port
    }

    /// URI this node record-routes with, `sip:domain:port`.
    pub fn reflexive_uri(&self) -> SipUri {
        SipUri::new(self.domain.clone()).with_port(self.port)
    }
}

/// Downstream status codes that trigger a retry, per request kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub register: BTreeSet<u16>,
    pub session: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            register: BTreeSet::from([408, 480, 503]),
            session: BTreeSet::from([408, 503]),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, kind: RequestKind, code: u16) -> bool {
        match kind {
            RequestKind::Register => self.register.contains(&code),
            RequestKind::Originating | RequestKind::Terminating => self.session.contains(&code),
        }
    }
}

/// Settings for the S-CSCF routing engine.
#[derive(Debug, Clone)]
pub struct IcscfConfig {
    pub identity: NodeIdentity,
    /// Upper bound on forwards per transaction, named target included.
    pub max_attempts: usize,
    pub retry: RetryPolicy,
}

impl IcscfConfig {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            max_attempts: 3,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(self.max_attempts));
        }
        let uri = format!("sip:{}:{}", self.identity.domain, self.identity.port);
        if SipUri::parse(&uri).is_none() {
            return Err(ConfigError::InvalidDomain(self.identity.domain.to_string()));
        }
        Ok(())
    }

    /// Transaction-adapter settings matching this node's identity.
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig::new(self.identity.reflexive_uri())
            .with_aliases(self.identity.aliases.iter().cloned())
    }
}
