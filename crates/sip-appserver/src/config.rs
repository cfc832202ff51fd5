// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::time::Duration;

use sip_core::{SipUri, Uri};
use smol_str::SmolStr;

/// Settings shared by every transaction a host runs.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// URI that addresses this node; used for top-route matching and Record-Route.
    pub local_uri: SipUri,
    /// Additional host names that also address this node.
    pub aliases: Vec<SmolStr>,
    /// How long a cancelled fork may stay live before a 487 is synthesized for it.
    pub cancel_guard: Duration,
    /// Upper bound on a transaction's lifetime.
    pub max_lifetime: Duration,
}

impl AdapterConfig {
    pub fn new(local_uri: SipUri) -> Self {
        Self {
            local_uri,
            aliases: Vec::new(),
            cancel_guard: Duration::from_secs(32),
            max_lifetime: Duration::from_secs(300),
        }
    }

    pub fn with_aliases(mut self, aliases: impl IntoIterator<Item = SmolStr>) -> Self {
        self.aliases.extend(aliases);
        self
    }

    pub fn with_cancel_guard(mut self, guard: Duration) -> Self {
        self.cancel_guard = guard;
        self
    }

    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// True when `uri` addresses this node: same host (or an alias) and same port.
    pub fn is_local(&self, uri: &Uri) -> bool {
        let Some(sip) = uri.as_sip() else {
            return false;
        };
        let host_matches = sip.host.eq_ignore_ascii_case(&self.local_uri.host)
            || self
                .aliases
                .iter()
                .any(|alias| sip.host.eq_ignore_ascii_case(alias));
        host_matches && sip.effective_port() == self.local_uri.effective_port()
    }
}
