// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Static S-CSCF candidate pool.
//!
//! File format:
//!
//! ```json
//! {
//!   "s-cscfs": [
//!     { "server": "sip:scscf1.homedomain:5058;transport=TCP", "priority": 10, "capabilities": [1, 2] }
//!   ]
//! }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use sip_core::SipUri;
use smol_str::SmolStr;
use tracing::{info, warn};

use crate::config::ConfigError;

/// A configured S-CSCF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub uri: SipUri,
    /// Canonical `host:port` used for exclusion and tried-set checks.
    pub key: SmolStr,
    pub capabilities: BTreeSet<u32>,
    /// Higher is preferred.
    pub priority: i32,
}

impl Candidate {
    pub fn new(uri: SipUri, priority: i32, capabilities: impl IntoIterator<Item = u32>) -> Self {
        Self {
            key: server_key(&uri),
            uri,
            capabilities: capabilities.into_iter().collect(),
            priority,
        }
    }
}

/// Canonical identity of a server: lowercased host and effective port.
pub fn server_key(uri: &SipUri) -> SmolStr {
    SmolStr::new(format!(
        "{}:{}",
        uri.host.to_ascii_lowercase(),
        uri.effective_port()
    ))
}

#[derive(Debug, Deserialize)]
struct PoolFile {
    #[serde(rename = "s-cscfs")]
    servers: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct PoolEntry {
    server: String,
    priority: i32,
    capabilities: Vec<u32>,
}

/// Ordered candidate list. Configuration order breaks selection ties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScscfPool {
    candidates: Vec<Candidate>,
}

impl ScscfPool {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    /// Pool holding just the default S-CSCF.
    pub fn single(default: SipUri) -> Self {
        Self::new(vec![Candidate::new(default, 0, [])])
    }

    /// Parses the pool document. Badly formed entries are skipped.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: PoolFile =
            serde_json::from_str(text).map_err(|e| ConfigError::Json(e.to_string()))?;
        let servers = file.servers.ok_or(ConfigError::MissingServers)?;

        let mut candidates: Vec<Candidate> = Vec::with_capacity(servers.len());
        for value in servers {
            let entry = match serde_json::from_value::<PoolEntry>(value) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(%err, "badly formed S-CSCF entry");
                    continue;
                }
            };
            let Some(uri) = SipUri::parse(&entry.server).filter(|uri| !uri.sips) else {
                warn!(server = %entry.server, "badly formed S-CSCF entry: not a sip URI");
                continue;
            };
            let candidate = Candidate::new(uri, entry.priority, entry.capabilities);
            if candidates.iter().any(|c| c.key == candidate.key) {
                warn!(server = %entry.server, "duplicate S-CSCF entry ignored");
                continue;
            }
            candidates.push(candidate);
        }
        Ok(Self::new(candidates))
    }

    /// Reads the pool file, falling back to `default` when it cannot be used.
    pub fn load(path: &Path, default: Option<&SipUri>) -> Self {
        let parsed = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(err) => {
                warn!(%err, path = %path.display(), "failed to read S-CSCF configuration data");
                return Self::fallback(default);
            }
        };
        match parsed {
            Ok(pool) => {
                info!(path = %path.display(), servers = pool.len(), "loaded S-CSCF configuration");
                pool
            }
            Err(err) => {
                warn!(%err, path = %path.display(), "using default S-CSCF");
                Self::fallback(default)
            }
        }
    }

    /// Pool used when no configuration is available.
    pub fn fallback(default: Option<&SipUri>) -> Self {
        default.cloned().map(Self::single).unwrap_or_default()
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
