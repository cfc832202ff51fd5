// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Daemon settings assembled from the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sip_core::SipUri;
use sip_icscf::{IcscfConfig, NodeIdentity, ScscfPool};
use smol_str::SmolStr;

/// Where the S-CSCF pool comes from.
#[derive(Debug, Clone)]
pub struct PoolSource {
    /// JSON pool file, re-read when it changes.
    pub path: Option<PathBuf>,
    /// Server used when the file is missing or unusable.
    pub default_scscf: Option<SipUri>,
    /// Poll period for file changes; `None` disables reloading.
    pub reload_interval: Option<Duration>,
}

impl PoolSource {
    /// Loads the pool as it stands now.
    pub fn load(&self) -> ScscfPool {
        match &self.path {
            Some(path) => ScscfPool::load(path, self.default_scscf.as_ref()),
            None => ScscfPool::fallback(self.default_scscf.as_ref()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub icscf: IcscfConfig,
    pub pool: PoolSource,
}

/// Raw option values, one per command-line flag.
#[derive(Debug, Clone, Default)]
pub struct RawOptions {
    pub home_domain: String,
    pub port: u16,
    pub aliases: Vec<String>,
    pub scscf_config: Option<PathBuf>,
    pub default_scscf: Option<String>,
    pub max_attempts: usize,
    pub reload_interval_secs: u64,
}

impl DaemonConfig {
    pub fn from_options(raw: RawOptions) -> Result<Self> {
        let identity = NodeIdentity::new(raw.home_domain.as_str(), raw.port)
            .with_aliases(raw.aliases.iter().map(|alias| SmolStr::new(alias.to_ascii_lowercase())));
        let icscf = IcscfConfig::new(identity).with_max_attempts(raw.max_attempts);
        icscf.validate().context("invalid I-CSCF configuration")?;

        let default_scscf = raw
            .default_scscf
            .as_deref()
            .map(|uri| {
                SipUri::parse(uri)
                    .filter(|uri| !uri.sips)
                    .ok_or_else(|| anyhow!("invalid --default-scscf URI: {}", uri))
            })
            .transpose()?;

        let reload_interval = (raw.scscf_config.is_some() && raw.reload_interval_secs > 0)
            .then(|| Duration::from_secs(raw.reload_interval_secs));

        Ok(Self {
            icscf,
            pool: PoolSource {
                path: raw.scscf_config,
                default_scscf,
                reload_interval,
            },
        })
    }
}
