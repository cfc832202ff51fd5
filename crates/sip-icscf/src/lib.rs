// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interrogating-CSCF: S-CSCF selection for IMS requests.
//!
//! For each request the I-CSCF asks the subscriber directory which S-CSCF
//! serves the subscriber. If the directory names one, the request goes
//! there; otherwise, or when that server fails with a retryable response,
//! a server is chosen from the configured pool by capability.
//!
//! - [`IcscfAppServer`] plugs the logic into a [`sip_appserver::AppServerHost`]
//! - [`ScscfRouter`] is the retry and loop-detection state machine
//! - [`select`] ranks pool candidates against a [`CapabilityRequirement`]
//! - [`DirectoryService`] is the HSS boundary, with [`InMemoryDirectory`] for tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sip_appserver::AppServerHost;
//! use sip_icscf::{
//!     IcscfAppServer, IcscfConfig, IcscfContext, InMemoryDirectory, NodeIdentity, ScscfPool,
//! };
//!
//! # async fn example() -> Result<(), sip_icscf::ConfigError> {
//! let config = IcscfConfig::new(NodeIdentity::new("homedomain", 5052));
//! let adapter_config = config.adapter_config();
//! let directory = Arc::new(InMemoryDirectory::new());
//! let ctx = IcscfContext::new(config, directory, ScscfPool::default());
//! let app = Arc::new(IcscfAppServer::new(ctx)?);
//! let (host, mut outputs) = AppServerHost::new(app, adapter_config);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod pool;
pub mod request_kind;
pub mod router;
pub mod selector;
pub mod tsx;

pub use config::{ConfigError, IcscfConfig, NodeIdentity, RetryPolicy};
pub use context::IcscfContext;
pub use directory::{
    DirectoryAnswer, DirectoryError, DirectoryQuery, DirectoryService, InMemoryDirectory,
    QueryClass, Subscriber,
};
pub use error::RouteFailure;
pub use pool::{server_key, Candidate, ScscfPool};
pub use request_kind::RequestKind;
pub use router::{RetryState, RouterPhase, ScscfRouter, ScscfTarget, TargetOrigin};
pub use selector::{select, CapabilityRequirement};
pub use tsx::{IcscfAppServer, IcscfTsx};
