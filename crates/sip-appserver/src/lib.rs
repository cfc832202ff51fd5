// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Application-server hosting for SIP routing logic.
//!
//! A [`AppServerHost`] wraps each inbound request in a [`TransactionAdapter`],
//! which hands it to the [`AppServerTsx`] chosen by an [`AppServer`]. The logic
//! answers through a [`TsxHelper`]: forward on new forks, relay or generate
//! responses, cancel forks, and schedule timers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sip_appserver::{AdapterConfig, AppServer, AppServerHost, AppServerTsx};
//! use sip_core::{Request, SipUri};
//!
//! struct Passthrough;
//!
//! impl AppServer for Passthrough {
//!     fn service_name(&self) -> &str { "passthrough" }
//!     fn get_app_tsx(&self, _request: &Request) -> Option<Box<dyn AppServerTsx>> { None }
//! }
//!
//! # async fn example() {
//! let local = SipUri::parse("sip:icscf.homedomain:5052").unwrap();
//! let (host, mut outputs) = AppServerHost::new(Arc::new(Passthrough), AdapterConfig::new(local));
//! # }
//! ```

pub mod adapter;
pub mod app;
pub mod config;
pub mod error;
pub mod event;
pub mod fork;
pub mod host;
pub mod route_set;
pub mod timer;

pub use adapter::{TransactionAdapter, TsxHelper, TsxState, DIALOG_ID_PARAM};
pub use app::{
    cancel_or_terminate, forward_transparently, relay_response, AppServer, AppServerTsx,
    TransparentTsx,
};
pub use config::AdapterConfig;
pub use error::TsxError;
pub use event::{TsxEvent, TsxOutput};
pub use fork::{Fork, ForkId, ForkOutcome, ForkStatus, ForkTable};
pub use host::{AppServerHost, TransactionId};
pub use route_set::RouteSet;
pub use timer::{TimerContext, TimerId};
