// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP types shared by the routing crates.
//!
//! - **Messages**: [`Request`], [`Response`], [`StatusCode`]
//! - **URIs**: [`SipUri`] (sip/sips), [`TelUri`] (RFC 3966), [`Uri`] (unified)
//! - **Headers**: [`Headers`] container, [`NameAddr`] and [`RouteHeader`] values
//!
//! Messages arrive here already parsed; wire encoding lives with the transport.
//!
//! # Examples
//!
//! ```
//! # use sip_core::*;
//! let uri = SipUri::parse("sip:scscf1.homedomain:5058;transport=TCP").unwrap();
//! assert_eq!(RouteHeader::loose(uri).to_string(), "<sip:scscf1.homedomain:5058;transport=TCP;lr>");
//! ```

pub mod headers;
pub mod method;
pub mod msg;
pub mod name_addr;
pub mod route;
pub mod tel_uri;
pub mod uri;

pub use headers::{Header, Headers};
pub use method::Method;
pub use msg::{MessageError, Request, RequestLine, Response, StatusCode, StatusLine};
pub use name_addr::{split_list, NameAddr};
pub use route::{pop_top_route, routes, RouteHeader, RECORD_ROUTE, ROUTE};
pub use tel_uri::TelUri;
pub use uri::{Params, SipUri, Uri, DEFAULT_SIPS_PORT, DEFAULT_SIP_PORT};
