// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request classification and subscriber extraction.

use sip_core::{split_list, Method, NameAddr, Request, RouteHeader};
use smol_str::SmolStr;

use crate::{directory::Subscriber, error::RouteFailure};

pub const AUTHORIZATION: &str = "Authorization";
pub const CONTACT: &str = "Contact";
pub const P_SERVED_USER: &str = "P-Served-User";
pub const P_VISITED_NETWORK_ID: &str = "P-Visited-Network-ID";

/// Route and Contact parameter marking originating processing.
pub const ORIG_PARAM: &str = "orig";
/// Contact parameter marking an emergency registration.
pub const SOS_PARAM: &str = "sos";

/// How the I-CSCF routes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// REGISTER, routed by user-authorization query.
    Register,
    /// Session request on behalf of the caller (route carried `orig`).
    Originating,
    /// Session request towards the callee.
    Terminating,
}

impl RequestKind {
    /// Classifies `request` given the Route entry that addressed this node.
    pub fn classify(request: &Request, route_hdr: Option<&RouteHeader>) -> Self {
        if *request.method() == Method::Register {
            Self::Register
        } else if route_hdr.map_or(false, |route| route.uri_param(ORIG_PARAM).is_some()) {
            Self::Originating
        } else {
            Self::Terminating
        }
    }

    pub fn is_session(self) -> bool {
        !matches!(self, Self::Register)
    }
}

/// Builds the directory subscriber for `request`.
pub fn subscriber(
    kind: RequestKind,
    request: &Request,
    home_domain: &str,
) -> Result<Subscriber, RouteFailure> {
    match kind {
        RequestKind::Register => {
            let to = request
                .to_header()
                .ok_or(RouteFailure::MissingIdentity("To"))?;
            let impu = to.uri().identity();
            let impi = authorization_username(request)
                .unwrap_or_else(|| strip_scheme(&impu));
            let visited_network = request
                .headers()
                .get(P_VISITED_NETWORK_ID)
                .map(|v| SmolStr::new(v.trim().trim_matches('"')))
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| SmolStr::new(home_domain));
            Ok(Subscriber::Registration {
                impi,
                impu,
                visited_network,
                emergency: is_emergency_registration(request),
            })
        }
        RequestKind::Originating => {
            let served = request
                .headers()
                .get(P_SERVED_USER)
                .and_then(|value| NameAddr::parse(value))
                .or_else(|| request.from_header())
                .ok_or(RouteFailure::MissingIdentity("From"))?;
            Ok(Subscriber::Location {
                impu: served.uri().identity(),
                originating: true,
            })
        }
        RequestKind::Terminating => Ok(Subscriber::Location {
            impu: request.uri().identity(),
            originating: false,
        }),
    }
}

/// `username` from the first Digest Authorization header.
fn authorization_username(request: &Request) -> Option<SmolStr> {
    let value = request.headers().get(AUTHORIZATION)?;
    let (_, params) = value.trim().split_once(char::is_whitespace)?;
    params.split(',').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("username") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| SmolStr::new(value))
    })
}

fn strip_scheme(identity: &str) -> SmolStr {
    SmolStr::new(
        identity
            .split_once(':')
            .map_or(identity, |(_, rest)| rest),
    )
}

fn is_emergency_registration(request: &Request) -> bool {
    request
        .headers()
        .get_all(CONTACT)
        .flat_map(|value| split_list(value))
        .filter_map(NameAddr::parse)
        .any(|contact| {
            contact.param(SOS_PARAM).is_some()
                || contact
                    .sip_uri()
                    .map_or(false, |uri| uri.has_param(SOS_PARAM))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use sip_core::{Headers, RequestLine, Uri};

    fn request(method: Method, uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut hdrs = Headers::new();
        for (name, value) in headers {
            hdrs.push(*name, *value);
        }
        Request::new(
            RequestLine::new(method, Uri::parse(uri).unwrap()),
            hdrs,
            Bytes::new(),
        )
        .unwrap()
    }

    #[test]
    fn classification() {
        let invite = request(Method::Invite, "sip:6505550001@homedomain", &[]);
        let orig = RouteHeader::parse("<sip:icscf.homedomain:5052;lr;orig>").unwrap();
        let term = RouteHeader::parse("<sip:icscf.homedomain:5052;lr>").unwrap();
        assert_eq!(RequestKind::classify(&invite, Some(&orig)), RequestKind::Originating);
        assert_eq!(RequestKind::classify(&invite, Some(&term)), RequestKind::Terminating);
        assert_eq!(RequestKind::classify(&invite, None), RequestKind::Terminating);
        let register = request(Method::Register, "sip:homedomain", &[]);
        assert_eq!(RequestKind::classify(&register, Some(&orig)), RequestKind::Register);
    }

    #[test]
    fn registration_subscriber() {
        let register = request(
            Method::Register,
            "sip:homedomain",
            &[
                ("To", "<sip:6505550001@homedomain>"),
                (
                    "Authorization",
                    "Digest username=\"6505550001@private\", realm=\"homedomain\", nonce=\"\"",
                ),
                ("P-Visited-Network-ID", "\"other.net\""),
                ("Contact", "<sip:6505550001@10.0.0.1:5060;transport=tcp;sos>;expires=300"),
            ],
        );
        assert_eq!(
            subscriber(RequestKind::Register, &register, "homedomain").unwrap(),
            Subscriber::Registration {
                impi: "6505550001@private".into(),
                impu: "sip:6505550001@homedomain".into(),
                visited_network: "other.net".into(),
                emergency: true,
            }
        );

        let bare = request(
            Method::Register,
            "sip:homedomain",
            &[("To", "<sip:6505550001@homedomain>;tag=")],
        );
        assert_eq!(
            subscriber(RequestKind::Register, &bare, "homedomain").unwrap(),
            Subscriber::Registration {
                impi: "6505550001@homedomain".into(),
                impu: "sip:6505550001@homedomain".into(),
                visited_network: "homedomain".into(),
                emergency: false,
            }
        );

        let anonymous = request(Method::Register, "sip:homedomain", &[]);
        assert_eq!(
            subscriber(RequestKind::Register, &anonymous, "homedomain"),
            Err(RouteFailure::MissingIdentity("To"))
        );
    }

    #[test]
    fn session_subscribers() {
        let invite = request(
            Method::Invite,
            "tel:+16505550002",
            &[
                ("From", "<sip:6505550001@homedomain>;tag=abc"),
                ("P-Served-User", "<sip:served@homedomain>;sescase=orig;regstate=reg"),
            ],
        );
        assert_eq!(
            subscriber(RequestKind::Originating, &invite, "homedomain").unwrap(),
            Subscriber::Location {
                impu: "sip:served@homedomain".into(),
                originating: true,
            }
        );
        assert_eq!(
            subscriber(RequestKind::Terminating, &invite, "homedomain").unwrap(),
            Subscriber::Location {
                impu: "tel:+16505550002".into(),
                originating: false,
            }
        );

        let no_psu = request(
            Method::Invite,
            "sip:6505550002@homedomain",
            &[("From", "\"Alice\" <sip:6505550001@homedomain;user=phone>;tag=abc")],
        );
        assert_eq!(
            subscriber(RequestKind::Originating, &no_psu, "homedomain").unwrap(),
            Subscriber::Location {
                impu: "sip:6505550001@homedomain".into(),
                originating: true,
            }
        );
    }
}
