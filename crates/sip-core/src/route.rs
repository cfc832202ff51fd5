use std::fmt;

use smol_str::SmolStr;

use crate::{
    name_addr::{split_list, NameAddr},
    Headers, SipUri, Uri,
};

/// Header name for routing directives.
pub const ROUTE: &str = "Route";
/// Header name for record-route directives.
pub const RECORD_ROUTE: &str = "Record-Route";

/// Parsed Route/Record-Route header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHeader(pub NameAddr);

impl RouteHeader {
    pub fn parse(value: &str) -> Option<Self> {
        NameAddr::parse(value).map(Self)
    }

    /// Loose-routing directive toward `uri` (`<uri;lr>`).
    pub fn loose(mut uri: SipUri) -> Self {
        uri.set_param("lr", None);
        Self(NameAddr::new(uri))
    }

    pub fn uri(&self) -> &Uri {
        self.0.uri()
    }

    pub fn sip_uri(&self) -> Option<&SipUri> {
        self.0.sip_uri()
    }

    /// URI parameter lookup on the routed URI (`lr`, `orig`, `dialog_id`).
    pub fn uri_param(&self, name: &str) -> Option<Option<&str>> {
        self.sip_uri().and_then(|uri| uri.param(name))
    }

    pub fn inner(&self) -> &NameAddr {
        &self.0
    }
}

impl fmt::Display for RouteHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Parses every Route header in order, expanding comma-separated values.
///
/// Values that fail to parse are skipped.
pub fn routes(headers: &Headers) -> Vec<RouteHeader> {
    headers
        .get_all(ROUTE)
        .flat_map(|value| split_list(value))
        .filter_map(RouteHeader::parse)
        .collect()
}

/// Removes the topmost Route entry, keeping any remaining entries of a combined header.
pub fn pop_top_route(headers: &mut Headers) -> Option<RouteHeader> {
    let values = headers.remove_all(ROUTE);
    let mut entries: Vec<SmolStr> = values
        .iter()
        .flat_map(|value| split_list(value))
        .map(SmolStr::new)
        .collect();
    if entries.is_empty() {
        return None;
    }
    let top = entries.remove(0);
    for entry in entries {
        headers.push(ROUTE, entry);
    }
    RouteHeader::parse(&top)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(routes: &[&str]) -> Headers {
        let mut headers = Headers::new();
        headers.push("Via", "SIP/2.0/TCP 10.83.18.38:36530");
        for route in routes {
            headers.push(ROUTE, *route);
        }
        headers
    }

    #[test]
    fn expands_combined_values() {
        let headers = headers_with(&["<sip:a;lr>, <sip:b;lr>", "<sip:c;lr>"]);
        let parsed = routes(&headers);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2].sip_uri().unwrap().host.as_str(), "c");
    }

    #[test]
    fn pop_top_route_keeps_the_rest() {
        let mut headers = headers_with(&["<sip:icscf;lr;orig>, <sip:b;lr>", "<sip:c;lr>"]);
        let top = pop_top_route(&mut headers).unwrap();
        assert_eq!(top.uri_param("orig"), Some(None));
        let rest: Vec<_> = headers.get_all(ROUTE).map(|v| v.to_string()).collect();
        assert_eq!(rest, vec!["<sip:b;lr>", "<sip:c;lr>"]);
    }

    #[test]
    fn loose_route_renders_lr() {
        let uri = SipUri::parse("sip:scscf1.homedomain:5058;transport=TCP").unwrap();
        assert_eq!(
            RouteHeader::loose(uri).to_string(),
            "<sip:scscf1.homedomain:5058;transport=TCP;lr>"
        );
    }
}
