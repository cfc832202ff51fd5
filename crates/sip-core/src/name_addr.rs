// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

use crate::uri::{find_param, parse_params, set_param, write_params, Params};
use crate::{SipUri, Uri};

/// Generic SIP name-addr structure used by From/To/Route/P-Served-User and friends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<SmolStr>,
    pub uri: Uri,
    /// Header parameters following the closing `>` (e.g. `tag`, `sescase`).
    pub params: Params,
}

impl NameAddr {
    /// Wraps a URI with no display name and no header parameters.
    pub fn new(uri: impl Into<Uri>) -> Self {
        Self {
            display_name: None,
            uri: uri.into(),
            params: Vec::new(),
        }
    }

    /// Parses `"Display" <uri>;params`, `<uri>;params` or a bare `uri;params`.
    ///
    /// For the bare form the parameters belong to the header, as in RFC 3261 §20.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Some(open) = input.find('<') {
            let close = open + input[open..].find('>')?;
            let display = input[..open].trim().trim_matches('"').trim();
            let uri = Uri::parse(&input[open + 1..close])?;
            let params = parse_params(input[close + 1..].split(';'));
            Some(Self {
                display_name: (!display.is_empty()).then(|| SmolStr::new(display)),
                uri,
                params,
            })
        } else {
            let mut parts = input.split(';');
            let uri = Uri::parse(parts.next()?)?;
            Some(Self {
                display_name: None,
                uri,
                params: parse_params(parts),
            })
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn sip_uri(&self) -> Option<&SipUri> {
        self.uri.as_sip()
    }

    /// Looks up a header parameter by name.
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        find_param(&self.params, name)
    }

    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        set_param(&mut self.params, name, value);
    }

    /// Value of the `tag` parameter, if present and non-empty.
    pub fn tag(&self) -> Option<&str> {
        self.param("tag").flatten().filter(|t| !t.is_empty())
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        write_params(f, &self.params)
    }
}

/// Splits a header value holding a comma-separated list of name-addrs.
///
/// Commas inside `<...>` or quoted strings do not split.
pub fn split_list(value: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                items.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    items.push(value[start..].trim());
    items.retain(|item| !item.is_empty());
    items
}
