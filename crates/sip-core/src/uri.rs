// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use percent_encoding::percent_decode_str;
use smol_str::SmolStr;

use crate::TelUri;

/// Default port assumed for `sip:` URIs without an explicit port.
pub const DEFAULT_SIP_PORT: u16 = 5060;
/// Default port assumed for `sips:` URIs without an explicit port.
pub const DEFAULT_SIPS_PORT: u16 = 5061;

/// Ordered list of URI or header parameters.
///
/// Parameter names are stored lowercased; values keep their original case.
pub type Params = Vec<(SmolStr, Option<SmolStr>)>;

/// Parsed representation of a SIP URI (RFC 3261 §19).
///
/// The URI is rendered back from its components, so parameters added with
/// [`SipUri::set_param`] appear in the textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: Params,
    pub headers: Vec<(SmolStr, SmolStr)>,
}

impl SipUri {
    /// Constructs a `sip:` URI with the given host and default settings.
    pub fn new(host: impl Into<SmolStr>) -> Self {
        Self {
            sips: false,
            user: None,
            host: SmolStr::new(host.into().to_ascii_lowercase()),
            port: None,
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Attempts to parse a SIP or SIPS URI from the provided string.
    pub fn parse(input: &str) -> Option<Self> {
        let (scheme, rest) = input.trim().split_once(':')?;
        let sips = scheme.eq_ignore_ascii_case("sips");
        if !sips && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        let (addr_part, headers_part) = match rest.split_once('?') {
            Some((addr, headers)) => (addr, Some(headers)),
            None => (rest, None),
        };

        let mut addr_iter = addr_part.split(';');
        let base = addr_iter.next()?.trim();
        let params = parse_params(addr_iter);

        let (user, host_port) = match base.rsplit_once('@') {
            Some((user, host)) => (
                percent_decode_str(user.trim())
                    .decode_utf8()
                    .ok()
                    .map(|s| SmolStr::new(s.as_ref())),
                host.trim(),
            ),
            None => (None, base),
        };

        if host_port.is_empty() {
            return None;
        }

        let (host, port) = split_host_port(host_port)?;
        if host.is_empty() || !host.chars().all(is_host_char) {
            return None;
        }

        let mut headers = Vec::new();
        if let Some(headers_part) = headers_part {
            for pair in headers_part.split('&') {
                if let Some((k, v)) = pair.split_once('=') {
                    headers.push((SmolStr::new(k.trim()), SmolStr::new(v.trim())));
                }
            }
        }

        Some(Self {
            sips,
            user,
            host: SmolStr::new(host.to_ascii_lowercase()),
            port,
            params,
            headers,
        })
    }

    /// Sets an explicit port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Port that applies to this URI, falling back to the scheme default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.sips {
            DEFAULT_SIPS_PORT
        } else {
            DEFAULT_SIP_PORT
        })
    }

    /// Looks up a URI parameter by name, ignoring ASCII case.
    ///
    /// Returns `Some(None)` for flag parameters such as `lr`.
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        find_param(&self.params, name)
    }

    /// Returns `true` when the named parameter is present.
    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Adds or replaces a URI parameter.
    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        set_param(&mut self.params, name, value);
    }

    /// `user@host` form used for subscriber identities.
    pub fn address_of_record(&self) -> SmolStr {
        let scheme = if self.sips { "sips" } else { "sip" };
        match &self.user {
            Some(user) => SmolStr::new(format!("{}:{}@{}", scheme, user, self.host)),
            None => SmolStr::new(format!("{}:{}", scheme, self.host)),
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.sips { "sips:" } else { "sip:" })?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write_params(f, &self.params)?;
        for (idx, (k, v)) in self.headers.iter().enumerate() {
            let sep = if idx == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, k, v)?;
        }
        Ok(())
    }
}

/// Unified URI type supporting SIP URIs (RFC 3261) and tel URIs (RFC 3966).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Uri {
    /// SIP or SIPS URI (e.g., sip:user@example.com)
    Sip(SipUri),
    /// Telephone URI (e.g., tel:+1-555-123-4567)
    Tel(TelUri),
    /// Any other absolute URI (e.g., urn:service:sos)
    Absolute(SmolStr),
}

impl Uri {
    /// Parses a URI string, detecting the scheme.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let scheme = input.split_once(':').map(|(s, _)| s)?;
        if scheme.eq_ignore_ascii_case("tel") {
            TelUri::parse(input).map(Uri::Tel)
        } else if scheme.eq_ignore_ascii_case("sip") || scheme.eq_ignore_ascii_case("sips") {
            SipUri::parse(input).map(Uri::Sip)
        } else {
            parse_absolute_uri(input).map(Uri::Absolute)
        }
    }

    /// Returns the lowercase scheme name.
    pub fn scheme(&self) -> &str {
        match self {
            Uri::Sip(uri) if uri.sips => "sips",
            Uri::Sip(_) => "sip",
            Uri::Tel(_) => "tel",
            Uri::Absolute(raw) => raw.split_once(':').map(|(s, _)| s).unwrap_or_default(),
        }
    }

    pub fn is_sip(&self) -> bool {
        matches!(self, Uri::Sip(_))
    }

    pub fn is_tel(&self) -> bool {
        matches!(self, Uri::Tel(_))
    }

    /// Returns the inner SipUri if this is a SIP URI.
    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Uri::Sip(uri) => Some(uri),
            _ => None,
        }
    }

    /// Returns the inner TelUri if this is a tel URI.
    pub fn as_tel(&self) -> Option<&TelUri> {
        match self {
            Uri::Tel(uri) => Some(uri),
            _ => None,
        }
    }

    /// Public identity form of the URI: parameters and headers dropped.
    pub fn identity(&self) -> SmolStr {
        match self {
            Uri::Sip(uri) => uri.address_of_record(),
            Uri::Tel(uri) => SmolStr::new(format!("tel:{}", uri.number)),
            Uri::Absolute(raw) => raw.clone(),
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uri::Sip(uri) => uri.fmt(f),
            Uri::Tel(uri) => f.write_str(uri.as_str()),
            Uri::Absolute(raw) => f.write_str(raw),
        }
    }
}

impl From<SipUri> for Uri {
    fn from(uri: SipUri) -> Self {
        Uri::Sip(uri)
    }
}

impl From<TelUri> for Uri {
    fn from(uri: TelUri) -> Self {
        Uri::Tel(uri)
    }
}

pub(crate) fn parse_params<'a>(parts: impl Iterator<Item = &'a str>) -> Params {
    let mut params = Vec::new();
    for param in parts {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        match param.split_once('=') {
            Some((k, v)) => params.push((
                SmolStr::new(k.trim().to_ascii_lowercase()),
                Some(SmolStr::new(v.trim())),
            )),
            None => params.push((SmolStr::new(param.to_ascii_lowercase()), None)),
        }
    }
    params
}

pub(crate) fn find_param<'a>(params: &'a Params, name: &str) -> Option<Option<&'a str>> {
    params
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_deref())
}

pub(crate) fn set_param(params: &mut Params, name: &str, value: Option<&str>) {
    let value = value.map(SmolStr::new);
    match params.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(slot) => slot.1 = value,
        None => params.push((SmolStr::new(name.to_ascii_lowercase()), value)),
    }
}

pub(crate) fn write_params(f: &mut fmt::Formatter<'_>, params: &Params) -> fmt::Result {
    for (k, v) in params {
        match v {
            Some(v) => write!(f, ";{}={}", k, v)?,
            None => write!(f, ";{}", k)?,
        }
    }
    Ok(())
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '!')
}

fn parse_absolute_uri(input: &str) -> Option<SmolStr> {
    let (scheme, rest) = input.split_once(':')?;
    let mut chars = scheme.chars();
    if !chars.next()?.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '-' | '.')) {
        return None;
    }
    if rest.is_empty() {
        return None;
    }
    Some(SmolStr::new(input))
}

/// Splits a host[:port] or IPv6 literal "[host]:port" string.
fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    if let Some(stripped) = input.strip_prefix('[') {
        let end = stripped.find(']')?;
        let host = &stripped[..end];
        let remainder = &stripped[end + 1..];
        match remainder.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if remainder.is_empty() => Some((host, None)),
            None => None,
        }
    } else if let Some((host, port)) = input.rsplit_once(':') {
        if host.contains(':') {
            return None;
        }
        Some((host, Some(port.parse().ok()?)))
    } else {
        Some((input, None))
    }
}
