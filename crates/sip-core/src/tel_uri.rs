// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use smol_str::SmolStr;

use crate::uri::{find_param, parse_params, Params};

/// Parsed representation of a tel URI (RFC 3966).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TelUri {
    raw: SmolStr,
    /// Digits with visual separators removed, e.g. `+15551234567`.
    pub number: SmolStr,
    /// True for E.164 numbers starting with '+'.
    pub is_global: bool,
    pub params: Params,
}

impl TelUri {
    /// Attempts to parse a tel URI from the provided string.
    ///
    /// # Examples
    /// ```
    /// use sip_core::TelUri;
    ///
    /// let uri = TelUri::parse("tel:+1-555-123-4567").unwrap();
    /// assert!(uri.is_global);
    /// assert_eq!(uri.number.as_str(), "+15551234567");
    /// ```
    pub fn parse(input: &str) -> Option<Self> {
        let (scheme, rest) = input.trim().split_once(':')?;
        if !scheme.eq_ignore_ascii_case("tel") {
            return None;
        }
        let mut parts = rest.split(';');
        let number_part = parts.next()?.trim();
        let is_global = number_part.starts_with('+');

        let digits: String = number_part
            .chars()
            .filter(|c| !matches!(c, '-' | '.' | '(' | ')' | ' '))
            .collect();
        let body = digits.strip_prefix('+').unwrap_or(&digits);
        if body.is_empty() || !body.chars().all(|c| c.is_ascii_hexdigit() || c == '*' || c == '#') {
            return None;
        }

        let params = parse_params(parts);
        if !is_global && find_param(&params, "phone-context").is_none() {
            return None;
        }

        Some(Self {
            raw: SmolStr::new(input.trim()),
            number: SmolStr::new(digits),
            is_global,
            params,
        })
    }

    /// Returns the original textual representation.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_number_requires_context() {
        assert!(TelUri::parse("tel:5551234").is_none());
        let uri = TelUri::parse("tel:5551234;phone-context=example.com").unwrap();
        assert!(!uri.is_global);
        assert_eq!(uri.number.as_str(), "5551234");
    }

    #[test]
    fn rejects_non_digits() {
        assert!(TelUri::parse("tel:+1-555-CALL-NOW").is_none());
        assert!(TelUri::parse("sip:+15551234567@example.com").is_none());
    }
}
