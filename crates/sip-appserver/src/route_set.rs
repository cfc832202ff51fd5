// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use sip_core::{routes, Headers, RouteHeader, ROUTE};

/// Onward routing directives captured from an inbound request.
///
/// Written once per transaction, after the directive that addressed this node
/// has been consumed. Every forked request replays it ahead of any routes the
/// routing logic adds.
#[derive(Debug, Clone, Default)]
pub struct RouteSet {
    routes: Vec<RouteHeader>,
    captured: bool,
}

impl RouteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the Route headers in order. Later calls are ignored and return `false`.
    pub fn capture(&mut self, headers: &Headers) -> bool {
        if self.captured {
            return false;
        }
        self.routes = routes(headers);
        self.captured = true;
        true
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteHeader> {
        self.routes.iter()
    }

    /// Replaces all Route headers with the captured set followed by `extra`.
    pub fn apply(&self, headers: &mut Headers, extra: &[RouteHeader]) {
        headers.remove_all(ROUTE);
        for route in self.routes.iter().chain(extra) {
            headers.push(ROUTE, route.to_string());
        }
    }
}
