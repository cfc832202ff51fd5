// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Subscriber directory (HSS) boundary.
//!
//! The routing engine asks the directory which S-CSCF serves a subscriber.
//! Registrations use a user-authorization query, sessions a location query.
//! Either may be issued in the capabilities class, asking for the capability
//! sets a new S-CSCF must satisfy instead of an assigned server name.
//!
//! Answers are JSON documents:
//!
//! ```json
//! { "result-code": 2001, "scscf": "sip:scscf1.homedomain:5058;transport=TCP" }
//! { "result-code": 2002, "mandatory-capabilities": [1], "optional-capabilities": [2, 3] }
//! ```

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use smol_str::SmolStr;
use tracing::debug;

use crate::selector::CapabilityRequirement;

/// Characters escaped in directory query paths (unreserved characters pass).
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Which answer the engine wants from the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryClass {
    /// Assigned server name (registration status or location).
    Registration,
    /// Capability sets for choosing a new server.
    Capabilities,
}

/// The subscriber a query is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscriber {
    Registration {
        impi: SmolStr,
        impu: SmolStr,
        visited_network: SmolStr,
        emergency: bool,
    },
    Location {
        impu: SmolStr,
        originating: bool,
    },
}

impl Subscriber {
    /// Public identity the directory keys its answer on.
    pub fn identity(&self) -> &str {
        match self {
            Self::Registration { impu, .. } | Self::Location { impu, .. } => impu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryQuery {
    pub subscriber: Subscriber,
    pub class: QueryClass,
}

impl DirectoryQuery {
    pub fn new(subscriber: Subscriber, class: QueryClass) -> Self {
        Self { subscriber, class }
    }

    /// Resource path of this query on the directory's HTTP interface.
    pub fn path(&self) -> String {
        let escape = |s: &str| utf8_percent_encode(s, QUERY_ESCAPE).to_string();
        let mut query: Vec<String> = Vec::new();
        let mut path = match &self.subscriber {
            Subscriber::Registration {
                impi,
                impu,
                visited_network,
                emergency,
            } => {
                query.push(format!("impu={}", escape(impu)));
                if !visited_network.is_empty() {
                    query.push(format!("visited-network={}", escape(visited_network)));
                }
                if self.class == QueryClass::Capabilities {
                    query.push("auth-type=CAPAB".to_string());
                }
                if *emergency {
                    query.push("sos=true".to_string());
                }
                format!("/impi/{}/registration-status", escape(impi))
            }
            Subscriber::Location { impu, originating } => {
                if *originating {
                    query.push("originating=true".to_string());
                }
                if self.class == QueryClass::Capabilities {
                    query.push("auth-type=CAPAB".to_string());
                }
                format!("/impu/{}/location", escape(impu))
            }
        };
        if !query.is_empty() {
            path.push('?');
            path.push_str(&query.join("&"));
        }
        path
    }
}

/// Why the directory could not name a server or capability set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Transport failure or timeout reaching the directory.
    Unavailable(String),
    /// The answer could not be decoded.
    Malformed(String),
    /// Subscriber unknown or roaming not allowed.
    NotFound,
    /// Identities do not match or access is forbidden.
    Forbidden,
    /// The subscriber has no services while unregistered.
    NoUnregisteredService,
    /// Result code the engine does not understand.
    Rejected(u32),
}

impl DirectoryError {
    /// Maps a non-200 HTTP status from the directory.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            403 => Self::Forbidden,
            other => Self::Unavailable(format!("HTTP {}", other)),
        }
    }
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "directory unavailable: {}", msg),
            Self::Malformed(msg) => write!(f, "malformed directory answer: {}", msg),
            Self::NotFound => write!(f, "subscriber not found"),
            Self::Forbidden => write!(f, "subscriber forbidden"),
            Self::NoUnregisteredService => write!(f, "no unregistered services"),
            Self::Rejected(code) => write!(f, "directory rejected query with result code {}", code),
        }
    }
}

impl std::error::Error for DirectoryError {}

pub const DIAMETER_SUCCESS: u32 = 2001;
pub const DIAMETER_SUBSEQUENT_REGISTRATION: u32 = 2002;
pub const DIAMETER_UNREGISTERED_SERVICE: u32 = 2003;
pub const DIAMETER_ERROR_USER_UNKNOWN: u32 = 5001;
pub const DIAMETER_ERROR_IDENTITIES_DONT_MATCH: u32 = 5002;
pub const DIAMETER_ERROR_IDENTITY_NOT_REGISTERED: u32 = 5003;
pub const DIAMETER_ERROR_ROAMING_NOT_ALLOWED: u32 = 5004;

/// Decoded directory answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DirectoryAnswer {
    #[serde(rename = "result-code", default)]
    pub result_code: Option<u32>,
    #[serde(default)]
    pub scscf: Option<String>,
    #[serde(rename = "mandatory-capabilities", default)]
    pub mandatory_capabilities: Option<Vec<u32>>,
    #[serde(rename = "optional-capabilities", default)]
    pub optional_capabilities: Option<Vec<u32>>,
}

impl DirectoryAnswer {
    /// Answer naming an assigned server.
    pub fn named(server: impl Into<String>) -> Self {
        Self {
            result_code: Some(DIAMETER_SUCCESS),
            scscf: Some(server.into()),
            ..Self::default()
        }
    }

    /// Answer carrying capability sets only.
    pub fn capabilities(
        mandatory: impl IntoIterator<Item = u32>,
        optional: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            result_code: Some(DIAMETER_SUCCESS),
            scscf: None,
            mandatory_capabilities: Some(mandatory.into_iter().collect()),
            optional_capabilities: Some(optional.into_iter().collect()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, DirectoryError> {
        serde_json::from_str(text).map_err(|e| DirectoryError::Malformed(e.to_string()))
    }

    /// Fails when the result code reports an error.
    pub fn check(self) -> Result<Self, DirectoryError> {
        match self.result_code {
            None
            | Some(DIAMETER_SUCCESS)
            | Some(DIAMETER_SUBSEQUENT_REGISTRATION)
            | Some(DIAMETER_UNREGISTERED_SERVICE) => Ok(self),
            Some(DIAMETER_ERROR_USER_UNKNOWN) | Some(DIAMETER_ERROR_ROAMING_NOT_ALLOWED) => {
                Err(DirectoryError::NotFound)
            }
            Some(DIAMETER_ERROR_IDENTITIES_DONT_MATCH) => Err(DirectoryError::Forbidden),
            Some(DIAMETER_ERROR_IDENTITY_NOT_REGISTERED) => {
                Err(DirectoryError::NoUnregisteredService)
            }
            Some(code) => Err(DirectoryError::Rejected(code)),
        }
    }

    /// Non-empty server name, if the answer carries one.
    pub fn server_name(&self) -> Option<&str> {
        self.scscf.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Capability sets, if the answer carries either list.
    pub fn requirement(&self) -> Option<CapabilityRequirement> {
        if self.mandatory_capabilities.is_none() && self.optional_capabilities.is_none() {
            return None;
        }
        Some(CapabilityRequirement::new(
            self.mandatory_capabilities.iter().flatten().copied(),
            self.optional_capabilities.iter().flatten().copied(),
        ))
    }
}

/// Directory lookup used by the routing engine.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn query(&self, query: &DirectoryQuery) -> Result<DirectoryAnswer, DirectoryError>;
}

/// Directory answering from a table keyed by public identity and query class.
///
/// Identities with no configured answer are reported as not found. Every
/// query is recorded for inspection.
#[derive(Default)]
pub struct InMemoryDirectory {
    answers: DashMap<(SmolStr, QueryClass), Result<DirectoryAnswer, DirectoryError>>,
    queries: Mutex<Vec<DirectoryQuery>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_answer(&self, identity: &str, class: QueryClass, answer: DirectoryAnswer) {
        self.answers.insert((SmolStr::new(identity), class), Ok(answer));
    }

    pub fn set_error(&self, identity: &str, class: QueryClass, error: DirectoryError) {
        self.answers.insert((SmolStr::new(identity), class), Err(error));
    }

    /// Stores a raw JSON answer, decoded when queried.
    pub fn set_json(&self, identity: &str, class: QueryClass, json: &str) {
        self.answers
            .insert((SmolStr::new(identity), class), DirectoryAnswer::from_json(json));
    }

    /// Queries received so far, oldest first.
    pub fn queries(&self) -> Vec<DirectoryQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectory {
    async fn query(&self, query: &DirectoryQuery) -> Result<DirectoryAnswer, DirectoryError> {
        self.queries.lock().push(query.clone());
        let key = (SmolStr::new(query.subscriber.identity()), query.class);
        let answer = self
            .answers
            .get(&key)
            .map(|entry| entry.value().clone())
            .unwrap_or(Err(DirectoryError::NotFound));
        debug!(path = %query.path(), ok = answer.is_ok(), "directory query");
        answer
    }
}
