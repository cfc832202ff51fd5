// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use bytes::Bytes;
use smol_str::SmolStr;

use crate::{headers::Headers, method::Method, name_addr::NameAddr, uri::Uri};

const MAX_REASON_LENGTH: usize = 256;
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Headers copied from a request into any response generated for it.
const RESPONSE_COPIED_HEADERS: [&str; 5] = ["Via", "From", "To", "Call-ID", "CSeq"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    InvalidStatusCode { code: u16 },
    ReasonTooLong { max: usize, actual: usize },
    InvalidReason(String),
    BodyTooLarge { max: usize, actual: usize },
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStatusCode { code } => {
                write!(f, "invalid SIP status code: {} (must be 100-699)", code)
            }
            Self::ReasonTooLong { max, actual } => {
                write!(f, "reason phrase too long (max {}, got {})", max, actual)
            }
            Self::InvalidReason(msg) => write!(f, "invalid reason phrase: {}", msg),
            Self::BodyTooLarge { max, actual } => {
                write!(f, "body too large (max {}, got {})", max, actual)
            }
        }
    }
}

impl std::error::Error for MessageError {}

/// A validated SIP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const TRYING: StatusCode = StatusCode(100);
    pub const OK: StatusCode = StatusCode(200);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const TEMPORARILY_UNAVAILABLE: StatusCode = StatusCode(480);
    pub const LOOP_DETECTED: StatusCode = StatusCode(482);
    pub const REQUEST_TERMINATED: StatusCode = StatusCode(487);
    pub const SERVER_INTERNAL_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const SERVER_TIMEOUT: StatusCode = StatusCode(504);
    pub const BUSY_EVERYWHERE: StatusCode = StatusCode(600);

    /// Validates a numeric code (SIP codes are 100-699).
    pub fn new(code: u16) -> Result<Self, MessageError> {
        if (100..=699).contains(&code) {
            Ok(Self(code))
        } else {
            Err(MessageError::InvalidStatusCode { code })
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_provisional(self) -> bool {
        self.0 < 200
    }

    pub fn is_final(self) -> bool {
        self.0 >= 200
    }

    /// Canonical reason phrase (RFC 3261 §21).
    pub fn reason_phrase(self) -> &'static str {
        match self.0 {
            100 => "Trying",
            180 => "Ringing",
            181 => "Call Is Being Forwarded",
            182 => "Queued",
            183 => "Session Progress",
            200 => "OK",
            202 => "Accepted",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            408 => "Request Timeout",
            480 => "Temporarily Unavailable",
            481 => "Call/Transaction Does Not Exist",
            482 => "Loop Detected",
            486 => "Busy Here",
            487 => "Request Terminated",
            500 => "Server Internal Error",
            503 => "Service Unavailable",
            504 => "Server Time-out",
            600 => "Busy Everywhere",
            603 => "Decline",
            604 => "Does Not Exist Anywhere",
            c if c < 200 => "Session Progress",
            c if c < 300 => "OK",
            c if c < 400 => "Redirection",
            c if c < 500 => "Client Error",
            c if c < 600 => "Server Error",
            _ => "Global Failure",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First line of a SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    uri: Uri,
}

impl RequestLine {
    /// Creates a request line for the given method and target URI.
    pub fn new(method: Method, uri: impl Into<Uri>) -> Self {
        Self {
            method,
            uri: uri.into(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn set_uri(&mut self, uri: impl Into<Uri>) {
        self.uri = uri.into();
    }
}

/// First line of a SIP response.
///
/// Reason phrases are validated to keep CR/LF and other control characters
/// out of generated responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    code: StatusCode,
    reason: SmolStr,
}

impl StatusLine {
    /// Creates a status line with the provided code and reason phrase.
    ///
    /// # Examples
    ///
    /// ```
    /// use sip_core::StatusLine;
    ///
    /// let status = StatusLine::new(200, "OK").unwrap();
    /// assert_eq!(status.code(), 200);
    ///
    /// assert!(StatusLine::new(99, "Invalid").is_err());
    /// assert!(StatusLine::new(200, "OK\r\nInjected").is_err());
    /// ```
    pub fn new(code: u16, reason: impl AsRef<str>) -> Result<Self, MessageError> {
        let code = StatusCode::new(code)?;
        let reason = reason.as_ref();
        validate_reason_phrase(reason)?;
        Ok(Self {
            code,
            reason: SmolStr::new(reason),
        })
    }

    /// Status line carrying the canonical reason phrase for `code`.
    pub fn from_status(code: StatusCode) -> Self {
        Self {
            code,
            reason: SmolStr::new(code.reason_phrase()),
        }
    }

    pub fn code(&self) -> u16 {
        self.code.as_u16()
    }

    pub fn status(&self) -> StatusCode {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// In-memory representation of a SIP request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    start: RequestLine,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Builds a request from its components.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds MAX_BODY_SIZE.
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;
        Ok(Self {
            start,
            headers,
            body,
        })
    }

    pub fn start_line(&self) -> &RequestLine {
        &self.start
    }

    pub fn method(&self) -> &Method {
        self.start.method()
    }

    pub fn uri(&self) -> &Uri {
        self.start.uri()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_uri(&mut self, uri: impl Into<Uri>) {
        self.start.set_uri(uri);
    }

    /// Parsed To header, if present and well formed.
    pub fn to_header(&self) -> Option<NameAddr> {
        self.headers.get("To").and_then(|v| NameAddr::parse(v))
    }

    /// Parsed From header, if present and well formed.
    pub fn from_header(&self) -> Option<NameAddr> {
        self.headers.get("From").and_then(|v| NameAddr::parse(v))
    }

    pub fn call_id(&self) -> Option<&str> {
        self.headers.get("Call-ID").map(|v| v.as_str())
    }

    /// True when the To header carries a tag, i.e. the request is within a dialog.
    pub fn is_in_dialog(&self) -> bool {
        self.to_header().map_or(false, |to| to.tag().is_some())
    }
}

/// In-memory representation of a SIP response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    start: StatusLine,
    headers: Headers,
    body: Bytes,
}

impl Response {
    /// Builds a response from its components.
    ///
    /// # Errors
    ///
    /// Returns an error if the body exceeds MAX_BODY_SIZE.
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Result<Self, MessageError> {
        validate_body_size(&body)?;
        Ok(Self {
            start,
            headers,
            body,
        })
    }

    /// Builds an empty-bodied response to `request`, copying the headers that
    /// identify the transaction (Via, From, To, Call-ID, CSeq).
    pub fn for_request(request: &Request, code: StatusCode) -> Self {
        let mut headers = Headers::new();
        for header in request.headers() {
            if RESPONSE_COPIED_HEADERS
                .iter()
                .any(|name| header.name.eq_ignore_ascii_case(name))
            {
                headers.push(header.name.clone(), header.value.clone());
            }
        }
        Self {
            start: StatusLine::from_status(code),
            headers,
            body: Bytes::new(),
        }
    }

    pub fn start_line(&self) -> &StatusLine {
        &self.start
    }

    pub fn code(&self) -> u16 {
        self.start.code()
    }

    pub fn status(&self) -> StatusCode {
        self.start.status()
    }

    pub fn reason(&self) -> &str {
        self.start.reason()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_provisional(&self) -> bool {
        self.status().is_provisional()
    }

    pub fn is_final(&self) -> bool {
        self.status().is_final()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }
}

fn validate_reason_phrase(reason: &str) -> Result<(), MessageError> {
    if reason.len() > MAX_REASON_LENGTH {
        return Err(MessageError::ReasonTooLong {
            max: MAX_REASON_LENGTH,
            actual: reason.len(),
        });
    }
    if reason.chars().any(|c| c.is_control() && c != '\t') {
        return Err(MessageError::InvalidReason(
            "contains control characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_body_size(body: &Bytes) -> Result<(), MessageError> {
    if body.len() > MAX_BODY_SIZE {
        return Err(MessageError::BodyTooLarge {
            max: MAX_BODY_SIZE,
            actual: body.len(),
        });
    }
    Ok(())
}
