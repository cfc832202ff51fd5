use std::fmt;

use smol_str::SmolStr;

/// SIP request methods the routing core distinguishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Info,
    Update,
    Message,
    Prack,
    Refer,
    Subscribe,
    Notify,
    Publish,
    Unknown(SmolStr),
}

impl Method {
    /// Returns the canonical uppercase string representation for this method.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Update => "UPDATE",
            Method::Message => "MESSAGE",
            Method::Prack => "PRACK",
            Method::Refer => "REFER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Publish => "PUBLISH",
            Method::Unknown(token) => token.as_str(),
        }
    }

    /// Parses a method token, returning Unknown for extension methods.
    pub fn from_token(token: &str) -> Self {
        const KNOWN: [Method; 14] = [
            Method::Invite,
            Method::Ack,
            Method::Bye,
            Method::Cancel,
            Method::Register,
            Method::Options,
            Method::Info,
            Method::Update,
            Method::Message,
            Method::Prack,
            Method::Refer,
            Method::Subscribe,
            Method::Notify,
            Method::Publish,
        ];
        KNOWN
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(token))
            .unwrap_or_else(|| Method::Unknown(SmolStr::new(token)))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
