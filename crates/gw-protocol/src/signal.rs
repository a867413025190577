//! POSIX signal vocabulary
//!
//! RFC 4254 section 6.10 lists the signal names a client may send with a
//! `signal` channel request. The set is closed: names outside it are not
//! errors on the wire, they are simply not signals this crate knows about.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::channel::ChannelId;
use crate::error::ProtocolError;
use crate::request::ChannelRequest;

/// A signal deliverable to a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    Abrt,
    Alrm,
    Fpe,
    Hup,
    Ill,
    Int,
    Kill,
    Pipe,
    Quit,
    Segv,
    Term,
    Usr1,
    Usr2,
}

impl Signal {
    /// Every signal in the vocabulary, in RFC order
    pub const ALL: [Signal; 13] = [
        Signal::Abrt,
        Signal::Alrm,
        Signal::Fpe,
        Signal::Hup,
        Signal::Ill,
        Signal::Int,
        Signal::Kill,
        Signal::Pipe,
        Signal::Quit,
        Signal::Segv,
        Signal::Term,
        Signal::Usr1,
        Signal::Usr2,
    ];

    /// Wire token, without the `SIG` prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Abrt => "ABRT",
            Signal::Alrm => "ALRM",
            Signal::Fpe => "FPE",
            Signal::Hup => "HUP",
            Signal::Ill => "ILL",
            Signal::Int => "INT",
            Signal::Kill => "KILL",
            Signal::Pipe => "PIPE",
            Signal::Quit => "QUIT",
            Signal::Segv => "SEGV",
            Signal::Term => "TERM",
            Signal::Usr1 => "USR1",
            Signal::Usr2 => "USR2",
        }
    }

    /// Parse a wire token. Matching is exact; `None` for anything else.
    pub fn from_wire(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == token)
    }

    /// Build the out-of-band request that carries this signal on `channel`
    pub fn to_request(self, channel: ChannelId) -> ChannelRequest {
        ChannelRequest::Signal {
            channel,
            name: self.as_str().to_string(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.as_str())
    }
}

impl FromStr for Signal {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| ProtocolError::UnknownSignal(s.to_string()))
    }
}
