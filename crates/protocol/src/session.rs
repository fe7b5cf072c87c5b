//! Session model derived from remote multiplexer listings.
//!
//! Everything in here is plain data. Remote state (existence, attachment)
//! lives in [`Session`]; the local annotation layer lives in
//! [`SessionMetadata`] and is never written back to the remote host.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

/// The multiplexer that owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    /// GNU screen.
    Screen,
    /// tmux.
    Tmux,
}

impl SessionType {
    /// Both multiplexers, in probe order.
    pub const ALL: [SessionType; 2] = [SessionType::Screen, SessionType::Tmux];

    /// Returns the binary name, which doubles as the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Screen => "screen",
            SessionType::Tmux => "tmux",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "screen" => Ok(SessionType::Screen),
            "tmux" => Ok(SessionType::Tmux),
            other => Err(format!("unknown multiplexer type: {other}")),
        }
    }
}

/// Remote attachment status: whether any client on the host is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Some terminal is attached on the remote host.
    Attached,
    /// Nobody is attached.
    #[default]
    Detached,
}

impl SessionStatus {
    /// Returns the lowercase display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Attached => "attached",
            SessionStatus::Detached => "detached",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a session: unique per multiplexer type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    /// Owning multiplexer.
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Multiplexer identifier (PID prefix for screen, name for tmux).
    pub id: String,
}

impl SessionKey {
    /// Creates a key.
    pub fn new(session_type: SessionType, id: impl Into<String>) -> Self {
        Self {
            session_type,
            id: id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_type, self.id)
    }
}

impl FromStr for SessionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <type>:<id>, got {s:?}"))?;
        if id.is_empty() {
            return Err(format!("empty session id in {s:?}"));
        }
        Ok(SessionKey::new(kind.parse()?, id))
    }
}

/// A multiplexer session as reported by the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Multiplexer identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning multiplexer.
    #[serde(rename = "type")]
    pub session_type: SessionType,
    /// Remote attachment status.
    pub status: SessionStatus,
    /// Creation time text exactly as the multiplexer printed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Controlling TTY, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
}

impl Session {
    /// Returns the `(type, id)` identity of this session.
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.session_type, self.id.clone())
    }

    /// Returns true when the session has the given identity.
    pub fn matches(&self, key: &SessionKey) -> bool {
        self.session_type == key.session_type && self.id == key.id
    }

    /// Returns true when some remote client is attached.
    pub fn is_remotely_attached(&self) -> bool {
        self.status == SessionStatus::Attached
    }

    /// Interprets the `created` text in the server's timezone.
    ///
    /// Screen prints local server time as `MM/DD/YYYY HH:MM:SS`, sometimes
    /// with a two-digit year or a trailing `AM`/`PM`. Unknown offsets are
    /// treated as UTC.
    pub fn created_at(&self, server_offset_minutes: Option<i32>) -> Option<DateTime<FixedOffset>> {
        let naive = parse_created(self.created.as_deref()?)?;
        let offset = FixedOffset::east_opt(server_offset_minutes.unwrap_or(0) * 60)?;
        offset.from_local_datetime(&naive).single()
    }
}

fn parse_created(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim().to_ascii_uppercase();
    let year_len = text.split_whitespace().next()?.rsplit('/').next()?.len();
    let year = if year_len == 2 { "%y" } else { "%Y" };
    let format = if text.ends_with("AM") || text.ends_with("PM") {
        format!("%m/%d/{year} %I:%M:%S %p")
    } else {
        format!("%m/%d/{year} %H:%M:%S")
    };
    NaiveDateTime::parse_from_str(&text, &format).ok()
}

/// Local annotations for a session. Never authoritative remote state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Launch command the session was created with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Free-form user note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SessionMetadata {
    /// Returns true when there is nothing worth persisting.
    pub fn is_empty(&self) -> bool {
        self.command.as_deref().is_none_or(str::is_empty)
            && self.note.as_deref().is_none_or(str::is_empty)
    }
}

/// What the remote host can do, as reported by the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    /// `screen` binary found on the host.
    pub screen_available: bool,
    /// `tmux` binary found on the host.
    pub tmux_available: bool,
    /// Server UTC offset in minutes, once known.
    pub server_timezone_offset_minutes: Option<i32>,
}

impl CapabilitySnapshot {
    /// Returns whether the given multiplexer is installed.
    pub fn is_available(&self, session_type: SessionType) -> bool {
        match session_type {
            SessionType::Screen => self.screen_available,
            SessionType::Tmux => self.tmux_available,
        }
    }

    /// Returns the sole installed multiplexer, if exactly one is installed.
    pub fn only_available(&self) -> Option<SessionType> {
        match (self.screen_available, self.tmux_available) {
            (true, false) => Some(SessionType::Screen),
            (false, true) => Some(SessionType::Tmux),
            _ => None,
        }
    }
}
