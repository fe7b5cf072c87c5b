//! Batched capability probe.
//!
//! One remote command reports the server timezone, whether `screen` and
//! `tmux` are installed, and both raw listings. Each section follows a
//! unique marker line so a single round trip replaces five.

use protocol::{CapabilitySnapshot, RemoteHost, Result, SessionType};

use super::commands;
use super::parser::{parse_flag, parse_timezone_offset};

const MARKER_TIMEZONE: &str = "__MUXDECK_TZ__";
const MARKER_HAS_SCREEN: &str = "__MUXDECK_HAS_SCREEN__";
const MARKER_SCREEN_LIST: &str = "__MUXDECK_SCREEN_LIST__";
const MARKER_HAS_TMUX: &str = "__MUXDECK_HAS_TMUX__";
const MARKER_TMUX_LIST: &str = "__MUXDECK_TMUX_LIST__";
const MARKER_END: &str = "__MUXDECK_END__";

const ALL_MARKERS: [&str; 6] = [
    MARKER_TIMEZONE,
    MARKER_HAS_SCREEN,
    MARKER_SCREEN_LIST,
    MARKER_HAS_TMUX,
    MARKER_TMUX_LIST,
    MARKER_END,
];

/// Builds the combined probe command.
pub fn probe_command() -> String {
    [
        format!("echo {MARKER_TIMEZONE}"),
        "date +%z".to_string(),
        format!("echo {MARKER_HAS_SCREEN}"),
        presence_check(SessionType::Screen),
        format!("echo {MARKER_SCREEN_LIST}"),
        format!("{} 2>/dev/null", commands::list(SessionType::Screen)),
        format!("echo {MARKER_HAS_TMUX}"),
        presence_check(SessionType::Tmux),
        format!("echo {MARKER_TMUX_LIST}"),
        format!("{} 2>/dev/null", commands::list(SessionType::Tmux)),
        format!("echo {MARKER_END}"),
    ]
    .join("; ")
}

fn presence_check(session_type: SessionType) -> String {
    format!("command -v {session_type} >/dev/null 2>&1 && echo yes || echo no")
}

/// Raw sections of a probe response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSections {
    /// `date +%z` output.
    pub timezone: String,
    /// Screen presence flag text.
    pub has_screen: String,
    /// `screen -ls` output.
    pub screen_listing: String,
    /// tmux presence flag text.
    pub has_tmux: String,
    /// `tmux list-sessions` output.
    pub tmux_listing: String,
}

impl ProbeSections {
    /// Splits a probe response by marker.
    ///
    /// Missing sections come back empty; this never fails.
    pub fn split(output: &str) -> Self {
        Self {
            timezone: section(output, MARKER_TIMEZONE),
            has_screen: section(output, MARKER_HAS_SCREEN),
            screen_listing: section(output, MARKER_SCREEN_LIST),
            has_tmux: section(output, MARKER_HAS_TMUX),
            tmux_listing: section(output, MARKER_TMUX_LIST),
        }
    }

    /// Returns the raw listing for one multiplexer.
    pub fn listing(&self, session_type: SessionType) -> &str {
        match session_type {
            SessionType::Screen => &self.screen_listing,
            SessionType::Tmux => &self.tmux_listing,
        }
    }

    /// Formats the sections the way the remote shell prints them.
    ///
    /// The inverse of [`split`](Self::split); scripted hosts answer the
    /// probe with this.
    pub fn render(&self) -> String {
        let sections = [
            (MARKER_TIMEZONE, &self.timezone),
            (MARKER_HAS_SCREEN, &self.has_screen),
            (MARKER_SCREEN_LIST, &self.screen_listing),
            (MARKER_HAS_TMUX, &self.has_tmux),
            (MARKER_TMUX_LIST, &self.tmux_listing),
        ];
        let mut out = String::new();
        for (marker, body) in sections {
            out.push_str(marker);
            out.push('\n');
            if !body.is_empty() {
                out.push_str(body);
                out.push('\n');
            }
        }
        out.push_str(MARKER_END);
        out.push('\n');
        out
    }

    /// Returns true if `command` is the combined probe.
    pub fn is_probe(command: &str) -> bool {
        command.contains(MARKER_TIMEZONE) && command.contains(MARKER_END)
    }
}

/// Returns the text between `marker` and whichever marker follows it.
fn section(output: &str, marker: &str) -> String {
    let Some((_, body_start)) = find_marker_line(output, marker) else {
        return String::new();
    };
    let rest = &output[body_start..];
    let end = ALL_MARKERS
        .iter()
        .filter(|m| **m != marker)
        .filter_map(|m| find_marker_line(rest, m).map(|(line_start, _)| line_start))
        .min()
        .unwrap_or(rest.len());
    rest[..end].trim_matches(['\r', '\n']).to_string()
}

/// Byte range `(start, end)` of the line holding `marker`, if present.
fn find_marker_line(text: &str, marker: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim() == marker {
            return Some((offset, offset + line.len()));
        }
        offset += line.len();
    }
    None
}

/// Result of one probe round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Capabilities, including the memoized timezone.
    pub capabilities: CapabilitySnapshot,
    /// Raw sections for the listing parser.
    pub sections: ProbeSections,
}

/// Runs the batched probe command over `connection_id` and returns its raw
/// output for [`CapabilityProber::interpret`].
pub async fn run_probe(host: &dyn RemoteHost, connection_id: &str) -> Result<String> {
    tracing::debug!(connection_id = %connection_id, "Probing remote sessions");
    host.execute(connection_id, &probe_command()).await
}

/// Interprets probe output and memoizes the server timezone.
#[derive(Debug, Default)]
pub struct CapabilityProber {
    timezone_offset: Option<i32>,
}

impl CapabilityProber {
    /// Creates a prober with no cached timezone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized timezone offset, if known.
    pub fn timezone_offset(&self) -> Option<i32> {
        self.timezone_offset
    }

    /// Interprets a probe response.
    ///
    /// The timezone is parsed only until it is known once; later responses
    /// do not re-parse it.
    pub fn interpret(&mut self, output: &str) -> ProbeReport {
        let sections = ProbeSections::split(output);

        if self.timezone_offset.is_none() {
            self.timezone_offset = parse_timezone_offset(&sections.timezone);
            if let Some(offset) = self.timezone_offset {
                tracing::debug!(offset_minutes = offset, "Cached server timezone offset");
            }
        }

        let capabilities = CapabilitySnapshot {
            screen_available: parse_flag(&sections.has_screen),
            tmux_available: parse_flag(&sections.has_tmux),
            server_timezone_offset_minutes: self.timezone_offset,
        };

        ProbeReport {
            capabilities,
            sections,
        }
    }
}
