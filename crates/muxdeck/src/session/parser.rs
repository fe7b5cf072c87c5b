//! Listing parsers for `screen -ls` and `tmux list-sessions`.
//!
//! Parsing is line-oriented. A line that matches no accepted shape is
//! skipped and never aborts the rest of the listing; unexpected output is
//! therefore indistinguishable from "no sessions of this type".

use std::sync::LazyLock;

use protocol::{Session, SessionStatus, SessionType};
use regex::Regex;

/// `12345.name  (created)  (status)`
static SCREEN_WITH_CREATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\.(\S+)\s+\(([^)]*)\)\s+\(([^)]*)\)").expect("valid screen regex")
});

/// `12345.name  (status)`
static SCREEN_STATUS_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\.(\S+)\s+\(([^)]*)\)").expect("valid screen regex")
});

/// `name: 3 windows (created ...) [80x24] (attached)`
static TMUX_SESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:]+):\s*\d+\s*windows?\s*(?:\([^)]*\))?\s*(?:\[[^\]]*\]\s*)?(\(attached\))?")
        .expect("valid tmux regex")
});

/// Parses listing output for the given multiplexer.
pub fn parse_listing(session_type: SessionType, output: &str) -> Vec<Session> {
    match session_type {
        SessionType::Screen => parse_screen(output),
        SessionType::Tmux => parse_tmux(output),
    }
}

/// Parses `screen -ls` output.
pub fn parse_screen(output: &str) -> Vec<Session> {
    output.lines().filter_map(parse_screen_line).collect()
}

fn parse_screen_line(line: &str) -> Option<Session> {
    let (id, name, created, status) = if let Some(caps) = SCREEN_WITH_CREATED.captures(line) {
        (caps[1].to_string(), caps[2].to_string(), Some(caps[3].trim().to_string()), caps[4].to_string())
    } else {
        let caps = SCREEN_STATUS_ONLY.captures(line)?;
        (caps[1].to_string(), caps[2].to_string(), None, caps[3].to_string())
    };

    Some(Session {
        id,
        name,
        session_type: SessionType::Screen,
        status: screen_status(&status),
        created,
        tty: None,
    })
}

fn screen_status(text: &str) -> SessionStatus {
    if text.to_ascii_lowercase().contains("attached") {
        SessionStatus::Attached
    } else {
        SessionStatus::Detached
    }
}

/// Parses `tmux list-sessions` output.
pub fn parse_tmux(output: &str) -> Vec<Session> {
    output
        .lines()
        .filter_map(|line| {
            let caps = TMUX_SESSION.captures(line)?;
            let name = caps[1].trim().to_string();
            if name.is_empty() {
                return None;
            }
            let status = if caps.get(2).is_some() {
                SessionStatus::Attached
            } else {
                SessionStatus::Detached
            };
            Some(Session {
                id: name.clone(),
                name,
                session_type: SessionType::Tmux,
                status,
                created: None,
                tty: None,
            })
        })
        .collect()
}

/// Parses a `date +%z` style offset (`+0800`, `-0530`) into minutes east of UTC.
pub fn parse_timezone_offset(text: &str) -> Option<i32> {
    let text = text.trim();
    let (sign, digits) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    Some(sign * (hours * 60 + minutes))
}

/// Parses a boolean emitted as text by the probe command.
///
/// Anything other than a recognised "yes" is false.
pub fn parse_flag(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "yes" | "1" | "true"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_line_with_created_date() {
        let sessions = parse_screen("12345.build  (12/23/2025 04:21:38)  (Detached)");
        assert_eq!(
            sessions,
            vec![Session {
                id: "12345".to_string(),
                name: "build".to_string(),
                session_type: SessionType::Screen,
                status: SessionStatus::Detached,
                created: Some("12/23/2025 04:21:38".to_string()),
                tty: None,
            }]
        );
    }

    #[test]
    fn test_screen_line_without_created_date() {
        let sessions = parse_screen("\t4242.web\t(Attached)");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "4242");
        assert_eq!(sessions[0].name, "web");
        assert_eq!(sessions[0].status, SessionStatus::Attached);
        assert_eq!(sessions[0].created, None);
    }

    #[test]
    fn test_screen_full_listing_skips_noise() {
        let output = "There are screens on:\n\
            \t12345.build\t(12/23/2025 04:21:38 AM)\t(Detached)\n\
            \t999.db.primary\t(Multi, attached)\n\
            \tgarbage line\n\
            2 Sockets in /run/screen/S-ops.\n";
        let sessions = parse_screen(output);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].created.as_deref(), Some("12/23/2025 04:21:38 AM"));
        assert_eq!(sessions[1].name, "db.primary");
        assert_eq!(sessions[1].status, SessionStatus::Attached);
    }

    #[test]
    fn test_screen_status_is_case_insensitive() {
        for status in ["Attached", "ATTACHED", "attached", "Multi, Attached"] {
            let line = format!("1.s ({status})");
            assert_eq!(parse_screen(&line)[0].status, SessionStatus::Attached, "{status}");
        }
        for status in ["Detached", "Dead ???", "Remote or dead"] {
            let line = format!("1.s ({status})");
            assert_eq!(parse_screen(&line)[0].status, SessionStatus::Detached, "{status}");
        }
    }

    #[test]
    fn test_screen_no_sockets() {
        assert!(parse_screen("No Sockets found in /run/screen/S-ops.\n").is_empty());
        assert!(parse_screen("").is_empty());
    }

    #[test]
    fn test_tmux_attached_line() {
        let sessions =
            parse_tmux("work: 3 windows (created Mon Jan 1 00:00:00 2024) (attached)");
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, "work");
        assert_eq!(s.name, "work");
        assert_eq!(s.session_type, SessionType::Tmux);
        assert_eq!(s.status, SessionStatus::Attached);
    }

    #[test]
    fn test_tmux_detached_and_legacy_dimensions() {
        let output = "api: 1 windows (created Tue Feb  6 10:00:00 2024)\n\
            logs: 2 windows (created Tue Feb  6 10:00:00 2024) [200x50] (attached)\n\
            no server running on /tmp/tmux-1000/default\n";
        let sessions = parse_tmux(output);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].status, SessionStatus::Detached);
        assert_eq!(sessions[1].name, "logs");
        assert_eq!(sessions[1].status, SessionStatus::Attached);
    }

    #[test]
    fn test_tmux_group_absent_never_attached() {
        let sessions = parse_tmux("attached: 1 window (created Mon Jan 1 00:00:00 2024)");
        assert_eq!(sessions[0].name, "attached");
        assert_eq!(sessions[0].status, SessionStatus::Detached);
    }

    #[test]
    fn test_parse_listing_dispatch() {
        assert_eq!(parse_listing(SessionType::Screen, "7.a (Detached)").len(), 1);
        assert!(parse_listing(SessionType::Tmux, "7.a (Detached)").is_empty());
    }

    #[test]
    fn test_timezone_offset() {
        assert_eq!(parse_timezone_offset("+0800\n"), Some(480));
        assert_eq!(parse_timezone_offset("-0530"), Some(-330));
        assert_eq!(parse_timezone_offset("+0000"), Some(0));
        assert_eq!(parse_timezone_offset("0800"), None);
        assert_eq!(parse_timezone_offset("+08:00"), None);
        assert_eq!(parse_timezone_offset(""), None);
        assert_eq!(parse_timezone_offset("+2500"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("yes\n"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
        assert!(!parse_flag(""));
    }
}
