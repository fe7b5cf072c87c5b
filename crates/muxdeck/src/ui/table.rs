//! Plain-text and JSON renderings of the session list.

use chrono::{DateTime, FixedOffset};
use protocol::{Session, SessionKey, SessionMetadata};
use serde::Serialize;

/// One row of `muxdeck list --json`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionListing {
    /// The remote session.
    #[serde(flatten)]
    pub session: Session,
    /// Creation time in the server's timezone, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<FixedOffset>>,
    /// Local note and launch command.
    pub metadata: SessionMetadata,
    /// Whether this process holds a binding to it.
    pub attached_locally: bool,
}

/// Builds listing rows in display order.
pub fn listings(
    sessions: &[Session],
    metadata: impl Fn(&str) -> SessionMetadata,
    attached: &[SessionKey],
    server_offset_minutes: Option<i32>,
) -> Vec<SessionListing> {
    sessions
        .iter()
        .map(|s| SessionListing {
            session: s.clone(),
            created_at: s.created_at(server_offset_minutes),
            metadata: metadata(&s.id),
            attached_locally: attached.contains(&s.key()),
        })
        .collect()
}

/// Formats rows as an aligned table.
pub fn render(rows: &[SessionListing]) -> String {
    if rows.is_empty() {
        return "No sessions.\n".to_string();
    }

    let id_width = column_width(rows.iter().map(|r| r.session.id.len()), 4, 16);
    let name_width = column_width(rows.iter().map(|r| r.session.name.len()), 4, 24);

    let mut out = format!(
        "  {:<6}  {:<id_width$}  {:<name_width$}  {:<8}  {:<19}  NOTE\n",
        "TYPE", "ID", "NAME", "STATUS", "CREATED"
    );
    out.push_str(&"-".repeat(id_width + name_width + 54));
    out.push('\n');

    for row in rows {
        let marker = if row.attached_locally { '*' } else { ' ' };
        let created = row
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .or_else(|| row.session.created.clone())
            .unwrap_or_else(|| "-".to_string());
        let note = row.metadata.note.as_deref().unwrap_or("");
        out.push_str(&format!(
            "{marker} {:<6}  {:<id_width$}  {:<name_width$}  {:<8}  {:<19}  {note}\n",
            row.session.session_type.as_str(),
            truncate_str(&row.session.id, id_width),
            truncate_str(&row.session.name, name_width),
            row.session.status.as_str(),
            created,
        ));
    }

    out.push_str(&format!("\nTotal: {} session(s)\n", rows.len()));
    out
}

fn column_width(lengths: impl Iterator<Item = usize>, min: usize, max: usize) -> usize {
    lengths.max().unwrap_or(min).clamp(min, max)
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{SessionStatus, SessionType};

    fn build() -> Session {
        Session {
            id: "12345".into(),
            name: "build".into(),
            session_type: SessionType::Screen,
            status: SessionStatus::Detached,
            created: Some("12/23/2025 04:21:38".into()),
            tty: None,
        }
    }

    #[test]
    fn test_listing_rows() {
        let sessions = vec![build()];
        let attached = vec![SessionKey::new(SessionType::Screen, "12345")];
        let rows = listings(
            &sessions,
            |_| SessionMetadata {
                command: None,
                note: Some("nightly".into()),
            },
            &attached,
            Some(60),
        );
        assert_eq!(rows.len(), 1);
        assert!(rows[0].attached_locally);
        assert_eq!(
            rows[0].created_at.map(|t| t.to_rfc3339()).as_deref(),
            Some("2025-12-23T04:21:38+01:00")
        );

        let table = render(&rows);
        assert!(table.contains("* screen"));
        assert!(table.contains("2025-12-23 04:21:38"));
        assert!(table.contains("nightly"));
        assert!(table.contains("Total: 1 session(s)"));
    }

    #[test]
    fn test_json_is_flat() {
        let rows = listings(&[build()], |_| SessionMetadata::default(), &[], None);
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["id"], "12345");
        assert_eq!(json["name"], "build");
        assert_eq!(json["attached_locally"], false);
    }

    #[test]
    fn test_empty() {
        assert_eq!(render(&[]), "No sessions.\n");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("a-very-long-session-name", 10), "a-very-...");
    }
}
