//! Shell command synthesis for screen and tmux.
//!
//! Every remote action the engine takes is expressed as plain shell text
//! built here. Session names are validated before they are interpolated,
//! and start commands are escaped for the quoting style each multiplexer
//! line uses.

use protocol::{MuxError, Result, SessionKey, SessionType};

/// Ctrl-A, screen's default prefix.
const SCREEN_PREFIX: u8 = 0x01;

/// Ctrl-B, tmux's default prefix.
const TMUX_PREFIX: u8 = 0x02;

/// Checks that `name` can be passed to the multiplexer unquoted.
pub fn validate_session_name(session_type: SessionType, name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(MuxError::InvalidSessionName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > 64 {
        return invalid("name is longer than 64 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return invalid("only letters, digits, '.', '_' and '-' are allowed");
    }
    if name.starts_with('-') {
        return invalid("name must not start with '-'");
    }
    if session_type == SessionType::Tmux && name.contains('.') {
        return invalid("tmux names cannot contain '.'");
    }
    Ok(())
}

/// Command that creates a detached session, optionally running `start`.
pub fn create(session_type: SessionType, name: &str, start: Option<&str>) -> Result<String> {
    validate_session_name(session_type, name)?;
    let start = start.map(str::trim).filter(|s| !s.is_empty());

    Ok(match (session_type, start) {
        (SessionType::Screen, None) => format!("screen -dmS {name}"),
        (SessionType::Screen, Some(cmd)) => format!(
            "screen -dmS {name} bash -c '{}; exec bash'",
            escape_single_quoted(cmd)
        ),
        (SessionType::Tmux, None) => format!("tmux new -d -s {name}"),
        (SessionType::Tmux, Some(cmd)) => {
            format!("tmux new -d -s {name} \"{}\"", escape_double_quoted(cmd))
        }
    })
}

/// Command that lists sessions.
pub fn list(session_type: SessionType) -> &'static str {
    match session_type {
        SessionType::Screen => "screen -ls",
        SessionType::Tmux => "tmux list-sessions",
    }
}

/// Command that attaches, evicting any other attached client.
pub fn attach(key: &SessionKey) -> String {
    match key.session_type {
        SessionType::Screen => format!("screen -d -r {}", key.id),
        SessionType::Tmux => format!("tmux attach -d -t {}", key.id),
    }
}

/// Keystrokes that detach the client running inside the PTY.
pub fn detach_keys(session_type: SessionType) -> [u8; 2] {
    match session_type {
        SessionType::Screen => [SCREEN_PREFIX, b'd'],
        SessionType::Tmux => [TMUX_PREFIX, b'd'],
    }
}

/// Command that detaches every other client from the session.
pub fn force_detach(key: &SessionKey) -> String {
    match key.session_type {
        SessionType::Screen => format!("screen -d {}", key.id),
        SessionType::Tmux => format!("tmux detach-client -t {} -a", key.id),
    }
}

/// Command that terminates the session.
pub fn kill(key: &SessionKey) -> String {
    match key.session_type {
        SessionType::Screen => format!("screen -X -S {} quit", key.id),
        SessionType::Tmux => format!("tmux kill-session -t {}", key.id),
    }
}

/// Command that renames the session.
pub fn rename(key: &SessionKey, new_name: &str) -> Result<String> {
    validate_session_name(key.session_type, new_name)?;
    Ok(match key.session_type {
        SessionType::Screen => format!("screen -S {} -X sessionname {new_name}", key.id),
        SessionType::Tmux => format!("tmux rename-session -t {} {new_name}", key.id),
    })
}

fn escape_single_quoted(text: &str) -> String {
    text.replace('\'', r"'\''")
}

fn escape_double_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Package managers probed for install/uninstall, in probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    /// Debian/Ubuntu.
    Apt,
    /// RHEL/CentOS 7.
    Yum,
    /// Fedora/RHEL 8+.
    Dnf,
    /// Arch.
    Pacman,
    /// Alpine.
    Apk,
}

impl PackageManager {
    /// All managers in the order they are checked.
    pub const PROBE_ORDER: [PackageManager; 5] = [
        PackageManager::Apt,
        PackageManager::Yum,
        PackageManager::Dnf,
        PackageManager::Pacman,
        PackageManager::Apk,
    ];

    /// Executable looked up on the host.
    pub fn binary(&self) -> &'static str {
        match self {
            PackageManager::Apt => "apt-get",
            PackageManager::Yum => "yum",
            PackageManager::Dnf => "dnf",
            PackageManager::Pacman => "pacman",
            PackageManager::Apk => "apk",
        }
    }

    /// Command printing the first package manager found, or nothing.
    pub fn probe_command() -> String {
        let checks: Vec<String> = Self::PROBE_ORDER
            .iter()
            .map(|pm| {
                let bin = pm.binary();
                format!("if command -v {bin} >/dev/null 2>&1; then echo {bin};")
            })
            .collect();
        format!("{} else echo none; {}", checks.join(" el"), "fi")
    }

    /// Interprets the probe output.
    pub fn detect(output: &str) -> Result<Self> {
        let found = output.trim();
        Self::PROBE_ORDER
            .into_iter()
            .find(|pm| pm.binary() == found)
            .ok_or(MuxError::UnknownPackageManager)
    }

    /// Command installing the multiplexer.
    pub fn install_command(&self, tool: SessionType) -> String {
        match self {
            PackageManager::Apt => format!("sudo apt-get install -y {tool}"),
            PackageManager::Yum => format!("sudo yum install -y {tool}"),
            PackageManager::Dnf => format!("sudo dnf install -y {tool}"),
            PackageManager::Pacman => format!("sudo pacman -S --noconfirm {tool}"),
            PackageManager::Apk => format!("sudo apk add {tool}"),
        }
    }

    /// Command removing the multiplexer.
    pub fn uninstall_command(&self, tool: SessionType) -> String {
        match self {
            PackageManager::Apt => format!("sudo apt-get remove -y {tool}"),
            PackageManager::Yum => format!("sudo yum remove -y {tool}"),
            PackageManager::Dnf => format!("sudo dnf remove -y {tool}"),
            PackageManager::Pacman => format!("sudo pacman -R --noconfirm {tool}"),
            PackageManager::Apk => format!("sudo apk del {tool}"),
        }
    }
}
