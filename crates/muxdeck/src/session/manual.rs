//! Built-in screen and tmux command reference.
//!
//! A static table of shell commands and prefix-key bindings for both
//! multiplexers, grouped by topic. `muxdeck manual` renders it without
//! touching a remote host.

use std::fmt;
use std::str::FromStr;

use protocol::SessionType;

/// Manual section, shared across both tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Creating, listing, attaching and killing sessions.
    Sessions,
    /// Windows inside a session.
    Windows,
    /// Split regions (screen) or panes (tmux).
    Panes,
    /// Copy mode, scrollback and paste buffers.
    Copy,
    /// Everything else.
    Other,
}

impl Topic {
    /// All topics in display order.
    pub const ALL: [Topic; 5] = [
        Topic::Sessions,
        Topic::Windows,
        Topic::Panes,
        Topic::Copy,
        Topic::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Sessions => "sessions",
            Topic::Windows => "windows",
            Topic::Panes => "panes",
            Topic::Copy => "copy",
            Topic::Other => "other",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sessions" | "session" => Ok(Topic::Sessions),
            "windows" | "window" => Ok(Topic::Windows),
            "panes" | "pane" | "split" | "regions" => Ok(Topic::Panes),
            "copy" | "scroll" | "scrollback" => Ok(Topic::Copy),
            "other" | "misc" => Ok(Topic::Other),
            other => Err(format!(
                "unknown manual topic {other:?} (expected sessions, windows, panes, copy or other)"
            )),
        }
    }
}

/// How an entry is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A shell command line.
    Command(&'static str),
    /// A key pressed after the multiplexer prefix.
    Key(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Example {
    pub code: &'static str,
    pub note: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub trigger: Trigger,
    pub description: &'static str,
    pub examples: &'static [Example],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub topic: Topic,
    pub title: &'static str,
    pub entries: &'static [Entry],
}

/// Reference for one multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manual {
    pub tool: SessionType,
    /// Prefix chord, as typed.
    pub prefix: &'static str,
    pub sections: &'static [Section],
}

impl Manual {
    pub fn section(&self, topic: Topic) -> Option<&'static Section> {
        self.sections.iter().find(|s| s.topic == topic)
    }

    /// Entries whose trigger, description or examples contain `query`,
    /// ignoring case.
    pub fn search(&self, query: &str) -> Vec<(&'static Section, &'static Entry)> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let hit = |text: &str| text.to_lowercase().contains(&needle);

        self.sections
            .iter()
            .flat_map(|section| section.entries.iter().map(move |entry| (section, entry)))
            .filter(|(_, entry)| {
                let trigger = match entry.trigger {
                    Trigger::Command(text) | Trigger::Key(text) => text,
                };
                hit(trigger)
                    || hit(entry.description)
                    || entry
                        .examples
                        .iter()
                        .any(|ex| hit(ex.code) || hit(ex.note))
            })
            .collect()
    }

    /// Display form of an entry's trigger; keys are shown behind the prefix.
    pub fn trigger_text(&self, entry: &Entry) -> String {
        match entry.trigger {
            Trigger::Command(text) => text.to_string(),
            Trigger::Key(key) => format!("{} {key}", self.prefix),
        }
    }

    /// Renders the whole manual, or one topic.
    pub fn render(&self, topic: Option<Topic>) -> String {
        let sections: Vec<&Section> = match topic {
            Some(topic) => self.section(topic).into_iter().collect(),
            None => self.sections.iter().collect(),
        };

        let mut out = format!("{} (prefix {})\n", self.tool, self.prefix);
        for section in sections {
            out.push_str(&format!("\n{} [{}]\n", section.title, section.entries.len()));
            for entry in section.entries {
                self.render_entry(&mut out, entry);
            }
        }
        out
    }

    /// Renders search results, each under its section title.
    pub fn render_matches(&self, matches: &[(&Section, &Entry)]) -> String {
        let mut out = String::new();
        let mut current: Option<Topic> = None;
        for (section, entry) in matches {
            if current != Some(section.topic) {
                out.push_str(&format!("\n{} {}\n", self.tool, section.title));
                current = Some(section.topic);
            }
            self.render_entry(&mut out, entry);
        }
        out
    }

    fn render_entry(&self, out: &mut String, entry: &Entry) {
        out.push_str(&format!(
            "  {:<34} {}\n",
            self.trigger_text(entry),
            entry.description
        ));
        for example in entry.examples {
            if example.note.is_empty() {
                out.push_str(&format!("      {}\n", example.code));
            } else {
                out.push_str(&format!("      {:<38} {}\n", example.code, example.note));
            }
        }
    }
}

/// The reference for `tool`.
pub fn manual(tool: SessionType) -> &'static Manual {
    match tool {
        SessionType::Screen => &SCREEN,
        SessionType::Tmux => &TMUX,
    }
}

const fn cmd(text: &'static str, description: &'static str, examples: &'static [Example]) -> Entry {
    Entry {
        trigger: Trigger::Command(text),
        description,
        examples,
    }
}

const fn key(text: &'static str, description: &'static str, examples: &'static [Example]) -> Entry {
    Entry {
        trigger: Trigger::Key(text),
        description,
        examples,
    }
}

const fn ex(code: &'static str, note: &'static str) -> Example {
    Example { code, note }
}

static SCREEN: Manual = Manual {
    tool: SessionType::Screen,
    prefix: "Ctrl+A",
    sections: &[
        Section {
            topic: Topic::Sessions,
            title: "Sessions",
            entries: &[
                cmd(
                    "screen",
                    "Start a new session",
                    &[
                        ex("screen", "anonymous session"),
                        ex("screen -S myproject", "session named myproject"),
                    ],
                ),
                cmd(
                    "screen -S <name>",
                    "Start a named session",
                    &[
                        ex("screen -S dev-server", "a session for the dev server"),
                        ex("screen -S monitor", "a monitoring session"),
                    ],
                ),
                cmd(
                    "screen -ls",
                    "List sessions",
                    &[ex("screen -ls", "every session and its state")],
                ),
                cmd(
                    "screen -r [name|pid]",
                    "Reattach to a session",
                    &[
                        ex("screen -r", "the only detached session"),
                        ex("screen -r myproject", "the session named myproject"),
                        ex("screen -r 12345", "by pid"),
                    ],
                ),
                cmd(
                    "screen -d -r <name>",
                    "Detach it elsewhere, then reattach here",
                    &[ex("screen -d -r myproject", "take over a session held by another terminal")],
                ),
                cmd(
                    "screen -x <name>",
                    "Attach without detaching others (shared session)",
                    &[ex("screen -x myproject", "pair on the same session")],
                ),
                cmd(
                    "screen -X quit",
                    "Kill a session from outside",
                    &[ex("screen -S myproject -X quit", "kill one session")],
                ),
                key(
                    "d",
                    "Detach, leaving the session running",
                    &[ex("Ctrl+A d", "resume later with screen -r")],
                ),
            ],
        },
        Section {
            topic: Topic::Windows,
            title: "Windows",
            entries: &[
                key("c", "Create a window", &[]),
                key("n", "Next window", &[]),
                key("p", "Previous window", &[]),
                key(
                    "0-9",
                    "Switch to window by number",
                    &[ex("Ctrl+A 0", "window 0"), ex("Ctrl+A 3", "window 3")],
                ),
                key("\"", "Pick a window from a list", &[]),
                key("w", "Show the window list in the status line", &[]),
                key("A", "Rename the current window", &[]),
                key("k", "Kill the current window (asks first)", &[]),
                key("\\", "Kill every window and quit", &[]),
            ],
        },
        Section {
            topic: Topic::Panes,
            title: "Split regions",
            entries: &[
                key("S", "Split horizontally (top and bottom)", &[]),
                key("|", "Split vertically (side by side)", &[]),
                key("Tab", "Move focus to the next region", &[]),
                key("X", "Remove the current region", &[]),
                key("Q", "Remove every region but the current one", &[]),
                key(
                    ":resize",
                    "Resize the current region",
                    &[
                        ex("Ctrl+A :resize +5", "five rows taller"),
                        ex("Ctrl+A :resize -5", "five rows shorter"),
                    ],
                ),
            ],
        },
        Section {
            topic: Topic::Copy,
            title: "Copy and scrollback",
            entries: &[
                key(
                    "[",
                    "Enter copy/scrollback mode",
                    &[ex("Ctrl+A [", "scroll with arrows or PgUp/PgDn")],
                ),
                key("Esc", "Leave copy mode", &[]),
                key(
                    "Space",
                    "Start or end a selection in copy mode",
                    &[ex("Space, move, Space", "the second Space copies")],
                ),
                key("]", "Paste the copy buffer", &[]),
                key(">", "Write the copy buffer to a file", &[]),
                key("<", "Read a file into the copy buffer", &[]),
            ],
        },
        Section {
            topic: Topic::Other,
            title: "Other",
            entries: &[
                key("?", "Show every key binding", &[]),
                key(
                    ":",
                    "Open the command line",
                    &[
                        ex("Ctrl+A :hardcopy -h screen.txt", "save the screen with scrollback"),
                        ex("Ctrl+A :number 5", "renumber the current window"),
                    ],
                ),
                key("H", "Toggle logging to a file", &[]),
                key("i", "Show current window info", &[]),
                key("t", "Show time and load", &[]),
                key("x", "Lock the terminal", &[]),
                key("Z", "Reset the terminal", &[]),
                cmd(
                    "screen -dmS <name> <cmd>",
                    "Start a detached session running a command",
                    &[
                        ex("screen -dmS server python app.py", "a Python service"),
                        ex("screen -dmS backup ./backup.sh", "a backup script"),
                    ],
                ),
            ],
        },
    ],
};

static TMUX: Manual = Manual {
    tool: SessionType::Tmux,
    prefix: "Ctrl+B",
    sections: &[
        Section {
            topic: Topic::Sessions,
            title: "Sessions",
            entries: &[
                cmd(
                    "tmux",
                    "Start a new session",
                    &[ex("tmux", "anonymous session"), ex("tmux new", "same")],
                ),
                cmd(
                    "tmux new -s <name>",
                    "Start a named session",
                    &[
                        ex("tmux new -s dev", "session named dev"),
                        ex("tmux new-session -s project", "long form"),
                    ],
                ),
                cmd(
                    "tmux ls",
                    "List sessions",
                    &[ex("tmux ls", "short form"), ex("tmux list-sessions", "long form")],
                ),
                cmd(
                    "tmux attach -t <name>",
                    "Attach to a session",
                    &[
                        ex("tmux attach -t dev", "attach to dev"),
                        ex("tmux a -t dev", "short form"),
                        ex("tmux attach", "the most recent session"),
                    ],
                ),
                cmd(
                    "tmux attach -d -t <name>",
                    "Detach other clients, then attach",
                    &[ex("tmux attach -d -t dev", "take dev over from another terminal")],
                ),
                cmd(
                    "tmux kill-session -t <name>",
                    "Kill a session",
                    &[
                        ex("tmux kill-session -t dev", "kill dev"),
                        ex("tmux kill-server", "kill every session and the server"),
                    ],
                ),
                cmd(
                    "tmux rename-session -t <old> <new>",
                    "Rename a session",
                    &[ex("tmux rename -t 0 main", "rename session 0 to main")],
                ),
                key("d", "Detach the current client", &[]),
                key("s", "Pick a session from a list", &[]),
                key("$", "Rename the current session", &[]),
                key("(", "Previous session", &[]),
                key(")", "Next session", &[]),
            ],
        },
        Section {
            topic: Topic::Windows,
            title: "Windows",
            entries: &[
                key("c", "Create a window", &[]),
                key("n", "Next window", &[]),
                key("p", "Previous window", &[]),
                key("l", "Last used window", &[]),
                key("0-9", "Switch to window by number", &[]),
                key("w", "Pick a window from a list", &[]),
                key(",", "Rename the current window", &[]),
                key("&", "Kill the current window (asks first)", &[]),
                key("f", "Find a window by name", &[]),
                key(".", "Move the window to another number", &[]),
                cmd(
                    "tmux swap-window -s <src> -t <dst>",
                    "Swap two windows",
                    &[ex("tmux swap-window -s 0 -t 1", "swap windows 0 and 1")],
                ),
            ],
        },
        Section {
            topic: Topic::Panes,
            title: "Panes",
            entries: &[
                key("%", "Split vertically (side by side)", &[]),
                key("\"", "Split horizontally (top and bottom)", &[]),
                key("Arrows", "Move focus between panes", &[]),
                key("o", "Next pane", &[]),
                key(";", "Previously active pane", &[]),
                key("q", "Show pane numbers (press one to jump)", &[]),
                key("x", "Kill the current pane (asks first)", &[]),
                key("!", "Break the pane out into a new window", &[]),
                key("z", "Zoom or unzoom the current pane", &[]),
                key("{", "Swap with the previous pane", &[]),
                key("}", "Swap with the next pane", &[]),
                key(
                    "Ctrl+Arrows",
                    "Resize the pane",
                    &[
                        ex("Ctrl+B Ctrl+Up", "grow upwards"),
                        ex("Ctrl+B Ctrl+Right", "grow to the right"),
                    ],
                ),
                key("Alt+Arrows", "Resize the pane in steps of five", &[]),
                key("Space", "Cycle through preset layouts", &[]),
                cmd(
                    "tmux select-layout <layout>",
                    "Apply a preset layout",
                    &[
                        ex("tmux select-layout even-horizontal", "equal columns"),
                        ex("tmux select-layout even-vertical", "equal rows"),
                        ex("tmux select-layout main-horizontal", "main pane on top"),
                        ex("tmux select-layout main-vertical", "main pane on the left"),
                        ex("tmux select-layout tiled", "tiled"),
                    ],
                ),
            ],
        },
        Section {
            topic: Topic::Copy,
            title: "Copy mode",
            entries: &[
                key("[", "Enter copy mode (scroll and select)", &[]),
                key("q or Esc", "Leave copy mode", &[]),
                key("Arrows/PgUp/PgDn", "Move or scroll in copy mode", &[]),
                key("Space", "Start a selection", &[]),
                key("Enter", "Copy the selection and leave", &[]),
                key("]", "Paste the most recent buffer", &[]),
                key("=", "Pick a buffer to paste", &[]),
                key("#", "List paste buffers", &[]),
                cmd(
                    "tmux save-buffer <file>",
                    "Save the buffer to a file",
                    &[ex("tmux save-buffer ~/output.txt", "")],
                ),
                cmd(
                    "tmux set -g mouse on",
                    "Enable the mouse for scrolling, selecting and resizing",
                    &[],
                ),
            ],
        },
        Section {
            topic: Topic::Other,
            title: "Other",
            entries: &[
                key("?", "Show every key binding", &[]),
                key(
                    ":",
                    "Open the command prompt",
                    &[
                        ex("Ctrl+B :set -g mouse on", "enable the mouse"),
                        ex("Ctrl+B :source ~/.tmux.conf", "reload the config"),
                    ],
                ),
                key("t", "Show a clock", &[]),
                key("i", "Show current window info", &[]),
                key("~", "Show earlier tmux messages", &[]),
                cmd("tmux source-file ~/.tmux.conf", "Reload the config file", &[]),
                cmd(
                    "tmux send-keys -t <target> \"<cmd>\" Enter",
                    "Type a command into a session or window",
                    &[ex("tmux send-keys -t dev \"ls -la\" Enter", "run ls in dev")],
                ),
                cmd(
                    "tmux capture-pane -p",
                    "Print the pane contents",
                    &[ex("tmux capture-pane -p > output.txt", "save the screen")],
                ),
                cmd(
                    "tmux new -d -s <name> \"<cmd>\"",
                    "Start a detached session running a command",
                    &[ex("tmux new -d -s server \"python app.py\"", "a background service")],
                ),
                cmd(
                    "tmux pipe-pane -o \"cat >> log.txt\"",
                    "Log pane output to a file as it arrives",
                    &[],
                ),
            ],
        },
    ],
};
