//! Key events to terminal input bytes.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// What a key press means while attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Send these bytes to the remote terminal.
    Input(Vec<u8>),
    /// Leave the session (`Ctrl-]`).
    Detach,
    /// Nothing to send.
    Ignore,
}

/// Maps a crossterm key event to what the attach loop should do.
pub fn translate(key: KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Ignore;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    if ctrl && matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5')) {
        return KeyAction::Detach;
    }

    let bytes: Vec<u8> = match key.code {
        KeyCode::Char(c) if ctrl => match control_byte(c) {
            Some(b) => vec![b],
            None => return KeyAction::Ignore,
        },
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => b"\r".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => b"\t".to_vec(),
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::F(n) => match function_key(n) {
            Some(seq) => seq.as_bytes().to_vec(),
            None => return KeyAction::Ignore,
        },
        _ => return KeyAction::Ignore,
    };

    if alt {
        let mut prefixed = Vec::with_capacity(bytes.len() + 1);
        prefixed.push(0x1b);
        prefixed.extend(bytes);
        KeyAction::Input(prefixed)
    } else {
        KeyAction::Input(bytes)
    }
}

fn control_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        'A'..='Z' => Some(c as u8 - b'A' + 1),
        ' ' | '@' | '2' => Some(0),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '-' => Some(0x1f),
        _ => None,
    }
}

fn function_key(n: u8) -> Option<&'static str> {
    Some(match n {
        1 => "\x1bOP",
        2 => "\x1bOQ",
        3 => "\x1bOR",
        4 => "\x1bOS",
        5 => "\x1b[15~",
        6 => "\x1b[17~",
        7 => "\x1b[18~",
        8 => "\x1b[19~",
        9 => "\x1b[20~",
        10 => "\x1b[21~",
        11 => "\x1b[23~",
        12 => "\x1b[24~",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_plain_characters() {
        assert_eq!(
            translate(press(KeyCode::Char('x'), KeyModifiers::NONE)),
            KeyAction::Input(b"x".to_vec())
        );
        assert_eq!(
            translate(press(KeyCode::Char('é'), KeyModifiers::NONE)),
            KeyAction::Input("é".as_bytes().to_vec())
        );
    }

    #[test]
    fn test_control_characters() {
        assert_eq!(
            translate(press(KeyCode::Char('a'), KeyModifiers::CONTROL)),
            KeyAction::Input(vec![0x01])
        );
        assert_eq!(
            translate(press(KeyCode::Char('b'), KeyModifiers::CONTROL)),
            KeyAction::Input(vec![0x02])
        );
        assert_eq!(
            translate(press(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            KeyAction::Input(vec![0x03])
        );
    }

    #[test]
    fn test_ctrl_bracket_detaches() {
        assert_eq!(
            translate(press(KeyCode::Char(']'), KeyModifiers::CONTROL)),
            KeyAction::Detach
        );
    }

    #[test]
    fn test_navigation_keys() {
        assert_eq!(
            translate(press(KeyCode::Up, KeyModifiers::NONE)),
            KeyAction::Input(b"\x1b[A".to_vec())
        );
        assert_eq!(
            translate(press(KeyCode::Enter, KeyModifiers::NONE)),
            KeyAction::Input(b"\r".to_vec())
        );
        assert_eq!(
            translate(press(KeyCode::F(5), KeyModifiers::NONE)),
            KeyAction::Input(b"\x1b[15~".to_vec())
        );
        assert_eq!(translate(press(KeyCode::F(20), KeyModifiers::NONE)), KeyAction::Ignore);
    }

    #[test]
    fn test_alt_prefixes_escape() {
        assert_eq!(
            translate(press(KeyCode::Char('f'), KeyModifiers::ALT)),
            KeyAction::Input(b"\x1bf".to_vec())
        );
    }

    #[test]
    fn test_release_ignored() {
        let mut key = press(KeyCode::Char('x'), KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert_eq!(translate(key), KeyAction::Ignore);
    }
}
