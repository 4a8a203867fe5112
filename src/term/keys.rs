//! Key and mouse event encoding.
//!
//! Turns host input events into the byte sequences the process expects,
//! honoring application cursor keys, keypad mode, LNM, and the active mouse
//! protocol. An empty result means "no mapping" and the caller drops the
//! event.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

use super::terminal::{MouseFormat, MouseMode, TerminalModes};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// xterm modifier parameter: 1 + shift + 2*alt + 4*ctrl
fn modifier_code(mods: Modifiers) -> u8 {
    1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
        + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
        + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
}

/// Map a key event to PTY bytes under the current modes
pub fn encode_key(event: &KeyEvent, modes: &TerminalModes) -> Vec<u8> {
    let mods = Modifiers::from(event.modifiers);

    match event.code {
        KeyCode::Char(ch) => encode_char(ch, mods, modes),

        KeyCode::Enter => {
            if modes.linefeed_newline {
                vec![0x0D, 0x0A]
            } else {
                vec![0x0D]
            }
        }

        KeyCode::Backspace => {
            if mods.contains(Modifiers::ALT) {
                vec![0x1B, 0x7F]
            } else {
                vec![0x7F]
            }
        }

        KeyCode::Tab => {
            if mods.contains(Modifiers::SHIFT) {
                b"\x1b[Z".to_vec()
            } else {
                vec![0x09]
            }
        }
        KeyCode::BackTab => b"\x1b[Z".to_vec(),

        KeyCode::Esc => vec![0x1B],

        KeyCode::Up => arrow_key(b'A', mods, modes),
        KeyCode::Down => arrow_key(b'B', mods, modes),
        KeyCode::Right => arrow_key(b'C', mods, modes),
        KeyCode::Left => arrow_key(b'D', mods, modes),

        KeyCode::Home => special_key(b'H', mods, modes),
        KeyCode::End => special_key(b'F', mods, modes),
        KeyCode::PageUp => tilde_key(5, mods),
        KeyCode::PageDown => tilde_key(6, mods),
        KeyCode::Insert => tilde_key(2, mods),
        KeyCode::Delete => tilde_key(3, mods),

        KeyCode::F(n) => function_key(n, mods),

        _ => Vec::new(),
    }
}

fn encode_char(ch: char, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
    // modifyOtherKeys level 2: modified printables go out as CSI 27 ; mod ; code ~
    if modes.modify_other_keys >= 2
        && !mods.is_empty()
        && mods != Modifiers::SHIFT
        && ch.is_ascii_graphic()
    {
        return format!("\x1b[27;{};{}~", modifier_code(mods), ch as u32).into_bytes();
    }

    // Ctrl + letter = control character
    if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
        if ch.is_ascii_lowercase() {
            return vec![(ch as u8) - b'a' + 1];
        } else if ch.is_ascii_uppercase() {
            return vec![(ch as u8) - b'A' + 1];
        } else {
            match ch {
                '@' | '`' | ' ' => return vec![0x00],
                '[' => return vec![0x1B],
                '\\' => return vec![0x1C],
                ']' => return vec![0x1D],
                '^' | '~' => return vec![0x1E],
                '_' | '?' => return vec![0x1F],
                _ => {}
            }
        }
    }

    if mods.contains(Modifiers::CTRL) && mods.contains(Modifiers::ALT) && ch.is_ascii_alphabetic()
    {
        let ctrl_code = (ch.to_ascii_lowercase() as u8) - b'a' + 1;
        return vec![0x1B, ctrl_code];
    }

    // Alt + key = ESC prefix
    if mods.contains(Modifiers::ALT) && !mods.contains(Modifiers::CTRL) {
        let mut bytes = vec![0x1B];
        bytes.extend(ch.to_string().as_bytes());
        return bytes;
    }

    ch.to_string().into_bytes()
}

fn arrow_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
    if !mods.is_empty() {
        format!("\x1b[1;{}{}", modifier_code(mods), key as char).into_bytes()
    } else if modes.application_cursor {
        vec![0x1B, b'O', key]
    } else {
        vec![0x1B, b'[', key]
    }
}

fn special_key(key: u8, mods: Modifiers, modes: &TerminalModes) -> Vec<u8> {
    if !mods.is_empty() {
        format!("\x1b[1;{}{}", modifier_code(mods), key as char).into_bytes()
    } else if modes.application_cursor {
        vec![0x1B, b'O', key]
    } else {
        vec![0x1B, b'[', key]
    }
}

fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
    if mods.is_empty() {
        format!("\x1b[{code}~").into_bytes()
    } else {
        format!("\x1b[{};{}~", code, modifier_code(mods)).into_bytes()
    }
}

fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
    let base: Vec<u8> = match n {
        1 => b"\x1bOP".to_vec(),
        2 => b"\x1bOQ".to_vec(),
        3 => b"\x1bOR".to_vec(),
        4 => b"\x1bOS".to_vec(),
        5 => b"\x1b[15~".to_vec(),
        6 => b"\x1b[17~".to_vec(),
        7 => b"\x1b[18~".to_vec(),
        8 => b"\x1b[19~".to_vec(),
        9 => b"\x1b[20~".to_vec(),
        10 => b"\x1b[21~".to_vec(),
        11 => b"\x1b[23~".to_vec(),
        12 => b"\x1b[24~".to_vec(),
        _ => return Vec::new(),
    };

    if mods.is_empty() {
        base
    } else {
        let mod_code = modifier_code(mods);
        match n {
            1..=4 => {
                let key = base[2];
                format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
            }
            _ => {
                let code_str = String::from_utf8_lossy(&base[2..base.len() - 1]).into_owned();
                format!("\x1b[{code_str};{mod_code}~").into_bytes()
            }
        }
    }
}

/// Encode a mouse event for the active reporting protocol. Empty when mouse
/// reporting is off or the event is not reportable in the current mode.
pub fn encode_mouse_event(event: &MouseEvent, modes: &TerminalModes) -> Vec<u8> {
    let (button, pressed) = match event.kind {
        MouseEventKind::Down(btn) => (mouse_button_code(btn), true),
        MouseEventKind::Up(btn) => (mouse_button_code(btn), false),
        MouseEventKind::Drag(btn) => (mouse_button_code(btn) + 32, true),
        MouseEventKind::Moved => (35, true),
        MouseEventKind::ScrollUp => (64, true),
        MouseEventKind::ScrollDown => (65, true),
        MouseEventKind::ScrollLeft => (66, true),
        MouseEventKind::ScrollRight => (67, true),
    };

    let reportable = match modes.mouse {
        MouseMode::None => false,
        MouseMode::X10 => matches!(event.kind, MouseEventKind::Down(_)),
        MouseMode::Normal => !matches!(event.kind, MouseEventKind::Moved | MouseEventKind::Drag(_)),
        MouseMode::ButtonEvent => !matches!(event.kind, MouseEventKind::Moved),
        MouseMode::AnyEvent => true,
    };
    if !reportable {
        return Vec::new();
    }

    let mut cb = button;
    if event.modifiers.contains(KeyModifiers::SHIFT) {
        cb += 4;
    }
    if event.modifiers.contains(KeyModifiers::ALT) {
        cb += 8;
    }
    if event.modifiers.contains(KeyModifiers::CONTROL) {
        cb += 16;
    }

    // 1-based protocol coordinates
    let x = event.column.saturating_add(1);
    let y = event.row.saturating_add(1);

    match modes.mouse_format {
        MouseFormat::Sgr => {
            let suffix = if pressed { 'M' } else { 'm' };
            format!("\x1b[<{cb};{x};{y}{suffix}").into_bytes()
        }
        MouseFormat::Urxvt => format!("\x1b[{};{};{}M", cb + 32, x, y).into_bytes(),
        MouseFormat::Normal | MouseFormat::Utf8 => {
            let cb = if pressed { cb } else { 3 };
            if x <= 223 && y <= 223 {
                vec![0x1b, b'[', b'M', cb + 32, x as u8 + 32, y as u8 + 32]
            } else {
                Vec::new()
            }
        }
    }
}

/// Focus in/out report, empty unless the process asked for them (mode 1004)
pub fn encode_focus_event(gained: bool, modes: &TerminalModes) -> Vec<u8> {
    if !modes.focus_reporting {
        return Vec::new();
    }
    if gained {
        b"\x1b[I".to_vec()
    } else {
        b"\x1b[O".to_vec()
    }
}

/// Pasted text, wrapped in the bracketed-paste markers when mode 2004 is on
pub fn encode_paste(text: &str, modes: &TerminalModes) -> Vec<u8> {
    if modes.bracketed_paste {
        let mut bytes = b"\x1b[200~".to_vec();
        bytes.extend_from_slice(text.as_bytes());
        bytes.extend_from_slice(b"\x1b[201~");
        bytes
    } else {
        text.as_bytes().to_vec()
    }
}

fn mouse_button_code(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(encode_key(&event, &modes), b"a".to_vec());

        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(encode_key(&event, &modes), vec![0x03]);

        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(encode_key(&event, &modes), vec![0x1B, b'x']);
    }

    #[test]
    fn test_arrow_keys_follow_cursor_mode() {
        let mut modes = TerminalModes::default();

        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(encode_key(&event, &modes), b"\x1b[A".to_vec());

        modes.application_cursor = true;
        assert_eq!(encode_key(&event, &modes), b"\x1bOA".to_vec());

        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(encode_key(&event, &modes), b"\x1b[1;5A".to_vec());
    }

    #[test]
    fn test_enter_honors_lnm() {
        let mut modes = TerminalModes::default();
        let event = key_event(KeyCode::Enter, KeyModifiers::NONE);
        assert_eq!(encode_key(&event, &modes), vec![0x0D]);
        modes.linefeed_newline = true;
        assert_eq!(encode_key(&event, &modes), vec![0x0D, 0x0A]);
    }

    #[test]
    fn test_function_keys() {
        let modes = TerminalModes::default();

        let event = key_event(KeyCode::F(1), KeyModifiers::NONE);
        assert_eq!(encode_key(&event, &modes), b"\x1bOP".to_vec());

        let event = key_event(KeyCode::F(5), KeyModifiers::NONE);
        assert_eq!(encode_key(&event, &modes), b"\x1b[15~".to_vec());

        let event = key_event(KeyCode::F(5), KeyModifiers::SHIFT);
        assert_eq!(encode_key(&event, &modes), b"\x1b[15;2~".to_vec());
    }

    #[test]
    fn test_modify_other_keys() {
        let mut modes = TerminalModes::default();
        modes.modify_other_keys = 2;
        let event = key_event(KeyCode::Char('i'), KeyModifiers::CONTROL);
        assert_eq!(encode_key(&event, &modes), b"\x1b[27;5;105~".to_vec());
    }

    #[test]
    fn test_mouse_reporting_gated_by_mode() {
        let mut modes = TerminalModes::default();
        let event = MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        };
        assert!(encode_mouse_event(&event, &modes).is_empty());

        modes.mouse = MouseMode::Normal;
        assert_eq!(
            encode_mouse_event(&event, &modes),
            vec![0x1b, b'[', b'M', 32, 33, 33]
        );

        modes.mouse_format = MouseFormat::Sgr;
        assert_eq!(encode_mouse_event(&event, &modes), b"\x1b[<0;1;1M".to_vec());
    }

    #[test]
    fn test_mouse_release_sgr() {
        let modes = TerminalModes {
            mouse: MouseMode::Normal,
            mouse_format: MouseFormat::Sgr,
            ..Default::default()
        };
        let event = MouseEvent {
            kind: MouseEventKind::Up(MouseButton::Left),
            column: 10,
            row: 20,
            modifiers: KeyModifiers::NONE,
        };
        assert_eq!(encode_mouse_event(&event, &modes), b"\x1b[<0;11;21m".to_vec());
    }

    #[test]
    fn test_focus_and_paste_follow_modes() {
        let mut modes = TerminalModes::default();
        assert!(encode_focus_event(true, &modes).is_empty());
        assert_eq!(encode_paste("hi", &modes), b"hi".to_vec());
        modes.focus_reporting = true;
        modes.bracketed_paste = true;
        assert_eq!(encode_focus_event(true, &modes), b"\x1b[I".to_vec());
        assert_eq!(encode_focus_event(false, &modes), b"\x1b[O".to_vec());
        assert_eq!(encode_paste("hi", &modes), b"\x1b[200~hi\x1b[201~".to_vec());
    }

    #[test]
    fn test_motion_only_in_any_event_mode() {
        let mut modes = TerminalModes {
            mouse: MouseMode::ButtonEvent,
            mouse_format: MouseFormat::Sgr,
            ..Default::default()
        };
        let event = MouseEvent {
            kind: MouseEventKind::Moved,
            column: 0,
            row: 0,
            modifiers: KeyModifiers::NONE,
        };
        assert!(encode_mouse_event(&event, &modes).is_empty());
        modes.mouse = MouseMode::AnyEvent;
        assert!(!encode_mouse_event(&event, &modes).is_empty());
    }
}
