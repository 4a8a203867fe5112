//! VT escape-sequence emulator.
//!
//! A byte-at-a-time state machine in the VT500 parser family, extended with
//! the xterm sequences the wire protocol requires. Each `next()` call
//! consumes one unit of work from the data stream, either a run of printable
//! text (the hot path) or one control function, and applies it to the
//! [`Terminal`] facade. Sequences the terminal must answer come back as a
//! [`Response`] for the caller to write to the PTY.
//!
//! Unknown or malformed sequences are logged at debug level and dropped;
//! the emulator never fails on them.

use tracing::debug;

use crate::stream::{is_control, Result, StreamError, TerminalDataStream};

use super::terminal::{CharacterSet, CursorShape, DynamicColorKind, Mode, Terminal};

/// Reply that must be sent back to the PTY
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// DSR 6: `ESC [ row ; col R`
    CursorPosition(usize, usize),
    /// DSR 5: terminal is OK
    StatusOk,
    /// Primary device attributes (VT220)
    PrimaryDeviceAttributes,
    /// Secondary device attributes
    SecondaryDeviceAttributes,
    /// OSC 4 query reply
    PaletteColor { index: u8, rgb: (u8, u8, u8) },
    /// OSC 10/11/12 query reply
    DynamicColor { code: u16, rgb: (u8, u8, u8) },
    /// XTGETTCAP for a capability we do not carry
    TermcapInvalid,
}

impl Response {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::CursorPosition(row, col) => format!("\x1b[{row};{col}R").into_bytes(),
            Response::StatusOk => b"\x1b[0n".to_vec(),
            Response::PrimaryDeviceAttributes => b"\x1b[?62;c".to_vec(),
            Response::SecondaryDeviceAttributes => b"\x1b[>1;10;0c".to_vec(),
            Response::PaletteColor { index, rgb } => {
                format!("\x1b]4;{};{}\x1b\\", index, x11_color(*rgb)).into_bytes()
            }
            Response::DynamicColor { code, rgb } => {
                format!("\x1b]{};{}\x1b\\", code, x11_color(*rgb)).into_bytes()
            }
            Response::TermcapInvalid => b"\x1bP0+r\x1b\\".to_vec(),
        }
    }
}

fn x11_color((r, g, b): (u8, u8, u8)) -> String {
    // 16-bit-per-channel form as xterm reports it
    format!(
        "rgb:{:04x}/{:04x}/{:04x}",
        r as u16 * 257,
        g as u16 * 257,
        b as u16 * 257
    )
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
enum EmuState {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    /// ESC seen inside an OSC string (candidate ST)
    OscEscape,
    DcsString,
    DcsEscape,
    /// SOS/PM/APC are consumed and dropped
    SosPmApcString,
    SosPmApcEscape,
}

/// Printable-run length per `next()` call
const TEXT_RUN_MAX: usize = 8192;

/// Largest accepted numeric parameter; the protocol caps at 16 bits
const PARAM_MAX: u16 = u16::MAX;

pub struct Emulator {
    stream: TerminalDataStream,
    state: EmuState,
    params: Vec<u16>,
    current_param: Option<u16>,
    intermediates: Vec<u8>,
    /// CSI prefix byte `? > = <` if any
    prefix: Option<char>,
    osc: String,
    dcs: String,
    ended: bool,
}

/// Outcome of feeding one character: `None` keeps collecting,
/// `Some(response)` completes a unit of work.
type Step = Option<Option<Response>>;

impl Emulator {
    pub fn new(stream: TerminalDataStream) -> Self {
        Self {
            stream,
            state: EmuState::Ground,
            params: Vec::with_capacity(16),
            intermediates: Vec::with_capacity(4),
            current_param: None,
            prefix: None,
            osc: String::new(),
            dcs: String::new(),
            ended: false,
        }
    }

    /// False once the stream has signaled end
    pub fn has_next(&self) -> bool {
        !self.ended
    }

    /// Consume one unit of work and apply it to `terminal`
    pub fn next<T: Terminal>(&mut self, terminal: &mut T) -> Result<Option<Response>> {
        loop {
            let ch = match self.stream.get_char() {
                Ok(ch) => ch,
                Err(StreamError::End) => {
                    self.ended = true;
                    return Err(StreamError::End);
                }
                Err(e) => return Err(e),
            };

            if self.state == EmuState::Ground && !is_control(ch) {
                self.stream.push_back_char(ch);
                let run = self.stream.read_non_control_characters(TEXT_RUN_MAX)?;
                terminal.write_characters(&run);
                return Ok(None);
            }

            if let Some(result) = self.advance(ch, terminal) {
                return Ok(result);
            }
        }
    }

    fn advance<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        if is_control(ch) && !self.in_string_state() {
            return self.execute_control(ch, terminal);
        }
        match self.state {
            EmuState::Ground => Some(None),
            EmuState::Escape => self.escape(ch, terminal),
            EmuState::EscapeIntermediate => self.escape_intermediate(ch, terminal),
            EmuState::CsiEntry => self.csi_entry(ch, terminal),
            EmuState::CsiParam => self.csi_param(ch, terminal),
            EmuState::CsiIntermediate => self.csi_intermediate(ch, terminal),
            EmuState::CsiIgnore => self.csi_ignore(ch),
            EmuState::OscString => self.osc_string(ch, terminal),
            EmuState::OscEscape => self.osc_escape(ch, terminal),
            EmuState::DcsString => self.dcs_string(ch),
            EmuState::DcsEscape => self.dcs_escape(ch),
            EmuState::SosPmApcString => self.sos_pm_apc(ch),
            EmuState::SosPmApcEscape => self.sos_pm_apc_escape(ch),
        }
    }

    fn in_string_state(&self) -> bool {
        matches!(
            self.state,
            EmuState::OscString
                | EmuState::OscEscape
                | EmuState::DcsString
                | EmuState::DcsEscape
                | EmuState::SosPmApcString
                | EmuState::SosPmApcEscape
        )
    }

    /// C0 handling outside string states. CAN and SUB abort any sequence in
    /// progress; ESC restarts; the rest execute without disturbing the
    /// collected sequence.
    fn execute_control<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        match ch {
            '\u{1b}' => {
                self.enter_escape();
                None
            }
            '\u{18}' | '\u{1a}' => {
                self.state = EmuState::Ground;
                Some(None)
            }
            '\u{07}' => {
                terminal.bell();
                self.finish_if_ground()
            }
            '\u{08}' => {
                terminal.backspace();
                self.finish_if_ground()
            }
            '\u{09}' => {
                terminal.horizontal_tab(1);
                self.finish_if_ground()
            }
            '\n' | '\u{0b}' | '\u{0c}' => {
                terminal.line_feed();
                self.finish_if_ground()
            }
            '\r' => {
                terminal.carriage_return();
                self.finish_if_ground()
            }
            '\u{0e}' => {
                terminal.shift_out();
                self.finish_if_ground()
            }
            '\u{0f}' => {
                terminal.shift_in();
                self.finish_if_ground()
            }
            _ => self.finish_if_ground(),
        }
    }

    /// A C0 executed mid-sequence does not complete the unit
    fn finish_if_ground(&self) -> Step {
        if self.state == EmuState::Ground {
            Some(None)
        } else {
            None
        }
    }

    fn enter_escape(&mut self) {
        self.state = EmuState::Escape;
        self.params.clear();
        self.intermediates.clear();
        self.current_param = None;
        self.prefix = None;
    }

    fn escape<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        match ch {
            '[' => {
                self.state = EmuState::CsiEntry;
                None
            }
            ']' => {
                self.state = EmuState::OscString;
                self.osc.clear();
                None
            }
            'P' => {
                self.state = EmuState::DcsString;
                self.dcs.clear();
                None
            }
            'X' | '^' | '_' => {
                self.state = EmuState::SosPmApcString;
                None
            }
            '7' => self.dispatch_esc(terminal, |t| t.save_cursor()),
            '8' => self.dispatch_esc(terminal, |t| t.restore_cursor()),
            'D' => self.dispatch_esc(terminal, |t| t.index()),
            'E' => self.dispatch_esc(terminal, |t| t.next_line()),
            'H' => self.dispatch_esc(terminal, |t| t.set_tab_stop()),
            'M' => self.dispatch_esc(terminal, |t| t.reverse_index()),
            'N' => self.dispatch_esc(terminal, |t| t.single_shift(2)),
            'O' => self.dispatch_esc(terminal, |t| t.single_shift(3)),
            'c' => self.dispatch_esc(terminal, |t| t.full_reset()),
            '=' => self.dispatch_esc(terminal, |t| t.set_application_keypad(true)),
            '>' => self.dispatch_esc(terminal, |t| t.set_application_keypad(false)),
            'Z' => {
                self.state = EmuState::Ground;
                Some(Some(Response::PrimaryDeviceAttributes))
            }
            '\\' => {
                // Stray string terminator
                self.state = EmuState::Ground;
                Some(None)
            }
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch as u8);
                self.state = EmuState::EscapeIntermediate;
                None
            }
            _ => {
                debug!(?ch, "ignoring unknown escape sequence");
                self.state = EmuState::Ground;
                Some(None)
            }
        }
    }

    fn dispatch_esc<T: Terminal>(&mut self, terminal: &mut T, action: impl FnOnce(&mut T)) -> Step {
        action(terminal);
        self.state = EmuState::Ground;
        Some(None)
    }

    fn escape_intermediate<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        match ch {
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch as u8);
                None
            }
            '\u{30}'..='\u{7e}' => {
                self.esc_intermediate_dispatch(ch, terminal);
                self.state = EmuState::Ground;
                Some(None)
            }
            _ => {
                self.state = EmuState::Ground;
                Some(None)
            }
        }
    }

    fn esc_intermediate_dispatch<T: Terminal>(&mut self, final_ch: char, terminal: &mut T) {
        match (self.intermediates.first().copied(), final_ch) {
            (Some(b'#'), '8') => terminal.screen_alignment_fill(),
            (Some(slot @ (b'(' | b')' | b'*' | b'+')), designator) => {
                let index = match slot {
                    b'(' => 0,
                    b')' => 1,
                    b'*' => 2,
                    _ => 3,
                };
                match designator {
                    'B' => terminal.designate_charset(index, CharacterSet::Ascii),
                    '0' => terminal.designate_charset(index, CharacterSet::DecSpecial),
                    'A' => terminal.designate_charset(index, CharacterSet::Uk),
                    other => debug!(?other, "ignoring unknown charset designator"),
                }
            }
            (intermediate, ch) => {
                debug!(?intermediate, ?ch, "ignoring unknown escape intermediate");
            }
        }
    }

    fn csi_entry<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        match ch {
            '?' | '>' | '=' | '<' => {
                self.prefix = Some(ch);
                self.state = EmuState::CsiParam;
                None
            }
            _ => self.csi_param(ch, terminal),
        }
    }

    fn csi_param<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        self.state = EmuState::CsiParam;
        match ch {
            '0'..='9' => {
                let digit = ch as u16 - '0' as u16;
                self.current_param = Some(
                    self.current_param
                        .unwrap_or(0)
                        .saturating_mul(10)
                        .saturating_add(digit)
                        .min(PARAM_MAX),
                );
                None
            }
            // Sub-parameter separators are flattened; the 38;5 and 38;2
            // forms cover what the protocol requires
            ';' | ':' => {
                self.params.push(self.current_param.take().unwrap_or(0));
                None
            }
            '\u{20}'..='\u{2f}' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                self.intermediates.push(ch as u8);
                self.state = EmuState::CsiIntermediate;
                None
            }
            '\u{40}'..='\u{7e}' => {
                if let Some(p) = self.current_param.take() {
                    self.params.push(p);
                }
                let response = self.csi_dispatch(ch, terminal);
                self.state = EmuState::Ground;
                Some(response)
            }
            '?' | '>' | '=' | '<' => {
                // Prefix bytes are only valid immediately after the CSI
                self.state = EmuState::CsiIgnore;
                None
            }
            _ => {
                self.state = EmuState::CsiIgnore;
                None
            }
        }
    }

    fn csi_intermediate<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        match ch {
            '\u{20}'..='\u{2f}' => {
                self.intermediates.push(ch as u8);
                None
            }
            '\u{40}'..='\u{7e}' => {
                let response = self.csi_dispatch(ch, terminal);
                self.state = EmuState::Ground;
                Some(response)
            }
            _ => {
                self.state = EmuState::CsiIgnore;
                None
            }
        }
    }

    fn csi_ignore(&mut self, ch: char) -> Step {
        if ('\u{40}'..='\u{7e}').contains(&ch) {
            self.state = EmuState::Ground;
            Some(None)
        } else {
            None
        }
    }

    /// Missing parameter, or an explicit 0 where the default is 1
    fn count(&self, index: usize) -> usize {
        self.params.get(index).copied().unwrap_or(1).max(1) as usize
    }

    fn param_or(&self, index: usize, default: u16) -> u16 {
        self.params.get(index).copied().unwrap_or(default)
    }

    fn csi_dispatch<T: Terminal>(&mut self, final_ch: char, terminal: &mut T) -> Option<Response> {
        match (self.prefix, self.intermediates.first().copied(), final_ch) {
            (None, None, 'A') => terminal.cursor_up(self.count(0)),
            (None, None, 'B') => terminal.cursor_down(self.count(0)),
            (None, None, 'C') => terminal.cursor_forward(self.count(0)),
            (None, None, 'D') => terminal.cursor_backward(self.count(0)),
            (None, None, 'E') => {
                terminal.cursor_down(self.count(0));
                terminal.carriage_return();
            }
            (None, None, 'F') => {
                terminal.cursor_up(self.count(0));
                terminal.carriage_return();
            }
            (None, None, 'G' | '`') => terminal.cursor_horizontal_absolute(self.count(0)),
            (None, None, 'H' | 'f') => terminal.cursor_position(self.count(0), self.count(1)),
            (None, None, 'd') => terminal.line_position_absolute(self.count(0)),
            (None, None, 'I') => terminal.horizontal_tab(self.count(0)),
            (None, None, 'Z') => terminal.backward_tab(self.count(0)),
            (None, None, 'J') => terminal.erase_in_display(self.param_or(0, 0)),
            (None, None, 'K') => terminal.erase_in_line(self.param_or(0, 0)),
            (None, None, 'L') => terminal.insert_lines(self.count(0)),
            (None, None, 'M') => terminal.delete_lines(self.count(0)),
            (None, None, '@') => terminal.insert_blank_characters(self.count(0)),
            (None, None, 'P') => terminal.delete_characters(self.count(0)),
            (None, None, 'X') => terminal.erase_characters(self.count(0)),
            (None, None, 'b') => terminal.repeat_last_character(self.count(0)),
            (None, None, 'S') => terminal.scroll_up(self.count(0)),
            (None, None, 'T') => terminal.scroll_down(self.count(0)),
            (None, None, 'r') => {
                let top = self.params.first().copied().filter(|p| *p > 0);
                let bottom = self.params.get(1).copied().filter(|p| *p > 0);
                terminal.set_scroll_region(
                    top.map(|p| p as usize),
                    bottom.map(|p| p as usize),
                );
            }
            (None, None, 'm') => terminal.select_graphic_rendition(&self.params),
            (None, None, 's') => terminal.save_cursor(),
            (None, None, 'u') => terminal.restore_cursor(),
            (None, None, 'g') => terminal.clear_tab_stop(self.param_or(0, 0)),
            (None, None, 'n') => match self.param_or(0, 0) {
                5 => return Some(Response::StatusOk),
                6 => {
                    let (row, col) = terminal.cursor_report();
                    return Some(Response::CursorPosition(row, col));
                }
                other => debug!(other, "ignoring unknown DSR request"),
            },
            (None, None, 'c') => return Some(Response::PrimaryDeviceAttributes),
            (Some('>'), None, 'c') => return Some(Response::SecondaryDeviceAttributes),
            (None, None, 'h') => {
                for &p in &self.params {
                    terminal.set_mode(Mode::Ansi(p), true);
                }
            }
            (None, None, 'l') => {
                for &p in &self.params {
                    terminal.set_mode(Mode::Ansi(p), false);
                }
            }
            (Some('?'), None, 'h') => {
                for &p in &self.params {
                    terminal.set_mode(Mode::DecPrivate(p), true);
                }
            }
            (Some('?'), None, 'l') => {
                for &p in &self.params {
                    terminal.set_mode(Mode::DecPrivate(p), false);
                }
            }
            (None, Some(b' '), 'q') => {
                terminal.set_cursor_shape(CursorShape::from_decscusr(self.param_or(0, 0)));
            }
            (Some('>'), None, 'm') => {
                // XTMODKEYS; only the modifyOtherKeys resource is carried
                if self.param_or(0, 0) == 4 {
                    terminal.set_modify_other_keys(self.param_or(1, 0).min(2) as u8);
                }
            }
            (None, Some(b'!'), 'p') => terminal.full_reset(),
            (None, None, 't') => {
                debug!(params = ?self.params, "ignoring window manipulation request");
            }
            (prefix, intermediate, ch) => {
                debug!(
                    ?prefix,
                    ?intermediate,
                    params = ?self.params,
                    final_byte = ?ch,
                    "ignoring unknown CSI sequence"
                );
            }
        }
        None
    }

    fn osc_string<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        match ch {
            '\u{07}' => {
                let response = self.osc_dispatch(terminal);
                self.state = EmuState::Ground;
                Some(response)
            }
            '\u{1b}' => {
                self.state = EmuState::OscEscape;
                None
            }
            '\u{9c}' => {
                let response = self.osc_dispatch(terminal);
                self.state = EmuState::Ground;
                Some(response)
            }
            '\u{18}' | '\u{1a}' => {
                self.state = EmuState::Ground;
                Some(None)
            }
            ch if is_control(ch) => None,
            _ => {
                self.osc.push(ch);
                None
            }
        }
    }

    fn osc_escape<T: Terminal>(&mut self, ch: char, terminal: &mut T) -> Step {
        if ch == '\\' {
            let response = self.osc_dispatch(terminal);
            self.state = EmuState::Ground;
            Some(response)
        } else {
            // Not a terminator: dispatch what we have and restart as a
            // fresh escape sequence
            let response = self.osc_dispatch(terminal);
            self.enter_escape();
            let follow = self.escape(ch, terminal);
            match follow {
                Some(None) | None => Some(response),
                Some(r) => Some(r),
            }
        }
    }

    fn osc_dispatch<T: Terminal>(&mut self, terminal: &mut T) -> Option<Response> {
        let osc = std::mem::take(&mut self.osc);
        let (code, rest) = match osc.split_once(';') {
            Some((code, rest)) => (code, rest),
            None => (osc.as_str(), ""),
        };
        let Ok(code) = code.parse::<u16>() else {
            debug!(osc = %osc, "ignoring OSC with non-numeric code");
            return None;
        };
        match code {
            0 | 1 | 2 => terminal.set_window_title(rest),
            4 => return self.osc_palette(rest, terminal),
            8 => {
                let uri = rest.split_once(';').map(|(_, uri)| uri).unwrap_or("");
                terminal.set_hyperlink(if uri.is_empty() { None } else { Some(uri) });
            }
            10 | 11 | 12 => {
                let kind = match code {
                    10 => DynamicColorKind::Foreground,
                    11 => DynamicColorKind::Background,
                    _ => DynamicColorKind::Cursor,
                };
                if rest == "?" {
                    return Some(Response::DynamicColor {
                        code,
                        rgb: terminal.dynamic_color(kind),
                    });
                }
                match parse_color(rest) {
                    Some(rgb) => terminal.set_dynamic_color(kind, rgb),
                    None => debug!(spec = %rest, "ignoring unparseable dynamic color"),
                }
            }
            104 => {
                if rest.is_empty() {
                    terminal.reset_palette(None);
                } else {
                    for index in rest.split(';').filter_map(|s| s.parse::<u8>().ok()) {
                        terminal.reset_palette(Some(index));
                    }
                }
            }
            110 => terminal.reset_dynamic_color(DynamicColorKind::Foreground),
            111 => terminal.reset_dynamic_color(DynamicColorKind::Background),
            112 => terminal.reset_dynamic_color(DynamicColorKind::Cursor),
            other => debug!(code = other, "ignoring unknown OSC"),
        }
        None
    }

    /// OSC 4 payload: `index;spec` pairs, `?` spec meaning a query
    fn osc_palette<T: Terminal>(&mut self, rest: &str, terminal: &mut T) -> Option<Response> {
        let mut fields = rest.split(';');
        let mut response = None;
        while let (Some(index), Some(spec)) = (fields.next(), fields.next()) {
            let Ok(index) = index.parse::<u8>() else {
                continue;
            };
            if spec == "?" {
                if response.is_none() {
                    response = Some(Response::PaletteColor {
                        index,
                        rgb: terminal.palette_color(index),
                    });
                }
            } else if let Some(rgb) = parse_color(spec) {
                terminal.set_palette_color(index, rgb);
            } else {
                debug!(index, spec = %spec, "ignoring unparseable palette color");
            }
        }
        response
    }

    fn dcs_string(&mut self, ch: char) -> Step {
        match ch {
            '\u{1b}' => {
                self.state = EmuState::DcsEscape;
                None
            }
            '\u{18}' | '\u{1a}' => {
                self.state = EmuState::Ground;
                Some(None)
            }
            _ => {
                self.dcs.push(ch);
                None
            }
        }
    }

    fn dcs_escape(&mut self, ch: char) -> Step {
        if ch == '\\' {
            let response = self.dcs_dispatch();
            self.state = EmuState::Ground;
            Some(response)
        } else {
            self.enter_escape();
            self.dcs.clear();
            None
        }
    }

    fn dcs_dispatch(&mut self) -> Option<Response> {
        let dcs = std::mem::take(&mut self.dcs);
        if dcs.starts_with("+q") {
            // XTGETTCAP: we advertise no capabilities over this channel
            return Some(Response::TermcapInvalid);
        }
        debug!(dcs = %dcs, "ignoring device control string");
        None
    }

    fn sos_pm_apc(&mut self, ch: char) -> Step {
        match ch {
            '\u{1b}' => {
                self.state = EmuState::SosPmApcEscape;
                None
            }
            '\u{18}' | '\u{1a}' | '\u{9c}' => {
                self.state = EmuState::Ground;
                Some(None)
            }
            _ => None,
        }
    }

    fn sos_pm_apc_escape(&mut self, ch: char) -> Step {
        if ch == '\\' {
            self.state = EmuState::Ground;
            Some(None)
        } else {
            self.enter_escape();
            None
        }
    }
}

/// Parse an X11-style color spec: `rgb:RR/GG/BB` with 1..4 hex digits per
/// channel, or `#RRGGBB`.
fn parse_color(spec: &str) -> Option<(u8, u8, u8)> {
    if let Some(hex) = spec.strip_prefix('#') {
        if hex.len() == 6 {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            return Some((r, g, b));
        }
        return None;
    }
    let channels = spec.strip_prefix("rgb:")?;
    let mut parts = channels.split('/');
    let r = scale_channel(parts.next()?)?;
    let g = scale_channel(parts.next()?)?;
    let b = scale_channel(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some((r, g, b))
}

fn scale_channel(hex: &str) -> Option<u8> {
    if hex.is_empty() || hex.len() > 4 {
        return None;
    }
    let value = u32::from_str_radix(hex, 16).ok()?;
    let max = (1u32 << (4 * hex.len() as u32)) - 1;
    Some((value * 255 / max) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ChannelConnector;
    use crate::term::buffer::TerminalTextBuffer;
    use crate::term::style::{Color, StyleFlags};
    use crate::term::terminal::ScreenTerminal;

    /// Run `input` through a fresh emulator and terminal, collecting the
    /// responses, until the stream ends.
    fn run(cols: usize, rows: usize, input: &[u8]) -> (ScreenTerminal, Vec<Response>) {
        let (connector, endpoint) = ChannelConnector::pair("parser-test");
        endpoint.feed(input);
        endpoint.close();
        let mut emulator = Emulator::new(TerminalDataStream::new(connector));
        let mut terminal = ScreenTerminal::new(TerminalTextBuffer::new(cols, rows, 1000));
        let mut responses = Vec::new();
        while emulator.has_next() {
            match emulator.next(&mut terminal) {
                Ok(Some(response)) => responses.push(response),
                Ok(None) => {}
                Err(StreamError::End) => break,
                Err(e) => panic!("stream error: {e}"),
            }
        }
        (terminal, responses)
    }

    fn cursor(term: &ScreenTerminal) -> (usize, usize) {
        let c = term.buffer().lock().cursor();
        (c.row, c.col)
    }

    #[test]
    fn test_plain_text() {
        let (term, _) = run(80, 24, b"Hello");
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "Hello");
        assert_eq!(state.cursor().col, 5);
    }

    #[test]
    fn test_cursor_movement() {
        let (term, _) = run(80, 24, b"\x1b[5;10H");
        assert_eq!(cursor(&term), (4, 9));
    }

    #[test]
    fn test_cup_zero_treated_as_one() {
        let (term, _) = run(80, 24, b"\x1b[5;5H\x1b[0;0H");
        assert_eq!(cursor(&term), (0, 0));
    }

    #[test]
    fn test_sgr_colors() {
        let (term, _) = run(80, 24, b"\x1b[31mA\x1b[0mB");
        let state = term.buffer().lock();
        assert_eq!(state.char_at(0, 0), Some('A'));
        assert_eq!(state.style_at(0, 0).unwrap().fg, Color::Palette(1));
        assert_eq!(state.char_at(0, 1), Some('B'));
        assert_eq!(state.style_at(0, 1).unwrap().fg, Color::Default);
    }

    #[test]
    fn test_sgr_extended_and_bright() {
        let (term, _) = run(80, 24, b"\x1b[38;5;196;48;2;1;2;3;1mX");
        let state = term.buffer().lock();
        let style = state.style_at(0, 0).unwrap();
        assert_eq!(style.fg, Color::Palette(196));
        assert_eq!(style.bg, Color::Rgb(1, 2, 3));
        assert!(style.flags.contains(StyleFlags::BOLD));
    }

    #[test]
    fn test_missing_params_default_to_one() {
        let (term, _) = run(80, 24, b"\x1b[5;10H\x1b[A\x1b[2D");
        assert_eq!(cursor(&term), (3, 7));
    }

    #[test]
    fn test_can_aborts_sequence() {
        // CAN in the middle of a CSI drops it; the 'm' prints literally
        let (term, _) = run(80, 24, b"\x1b[3\x18mok");
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "mok");
    }

    #[test]
    fn test_control_executes_inside_csi() {
        let (term, _) = run(80, 24, b"ab\x1b[\r2Cc");
        // CR executed mid-sequence, then the CSI completed: col 0 + 2 = 2
        let state = term.buffer().lock();
        assert_eq!(state.char_at(0, 2), Some('c'));
    }

    #[test]
    fn test_unknown_csi_ignored() {
        let (term, _) = run(80, 24, b"\x1b[99Xyz\x1b[<5qok");
        let state = term.buffer().lock();
        // ECH 99 is fine; the <-prefixed sequence is swallowed whole
        assert_eq!(state.line_text(0), "yzok");
    }

    #[test]
    fn test_osc_title_bel_and_st() {
        let (term, _) = run(80, 24, b"\x1b]2;first\x07x");
        assert_eq!(term.buffer().lock().title(), "first");
        let (term, _) = run(80, 24, b"\x1b]0;second\x1b\\y");
        assert_eq!(term.buffer().lock().title(), "second");
    }

    #[test]
    fn test_osc_hyperlink() {
        let (term, _) = run(80, 24, b"\x1b]8;;https://example.com\x1b\\link\x1b]8;;\x1b\\plain");
        let state = term.buffer().lock();
        let linked = state.style_at(0, 0).unwrap();
        assert_eq!(linked.link.as_deref(), Some("https://example.com"));
        let plain = state.style_at(0, 4).unwrap();
        assert!(plain.link.is_none());
    }

    #[test]
    fn test_osc_palette_set_and_query() {
        let (_, responses) = run(80, 24, b"\x1b]4;1;rgb:ff/00/00\x07\x1b]4;1;?\x07");
        assert_eq!(
            responses,
            vec![Response::PaletteColor {
                index: 1,
                rgb: (255, 0, 0)
            }]
        );
    }

    #[test]
    fn test_osc_dynamic_color_query() {
        let (_, responses) = run(80, 24, b"\x1b]10;#123456\x07\x1b]10;?\x07");
        assert_eq!(
            responses,
            vec![Response::DynamicColor {
                code: 10,
                rgb: (0x12, 0x34, 0x56)
            }]
        );
    }

    #[test]
    fn test_dsr_cursor_position() {
        let (_, responses) = run(80, 24, b"\x1b[3;4H\x1b[6n");
        assert_eq!(responses, vec![Response::CursorPosition(3, 4)]);
        assert_eq!(responses[0].to_bytes(), b"\x1b[3;4R");
    }

    #[test]
    fn test_device_attributes() {
        let (_, responses) = run(80, 24, b"\x1b[c\x1b[>c");
        assert_eq!(
            responses,
            vec![
                Response::PrimaryDeviceAttributes,
                Response::SecondaryDeviceAttributes
            ]
        );
    }

    #[test]
    fn test_decstbm_and_origin() {
        let (term, _) = run(80, 24, b"\x1b[5;10r\x1b[?6h\x1b[H");
        assert_eq!(term.scroll_region(), (4, 9));
        assert_eq!(cursor(&term), (4, 0));
    }

    #[test]
    fn test_private_modes_dispatch() {
        let (term, _) = run(80, 24, b"\x1b[?1h\x1b[?7l\x1b[?2004h");
        let modes = term.modes();
        assert!(modes.application_cursor);
        assert!(!modes.auto_wrap);
        assert!(modes.bracketed_paste);
    }

    #[test]
    fn test_alternate_buffer_sequence() {
        let (term, _) = run(
            80,
            24,
            b"primary\x1b[?1049halt\x1b[?1049l",
        );
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "primary");
        assert!(!state.is_using_alternate());
        assert_eq!(state.cursor().col, 7);
        assert_eq!(state.history_size(), 0);
    }

    #[test]
    fn test_decaln_fills_screen() {
        let (term, _) = run(10, 3, b"\x1b#8");
        let state = term.buffer().lock();
        for row in 0..3 {
            assert_eq!(state.line_text(row), "EEEEEEEEEE");
        }
    }

    #[test]
    fn test_charset_designation() {
        let (term, _) = run(10, 2, b"\x1b(0qq\x1b(Bq");
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "──q");
    }

    #[test]
    fn test_decsc_decrc_restores_style() {
        let (term, _) = run(80, 24, b"\x1b[2;3H\x1b[1;31m\x1b7\x1b[10;10H\x1b[0m\x1b8");
        assert_eq!(cursor(&term), (1, 2));
        let (_, responses) = run(80, 24, b"\x1b7\x1b[5;5H\x1b8\x1b[6n");
        assert_eq!(responses, vec![Response::CursorPosition(1, 1)]);
    }

    #[test]
    fn test_dcs_consumed_and_ignored() {
        let (term, responses) = run(80, 24, b"\x1bPunknown stuff\x1b\\ok");
        assert_eq!(term.buffer().lock().line_text(0), "ok");
        assert!(responses.is_empty());
    }

    #[test]
    fn test_dcs_termcap_query_answered() {
        let (_, responses) = run(80, 24, b"\x1bP+q544e\x1b\\");
        assert_eq!(responses, vec![Response::TermcapInvalid]);
    }

    #[test]
    fn test_sos_pm_apc_swallowed() {
        let (term, _) = run(80, 24, b"\x1b_private data\x1b\\visible");
        assert_eq!(term.buffer().lock().line_text(0), "visible");
    }

    #[test]
    fn test_param_overflow_clamped() {
        let (term, _) = run(80, 24, b"\x1b[99999999999C");
        assert_eq!(cursor(&term), (0, 79));
    }

    #[test]
    fn test_scroll_up_down() {
        let (term, _) = run(10, 4, b"a\r\nb\r\nc\x1b[2S");
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "c");
        assert_eq!(state.history_size(), 2);
    }

    #[test]
    fn test_xtmodkeys_sets_level() {
        let (term, _) = run(80, 24, b"\x1b[>4;2m");
        assert_eq!(term.modes().modify_other_keys, 2);
    }

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("rgb:ff/00/80"), Some((255, 0, 128)));
        assert_eq!(parse_color("rgb:ffff/0000/8080"), Some((255, 0, 128)));
        assert_eq!(parse_color("#102030"), Some((16, 32, 48)));
        assert_eq!(parse_color("red"), None);
    }
}
