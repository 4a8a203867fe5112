//! The terminal facade and its screen-backed implementation.
//!
//! The emulator decodes control functions and calls facade methods; the
//! `ScreenTerminal` executes them against the text buffer. It owns everything
//! the wire protocol can address that is not cell content: cursor arithmetic,
//! graphic rendition, scroll region, character sets, tab stops, and the mode
//! bag.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;
use unicode_width::UnicodeWidthChar;

use super::buffer::{BufferState, TerminalTextBuffer};
use super::style::{Color, StyleFlags, TextStyle};
use super::{RequestOrigin, TermSize};

/// A mode number with its namespace
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    /// `CSI n h/l`
    Ansi(u16),
    /// `CSI ? n h/l`
    DecPrivate(u16),
}

/// Charset designated into G0..G3
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CharacterSet {
    #[default]
    Ascii,
    /// DEC special graphics (line drawing)
    DecSpecial,
    /// UK national: `#` maps to `£`
    Uk,
}

impl CharacterSet {
    pub fn translate(&self, ch: char) -> char {
        match self {
            CharacterSet::Ascii => ch,
            CharacterSet::Uk => {
                if ch == '#' {
                    '£'
                } else {
                    ch
                }
            }
            CharacterSet::DecSpecial => match ch {
                '`' => '◆',
                'a' => '▒',
                'f' => '°',
                'g' => '±',
                'j' => '┘',
                'k' => '┐',
                'l' => '┌',
                'm' => '└',
                'n' => '┼',
                'o' => '⎺',
                'p' => '⎻',
                'q' => '─',
                'r' => '⎼',
                's' => '⎽',
                't' => '├',
                'u' => '┤',
                'v' => '┴',
                'w' => '┬',
                'x' => '│',
                'y' => '≤',
                'z' => '≥',
                '{' => 'π',
                '|' => '≠',
                '}' => '£',
                '~' => '·',
                _ => ch,
            },
        }
    }
}

/// Mouse reporting mode (DEC private 9/1000/1002/1003)
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MouseMode {
    #[default]
    None,
    X10,
    Normal,
    ButtonEvent,
    AnyEvent,
}

/// Mouse coordinate encoding (DEC private 1005/1006/1015)
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MouseFormat {
    #[default]
    Normal,
    Utf8,
    Sgr,
    Urxvt,
}

/// DECSCUSR cursor style
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CursorShape {
    #[default]
    Default,
    BlinkingBlock,
    SteadyBlock,
    BlinkingUnderline,
    SteadyUnderline,
    BlinkingBar,
    SteadyBar,
}

impl CursorShape {
    pub fn from_decscusr(n: u16) -> Self {
        match n {
            0 => CursorShape::Default,
            1 => CursorShape::BlinkingBlock,
            2 => CursorShape::SteadyBlock,
            3 => CursorShape::BlinkingUnderline,
            4 => CursorShape::SteadyUnderline,
            5 => CursorShape::BlinkingBar,
            6 => CursorShape::SteadyBar,
            _ => CursorShape::Default,
        }
    }
}

/// Dynamic color slots addressed by OSC 10/11/12
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DynamicColorKind {
    Foreground,
    Background,
    Cursor,
}

impl DynamicColorKind {
    pub fn osc_code(&self) -> u16 {
        match self {
            DynamicColorKind::Foreground => 10,
            DynamicColorKind::Background => 11,
            DynamicColorKind::Cursor => 12,
        }
    }
}

/// The mode bag
#[derive(Clone, Debug)]
pub struct TerminalModes {
    pub application_cursor: bool,
    pub application_keypad: bool,
    pub auto_wrap: bool,
    pub origin: bool,
    pub insert: bool,
    pub reverse_wraparound: bool,
    /// ANSI mode 20 (LNM)
    pub linefeed_newline: bool,
    pub bracketed_paste: bool,
    pub focus_reporting: bool,
    pub cursor_blink: bool,
    pub mouse: MouseMode,
    pub mouse_format: MouseFormat,
    /// xterm modifyOtherKeys level (0..=2)
    pub modify_other_keys: u8,
}

impl Default for TerminalModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            application_keypad: false,
            auto_wrap: true,
            origin: false,
            insert: false,
            reverse_wraparound: false,
            linefeed_newline: false,
            bracketed_paste: false,
            focus_reporting: false,
            cursor_blink: false,
            mouse: MouseMode::None,
            mouse_format: MouseFormat::Normal,
            modify_other_keys: 0,
        }
    }
}

/// Everything DECSC preserves
#[derive(Clone)]
struct SavedCursor {
    row: usize,
    col: usize,
    style: TextStyle,
    charsets: [CharacterSet; 4],
    gl: usize,
    origin: bool,
    pending_wrap: bool,
}

/// The facade the emulator drives. One method per decoded control function;
/// implementations must never panic on out-of-range arguments; clamp and
/// carry on.
pub trait Terminal {
    fn write_characters(&mut self, text: &str);
    fn carriage_return(&mut self);
    fn line_feed(&mut self);
    fn next_line(&mut self);
    fn backspace(&mut self);
    fn horizontal_tab(&mut self, count: usize);
    fn backward_tab(&mut self, count: usize);
    fn bell(&mut self);

    fn cursor_up(&mut self, count: usize);
    fn cursor_down(&mut self, count: usize);
    fn cursor_forward(&mut self, count: usize);
    fn cursor_backward(&mut self, count: usize);
    /// CUP, 1-based; (0,0) is treated as (1,1)
    fn cursor_position(&mut self, row: usize, col: usize);
    fn cursor_horizontal_absolute(&mut self, col: usize);
    fn line_position_absolute(&mut self, row: usize);

    fn erase_in_display(&mut self, selector: u16);
    fn erase_in_line(&mut self, selector: u16);
    fn insert_lines(&mut self, count: usize);
    fn delete_lines(&mut self, count: usize);
    fn insert_blank_characters(&mut self, count: usize);
    fn delete_characters(&mut self, count: usize);
    fn erase_characters(&mut self, count: usize);
    fn repeat_last_character(&mut self, count: usize);
    fn scroll_up(&mut self, count: usize);
    fn scroll_down(&mut self, count: usize);

    /// DECSTBM, 1-based inclusive; `None` means the screen edge
    fn set_scroll_region(&mut self, top: Option<usize>, bottom: Option<usize>);
    fn select_graphic_rendition(&mut self, params: &[u16]);
    fn save_cursor(&mut self);
    fn restore_cursor(&mut self);
    fn set_mode(&mut self, mode: Mode, enabled: bool);
    fn set_application_keypad(&mut self, enabled: bool);
    /// XTMODKEYS resource 4
    fn set_modify_other_keys(&mut self, level: u8);

    fn designate_charset(&mut self, slot: usize, set: CharacterSet);
    fn shift_out(&mut self);
    fn shift_in(&mut self);
    fn single_shift(&mut self, slot: usize);

    fn set_tab_stop(&mut self);
    fn clear_tab_stop(&mut self, selector: u16);

    fn set_window_title(&mut self, title: &str);
    fn set_hyperlink(&mut self, uri: Option<&str>);
    fn set_cursor_shape(&mut self, shape: CursorShape);

    fn set_palette_color(&mut self, index: u8, rgb: (u8, u8, u8));
    fn reset_palette(&mut self, index: Option<u8>);
    fn palette_color(&self, index: u8) -> (u8, u8, u8);
    fn set_dynamic_color(&mut self, kind: DynamicColorKind, rgb: (u8, u8, u8));
    fn reset_dynamic_color(&mut self, kind: DynamicColorKind);
    fn dynamic_color(&self, kind: DynamicColorKind) -> (u8, u8, u8);

    fn index(&mut self);
    fn reverse_index(&mut self);
    fn screen_alignment_fill(&mut self);
    fn full_reset(&mut self);

    /// Cursor as DSR 6 reports it: 1-based, origin-relative under DECOM
    fn cursor_report(&self) -> (usize, usize);
}

/// Facade implementation over a [`TerminalTextBuffer`].
pub struct ScreenTerminal {
    buffer: TerminalTextBuffer,
    style: TextStyle,
    modes: TerminalModes,
    scroll_top: usize,
    scroll_bottom: usize,
    pending_wrap: bool,
    tab_stops: BTreeSet<usize>,
    charsets: [CharacterSet; 4],
    gl: usize,
    single_shift_slot: Option<usize>,
    saved_primary: Option<SavedCursor>,
    saved_alternate: Option<SavedCursor>,
    last_printed: Option<char>,
    palette_overrides: HashMap<u8, (u8, u8, u8)>,
    dynamic_overrides: HashMap<u16, (u8, u8, u8)>,
    cursor_shape: CursorShape,
}

fn default_tab_stops(cols: usize) -> BTreeSet<usize> {
    (0..cols).filter(|c| c > &0 && c % 8 == 0).collect()
}

impl ScreenTerminal {
    pub fn new(buffer: TerminalTextBuffer) -> Self {
        let cols = buffer.lock().columns();
        let rows = buffer.lock().rows();
        Self {
            buffer,
            style: TextStyle::default(),
            modes: TerminalModes::default(),
            scroll_top: 0,
            scroll_bottom: rows.saturating_sub(1),
            pending_wrap: false,
            tab_stops: default_tab_stops(cols),
            charsets: [CharacterSet::Ascii; 4],
            gl: 0,
            single_shift_slot: None,
            saved_primary: None,
            saved_alternate: None,
            last_printed: None,
            palette_overrides: HashMap::new(),
            dynamic_overrides: HashMap::new(),
            cursor_shape: CursorShape::Default,
        }
    }

    pub fn buffer(&self) -> &TerminalTextBuffer {
        &self.buffer
    }

    pub fn modes(&self) -> &TerminalModes {
        &self.modes
    }

    pub fn scroll_region(&self) -> (usize, usize) {
        (self.scroll_top, self.scroll_bottom)
    }

    pub fn pending_wrap(&self) -> bool {
        self.pending_wrap
    }

    /// The style newly written cells will carry
    pub fn current_style(&self) -> TextStyle {
        self.style.clone()
    }

    pub fn cursor_shape(&self) -> CursorShape {
        self.cursor_shape
    }

    /// Byte sequence for a key event under the current modes; empty means no
    /// mapping and the caller drops the event.
    pub fn get_code_for_key(&self, event: &crossterm::event::KeyEvent) -> Vec<u8> {
        super::keys::encode_key(event, &self.modes)
    }

    /// The upstream closed; mark the model and stop accepting output
    pub fn disconnected(&mut self) {
        self.buffer.lock().set_disconnected();
    }

    /// Apply a new size to the model. Reflow happens in the buffer; this
    /// re-derives the region, tab stops, and saved cursors.
    pub fn resize(&mut self, size: TermSize, _origin: RequestOrigin) {
        let old_cols;
        let old_rows;
        {
            let state = self.buffer.lock();
            old_cols = state.columns();
            old_rows = state.rows();
        }
        let region_was_full = self.scroll_top == 0 && self.scroll_bottom == old_rows.saturating_sub(1);

        self.buffer.lock().resize(size);

        let (cols, rows) = {
            let state = self.buffer.lock();
            (state.columns(), state.rows())
        };
        if region_was_full || self.scroll_bottom >= rows || self.scroll_top >= self.scroll_bottom {
            self.scroll_top = 0;
            self.scroll_bottom = rows.saturating_sub(1);
        }
        for col in old_cols..cols {
            if col > 0 && col % 8 == 0 {
                self.tab_stops.insert(col);
            }
        }
        self.tab_stops.retain(|c| *c < cols);
        for saved in [&mut self.saved_primary, &mut self.saved_alternate]
            .into_iter()
            .flatten()
        {
            saved.row = saved.row.min(rows.saturating_sub(1));
            saved.col = saved.col.min(cols.saturating_sub(1));
        }
        self.pending_wrap = false;
    }

    fn map_char(&mut self, ch: char) -> char {
        let slot = self.single_shift_slot.take().unwrap_or(self.gl);
        if ch.is_ascii() {
            self.charsets[slot].translate(ch)
        } else {
            ch
        }
    }

    /// LF constrained to the scroll region
    fn index_within_region(&self, state: &mut BufferState) {
        let cursor = state.cursor();
        if cursor.row == self.scroll_bottom {
            state.scroll_area(self.scroll_top, self.scroll_bottom, 1);
        } else if cursor.row + 1 < state.rows() {
            state.set_cursor_position(cursor.row + 1, cursor.col);
        }
    }

    fn print_char(&mut self, state: &mut BufferState, ch: char, width: usize) {
        let cols = state.columns();
        if self.pending_wrap {
            self.pending_wrap = false;
            if self.modes.auto_wrap {
                let row = state.cursor().row;
                state.set_line_wrapped(row, true);
                state.set_cursor_position(row, 0);
                self.index_within_region(state);
            }
        }
        let cursor = state.cursor();
        let mut col = cursor.col;
        let mut row = cursor.row;
        if width == 2 && col + 2 > cols {
            if self.modes.auto_wrap && cols >= 2 {
                state.set_line_wrapped(row, true);
                state.set_cursor_position(row, 0);
                self.index_within_region(state);
                let cursor = state.cursor();
                col = cursor.col;
                row = cursor.row;
            } else {
                col = cols.saturating_sub(2);
            }
        }
        if self.modes.insert {
            state.insert_blank_chars(row, col, width, &self.style);
        }
        state.put_char(row, col, ch, width, &self.style);
        self.last_printed = Some(ch);
        let next = col + width;
        if next >= cols {
            state.set_cursor_position(row, cols.saturating_sub(1));
            self.pending_wrap = true;
        } else {
            state.set_cursor_position(row, next);
        }
    }

    fn move_cursor(&mut self, state: &mut BufferState, row: usize, col: usize) {
        self.pending_wrap = false;
        state.set_cursor_position(row, col);
    }

    /// Erase fill carries the current background per the original behavior
    fn erase_style(&self) -> TextStyle {
        TextStyle {
            bg: self.style.bg,
            ..Default::default()
        }
    }
}

impl Terminal for ScreenTerminal {
    fn write_characters(&mut self, text: &str) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        if !state.is_connected() {
            return;
        }
        for ch in text.chars() {
            let ch = self.map_char(ch);
            let width = ch.width().unwrap_or(0);
            if width == 0 {
                let cursor = state.cursor();
                // In the pending-wrap state the last glyph sits at the
                // cursor column itself
                let col = if self.pending_wrap {
                    cursor.col + 1
                } else {
                    cursor.col
                };
                state.append_combining(cursor.row, col, ch);
                continue;
            }
            self.print_char(&mut state, ch, width);
        }
    }

    fn carriage_return(&mut self) {
        self.pending_wrap = false;
        let mut state = self.buffer.lock();
        let row = state.cursor().row;
        state.set_cursor_position(row, 0);
    }

    fn line_feed(&mut self) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        self.pending_wrap = false;
        self.index_within_region(&mut state);
        if self.modes.linefeed_newline {
            let row = state.cursor().row;
            state.set_cursor_position(row, 0);
        }
    }

    fn next_line(&mut self) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        self.pending_wrap = false;
        self.index_within_region(&mut state);
        let row = state.cursor().row;
        state.set_cursor_position(row, 0);
    }

    fn backspace(&mut self) {
        let mut state = self.buffer.lock();
        let cursor = state.cursor();
        if self.pending_wrap {
            self.pending_wrap = false;
        }
        if cursor.col > 0 {
            state.set_cursor_position(cursor.row, cursor.col - 1);
        } else if self.modes.reverse_wraparound && self.modes.auto_wrap && cursor.row > self.scroll_top
        {
            let cols = state.columns();
            state.set_cursor_position(cursor.row - 1, cols - 1);
        }
    }

    fn horizontal_tab(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cols = state.columns();
        let cursor = state.cursor();
        let mut col = cursor.col;
        for _ in 0..count.max(1) {
            col = self
                .tab_stops
                .range(col + 1..)
                .next()
                .copied()
                .unwrap_or(cols.saturating_sub(1));
        }
        state.set_cursor_position(cursor.row, col);
    }

    fn backward_tab(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        let mut col = cursor.col;
        for _ in 0..count.max(1) {
            col = self.tab_stops.range(..col).next_back().copied().unwrap_or(0);
        }
        state.set_cursor_position(cursor.row, col);
    }

    fn bell(&mut self) {
        self.buffer.lock().ring_bell();
    }

    fn cursor_up(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        let floor = if cursor.row >= self.scroll_top {
            self.scroll_top
        } else {
            0
        };
        let row = cursor.row.saturating_sub(count.max(1)).max(floor);
        state.set_cursor_position(row, cursor.col);
    }

    fn cursor_down(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        let ceil = if cursor.row <= self.scroll_bottom {
            self.scroll_bottom
        } else {
            state.rows().saturating_sub(1)
        };
        let row = (cursor.row + count.max(1)).min(ceil);
        state.set_cursor_position(row, cursor.col);
    }

    fn cursor_forward(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        let col = (cursor.col + count.max(1)).min(state.columns().saturating_sub(1));
        state.set_cursor_position(cursor.row, col);
    }

    fn cursor_backward(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        let col = cursor.col.saturating_sub(count.max(1));
        state.set_cursor_position(cursor.row, col);
    }

    fn cursor_position(&mut self, row: usize, col: usize) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        let row = row.max(1) - 1;
        let col = col.max(1) - 1;
        let (row, col) = if self.modes.origin {
            (
                (self.scroll_top + row).min(self.scroll_bottom),
                col.min(state.columns().saturating_sub(1)),
            )
        } else {
            (row, col)
        };
        self.move_cursor(&mut state, row, col);
    }

    fn cursor_horizontal_absolute(&mut self, col: usize) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        let row = state.cursor().row;
        self.move_cursor(&mut state, row, col.max(1) - 1);
    }

    fn line_position_absolute(&mut self, row: usize) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        let col = state.cursor().col;
        let row = row.max(1) - 1;
        let row = if self.modes.origin {
            (self.scroll_top + row).min(self.scroll_bottom)
        } else {
            row
        };
        self.move_cursor(&mut state, row, col);
    }

    fn erase_in_display(&mut self, selector: u16) {
        let style = self.erase_style();
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cols = state.columns();
        let rows = state.rows();
        let cursor = state.cursor();
        match selector {
            0 => {
                state.clear_area(cursor.col, cursor.row, cols, cursor.row + 1, &style);
                state.clear_area(0, cursor.row + 1, cols, rows, &style);
            }
            1 => {
                state.clear_area(0, cursor.row, cursor.col + 1, cursor.row + 1, &style);
                state.clear_area(0, 0, cols, cursor.row, &style);
            }
            2 => state.clear_area(0, 0, cols, rows, &style),
            3 => {
                state.clear_area(0, 0, cols, rows, &style);
                state.clear_history();
            }
            _ => debug!(selector, "ignoring unknown ED selector"),
        }
    }

    fn erase_in_line(&mut self, selector: u16) {
        let style = self.erase_style();
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cols = state.columns();
        let cursor = state.cursor();
        match selector {
            0 => state.clear_area(cursor.col, cursor.row, cols, cursor.row + 1, &style),
            1 => state.clear_area(0, cursor.row, cursor.col + 1, cursor.row + 1, &style),
            2 => state.clear_area(0, cursor.row, cols, cursor.row + 1, &style),
            _ => debug!(selector, "ignoring unknown EL selector"),
        }
    }

    fn insert_lines(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        if cursor.row >= self.scroll_top && cursor.row <= self.scroll_bottom {
            state.insert_lines(cursor.row, count.max(1), self.scroll_bottom);
        }
    }

    fn delete_lines(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        if cursor.row >= self.scroll_top && cursor.row <= self.scroll_bottom {
            state.delete_lines(cursor.row, count.max(1), self.scroll_bottom);
        }
    }

    fn insert_blank_characters(&mut self, count: usize) {
        let style = self.erase_style();
        let mut state = self.buffer.lock();
        let cursor = state.cursor();
        state.insert_blank_chars(cursor.row, cursor.col, count.max(1), &style);
    }

    fn delete_characters(&mut self, count: usize) {
        let style = self.erase_style();
        let mut state = self.buffer.lock();
        let cursor = state.cursor();
        state.delete_chars(cursor.row, cursor.col, count.max(1), &style);
    }

    fn erase_characters(&mut self, count: usize) {
        let style = self.erase_style();
        let mut state = self.buffer.lock();
        let cursor = state.cursor();
        state.erase_chars(cursor.row, cursor.col, count.max(1), &style);
    }

    fn repeat_last_character(&mut self, count: usize) {
        if let Some(ch) = self.last_printed {
            let text: String = std::iter::repeat(ch).take(count.max(1)).collect();
            self.write_characters(&text);
        }
    }

    fn scroll_up(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        state.scroll_area(self.scroll_top, self.scroll_bottom, count.max(1) as isize);
    }

    fn scroll_down(&mut self, count: usize) {
        let mut state = self.buffer.lock();
        state.scroll_area(
            self.scroll_top,
            self.scroll_bottom,
            -(count.max(1) as isize),
        );
    }

    fn set_scroll_region(&mut self, top: Option<usize>, bottom: Option<usize>) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        let rows = state.rows();
        let top = top.unwrap_or(1).max(1) - 1;
        let bottom = bottom.unwrap_or(rows).clamp(1, rows) - 1;
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
            let home_row = if self.modes.origin { self.scroll_top } else { 0 };
            self.move_cursor(&mut state, home_row, 0);
        }
    }

    fn select_graphic_rendition(&mut self, params: &[u16]) {
        if params.is_empty() {
            self.style.reset();
            return;
        }
        let mut iter = params.iter().copied();
        while let Some(param) = iter.next() {
            match param {
                0 => self.style.reset(),
                1 => self.style.flags |= StyleFlags::BOLD,
                2 => self.style.flags |= StyleFlags::DIM,
                3 => self.style.flags |= StyleFlags::ITALIC,
                4 => self.style.flags |= StyleFlags::UNDERLINE,
                5 | 6 => self.style.flags |= StyleFlags::BLINK,
                7 => self.style.flags |= StyleFlags::INVERSE,
                8 => self.style.flags |= StyleFlags::HIDDEN,
                9 => self.style.flags |= StyleFlags::STRIKETHROUGH,
                21 => self.style.flags |= StyleFlags::UNDERLINE,
                22 => self.style.flags &= !(StyleFlags::BOLD | StyleFlags::DIM),
                23 => self.style.flags &= !StyleFlags::ITALIC,
                24 => self.style.flags &= !StyleFlags::UNDERLINE,
                25 => self.style.flags &= !StyleFlags::BLINK,
                27 => self.style.flags &= !StyleFlags::INVERSE,
                28 => self.style.flags &= !StyleFlags::HIDDEN,
                29 => self.style.flags &= !StyleFlags::STRIKETHROUGH,
                30..=37 => self.style.fg = Color::Palette((param - 30) as u8),
                38 => {
                    if let Some(color) = extended_color(&mut iter) {
                        self.style.fg = color;
                    }
                }
                39 => self.style.fg = Color::Default,
                40..=47 => self.style.bg = Color::Palette((param - 40) as u8),
                48 => {
                    if let Some(color) = extended_color(&mut iter) {
                        self.style.bg = color;
                    }
                }
                49 => self.style.bg = Color::Default,
                90..=97 => self.style.fg = Color::Palette((param - 90 + 8) as u8),
                100..=107 => self.style.bg = Color::Palette((param - 100 + 8) as u8),
                _ => debug!(param, "ignoring unknown SGR parameter"),
            }
        }
    }

    fn save_cursor(&mut self) {
        let state = self.buffer.lock();
        let cursor = state.cursor();
        let saved = SavedCursor {
            row: cursor.row,
            col: cursor.col,
            style: self.style.clone(),
            charsets: self.charsets,
            gl: self.gl,
            origin: self.modes.origin,
            pending_wrap: self.pending_wrap,
        };
        let slot = if state.is_using_alternate() {
            &mut self.saved_alternate
        } else {
            &mut self.saved_primary
        };
        *slot = Some(saved);
    }

    fn restore_cursor(&mut self) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        let saved = if state.is_using_alternate() {
            self.saved_alternate.clone()
        } else {
            self.saved_primary.clone()
        };
        if let Some(saved) = saved {
            state.set_cursor_position(saved.row, saved.col);
            self.style = saved.style;
            self.charsets = saved.charsets;
            self.gl = saved.gl;
            self.modes.origin = saved.origin;
            self.pending_wrap = saved.pending_wrap;
        } else {
            // DECRC with nothing saved homes the cursor with defaults
            state.set_cursor_position(0, 0);
            self.style = TextStyle::default();
            self.pending_wrap = false;
        }
    }

    fn set_mode(&mut self, mode: Mode, enabled: bool) {
        match mode {
            Mode::Ansi(4) => self.modes.insert = enabled,
            Mode::Ansi(20) => self.modes.linefeed_newline = enabled,
            Mode::Ansi(n) => debug!(mode = n, enabled, "ignoring unknown ANSI mode"),
            Mode::DecPrivate(n) => self.set_dec_private_mode(n, enabled),
        }
    }

    fn set_application_keypad(&mut self, enabled: bool) {
        self.modes.application_keypad = enabled;
    }

    fn set_modify_other_keys(&mut self, level: u8) {
        self.modes.modify_other_keys = level.min(2);
    }

    fn designate_charset(&mut self, slot: usize, set: CharacterSet) {
        if slot < 4 {
            self.charsets[slot] = set;
        }
    }

    fn shift_out(&mut self) {
        self.gl = 1;
    }

    fn shift_in(&mut self) {
        self.gl = 0;
    }

    fn single_shift(&mut self, slot: usize) {
        if slot < 4 {
            self.single_shift_slot = Some(slot);
        }
    }

    fn set_tab_stop(&mut self) {
        let col = self.buffer.lock().cursor().col;
        self.tab_stops.insert(col);
    }

    fn clear_tab_stop(&mut self, selector: u16) {
        match selector {
            0 => {
                let col = self.buffer.lock().cursor().col;
                self.tab_stops.remove(&col);
            }
            3 => self.tab_stops.clear(),
            _ => debug!(selector, "ignoring unknown TBC selector"),
        }
    }

    fn set_window_title(&mut self, title: &str) {
        self.buffer.lock().set_title(title);
    }

    fn set_hyperlink(&mut self, uri: Option<&str>) {
        self.style.link = uri.filter(|u| !u.is_empty()).map(std::sync::Arc::from);
    }

    fn set_cursor_shape(&mut self, shape: CursorShape) {
        self.cursor_shape = shape;
    }

    fn set_palette_color(&mut self, index: u8, rgb: (u8, u8, u8)) {
        self.palette_overrides.insert(index, rgb);
    }

    fn reset_palette(&mut self, index: Option<u8>) {
        match index {
            Some(i) => {
                self.palette_overrides.remove(&i);
            }
            None => self.palette_overrides.clear(),
        }
    }

    fn palette_color(&self, index: u8) -> (u8, u8, u8) {
        self.palette_overrides
            .get(&index)
            .copied()
            .unwrap_or_else(|| default_palette(index))
    }

    fn set_dynamic_color(&mut self, kind: DynamicColorKind, rgb: (u8, u8, u8)) {
        self.dynamic_overrides.insert(kind.osc_code(), rgb);
    }

    fn reset_dynamic_color(&mut self, kind: DynamicColorKind) {
        self.dynamic_overrides.remove(&kind.osc_code());
    }

    fn dynamic_color(&self, kind: DynamicColorKind) -> (u8, u8, u8) {
        if let Some(rgb) = self.dynamic_overrides.get(&kind.osc_code()) {
            return *rgb;
        }
        match kind {
            DynamicColorKind::Foreground => (229, 229, 229),
            DynamicColorKind::Background => (0, 0, 0),
            DynamicColorKind::Cursor => (255, 255, 255),
        }
    }

    fn index(&mut self) {
        let buffer = self.buffer.clone();
        let mut state = buffer.lock();
        self.pending_wrap = false;
        self.index_within_region(&mut state);
    }

    fn reverse_index(&mut self) {
        let mut state = self.buffer.lock();
        self.pending_wrap = false;
        let cursor = state.cursor();
        if cursor.row == self.scroll_top {
            state.scroll_area(self.scroll_top, self.scroll_bottom, -1);
        } else if cursor.row > 0 {
            state.set_cursor_position(cursor.row - 1, cursor.col);
        }
    }

    fn screen_alignment_fill(&mut self) {
        let mut state = self.buffer.lock();
        state.fill_with('E');
        let rows = state.rows();
        self.scroll_top = 0;
        self.scroll_bottom = rows.saturating_sub(1);
        self.pending_wrap = false;
        state.set_cursor_position(0, 0);
    }

    fn full_reset(&mut self) {
        let mut state = self.buffer.lock();
        state.use_alternate(false);
        let cols = state.columns();
        let rows = state.rows();
        state.clear_area(0, 0, cols, rows, &TextStyle::default());
        state.set_cursor_position(0, 0);
        state.set_cursor_visible(true);
        drop(state);
        self.style = TextStyle::default();
        self.modes = TerminalModes::default();
        self.scroll_top = 0;
        self.scroll_bottom = rows.saturating_sub(1);
        self.pending_wrap = false;
        self.tab_stops = default_tab_stops(cols);
        self.charsets = [CharacterSet::Ascii; 4];
        self.gl = 0;
        self.single_shift_slot = None;
        self.saved_primary = None;
        self.saved_alternate = None;
        self.last_printed = None;
        self.cursor_shape = CursorShape::Default;
    }

    fn cursor_report(&self) -> (usize, usize) {
        let cursor = self.buffer.lock().cursor();
        let row = if self.modes.origin {
            cursor.row.saturating_sub(self.scroll_top)
        } else {
            cursor.row
        };
        (row + 1, cursor.col + 1)
    }
}

impl ScreenTerminal {
    fn set_dec_private_mode(&mut self, mode: u16, enabled: bool) {
        let buffer = self.buffer.clone();
        match mode {
            1 => self.modes.application_cursor = enabled,
            3 => {
                // DECCOLM clears the screen and homes; the grid itself is not
                // resized, the host owns the window dimensions
                let mut state = buffer.lock();
                let cols = state.columns();
                let rows = state.rows();
                state.clear_area(0, 0, cols, rows, &self.erase_style());
                self.scroll_top = 0;
                self.scroll_bottom = rows.saturating_sub(1);
                self.move_cursor(&mut state, 0, 0);
            }
            6 => {
                self.modes.origin = enabled;
                let mut state = buffer.lock();
                let home_row = if enabled { self.scroll_top } else { 0 };
                self.move_cursor(&mut state, home_row, 0);
            }
            7 => {
                self.modes.auto_wrap = enabled;
                self.pending_wrap = false;
            }
            9 => self.modes.mouse = if enabled { MouseMode::X10 } else { MouseMode::None },
            12 => self.modes.cursor_blink = enabled,
            25 => buffer.lock().set_cursor_visible(enabled),
            45 => self.modes.reverse_wraparound = enabled,
            47 | 1047 => {
                buffer.lock().use_alternate(enabled);
            }
            1000 => {
                self.modes.mouse = if enabled {
                    MouseMode::Normal
                } else {
                    MouseMode::None
                }
            }
            1002 => {
                self.modes.mouse = if enabled {
                    MouseMode::ButtonEvent
                } else {
                    MouseMode::None
                }
            }
            1003 => {
                self.modes.mouse = if enabled {
                    MouseMode::AnyEvent
                } else {
                    MouseMode::None
                }
            }
            1004 => self.modes.focus_reporting = enabled,
            1005 => {
                self.modes.mouse_format = if enabled {
                    MouseFormat::Utf8
                } else {
                    MouseFormat::Normal
                }
            }
            1006 => {
                self.modes.mouse_format = if enabled {
                    MouseFormat::Sgr
                } else {
                    MouseFormat::Normal
                }
            }
            1015 => {
                self.modes.mouse_format = if enabled {
                    MouseFormat::Urxvt
                } else {
                    MouseFormat::Normal
                }
            }
            1048 => {
                if enabled {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enabled {
                    self.save_cursor();
                    let mut state = buffer.lock();
                    state.use_alternate(true);
                    state.set_cursor_position(0, 0);
                    self.pending_wrap = false;
                } else {
                    buffer.lock().use_alternate(false);
                    self.restore_cursor();
                }
            }
            2004 => self.modes.bracketed_paste = enabled,
            n => debug!(mode = n, enabled, "ignoring unknown DEC private mode"),
        }
    }
}

fn extended_color(iter: &mut impl Iterator<Item = u16>) -> Option<Color> {
    match iter.next()? {
        5 => Some(Color::Palette(iter.next()?.min(255) as u8)),
        2 => {
            let r = iter.next()?.min(255) as u8;
            let g = iter.next()?.min(255) as u8;
            let b = iter.next()?.min(255) as u8;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

/// xterm-256color default palette
pub fn default_palette(index: u8) -> (u8, u8, u8) {
    const BASE: [(u8, u8, u8); 16] = [
        (0, 0, 0),
        (205, 0, 0),
        (0, 205, 0),
        (205, 205, 0),
        (0, 0, 238),
        (205, 0, 205),
        (0, 205, 205),
        (229, 229, 229),
        (127, 127, 127),
        (255, 0, 0),
        (0, 255, 0),
        (255, 255, 0),
        (92, 92, 255),
        (255, 0, 255),
        (0, 255, 255),
        (255, 255, 255),
    ];
    match index {
        0..=15 => BASE[index as usize],
        16..=231 => {
            let i = index - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + 40 * v };
            (level(i / 36), level((i / 6) % 6), level(i % 6))
        }
        _ => {
            let v = 8 + 10 * (index - 232);
            (v, v, v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal(cols: usize, rows: usize) -> ScreenTerminal {
        ScreenTerminal::new(TerminalTextBuffer::new(cols, rows, 1000))
    }

    fn cursor(term: &ScreenTerminal) -> (usize, usize) {
        let c = term.buffer().lock().cursor();
        (c.row, c.col)
    }

    #[test]
    fn test_plain_text_advances_cursor() {
        let mut term = terminal(80, 24);
        term.write_characters("Hello");
        assert_eq!(term.buffer().lock().line_text(0), "Hello");
        assert_eq!(cursor(&term), (0, 5));
    }

    #[test]
    fn test_deferred_wrap() {
        let mut term = terminal(80, 24);
        term.cursor_position(5, 1);
        term.write_characters(&"y".repeat(80));
        // Cursor parks on the last column with the wrap pending
        assert_eq!(cursor(&term), (4, 79));
        assert!(term.pending_wrap());
        term.write_characters("X");
        assert_eq!(cursor(&term), (5, 1));
        let state = term.buffer().lock();
        assert!(state.is_line_wrapped(4));
        assert!(!state.is_line_wrapped(5));
        assert_eq!(state.char_at(5, 0), Some('X'));
    }

    #[test]
    fn test_cursor_motion_clears_pending_wrap() {
        let mut term = terminal(10, 4);
        term.write_characters(&"a".repeat(10));
        assert!(term.pending_wrap());
        term.cursor_backward(1);
        assert!(!term.pending_wrap());
        term.write_characters("b");
        assert_eq!(cursor(&term), (0, 9));
    }

    #[test]
    fn test_no_autowrap_overwrites_margin() {
        let mut term = terminal(10, 4);
        term.set_mode(Mode::DecPrivate(7), false);
        term.write_characters("0123456789ABC");
        let state = term.buffer().lock();
        assert_eq!(state.char_at(0, 9), Some('C'));
        assert_eq!(state.cursor().col, 9);
        assert_eq!(state.line_text(1), "");
    }

    #[test]
    fn test_scroll_region_linefeed() {
        let mut term = terminal(10, 10);
        term.set_scroll_region(Some(3), Some(6));
        term.cursor_position(6, 1);
        term.write_characters("bottom");
        term.line_feed();
        // Region scrolled, rows outside untouched, no history eviction
        let state = term.buffer().lock();
        assert_eq!(state.line_text(4), "bottom");
        assert_eq!(state.cursor().row, 5);
        assert_eq!(state.history_size(), 0);
    }

    #[test]
    fn test_origin_mode_homes_to_region() {
        let mut term = terminal(80, 24);
        term.set_scroll_region(Some(5), Some(10));
        term.set_mode(Mode::DecPrivate(6), true);
        term.cursor_position(1, 1);
        assert_eq!(cursor(&term), (4, 0));
        // CUP clamps to the region bottom under origin mode
        term.cursor_position(99, 1);
        assert_eq!(cursor(&term), (9, 0));
    }

    #[test]
    fn test_save_restore_cursor_round_trip() {
        let mut term = terminal(80, 24);
        term.cursor_position(3, 7);
        term.select_graphic_rendition(&[1, 31]);
        term.save_cursor();
        term.cursor_position(20, 40);
        term.select_graphic_rendition(&[0]);
        term.restore_cursor();
        assert_eq!(cursor(&term), (2, 6));
        assert_eq!(term.style.fg, Color::Palette(1));
        assert!(term.style.flags.contains(StyleFlags::BOLD));
    }

    #[test]
    fn test_alternate_screen_round_trip() {
        let mut term = terminal(80, 24);
        term.write_characters("primary");
        term.cursor_position(1, 8);
        term.set_mode(Mode::DecPrivate(1049), true);
        term.write_characters("alt");
        assert_eq!(term.buffer().lock().line_text(0), "alt");
        term.set_mode(Mode::DecPrivate(1049), false);
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "primary");
        assert_eq!(state.cursor(), crate::term::Cursor { row: 0, col: 7, visible: true });
        assert_eq!(state.history_size(), 0);
    }

    #[test]
    fn test_tab_stops() {
        let mut term = terminal(40, 4);
        term.horizontal_tab(1);
        assert_eq!(cursor(&term), (0, 8));
        term.horizontal_tab(2);
        assert_eq!(cursor(&term), (0, 24));
        term.backward_tab(1);
        assert_eq!(cursor(&term), (0, 16));
        term.clear_tab_stop(3);
        term.cursor_position(1, 1);
        term.horizontal_tab(1);
        assert_eq!(cursor(&term), (0, 39));
    }

    #[test]
    fn test_dec_line_drawing_charset() {
        let mut term = terminal(10, 2);
        term.designate_charset(0, CharacterSet::DecSpecial);
        term.write_characters("qx");
        let state = term.buffer().lock();
        assert_eq!(state.char_at(0, 0), Some('─'));
        assert_eq!(state.char_at(0, 1), Some('│'));
    }

    #[test]
    fn test_shift_out_selects_g1() {
        let mut term = terminal(10, 2);
        term.designate_charset(1, CharacterSet::DecSpecial);
        term.shift_out();
        term.write_characters("q");
        term.shift_in();
        term.write_characters("q");
        let state = term.buffer().lock();
        assert_eq!(state.char_at(0, 0), Some('─'));
        assert_eq!(state.char_at(0, 1), Some('q'));
    }

    #[test]
    fn test_erase_in_display_from_cursor() {
        let mut term = terminal(10, 3);
        for row in 1..=3 {
            term.cursor_position(row, 1);
            term.write_characters("XXXXXXXXXX");
        }
        term.cursor_position(2, 5);
        term.erase_in_display(0);
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "XXXXXXXXXX");
        assert_eq!(state.line_text(1), "XXXX");
        assert_eq!(state.line_text(2), "");
    }

    #[test]
    fn test_insert_mode_shifts_line() {
        let mut term = terminal(10, 2);
        term.write_characters("abc");
        term.cursor_position(1, 1);
        term.set_mode(Mode::Ansi(4), true);
        term.write_characters("X");
        assert_eq!(term.buffer().lock().line_text(0), "Xabc");
    }

    #[test]
    fn test_resize_keeps_region_full() {
        let mut term = terminal(80, 24);
        term.resize(TermSize::new(100, 30), RequestOrigin::User);
        assert_eq!(term.scroll_region(), (0, 29));
        // A partial region that is still valid survives
        term.set_scroll_region(Some(2), Some(10));
        term.resize(TermSize::new(100, 40), RequestOrigin::User);
        assert_eq!(term.scroll_region(), (1, 9));
        // An invalid one resets
        term.resize(TermSize::new(100, 5), RequestOrigin::User);
        assert_eq!(term.scroll_region(), (0, 4));
    }

    #[test]
    fn test_sgr_extended_colors() {
        let mut term = terminal(10, 2);
        term.select_graphic_rendition(&[38, 5, 196]);
        assert_eq!(term.style.fg, Color::Palette(196));
        term.select_graphic_rendition(&[48, 2, 10, 20, 30]);
        assert_eq!(term.style.bg, Color::Rgb(10, 20, 30));
        term.select_graphic_rendition(&[39, 49]);
        assert!(term.style.is_default());
    }

    #[test]
    fn test_repeat_last_character() {
        let mut term = terminal(20, 2);
        term.write_characters("ab");
        term.repeat_last_character(3);
        assert_eq!(term.buffer().lock().line_text(0), "abbbb");
    }

    #[test]
    fn test_cursor_report_origin_relative() {
        let mut term = terminal(80, 24);
        term.set_scroll_region(Some(5), Some(10));
        term.set_mode(Mode::DecPrivate(6), true);
        term.cursor_position(2, 3);
        assert_eq!(term.cursor_report(), (2, 3));
        term.set_mode(Mode::DecPrivate(6), false);
        term.cursor_position(2, 3);
        assert_eq!(term.cursor_report(), (2, 3));
    }

    #[test]
    fn test_default_palette_values() {
        assert_eq!(default_palette(1), (205, 0, 0));
        assert_eq!(default_palette(196), (255, 0, 0));
        assert_eq!(default_palette(232), (8, 8, 8));
    }

    #[test]
    fn test_reverse_index_scrolls_at_top() {
        let mut term = terminal(10, 3);
        term.write_characters("top");
        term.cursor_position(1, 1);
        term.reverse_index();
        let state = term.buffer().lock();
        assert_eq!(state.line_text(0), "");
        assert_eq!(state.line_text(1), "top");
    }
}
