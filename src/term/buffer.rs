//! Screen model: cells, lines, primary/alternate screens, scroll-back
//! history, and damage tracking.
//!
//! `TerminalTextBuffer` is the single piece of state shared between the
//! emulator thread, the coordinator, and presentation observers. It is a
//! cloneable handle over one mutex; `lock()` is the serialization point and
//! every read or write goes through it.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::style::TextStyle;
use super::TermSize;

/// A single cell: one grapheme (base scalar plus any combining marks), its
/// display width, and the style it was written with.
#[derive(Clone, PartialEq, Debug)]
pub struct Cell {
    pub grapheme: String,
    pub width: u8,
    pub style: TextStyle,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            style: TextStyle::default(),
        }
    }
}

impl Cell {
    /// Trailing half of a wide character
    pub fn continuation(style: &TextStyle) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            style: style.clone(),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// An unwritten cell renders as a space with the default style
    pub fn is_blank(&self) -> bool {
        self.grapheme.is_empty() && self.style.is_default() && self.width == 1
    }

    /// First scalar of the grapheme, space if the cell is empty
    pub fn ch(&self) -> char {
        self.grapheme.chars().next().unwrap_or(' ')
    }

    pub fn clear(&mut self, style: &TextStyle) {
        self.grapheme.clear();
        self.width = 1;
        self.style = style.clone();
    }
}

/// One screen or history line. `wrapped` marks that the next line continues
/// this one; reflow joins such chains back into logical lines.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct Line {
    pub cells: Vec<Cell>,
    pub wrapped: bool,
}

impl Line {
    pub fn new(cols: usize) -> Self {
        Self {
            cells: vec![Cell::default(); cols],
            wrapped: false,
        }
    }

    /// Truncate or pad with default cells to the given width
    pub fn pack(&mut self, cols: usize) {
        self.cells.resize(cols, Cell::default());
    }

    pub fn clear(&mut self, style: &TextStyle) {
        for cell in &mut self.cells {
            cell.clear(style);
        }
        self.wrapped = false;
    }

    pub fn is_blank(&self) -> bool {
        !self.wrapped && self.cells.iter().all(Cell::is_blank)
    }

    /// Cells up to the last non-blank one; a wrapped line keeps its full
    /// width because the continuation starts at the exact column boundary.
    fn trimmed(&self) -> &[Cell] {
        if self.wrapped {
            return &self.cells;
        }
        let end = self
            .cells
            .iter()
            .rposition(|c| !c.is_blank())
            .map_or(0, |i| i + 1);
        &self.cells[..end]
    }

    /// Plain-text rendering, trailing blanks stripped (test/observer helper)
    pub fn text(&self) -> String {
        let mut out = String::new();
        for cell in self.trimmed() {
            if !cell.is_continuation() {
                out.push_str(if cell.grapheme.is_empty() {
                    " "
                } else {
                    &cell.grapheme
                });
            }
        }
        while out.ends_with(' ') {
            out.pop();
        }
        out
    }
}

/// Cursor as observers see it
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Cursor {
    /// 0-based screen row
    pub row: usize,
    /// 0-based screen column
    pub col: usize,
    pub visible: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            visible: true,
        }
    }
}

/// Everything behind the buffer lock.
pub struct BufferState {
    cols: usize,
    rows: usize,
    primary: Vec<Line>,
    alternate: Vec<Line>,
    using_alternate: bool,
    history: VecDeque<Line>,
    history_limit: usize,
    damage: HashSet<usize>,
    all_damaged: bool,
    cursor: Cursor,
    title: String,
    bell_count: u64,
    connected: bool,
}

impl BufferState {
    fn new(cols: usize, rows: usize, history_limit: usize) -> Self {
        Self {
            cols,
            rows,
            primary: (0..rows).map(|_| Line::new(cols)).collect(),
            alternate: (0..rows).map(|_| Line::new(cols)).collect(),
            using_alternate: false,
            history: VecDeque::new(),
            history_limit,
            damage: HashSet::new(),
            all_damaged: true,
            cursor: Cursor::default(),
            title: String::new(),
            bell_count: 0,
            connected: true,
        }
    }

    pub fn columns(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn size(&self) -> TermSize {
        TermSize::new(self.cols as u16, self.rows as u16)
    }

    pub fn is_using_alternate(&self) -> bool {
        self.using_alternate
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn set_cursor_position(&mut self, row: usize, col: usize) {
        self.cursor.row = row.min(self.rows.saturating_sub(1));
        self.cursor.col = col.min(self.cols.saturating_sub(1));
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor.visible = visible;
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    /// BEL counter; observers diff it between snapshots
    pub fn bell_count(&self) -> u64 {
        self.bell_count
    }

    pub fn ring_bell(&mut self) {
        self.bell_count += 1;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_disconnected(&mut self) {
        self.connected = false;
        self.damage_all();
    }

    fn active(&self) -> &Vec<Line> {
        if self.using_alternate {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn active_mut(&mut self) -> &mut Vec<Line> {
        if self.using_alternate {
            &mut self.alternate
        } else {
            &mut self.primary
        }
    }

    pub fn mark_damaged(&mut self, row: usize) {
        if row < self.rows {
            self.damage.insert(row);
        }
    }

    pub fn damage_all(&mut self) {
        self.all_damaged = true;
    }

    /// Dirty lines paired with snapshots, cleared on return. The contract
    /// between the emulator and the renderer.
    pub fn drain_damage(&mut self) -> Vec<(usize, Line)> {
        let rows: Vec<usize> = if self.all_damaged {
            (0..self.rows).collect()
        } else {
            let mut rows: Vec<usize> = self.damage.iter().copied().collect();
            rows.sort_unstable();
            rows
        };
        self.all_damaged = false;
        self.damage.clear();
        rows.into_iter()
            .map(|r| (r, self.line_snapshot(r)))
            .collect()
    }

    /// Clone of a screen line, packed to the current width
    pub fn line_snapshot(&self, row: usize) -> Line {
        let mut line = self.active().get(row).cloned().unwrap_or_default();
        line.pack(self.cols);
        line
    }

    pub fn char_at(&self, row: usize, col: usize) -> Option<char> {
        self.active()
            .get(row)
            .and_then(|line| line.cells.get(col))
            .map(Cell::ch)
    }

    pub fn style_at(&self, row: usize, col: usize) -> Option<TextStyle> {
        self.active()
            .get(row)
            .and_then(|line| line.cells.get(col))
            .map(|c| c.style.clone())
    }

    pub fn line_text(&self, row: usize) -> String {
        self.active().get(row).map(Line::text).unwrap_or_default()
    }

    pub fn history_size(&self) -> usize {
        self.history.len()
    }

    pub fn history_line(&self, index: usize) -> Option<&Line> {
        self.history.get(index)
    }

    fn push_history(&mut self, line: Line) {
        self.history.push_back(line);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Place one character at (row, col), handling wide-character
    /// continuations and overwrite cleanup.
    pub fn put_char(&mut self, row: usize, col: usize, ch: char, width: usize, style: &TextStyle) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        self.fix_wide_overwrite(row, col);
        let cols = self.cols;
        let line = &mut self.active_mut()[row];
        line.pack(cols);
        line.cells[col] = Cell {
            grapheme: ch.to_string(),
            width: width.min(2) as u8,
            style: style.clone(),
        };
        if width == 2 && col + 1 < cols {
            line.cells[col + 1] = Cell::continuation(style);
        }
        self.mark_damaged(row);
    }

    /// Append a combining mark to the cell left of (row, col)
    pub fn append_combining(&mut self, row: usize, col: usize, ch: char) {
        if row >= self.rows || col == 0 {
            return;
        }
        let mut target = col - 1;
        if self.active()[row]
            .cells
            .get(target)
            .is_some_and(Cell::is_continuation)
            && target > 0
        {
            target -= 1;
        }
        if let Some(cell) = self.active_mut()[row].cells.get_mut(target) {
            if cell.grapheme.is_empty() {
                cell.grapheme.push(' ');
            }
            cell.grapheme.push(ch);
        }
        self.mark_damaged(row);
    }

    /// Overwriting half of a wide pair blanks the other half
    fn fix_wide_overwrite(&mut self, row: usize, col: usize) {
        let cols = self.cols;
        let line = &mut self.active_mut()[row];
        line.pack(cols);
        if line.cells[col].is_continuation() && col > 0 {
            line.cells[col - 1] = Cell::default();
        }
        if line.cells[col].width == 2 && col + 1 < cols {
            line.cells[col + 1] = Cell::default();
        }
    }

    /// Write a run of characters starting at (col, row); the caller has
    /// already handled wrapping, so anything past the right edge is dropped.
    pub fn write(&mut self, col: usize, row: usize, text: &str, style: &TextStyle) {
        use unicode_width::UnicodeWidthChar;
        let mut at = col;
        for ch in text.chars() {
            let width = ch.width().unwrap_or(0);
            if width == 0 {
                self.append_combining(row, at, ch);
                continue;
            }
            if at >= self.cols {
                break;
            }
            self.put_char(row, at, ch, width, style);
            at += width;
        }
    }

    pub fn set_line_wrapped(&mut self, row: usize, wrapped: bool) {
        if let Some(line) = self.active_mut().get_mut(row) {
            line.wrapped = wrapped;
        }
    }

    pub fn is_line_wrapped(&self, row: usize) -> bool {
        self.active().get(row).is_some_and(|l| l.wrapped)
    }

    /// Scroll rows `top..=bottom`. Positive `count` scrolls up, evicting the
    /// top lines into history when the region is the whole primary screen;
    /// negative scrolls down. Blank fill uses the default style.
    pub fn scroll_area(&mut self, top: usize, bottom: usize, count: isize) {
        if top > bottom || bottom >= self.rows {
            return;
        }
        let cols = self.cols;
        let full_screen = top == 0 && bottom == self.rows - 1;
        let keep_history = full_screen && !self.using_alternate;
        if count > 0 {
            for _ in 0..count.unsigned_abs().min(bottom - top + 1) {
                let mut evicted = self.active_mut().remove(top);
                self.active_mut().insert(bottom, Line::new(cols));
                if keep_history {
                    evicted.pack(cols);
                    self.push_history(evicted);
                }
            }
        } else if count < 0 {
            for _ in 0..count.unsigned_abs().min(bottom - top + 1) {
                self.active_mut().remove(bottom);
                self.active_mut().insert(top, Line::new(cols));
            }
        }
        for row in top..=bottom {
            self.mark_damaged(row);
        }
    }

    /// Insert `count` blank lines at `row`, pushing lines below it down and
    /// dropping anything past `bottom` (the scroll region floor).
    pub fn insert_lines(&mut self, row: usize, count: usize, bottom: usize) {
        if row > bottom || bottom >= self.rows {
            return;
        }
        let cols = self.cols;
        for _ in 0..count.min(bottom - row + 1) {
            self.active_mut().remove(bottom);
            self.active_mut().insert(row, Line::new(cols));
        }
        for r in row..=bottom {
            self.mark_damaged(r);
        }
    }

    /// Delete `count` lines at `row`, pulling lines up and filling at `bottom`
    pub fn delete_lines(&mut self, row: usize, count: usize, bottom: usize) {
        if row > bottom || bottom >= self.rows {
            return;
        }
        let cols = self.cols;
        for _ in 0..count.min(bottom - row + 1) {
            self.active_mut().remove(row);
            self.active_mut().insert(bottom, Line::new(cols));
        }
        for r in row..=bottom {
            self.mark_damaged(r);
        }
    }

    /// ICH: shift cells right from `col`, dropping off the end of the line
    pub fn insert_blank_chars(&mut self, row: usize, col: usize, count: usize, style: &TextStyle) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        let cols = self.cols;
        let line = &mut self.active_mut()[row];
        line.pack(cols);
        for _ in 0..count.min(cols - col) {
            line.cells.pop();
            let mut blank = Cell::default();
            blank.style = style.clone();
            line.cells.insert(col, blank);
        }
        self.mark_damaged(row);
    }

    /// DCH: shift cells left into `col`, back-filling at the end of the line
    pub fn delete_chars(&mut self, row: usize, col: usize, count: usize, style: &TextStyle) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        let cols = self.cols;
        let line = &mut self.active_mut()[row];
        line.pack(cols);
        for _ in 0..count.min(cols - col) {
            line.cells.remove(col);
            let mut blank = Cell::default();
            blank.style = style.clone();
            line.cells.push(blank);
        }
        self.mark_damaged(row);
    }

    /// ECH: blank cells in place without shifting
    pub fn erase_chars(&mut self, row: usize, col: usize, count: usize, style: &TextStyle) {
        if row >= self.rows {
            return;
        }
        let cols = self.cols;
        let line = &mut self.active_mut()[row];
        line.pack(cols);
        for c in col..(col + count).min(cols) {
            line.cells[c].clear(style);
        }
        self.mark_damaged(row);
    }

    /// Fill the half-open area `[left, right) x [top, bottom)` with blanks
    pub fn clear_area(
        &mut self,
        left: usize,
        top: usize,
        right: usize,
        bottom: usize,
        style: &TextStyle,
    ) {
        let cols = self.cols;
        let right = right.min(cols);
        let bottom = bottom.min(self.rows);
        for row in top..bottom {
            let line = &mut self.active_mut()[row];
            line.pack(cols);
            for col in left..right {
                line.cells[col].clear(style);
            }
            if left == 0 && right == cols {
                line.wrapped = false;
            }
            self.mark_damaged(row);
        }
    }

    /// ED 3: discard scroll-back
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Swap the active screen. Entering hands out a fresh blank alternate;
    /// leaving reveals the primary untouched. History is bypassed while the
    /// alternate screen is active.
    pub fn use_alternate(&mut self, on: bool) {
        if on == self.using_alternate {
            return;
        }
        if on {
            self.alternate = (0..self.rows).map(|_| Line::new(self.cols)).collect();
        }
        self.using_alternate = on;
        self.damage_all();
    }

    /// Fill every cell with `ch` (DECALN)
    pub fn fill_with(&mut self, ch: char) {
        let cols = self.cols;
        let style = TextStyle::default();
        for line in self.active_mut() {
            line.pack(cols);
            for cell in &mut line.cells {
                *cell = Cell {
                    grapheme: ch.to_string(),
                    width: 1,
                    style: style.clone(),
                };
            }
            line.wrapped = false;
        }
        self.damage_all();
    }

    /// Resize the model. The primary screen reflows (history participates;
    /// wrapped chains are joined and re-broken at the new width) and the
    /// cursor follows its logical position. The alternate screen is clamped.
    pub fn resize(&mut self, size: TermSize) {
        let new_cols = size.cols.max(1) as usize;
        let new_rows = size.rows.max(1) as usize;
        if new_cols == self.cols && new_rows == self.rows {
            return;
        }

        if self.using_alternate {
            Self::clamp_screen(&mut self.alternate, new_cols, new_rows);
            Self::clamp_screen(&mut self.primary, new_cols, new_rows);
        } else {
            self.reflow_primary(new_cols, new_rows);
            Self::clamp_screen(&mut self.alternate, new_cols, new_rows);
        }

        self.cols = new_cols;
        self.rows = new_rows;
        self.cursor.row = self.cursor.row.min(new_rows - 1);
        self.cursor.col = self.cursor.col.min(new_cols - 1);
        self.damage.clear();
        self.damage_all();
    }

    fn clamp_screen(lines: &mut Vec<Line>, cols: usize, rows: usize) {
        lines.truncate(rows);
        while lines.len() < rows {
            lines.push(Line::new(cols));
        }
        for line in lines.iter_mut() {
            line.pack(cols);
        }
    }

    fn reflow_primary(&mut self, new_cols: usize, new_rows: usize) {
        let old_cols = self.cols;

        // The reflowed extent: history plus screen rows down to the last
        // non-blank line or the cursor, whichever is lower.
        let mut used = self.cursor.row + 1;
        for (i, line) in self.primary.iter().enumerate() {
            if !line.is_blank() {
                used = used.max(i + 1);
            }
        }
        let cursor_phys = self.history.len() + self.cursor.row;

        let mut physical: Vec<Line> = self.history.drain(..).collect();
        physical.extend(self.primary.drain(..).take(used));
        for line in &mut physical {
            line.pack(old_cols);
        }

        // Join wrapped chains into logical lines, tracking which logical
        // line the cursor sits on and its offset within it.
        let mut logical: Vec<Vec<Cell>> = Vec::new();
        let mut cursor_logical = 0usize;
        let mut cursor_offset = self.cursor.col;
        let mut open = false;
        for (idx, line) in physical.into_iter().enumerate() {
            if !open {
                logical.push(Vec::new());
            }
            let last = logical.len() - 1;
            if idx == cursor_phys {
                cursor_logical = last;
                cursor_offset = logical[last].len() + self.cursor.col;
            }
            let wrapped = line.wrapped;
            if wrapped {
                logical[last].extend(line.cells);
            } else {
                logical[last].extend_from_slice(line.trimmed());
            }
            open = wrapped;
        }
        if logical.is_empty() {
            logical.push(Vec::new());
        }
        cursor_logical = cursor_logical.min(logical.len() - 1);

        // Re-break each logical line at the new width.
        let mut rebroken: Vec<Line> = Vec::new();
        let mut new_cursor_phys = 0usize;
        let mut new_cursor_col = 0usize;
        for (li, cells) in logical.into_iter().enumerate() {
            let first_chunk = rebroken.len();
            let chunks = Self::break_logical(cells, new_cols);
            let chunk_count = chunks.len();
            rebroken.extend(chunks);
            if li == cursor_logical {
                let chunk = (cursor_offset / new_cols).min(chunk_count - 1);
                new_cursor_phys = first_chunk + chunk;
                new_cursor_col = cursor_offset - chunk * new_cols;
            }
        }

        // Bottom-anchor the screen; everything above it is history.
        let total = rebroken.len();
        let screen_start = total.saturating_sub(new_rows);
        let mut iter = rebroken.into_iter();
        self.history = VecDeque::new();
        for _ in 0..screen_start {
            let mut line = iter.next().expect("screen_start <= total");
            line.pack(new_cols);
            self.push_history(line);
        }
        self.primary = iter
            .map(|mut line| {
                line.pack(new_cols);
                line
            })
            .collect();
        while self.primary.len() < new_rows {
            self.primary.push(Line::new(new_cols));
        }

        self.cursor.row = new_cursor_phys
            .saturating_sub(screen_start)
            .min(new_rows - 1);
        self.cursor.col = new_cursor_col.min(new_cols - 1);
    }

    /// Split a logical line into physical chunks of at most `cols` cells,
    /// never splitting a wide pair; all chunks but the last are wrapped.
    fn break_logical(cells: Vec<Cell>, cols: usize) -> Vec<Line> {
        if cells.is_empty() {
            return vec![Line {
                cells: Vec::new(),
                wrapped: false,
            }];
        }
        let mut chunks = Vec::new();
        let mut rest = cells.as_slice();
        while !rest.is_empty() {
            let mut take = cols.min(rest.len());
            if take < rest.len() && rest[take].is_continuation() && take > 1 {
                take -= 1;
            }
            chunks.push(Line {
                cells: rest[..take].to_vec(),
                wrapped: take < rest.len(),
            });
            rest = &rest[take..];
        }
        chunks
    }
}

/// Shared handle to the screen model. Cloning is cheap; all clones address
/// the same state behind the same lock.
#[derive(Clone)]
pub struct TerminalTextBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl TerminalTextBuffer {
    pub fn new(cols: usize, rows: usize, history_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferState::new(
                cols.max(1),
                rows.max(1),
                history_limit,
            ))),
        }
    }

    /// The buffer lock. Mutations and snapshots alike happen under it; keep
    /// critical sections short and never call observer code while holding it.
    pub fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::style::{Color, StyleFlags};

    fn buffer(cols: usize, rows: usize) -> TerminalTextBuffer {
        TerminalTextBuffer::new(cols, rows, 100)
    }

    #[test]
    fn test_write_and_read_back() {
        let buf = buffer(80, 24);
        let mut state = buf.lock();
        state.write(0, 0, "Hello", &TextStyle::default());
        assert_eq!(state.line_text(0), "Hello");
        assert_eq!(state.char_at(0, 4), Some('o'));
        assert_eq!(state.char_at(0, 5), Some(' '));
    }

    #[test]
    fn test_wide_char_continuation() {
        let buf = buffer(10, 2);
        let mut state = buf.lock();
        state.write(0, 0, "あb", &TextStyle::default());
        assert_eq!(state.char_at(0, 0), Some('あ'));
        assert!(state.line_snapshot(0).cells[1].is_continuation());
        assert_eq!(state.char_at(0, 2), Some('b'));
        // Overwriting the continuation half blanks the head
        state.write(1, 0, "x", &TextStyle::default());
        assert_eq!(state.char_at(0, 0), Some(' '));
        assert_eq!(state.char_at(0, 1), Some('x'));
    }

    #[test]
    fn test_scroll_full_screen_evicts_to_history() {
        let buf = buffer(10, 3);
        let mut state = buf.lock();
        state.write(0, 0, "first", &TextStyle::default());
        state.scroll_area(0, 2, 1);
        assert_eq!(state.history_size(), 1);
        assert_eq!(state.history_line(0).unwrap().text(), "first");
        assert_eq!(state.line_text(0), "");
    }

    #[test]
    fn test_scroll_region_does_not_touch_history() {
        let buf = buffer(10, 4);
        let mut state = buf.lock();
        state.write(0, 1, "mid", &TextStyle::default());
        state.scroll_area(1, 2, 1);
        assert_eq!(state.history_size(), 0);
        assert_eq!(state.line_text(1), "");
    }

    #[test]
    fn test_no_history_on_alternate() {
        let buf = buffer(10, 3);
        let mut state = buf.lock();
        state.use_alternate(true);
        state.write(0, 0, "alt", &TextStyle::default());
        state.scroll_area(0, 2, 1);
        assert_eq!(state.history_size(), 0);
        state.use_alternate(false);
        assert_eq!(state.line_text(0), "");
    }

    #[test]
    fn test_history_limit_evicts_oldest() {
        let buf = TerminalTextBuffer::new(10, 2, 3);
        let mut state = buf.lock();
        for i in 0..5 {
            state.write(0, 0, &format!("line{i}"), &TextStyle::default());
            state.scroll_area(0, 1, 1);
        }
        assert_eq!(state.history_size(), 3);
        assert_eq!(state.history_line(0).unwrap().text(), "line2");
    }

    #[test]
    fn test_drain_damage_clears() {
        let buf = buffer(10, 4);
        let mut state = buf.lock();
        state.drain_damage();
        state.write(0, 2, "x", &TextStyle::default());
        let damage = state.drain_damage();
        assert_eq!(damage.len(), 1);
        assert_eq!(damage[0].0, 2);
        assert_eq!(damage[0].1.text(), "x");
        assert!(state.drain_damage().is_empty());
    }

    #[test]
    fn test_insert_delete_chars() {
        let buf = buffer(8, 1);
        let mut state = buf.lock();
        state.write(0, 0, "abcdef", &TextStyle::default());
        state.insert_blank_chars(0, 1, 2, &TextStyle::default());
        assert_eq!(state.line_text(0), "a  bcdef");
        state.delete_chars(0, 1, 2, &TextStyle::default());
        assert_eq!(state.line_text(0), "abcdef");
    }

    #[test]
    fn test_insert_delete_lines_respect_bottom() {
        let buf = buffer(10, 4);
        let mut state = buf.lock();
        for (i, t) in ["a", "b", "c", "d"].iter().enumerate() {
            state.write(0, i, t, &TextStyle::default());
        }
        state.insert_lines(1, 1, 2);
        assert_eq!(
            (0..4).map(|r| state.line_text(r)).collect::<Vec<_>>(),
            vec!["a", "", "b", "d"]
        );
        state.delete_lines(1, 1, 2);
        assert_eq!(
            (0..4).map(|r| state.line_text(r)).collect::<Vec<_>>(),
            vec!["a", "b", "", "d"]
        );
    }

    #[test]
    fn test_reflow_narrower_splits_line() {
        let buf = buffer(80, 24);
        {
            let mut state = buf.lock();
            let long: String = "x".repeat(80);
            state.write(0, 4, &long, &TextStyle::default());
            state.set_line_wrapped(4, true);
            state.set_cursor_position(5, 0);
            state.resize(TermSize::new(40, 24));
            assert_eq!(state.line_text(4), "x".repeat(40));
            assert!(state.is_line_wrapped(4));
            assert_eq!(state.line_text(5), "x".repeat(40));
            assert!(!state.is_line_wrapped(5));
        }
    }

    #[test]
    fn test_reflow_round_trip() {
        let buf = buffer(20, 6);
        let before: Vec<String>;
        {
            let mut state = buf.lock();
            state.write(0, 0, "hello world again", &TextStyle::default());
            state.write(0, 1, "second", &TextStyle::default());
            state.set_cursor_position(2, 0);
            before = (0..6).map(|r| state.line_text(r)).collect();
            state.resize(TermSize::new(7, 6));
            state.resize(TermSize::new(20, 6));
            let after: Vec<String> = (0..6).map(|r| state.line_text(r)).collect();
            assert_eq!(before, after);
            assert_eq!(state.cursor().row, 2);
            assert_eq!(state.cursor().col, 0);
        }
    }

    #[test]
    fn test_reflow_joins_history() {
        let buf = TerminalTextBuffer::new(10, 2, 100);
        let mut state = buf.lock();
        // A 10-wide wrapped line whose tail is on screen, head in history
        state.write(0, 0, "aaaaaaaaaa", &TextStyle::default());
        state.set_line_wrapped(0, true);
        state.write(0, 1, "bbb", &TextStyle::default());
        state.scroll_area(0, 1, 1);
        assert_eq!(state.history_size(), 1);
        state.set_cursor_position(0, 3);
        state.resize(TermSize::new(20, 2));
        // Head and tail re-joined onto a single 13-cell line
        assert_eq!(state.history_size(), 0);
        assert_eq!(state.line_text(0), "aaaaaaaaaabbb");
    }

    #[test]
    fn test_clear_area_resets_wrap_flag() {
        let buf = buffer(5, 2);
        let mut state = buf.lock();
        state.write(0, 0, "abcde", &TextStyle::default());
        state.set_line_wrapped(0, true);
        state.clear_area(0, 0, 5, 1, &TextStyle::default());
        assert!(!state.is_line_wrapped(0));
        assert_eq!(state.line_text(0), "");
    }

    #[test]
    fn test_erase_chars_keeps_style() {
        let buf = buffer(10, 1);
        let mut state = buf.lock();
        let red = TextStyle {
            fg: Color::Palette(1),
            flags: StyleFlags::BOLD,
            ..Default::default()
        };
        state.write(0, 0, "abc", &TextStyle::default());
        state.erase_chars(0, 0, 2, &red);
        assert_eq!(state.char_at(0, 0), Some(' '));
        assert_eq!(state.style_at(0, 0).unwrap().fg, Color::Palette(1));
        assert_eq!(state.char_at(0, 2), Some('c'));
    }
}
