//! Terminal model: screen buffer, facade, escape-sequence parser, styling,
//! and key encoding.
//!
//! ```text
//! Emulator (parser)
//! └── Terminal facade
//!     └── ScreenTerminal (cursor, modes, scroll region, charsets, tabs)
//!         └── TerminalTextBuffer (cell grid + history + damage, under lock)
//! ```

pub mod buffer;
pub mod keys;
pub mod parser;
pub mod style;
pub mod terminal;

pub use buffer::{BufferState, Cell, Cursor, Line, TerminalTextBuffer};
pub use parser::{Emulator, Response};
pub use style::{Color, StyleFlags, TextStyle};
pub use terminal::{
    CharacterSet, CursorShape, DynamicColorKind, Mode, MouseFormat, MouseMode, ScreenTerminal,
    Terminal, TerminalModes,
};

use serde::{Deserialize, Serialize};

/// Terminal dimensions in character cells
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// Who initiated a resize
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RequestOrigin {
    /// The hosting UI (user dragged the window)
    User,
    /// The remote process (e.g. DECCOLM)
    Remote,
}
