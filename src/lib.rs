//! vtcore - a VT/xterm terminal emulator core.
//!
//! Consumes the byte stream of a process behind a PTY, interprets it as
//! ECMA-48/VT control sequences and text, and maintains the in-memory screen
//! a user would see. The reverse path turns key events and resizes into
//! bytes for the process. Rendering, process spawning, and input capture
//! belong to the host.
//!
//! # Architecture
//!
//! ```text
//! TtyConnector (byte channel over the PTY)
//! └── TerminalDataStream (chars, push-back, UTF-8 assembly)
//!     └── Emulator (escape-sequence state machine)
//!         └── ScreenTerminal (cursor, modes, regions, charsets)
//!             └── TerminalTextBuffer (cells + history + damage, locked)
//!
//! TerminalStarter: reader thread + single-thread coordinator executor
//! TypeAheadManager: speculative local echo overlay
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vtcore::{ChannelConnector, CoreConfig, TermSize, TerminalStarter};
//!
//! let (connector, _endpoint) = ChannelConnector::pair("demo");
//! let starter = TerminalStarter::build(
//!     connector,
//!     TermSize::new(80, 24),
//!     CoreConfig::default(),
//! ).unwrap();
//! starter.start().unwrap();
//! starter.send_string("echo hi\r", true);
//! let buffer = starter.buffer();
//! for (row, line) in buffer.lock().drain_damage() {
//!     println!("{row}: {}", line.text());
//! }
//! ```

pub mod config;
pub mod connector;
pub mod executor;
pub mod starter;
pub mod stream;
pub mod term;
pub mod typeahead;

pub use config::{CoreConfig, ResizeConfig, TypeAheadConfig};
pub use connector::{ChannelConnector, ChannelEndpoint, TtyConnector};
pub use executor::{ExecutorServiceManager, ScheduledTask, SingleThreadScheduler};
pub use starter::{SessionObserver, StarterState, TerminalStarter};
pub use stream::{StreamError, TerminalDataStream};
pub use term::{
    Cell, Color, Cursor, Emulator, Line, Mode, RequestOrigin, Response, ScreenTerminal, StyleFlags,
    TermSize, Terminal, TerminalTextBuffer, TextStyle,
};
pub use typeahead::{
    PredictedCell, Prediction, TerminalTypeAheadModel, TypeAheadEvent, TypeAheadManager,
    TypeAheadModel,
};
