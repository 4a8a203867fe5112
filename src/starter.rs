//! The I/O coordinator: runs the emulator and serializes the reverse path.
//!
//! Two threads per session. The reader thread `R` blocks on the connector,
//! drives the parser, and mutates the model under its lock. The coordinator
//! executor `S` (a single-thread scheduled executor) carries every write to
//! the PTY, every resize, and shutdown, so their relative order is exactly
//! submission order. Nothing else touches the connector's write side.
//!
//! Resizes are applied to the model immediately but forwarded to the PTY
//! through a debounced single slot: a process that repaints on SIGWINCH
//! (ConPTY especially) must see the repaint land on a model that already has
//! the final dimensions, otherwise screen lines escape into scroll-back.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::CoreConfig;
use crate::connector::TtyConnector;
use crate::executor::{ExecutorServiceManager, ScheduledTask, SingleThreadScheduler};
use crate::stream::{StreamError, TerminalDataStream};
use crate::term::terminal::ScreenTerminal;
use crate::term::{Emulator, RequestOrigin, TermSize, TerminalTextBuffer};
use crate::typeahead::{TerminalTypeAheadModel, TypeAheadEvent, TypeAheadManager};

/// Session lifecycle events, delivered from coordinator context with no
/// model lock held.
pub trait SessionObserver: Send + Sync {
    fn on_disconnect(&self) {}
    fn on_io_error(&self, _error: &io::Error) {}
}

/// Starter lifecycle
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StarterState {
    New,
    Running,
    Stopping,
    Stopped,
}

const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

/// Consecutive emulator errors (while still connected) before the reader
/// gives up instead of spinning
const MAX_CONSECUTIVE_ERRORS: u32 = 64;

struct StarterInner {
    terminal: Arc<Mutex<ScreenTerminal>>,
    connector: Arc<dyn TtyConnector>,
    typeahead: Arc<TypeAheadManager>,
    scheduler: Arc<SingleThreadScheduler>,
    stopped: AtomicBool,
    state: AtomicU8,
    pending_resize: Mutex<Option<ScheduledTask>>,
    observers: Mutex<Vec<Arc<dyn SessionObserver>>>,
    config: CoreConfig,
}

impl StarterInner {
    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::SeqCst);
    }

    fn enter_stopping(&self) {
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn notify_disconnect(&self) {
        let observers: Vec<_> = self.observers.lock().clone();
        for observer in observers {
            observer.on_disconnect();
        }
    }

    fn notify_io_error(&self, error: &io::Error) {
        let observers: Vec<_> = self.observers.lock().clone();
        for observer in observers {
            observer.on_io_error(error);
        }
    }

    /// A write failed or the peer vanished: wind the session down
    fn fatal(&self, error: io::Error) {
        error!(error = %error, connector = self.connector.name(), "terminal I/O failed");
        self.notify_io_error(&error);
        self.stopped.store(true, Ordering::SeqCst);
        self.enter_stopping();
        self.connector.close();
    }

    fn write(&self, bytes: &[u8], user_input: bool) {
        if user_input {
            for event in TypeAheadEvent::from_bytes(bytes) {
                self.typeahead.on_key_event(event);
            }
        }
        if let Err(e) = self.connector.write_bytes(bytes) {
            self.fatal(e);
        }
    }

    /// The reader loop. Applies stream content to the model in arrival
    /// order; answers from the parser go back out through `S`.
    fn run_reader(self: &Arc<Self>) {
        let mut emulator = Emulator::new(TerminalDataStream::new(self.connector.clone()));
        info!(connector = self.connector.name(), "terminal reader started");
        let mut consecutive_errors = 0u32;
        while !self.stopped.load(Ordering::SeqCst) && emulator.has_next() {
            let step = {
                let mut terminal = self.terminal.lock();
                emulator.next(&mut *terminal)
            };
            match step {
                Ok(response) => {
                    consecutive_errors = 0;
                    if let Some(response) = response {
                        let inner = self.clone();
                        let bytes = response.to_bytes();
                        self.scheduler.execute(move || inner.write(&bytes, false));
                    }
                    self.typeahead.on_terminal_state_changed();
                }
                Err(StreamError::End) => {
                    info!(connector = self.connector.name(), "terminal stream ended");
                    break;
                }
                Err(e) => {
                    if !self.connector.is_connected() {
                        debug!("connector disconnected, terminal reader exiting");
                        break;
                    }
                    error!(error = %e, "error in terminal reader, continuing");
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!("too many consecutive terminal errors, stopping emulator");
                        break;
                    }
                }
            }
        }
        self.terminal.lock().disconnected();
        self.typeahead.clear();
        self.enter_stopping();
        self.notify_disconnect();
    }
}

/// Builds and coordinates one terminal session.
pub struct TerminalStarter {
    inner: Arc<StarterInner>,
    executors: ExecutorServiceManager,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl TerminalStarter {
    /// Wire a session from parts. Most hosts use [`TerminalStarter::build`].
    pub fn new(
        terminal: Arc<Mutex<ScreenTerminal>>,
        connector: Arc<dyn TtyConnector>,
        typeahead: Arc<TypeAheadManager>,
        executors: ExecutorServiceManager,
        config: CoreConfig,
    ) -> Self {
        let scheduler = executors.scheduler();
        Self {
            inner: Arc::new(StarterInner {
                terminal,
                connector,
                typeahead,
                scheduler,
                stopped: AtomicBool::new(false),
                state: AtomicU8::new(STATE_NEW),
                pending_resize: Mutex::new(None),
                observers: Mutex::new(Vec::new()),
                config,
            }),
            executors,
            reader: Mutex::new(None),
        }
    }

    /// Construct the whole stack (buffer, terminal, type-ahead, executors)
    /// over a connector.
    pub fn build(
        connector: Arc<dyn TtyConnector>,
        size: TermSize,
        config: CoreConfig,
    ) -> io::Result<Self> {
        let buffer = TerminalTextBuffer::new(
            size.cols as usize,
            size.rows as usize,
            config.scrollback_limit,
        );
        let terminal = Arc::new(Mutex::new(ScreenTerminal::new(buffer)));
        let model = Arc::new(TerminalTypeAheadModel::new(terminal.clone()));
        let typeahead = Arc::new(TypeAheadManager::new(model, config.type_ahead.clone()));
        let executors = ExecutorServiceManager::new()?;
        Ok(Self::new(terminal, connector, typeahead, executors, config))
    }

    /// The shared terminal; observers snapshot through its buffer lock
    pub fn terminal(&self) -> Arc<Mutex<ScreenTerminal>> {
        self.inner.terminal.clone()
    }

    pub fn buffer(&self) -> TerminalTextBuffer {
        self.inner.terminal.lock().buffer().clone()
    }

    pub fn typeahead(&self) -> Arc<TypeAheadManager> {
        self.inner.typeahead.clone()
    }

    pub fn connector(&self) -> Arc<dyn TtyConnector> {
        self.inner.connector.clone()
    }

    pub fn add_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.inner.observers.lock().push(observer);
    }

    pub fn state(&self) -> StarterState {
        match self.inner.state.load(Ordering::SeqCst) {
            STATE_NEW => StarterState::New,
            STATE_RUNNING => StarterState::Running,
            STATE_STOPPING => StarterState::Stopping,
            _ => StarterState::Stopped,
        }
    }

    /// Spawn the reader thread and start consuming the stream
    pub fn start(&self) -> io::Result<()> {
        let inner = self.inner.clone();
        inner.set_state(STATE_RUNNING);
        let name = format!("terminal-reader-{}", self.inner.connector.name());
        let handle = self
            .executors
            .spawn_reader(name, move || inner.run_reader())?;
        *self.reader.lock() = Some(handle);
        Ok(())
    }

    /// Byte sequence for a key event under the terminal's current modes
    pub fn get_code_for_key(&self, event: &crossterm::event::KeyEvent) -> Vec<u8> {
        self.inner.terminal.lock().get_code_for_key(event)
    }

    /// Queue bytes for the PTY. With `user_input`, the payload feeds the
    /// type-ahead predictor before it is written.
    pub fn send_bytes(&self, bytes: Vec<u8>, user_input: bool) {
        let inner = self.inner.clone();
        self.inner
            .scheduler
            .execute(move || inner.write(&bytes, user_input));
    }

    /// UTF-8 convenience over [`send_bytes`](Self::send_bytes)
    pub fn send_string(&self, text: &str, user_input: bool) {
        self.send_bytes(text.as_bytes().to_vec(), user_input);
    }

    /// Apply a resize to the model now; forward it to the PTY after the
    /// debounce. A newer resize replaces any still-pending one.
    pub fn post_resize(&self, size: TermSize, origin: RequestOrigin) {
        let inner = self.inner.clone();
        self.inner.scheduler.execute(move || {
            inner.terminal.lock().resize(size, origin);
            inner.typeahead.clear();

            let on_alternate = {
                let terminal = inner.terminal.lock();
                let using = terminal.buffer().lock().is_using_alternate();
                using
            };
            let delay_ms = if on_alternate {
                inner.config.resize.alternate_debounce_ms
            } else {
                inner.config.resize.primary_debounce_ms
            };
            let write_side = inner.clone();
            let task = inner.scheduler.schedule(
                Duration::from_millis(delay_ms),
                move || {
                    if let Err(e) = write_side.connector.resize(size) {
                        error!(error = %e, "PTY resize failed");
                        write_side.notify_io_error(&e);
                    }
                },
            );
            let previous = inner.pending_resize.lock().replace(task);
            if let Some(previous) = previous {
                previous.cancel();
            }
        });
    }

    /// Ask the reader loop to stop after the current emulator step
    pub fn request_emulator_stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.enter_stopping();
    }

    /// Best-effort connector close through the coordinator
    pub fn close(&self) {
        let inner = self.inner.clone();
        self.inner.scheduler.execute(move || {
            inner.connector.close();
        });
    }

    /// Full cooperative shutdown: stop the reader, close the connector,
    /// drain the coordinator, and join both.
    pub fn stop_and_join(&self) {
        self.request_emulator_stop();
        self.inner.connector.close();
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        if let Some(task) = self.inner.pending_resize.lock().take() {
            task.cancel();
        }
        self.executors.shutdown();
        self.inner.set_state(STATE_STOPPED);
    }
}
