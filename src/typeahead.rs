//! Type-ahead: speculative local echo while awaiting the PTY round trip.
//!
//! Keystrokes headed for the process are classified into events; when the
//! link is slow enough to matter, printable keys become predictions that the
//! presentation layer may overlay. The authoritative screen model is never
//! touched: a prediction either gets confirmed by matching emulator output
//! and disappears, or it is invalidated (mismatch, timeout) and the overlay
//! is dropped. A mismatch also disables predictions for a penalty window so
//! a full-screen app repainting under our feet does not fight the overlay.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::TypeAheadConfig;
use crate::term::style::TextStyle;
use crate::term::terminal::{MouseMode, ScreenTerminal};

/// User keystroke as the predictor sees it
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TypeAheadEvent {
    Printable(char),
    Backspace,
    ArrowLeft,
    ArrowRight,
    Enter,
    /// Anything we cannot model; flushes outstanding predictions
    Unknown,
}

impl TypeAheadEvent {
    /// Classify an outgoing byte payload into events
    pub fn from_bytes(bytes: &[u8]) -> Vec<TypeAheadEvent> {
        let mut events = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match b {
                0x0D => {
                    events.push(TypeAheadEvent::Enter);
                    i += 1;
                }
                0x08 | 0x7F => {
                    events.push(TypeAheadEvent::Backspace);
                    i += 1;
                }
                0x1B => {
                    // ESC [ D / ESC O D family
                    if i + 2 < bytes.len() && (bytes[i + 1] == b'[' || bytes[i + 1] == b'O') {
                        match bytes[i + 2] {
                            b'D' => events.push(TypeAheadEvent::ArrowLeft),
                            b'C' => events.push(TypeAheadEvent::ArrowRight),
                            _ => events.push(TypeAheadEvent::Unknown),
                        }
                        i += 3;
                    } else {
                        events.push(TypeAheadEvent::Unknown);
                        i += 1;
                    }
                }
                0x20..=0x7E => {
                    events.push(TypeAheadEvent::Printable(b as char));
                    i += 1;
                }
                _ => {
                    events.push(TypeAheadEvent::Unknown);
                    i += 1;
                }
            }
        }
        events
    }
}

/// Facts the predictor needs from the terminal. Implementations do their own
/// locking; the manager never calls these while holding its queue lock.
pub trait TypeAheadModel: Send + Sync {
    /// Modes permit prediction: autowrap on, primary screen, mouse off
    fn is_applicable(&self) -> bool;
    fn cursor(&self) -> (usize, usize);
    fn columns(&self) -> usize;
    fn scroll_region(&self) -> (usize, usize);
    fn char_at(&self, row: usize, col: usize) -> Option<char>;
    fn current_style(&self) -> TextStyle;
}

/// [`TypeAheadModel`] over the shared terminal
pub struct TerminalTypeAheadModel {
    terminal: Arc<Mutex<ScreenTerminal>>,
}

impl TerminalTypeAheadModel {
    pub fn new(terminal: Arc<Mutex<ScreenTerminal>>) -> Self {
        Self { terminal }
    }
}

impl TypeAheadModel for TerminalTypeAheadModel {
    fn is_applicable(&self) -> bool {
        let terminal = self.terminal.lock();
        let modes = terminal.modes();
        modes.auto_wrap
            && modes.mouse == MouseMode::None
            && !terminal.buffer().lock().is_using_alternate()
    }

    fn cursor(&self) -> (usize, usize) {
        let cursor = self.terminal.lock().buffer().lock().cursor();
        (cursor.row, cursor.col)
    }

    fn columns(&self) -> usize {
        self.terminal.lock().buffer().lock().columns()
    }

    fn scroll_region(&self) -> (usize, usize) {
        self.terminal.lock().scroll_region()
    }

    fn char_at(&self, row: usize, col: usize) -> Option<char> {
        self.terminal.lock().buffer().lock().char_at(row, col)
    }

    fn current_style(&self) -> TextStyle {
        self.terminal.lock().current_style()
    }
}

/// One outstanding speculation
#[derive(Clone, Debug)]
pub enum Prediction {
    /// A printable character we expect to be echoed at (row, col)
    Printable {
        ch: char,
        row: usize,
        col: usize,
        style: TextStyle,
        created: Instant,
    },
    /// A cursor move we expect to land at (row, col)
    Cursor {
        row: usize,
        col: usize,
        created: Instant,
    },
}

impl Prediction {
    fn created(&self) -> Instant {
        match self {
            Prediction::Printable { created, .. } | Prediction::Cursor { created, .. } => *created,
        }
    }

    /// Cursor position after this prediction is applied
    fn end_position(&self) -> (usize, usize) {
        match self {
            Prediction::Printable { row, col, .. } => (*row, col + 1),
            Prediction::Cursor { row, col, .. } => (*row, *col),
        }
    }
}

/// Overlay cell for the presentation layer
#[derive(Clone, PartialEq, Debug)]
pub struct PredictedCell {
    pub row: usize,
    pub col: usize,
    pub ch: char,
    pub style: TextStyle,
}

struct Inner {
    predictions: VecDeque<Prediction>,
    latency_ewma_ms: f64,
    has_latency_sample: bool,
    disabled_until: Option<Instant>,
}

/// EWMA smoothing for round-trip latency
const LATENCY_ALPHA: f64 = 0.3;

pub struct TypeAheadManager {
    model: Arc<dyn TypeAheadModel>,
    config: TypeAheadConfig,
    inner: Mutex<Inner>,
}

impl TypeAheadManager {
    pub fn new(model: Arc<dyn TypeAheadModel>, config: TypeAheadConfig) -> Self {
        Self {
            model,
            config,
            inner: Mutex::new(Inner {
                predictions: VecDeque::new(),
                latency_ewma_ms: 0.0,
                has_latency_sample: false,
                disabled_until: None,
            }),
        }
    }

    /// A user keystroke is about to be written to the PTY
    pub fn on_key_event(&self, event: TypeAheadEvent) {
        if !self.config.enabled {
            return;
        }
        self.expire_old();

        // Gather terminal facts before taking the queue lock
        let applicable = self.model.is_applicable();
        let cursor = self.model.cursor();
        let columns = self.model.columns();
        let (region_top, region_bottom) = self.model.scroll_region();
        let style = self.model.current_style();

        let mut inner = self.inner.lock();
        if let Some(until) = inner.disabled_until {
            if Instant::now() < until {
                return;
            }
            inner.disabled_until = None;
        }

        let tail = inner
            .predictions
            .back()
            .map(Prediction::end_position)
            .unwrap_or(cursor);

        match event {
            TypeAheadEvent::Printable(ch) if ch.is_ascii_graphic() => {
                let in_region_interior = tail.0 >= region_top
                    && tail.0 <= region_bottom
                    && tail.1 + 1 < columns;
                let latency_ok = inner.has_latency_sample
                    && inner.latency_ewma_ms > self.config.latency_threshold_ms as f64;
                if applicable && in_region_interior && latency_ok {
                    inner.predictions.push_back(Prediction::Printable {
                        ch,
                        row: tail.0,
                        col: tail.1,
                        style,
                        created: Instant::now(),
                    });
                }
            }
            TypeAheadEvent::Backspace => {
                if !inner.predictions.is_empty() {
                    if tail.1 > 0 {
                        inner.predictions.push_back(Prediction::Cursor {
                            row: tail.0,
                            col: tail.1 - 1,
                            created: Instant::now(),
                        });
                    } else {
                        inner.predictions.clear();
                    }
                }
            }
            TypeAheadEvent::ArrowLeft | TypeAheadEvent::ArrowRight => {
                // Only speculate on top of existing predictions
                if !inner.predictions.is_empty() {
                    let col = if event == TypeAheadEvent::ArrowLeft {
                        tail.1.checked_sub(1)
                    } else if tail.1 + 1 < columns {
                        Some(tail.1 + 1)
                    } else {
                        None
                    };
                    match col {
                        Some(col) => inner.predictions.push_back(Prediction::Cursor {
                            row: tail.0,
                            col,
                            created: Instant::now(),
                        }),
                        None => inner.predictions.clear(),
                    }
                }
            }
            _ => {
                // Enter, unknown keys, non-ASCII: drop speculation, no penalty
                inner.predictions.clear();
            }
        }
    }

    /// The emulator advanced; reconcile predictions against authority
    pub fn on_terminal_state_changed(&self) {
        if !self.config.enabled {
            return;
        }
        self.expire_old();

        let snapshot: Vec<Prediction> = {
            let inner = self.inner.lock();
            inner.predictions.iter().cloned().collect()
        };
        if snapshot.is_empty() {
            return;
        }

        let cursor = self.model.cursor();
        let mut confirmed = 0usize;
        let mut mismatch = false;
        for prediction in &snapshot {
            match prediction {
                Prediction::Printable { ch, row, col, .. } => {
                    match self.model.char_at(*row, *col) {
                        Some(actual) if actual == *ch => confirmed += 1,
                        Some(' ') | None => break,
                        Some(_) => {
                            mismatch = true;
                            break;
                        }
                    }
                }
                Prediction::Cursor { row, col, .. } => {
                    if cursor == (*row, *col) {
                        confirmed += 1;
                    } else {
                        break;
                    }
                }
            }
        }

        let mut inner = self.inner.lock();
        if mismatch {
            debug!("type-ahead mismatch, disabling predictions");
            inner.predictions.clear();
            inner.disabled_until =
                Some(Instant::now() + Duration::from_millis(self.config.penalty_ms));
            return;
        }
        for _ in 0..confirmed {
            if let Some(prediction) = inner.predictions.pop_front() {
                let sample = prediction.created().elapsed().as_secs_f64() * 1000.0;
                Self::record_sample(&mut inner, sample);
            }
        }
    }

    /// Seed or update the round-trip latency estimate. The manager feeds
    /// this from confirmations; hosts may also seed it from transport-level
    /// measurements so the first keystrokes can predict.
    pub fn record_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock();
        Self::record_sample(&mut inner, latency.as_secs_f64() * 1000.0);
    }

    fn record_sample(inner: &mut Inner, sample_ms: f64) {
        if inner.has_latency_sample {
            inner.latency_ewma_ms =
                inner.latency_ewma_ms * (1.0 - LATENCY_ALPHA) + sample_ms * LATENCY_ALPHA;
        } else {
            inner.latency_ewma_ms = sample_ms;
            inner.has_latency_sample = true;
        }
    }

    pub fn latency_ms(&self) -> Option<f64> {
        let inner = self.inner.lock();
        inner.has_latency_sample.then_some(inner.latency_ewma_ms)
    }

    /// Overlay snapshot for the renderer
    pub fn predictions(&self) -> Vec<PredictedCell> {
        self.inner
            .lock()
            .predictions
            .iter()
            .filter_map(|p| match p {
                Prediction::Printable {
                    ch,
                    row,
                    col,
                    style,
                    ..
                } => Some(PredictedCell {
                    row: *row,
                    col: *col,
                    ch: *ch,
                    style: style.clone(),
                }),
                Prediction::Cursor { .. } => None,
            })
            .collect()
    }

    /// Drop all speculation (resize, reset, disconnect)
    pub fn clear(&self) {
        self.inner.lock().predictions.clear();
    }

    fn expire_old(&self) {
        let timeout = Duration::from_millis(self.config.prediction_timeout_ms);
        let mut inner = self.inner.lock();
        let expired = inner
            .predictions
            .iter()
            .any(|p| p.created().elapsed() > timeout);
        if expired {
            debug!("type-ahead predictions timed out");
            inner.predictions.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct MockState {
        applicable: bool,
        cursor: (usize, usize),
        columns: usize,
        region: (usize, usize),
        cells: Vec<(usize, usize, char)>,
    }

    #[derive(Default)]
    struct MockModel {
        state: PlMutex<MockState>,
    }

    impl MockModel {
        fn new() -> Arc<Self> {
            Arc::new(MockModel {
                state: PlMutex::new(MockState {
                    applicable: true,
                    cursor: (0, 0),
                    columns: 80,
                    region: (0, 23),
                    cells: Vec::new(),
                }),
            })
        }
    }

    impl TypeAheadModel for MockModel {
        fn is_applicable(&self) -> bool {
            self.state.lock().applicable
        }
        fn cursor(&self) -> (usize, usize) {
            self.state.lock().cursor
        }
        fn columns(&self) -> usize {
            self.state.lock().columns
        }
        fn scroll_region(&self) -> (usize, usize) {
            self.state.lock().region
        }
        fn char_at(&self, row: usize, col: usize) -> Option<char> {
            let state = self.state.lock();
            state
                .cells
                .iter()
                .find(|(r, c, _)| (*r, *c) == (row, col))
                .map(|(_, _, ch)| *ch)
                .or(Some(' '))
        }
        fn current_style(&self) -> TextStyle {
            TextStyle::default()
        }
    }

    fn manager(model: Arc<MockModel>) -> TypeAheadManager {
        let manager = TypeAheadManager::new(model, TypeAheadConfig::default());
        // Simulate a slow link so predictions engage
        manager.record_latency(Duration::from_millis(200));
        manager
    }

    #[test]
    fn test_from_bytes_classification() {
        assert_eq!(
            TypeAheadEvent::from_bytes(b"ab"),
            vec![
                TypeAheadEvent::Printable('a'),
                TypeAheadEvent::Printable('b')
            ]
        );
        assert_eq!(TypeAheadEvent::from_bytes(b"\r"), vec![TypeAheadEvent::Enter]);
        assert_eq!(
            TypeAheadEvent::from_bytes(b"\x7f"),
            vec![TypeAheadEvent::Backspace]
        );
        assert_eq!(
            TypeAheadEvent::from_bytes(b"\x1b[D\x1bOC"),
            vec![TypeAheadEvent::ArrowLeft, TypeAheadEvent::ArrowRight]
        );
        assert_eq!(
            TypeAheadEvent::from_bytes(b"\x1b[A"),
            vec![TypeAheadEvent::Unknown]
        );
    }

    #[test]
    fn test_printable_key_predicts() {
        let model = MockModel::new();
        let manager = manager(model);
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        manager.on_key_event(TypeAheadEvent::Printable('y'));
        let overlay = manager.predictions();
        assert_eq!(overlay.len(), 2);
        assert_eq!((overlay[0].row, overlay[0].col, overlay[0].ch), (0, 0, 'x'));
        assert_eq!((overlay[1].row, overlay[1].col, overlay[1].ch), (0, 1, 'y'));
    }

    #[test]
    fn test_no_prediction_below_latency_threshold() {
        let model = MockModel::new();
        let manager = TypeAheadManager::new(model, TypeAheadConfig::default());
        manager.record_latency(Duration::from_millis(5));
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        assert!(manager.predictions().is_empty());
    }

    #[test]
    fn test_no_prediction_when_not_applicable() {
        let model = MockModel::new();
        model.state.lock().applicable = false;
        let manager = manager(model);
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        assert!(manager.predictions().is_empty());
    }

    #[test]
    fn test_matching_output_confirms() {
        let model = MockModel::new();
        let manager = manager(model.clone());
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        model.state.lock().cells.push((0, 0, 'x'));
        model.state.lock().cursor = (0, 1);
        manager.on_terminal_state_changed();
        assert!(manager.predictions().is_empty());
        assert!(manager.latency_ms().is_some());
    }

    #[test]
    fn test_mismatch_invalidates_and_penalizes() {
        let model = MockModel::new();
        let manager = manager(model.clone());
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        manager.on_key_event(TypeAheadEvent::Printable('y'));
        model.state.lock().cells.push((0, 0, 'Q'));
        manager.on_terminal_state_changed();
        assert!(manager.predictions().is_empty());
        // Penalty window: the next keystroke must not predict
        manager.on_key_event(TypeAheadEvent::Printable('z'));
        assert!(manager.predictions().is_empty());
    }

    #[test]
    fn test_unknown_key_flushes() {
        let model = MockModel::new();
        let manager = manager(model);
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        manager.on_key_event(TypeAheadEvent::Unknown);
        assert!(manager.predictions().is_empty());
        // But no penalty: predictions resume immediately
        manager.on_key_event(TypeAheadEvent::Printable('w'));
        assert_eq!(manager.predictions().len(), 1);
    }

    #[test]
    fn test_backspace_on_top_of_prediction() {
        let model = MockModel::new();
        let manager = manager(model);
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        manager.on_key_event(TypeAheadEvent::Backspace);
        // The cursor prediction is invisible but queued
        assert_eq!(manager.predictions().len(), 1);
    }

    #[test]
    fn test_clear_drops_overlay() {
        let model = MockModel::new();
        let manager = manager(model);
        manager.on_key_event(TypeAheadEvent::Printable('x'));
        manager.clear();
        assert!(manager.predictions().is_empty());
    }
}
