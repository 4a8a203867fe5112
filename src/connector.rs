//! Byte channel to the pseudo-terminal.
//!
//! The core never spawns processes; it talks to the PTY through the
//! [`TtyConnector`] capability interface. Hosts wrap their platform PTY
//! (openpty, ConPTY, ssh channel) behind it. [`ChannelConnector`] is an
//! in-memory implementation used by the integration tests and by hosts that
//! pipe byte streams from elsewhere.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::term::TermSize;

/// Bidirectional byte channel wrapping the PTY.
///
/// `read` blocks until data arrives or the channel closes; `Ok(0)` is end of
/// stream. Implementations must let a concurrent `close` unblock a pending
/// `read`.
pub trait TtyConnector: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;
    /// Raw bytes of PTY input
    fn write_bytes(&self, bytes: &[u8]) -> io::Result<()>;
    /// UTF-8 encoded PTY input
    fn write_string(&self, text: &str) -> io::Result<()> {
        self.write_bytes(text.as_bytes())
    }
    /// Forward new dimensions to the PTY (TIOCSWINSZ or platform analog)
    fn resize(&self, size: TermSize) -> io::Result<()>;
    fn is_connected(&self) -> bool;
    fn close(&self);
    fn name(&self) -> &str;
}

const READ_POLL: Duration = Duration::from_millis(25);

/// In-memory connector: one side is the terminal core, the other a
/// [`ChannelEndpoint`] standing in for the child process.
pub struct ChannelConnector {
    name: String,
    incoming: Mutex<Receiver<Vec<u8>>>,
    pending: Mutex<Vec<u8>>,
    written: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<TermSize>>,
    connected: AtomicBool,
}

impl ChannelConnector {
    /// Build a connector plus the endpoint that feeds and observes it
    pub fn pair(name: &str) -> (Arc<ChannelConnector>, ChannelEndpoint) {
        let (tx, rx) = std::sync::mpsc::channel();
        let connector = Arc::new(ChannelConnector {
            name: name.to_string(),
            incoming: Mutex::new(rx),
            pending: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        });
        let endpoint = ChannelEndpoint {
            tx,
            connector: connector.clone(),
        };
        (connector, endpoint)
    }

    fn drain_pending(&self, buf: &mut [u8]) -> usize {
        let mut pending = self.pending.lock();
        let n = pending.len().min(buf.len());
        if n > 0 {
            buf[..n].copy_from_slice(&pending[..n]);
            pending.drain(..n);
        }
        n
    }
}

impl TtyConnector for ChannelConnector {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.drain_pending(buf);
            if n > 0 {
                return Ok(n);
            }
            if !self.connected.load(Ordering::SeqCst) {
                return Ok(0);
            }
            let chunk = {
                let incoming = self.incoming.lock();
                incoming.recv_timeout(READ_POLL)
            };
            match chunk {
                Ok(chunk) => self.pending.lock().extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(0);
                }
            }
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        self.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn resize(&self, size: TermSize) -> io::Result<()> {
        self.resizes.lock().push(size);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The far side of a [`ChannelConnector`]
pub struct ChannelEndpoint {
    tx: Sender<Vec<u8>>,
    connector: Arc<ChannelConnector>,
}

impl ChannelEndpoint {
    /// Feed bytes the terminal will read as process output
    pub fn feed(&self, bytes: &[u8]) {
        let _ = self.tx.send(bytes.to_vec());
    }

    /// End of stream: the terminal reads remaining bytes, then EOF
    pub fn close(self) {
        drop(self.tx);
    }

    /// Bytes the terminal wrote toward the process so far
    pub fn written(&self) -> Vec<u8> {
        self.connector.written.lock().clone()
    }

    /// Take the written bytes, clearing the capture
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.connector.written.lock())
    }

    /// Resizes forwarded to the PTY so far
    pub fn resizes(&self) -> Vec<TermSize> {
        self.connector.resizes.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_read_returns_fed_bytes() {
        let (connector, endpoint) = ChannelConnector::pair("test");
        endpoint.feed(b"hello");
        let mut buf = [0u8; 16];
        let n = connector.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn test_read_eof_after_close() {
        let (connector, endpoint) = ChannelConnector::pair("test");
        endpoint.feed(b"ab");
        endpoint.close();
        let mut buf = [0u8; 16];
        assert_eq!(connector.read(&mut buf).unwrap(), 2);
        assert_eq!(connector.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close_unblocks_reader() {
        let (connector, _endpoint) = ChannelConnector::pair("test");
        let reader = {
            let connector = connector.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                connector.read(&mut buf).unwrap()
            })
        };
        thread::sleep(Duration::from_millis(50));
        connector.close();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn test_write_after_close_fails() {
        let (connector, _endpoint) = ChannelConnector::pair("test");
        connector.close();
        assert!(connector.write_bytes(b"x").is_err());
        assert!(!connector.is_connected());
    }
}
