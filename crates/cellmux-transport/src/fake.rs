use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// One write as seen by a [`FakeModem`] responder.
#[derive(Debug, Clone, Copy)]
pub struct WriteEvent<'a> {
    /// Bytes handed to `write_all`.
    pub bytes: &'a [u8],
    /// Line speed at the time of the write.
    pub baud: u32,
    /// Zero-based index of this write.
    pub index: usize,
}

type Responder = Box<dyn FnMut(WriteEvent<'_>) -> Vec<u8> + Send>;

struct FakeState {
    rx: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    baud_history: Vec<u32>,
    baud: u32,
    responder: Option<Responder>,
    read_error: Option<ErrorKind>,
    write_error: Option<ErrorKind>,
}

/// In-memory modem link for tests and demos.
///
/// Every write is recorded and offered to an optional responder closure;
/// whatever the responder returns becomes readable on the receive side.
/// Bytes can also be pushed directly with [`FakeModem::inject`].
pub struct FakeModem {
    state: Mutex<FakeState>,
    readable: Condvar,
}

impl FakeModem {
    /// A silent modem at 115200 baud.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                rx: VecDeque::new(),
                writes: Vec::new(),
                baud_history: Vec::new(),
                baud: 115_200,
                responder: None,
                read_error: None,
                write_error: None,
            }),
            readable: Condvar::new(),
        }
    }

    /// A modem that answers writes through `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(WriteEvent<'_>) -> Vec<u8> + Send + 'static,
    {
        let modem = Self::new();
        modem.set_responder(responder);
        modem
    }

    /// Replace the responder.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(WriteEvent<'_>) -> Vec<u8> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Make `bytes` readable as if the modem had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.rx.extend(bytes.iter().copied());
        drop(state);
        self.readable.notify_all();
    }

    /// Make every subsequent read fail with `kind`.
    pub fn fail_reads(&self, kind: ErrorKind) {
        self.lock().read_error = Some(kind);
        self.readable.notify_all();
    }

    /// Make every subsequent write fail with `kind`.
    pub fn fail_writes(&self, kind: ErrorKind) {
        self.lock().write_error = Some(kind);
    }

    /// All writes so far, one entry per `write_all` call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// All written bytes concatenated.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.lock().writes.concat()
    }

    /// Number of `write_all` calls so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Forget recorded writes.
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Every speed passed to `set_baud_rate`, in order.
    pub fn baud_history(&self) -> Vec<u32> {
        self.lock().baud_history.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FakeModem {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for FakeModem {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(kind) = state.read_error {
                return Err(TransportError::Io(std::io::Error::from(kind)));
            }
            if !state.rx.is_empty() {
                let n = buf.len().min(state.rx.len());
                for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            state = self
                .readable
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn write_all(&self, buf: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if let Some(kind) = state.write_error {
            return Err(TransportError::Io(std::io::Error::from(kind)));
        }
        let index = state.writes.len();
        state.writes.push(buf.to_vec());
        let baud = state.baud;
        let reply = match state.responder.as_mut() {
            Some(responder) => responder(WriteEvent {
                bytes: buf,
                baud,
                index,
            }),
            None => Vec::new(),
        };
        if !reply.is_empty() {
            state.rx.extend(reply);
            drop(state);
            self.readable.notify_all();
        }
        Ok(())
    }

    fn set_baud_rate(&self, baud: u32) -> Result<()> {
        let mut state = self.lock();
        state.baud = baud;
        state.baud_history.push(baud);
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.lock().baud
    }

    fn name(&self) -> &str {
        "fake"
    }

    fn discard_input(&self) -> Result<usize> {
        let mut state = self.lock();
        let n = state.rx.len();
        state.rx.clear();
        Ok(n)
    }
}

impl std::fmt::Debug for FakeModem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("FakeModem")
            .field("baud", &state.baud)
            .field("pending_rx", &state.rx.len())
            .field("writes", &state.writes.len())
            .finish()
    }
}
