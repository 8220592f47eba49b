use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// UART transport backed by the `serialport` crate.
///
/// The device is opened once and cloned into separate read and write
/// handles, so the receive loop can block in `read` while channels write.
pub struct SerialTransport {
    path: String,
    reader: Mutex<Box<dyn SerialPort>>,
    writer: Mutex<Box<dyn SerialPort>>,
    baud: AtomicU32,
}

impl SerialTransport {
    /// Speed modems boot with when autobauding is off.
    pub const DEFAULT_BAUD: u32 = 115_200;
    /// Line speeds the modem can be switched between.
    pub const SUPPORTED_BAUDS: [u32; 7] = [9600, 19200, 38400, 57600, 115_200, 230_400, 460_800];

    /// Open `path` at `baud`, 8N1, with optional RTS/CTS flow control.
    pub fn open(path: &str, baud: u32, hardware_flow_control: bool) -> Result<Self> {
        if !Self::SUPPORTED_BAUDS.contains(&baud) {
            return Err(TransportError::UnsupportedBaudRate(baud));
        }

        let writer = serialport::new(path, baud)
            .timeout(Duration::from_millis(100))
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(if hardware_flow_control {
                FlowControl::Hardware
            } else {
                FlowControl::None
            })
            .open()
            .map_err(|source| TransportError::Open {
                path: path.to_string(),
                source,
            })?;
        let reader = writer.try_clone()?;

        info!(path, baud, hardware_flow_control, "opened modem uart");

        Ok(Self {
            path: path.to_string(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            baud: AtomicU32::new(baud),
        })
    }

    /// Device path this transport was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn locked(port: &Mutex<Box<dyn SerialPort>>) -> MutexGuard<'_, Box<dyn SerialPort>> {
    port.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Transport for SerialTransport {
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut port = locked(&self.reader);
        port.set_timeout(timeout)?;
        loop {
            match port.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::TimedOut => return Ok(0),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn write_all(&self, buf: &[u8]) -> Result<()> {
        let mut port = locked(&self.writer);
        let mut offset = 0usize;
        while offset < buf.len() {
            match port.write(&buf[offset..]) {
                Ok(0) => return Err(TransportError::Shutdown),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        port.flush()?;
        Ok(())
    }

    fn set_baud_rate(&self, baud: u32) -> Result<()> {
        if !Self::SUPPORTED_BAUDS.contains(&baud) {
            return Err(TransportError::UnsupportedBaudRate(baud));
        }
        locked(&self.writer).set_baud_rate(baud)?;
        locked(&self.reader).set_baud_rate(baud)?;
        self.baud.store(baud, Ordering::SeqCst);
        debug!(path = %self.path, baud, "uart speed changed");
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "uart"
    }

    fn discard_input(&self) -> Result<usize> {
        let port = locked(&self.reader);
        let pending = port.bytes_to_read()? as usize;
        port.clear(ClearBuffer::Input)?;
        Ok(pending)
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud", &self.baud_rate())
            .finish()
    }
}
