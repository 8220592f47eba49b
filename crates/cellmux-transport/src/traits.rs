use std::time::Duration;

use crate::error::Result;

/// How long [`Transport::discard_input`] waits for more stale bytes.
pub const DISCARD_POLL: Duration = Duration::from_millis(20);

/// A full-duplex byte link to the modem.
///
/// Implementations are shared between the receive loop and every channel
/// that writes, so all methods take `&self` and do their own locking.
pub trait Transport: Send + Sync + 'static {
    /// Read whatever bytes are available, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when the wait elapsed without data. Errors are
    /// reserved for genuine link failures.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write `buf` completely as one exclusive section.
    fn write_all(&self, buf: &[u8]) -> Result<()>;

    /// Change the line speed.
    fn set_baud_rate(&self, baud: u32) -> Result<()>;

    /// Current line speed.
    fn baud_rate(&self) -> u32;

    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Drop any bytes already queued on the receive path.
    ///
    /// Returns the number of bytes discarded.
    fn discard_input(&self) -> Result<usize> {
        let mut buf = [0u8; 256];
        let mut total = 0usize;
        loop {
            let n = self.read(&mut buf, DISCARD_POLL)?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }
}
