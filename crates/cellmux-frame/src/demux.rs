use bytes::BytesMut;
use serde::Serialize;
use tracing::{trace, warn};

use crate::codec::{decode, is_complete_with, Compat, Frame, FrameStatus, FLAG, MAX_PAYLOAD};
use crate::dump::hex_dump;

/// Long-form header, FCS and both flags.
const MAX_OVERHEAD: usize = 7;

/// Counters kept by a [`Demuxer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DemuxStats {
    /// Frames decoded and handed on.
    pub frames: u64,
    /// Candidates dropped for bad flags or truncation.
    pub bad_flags: u64,
    /// Candidates dropped for FCS mismatch.
    pub checksum_errors: u64,
    /// Candidates abandoned for exceeding the maximum frame length.
    pub overruns: u64,
}

/// Reassembles frames out of the raw receive stream.
///
/// There is one accumulator for the whole link, not one per DLCI. Bytes
/// outside a candidate frame are ignored until the next flag.
pub struct Demuxer {
    buf: BytesMut,
    in_frame: bool,
    compat: Compat,
    max_frame_len: usize,
    stats: DemuxStats,
}

impl Demuxer {
    /// Accept any frame the length field can describe.
    pub fn new(compat: Compat) -> Self {
        Self::with_max_payload(compat, MAX_PAYLOAD)
    }

    /// Abandon candidates that grow beyond `max_payload` plus framing.
    pub fn with_max_payload(compat: Compat, max_payload: usize) -> Self {
        let max_frame_len = max_payload.min(MAX_PAYLOAD) + MAX_OVERHEAD;
        Self {
            buf: BytesMut::with_capacity(max_frame_len.min(4096)),
            in_frame: false,
            compat,
            max_frame_len,
            stats: DemuxStats::default(),
        }
    }

    /// Feed received bytes; every good frame is passed to `sink` in order.
    pub fn push<F>(&mut self, bytes: &[u8], mut sink: F)
    where
        F: FnMut(Frame),
    {
        for &byte in bytes {
            if !self.in_frame {
                if byte == FLAG {
                    self.start_at_flag();
                }
                continue;
            }

            self.buf.extend_from_slice(&[byte]);

            if byte == FLAG {
                if self.buf.len() == 2 {
                    // Two adjacent flags: idle line, keep one.
                    self.buf.truncate(1);
                    continue;
                }
                if is_complete_with(&self.buf, self.compat) {
                    let frame = decode(&self.buf, self.compat);
                    match frame.status {
                        FrameStatus::Ok => {
                            self.stats.frames += 1;
                            trace!(
                                dlci = frame.dlci(),
                                control = frame.control,
                                len = frame.payload.len(),
                                "rx frame"
                            );
                            self.buf.clear();
                            self.in_frame = false;
                            sink(frame);
                        }
                        FrameStatus::ChecksumError => {
                            self.stats.checksum_errors += 1;
                            warn!(fcs = frame.fcs, bytes = %hex_dump(&self.buf), "dropping frame with bad FCS");
                            self.buf.clear();
                            self.in_frame = false;
                        }
                        FrameStatus::BadFlags | FrameStatus::EmptyFrame => {
                            self.stats.bad_flags += 1;
                            warn!(bytes = %hex_dump(&self.buf), "dropping frame with bad flags");
                            self.start_at_flag();
                        }
                    }
                    continue;
                }
            }

            if self.buf.len() > self.max_frame_len {
                self.stats.overruns += 1;
                warn!(len = self.buf.len(), "frame candidate too long, resynchronising");
                if byte == FLAG {
                    self.start_at_flag();
                } else {
                    self.buf.clear();
                    self.in_frame = false;
                }
            }
        }
    }

    /// Forget any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_frame = false;
    }

    /// Bytes of the current partial frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    pub fn compat(&self) -> Compat {
        self.compat
    }

    fn start_at_flag(&mut self) {
        self.buf.clear();
        self.buf.extend_from_slice(&[FLAG]);
        self.in_frame = true;
    }
}

impl std::fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demuxer")
            .field("pending", &self.buf.len())
            .field("in_frame", &self.in_frame)
            .field("stats", &self.stats)
            .finish()
    }
}
