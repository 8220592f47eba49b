use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use cellmux_transport::Transport;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameType, DEFAULT_MAX_FRAME_SIZE, MAX_PAYLOAD};
use crate::control::ControlMessage;
use crate::error::{FrameError, Result};

/// Encodes frames and writes each one to the transport in a single
/// exclusive write.
///
/// Cheap to clone; every channel holds one over the shared transport.
pub struct FrameWriter<T: ?Sized> {
    transport: Arc<T>,
    max_frame_size: usize,
}

impl<T: ?Sized> Clone for FrameWriter<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            max_frame_size: self.max_frame_size,
        }
    }
}

impl<T: Transport + ?Sized> FrameWriter<T> {
    /// Create a writer with the basic-option default frame size.
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_max_frame_size(transport, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a writer that splits data at `max_frame_size` bytes.
    pub fn with_max_frame_size(transport: Arc<T>, max_frame_size: usize) -> Self {
        Self {
            transport,
            max_frame_size: max_frame_size.clamp(1, MAX_PAYLOAD),
        }
    }

    /// Write one frame.
    pub fn write_frame(&self, frame: &Frame) -> Result<()> {
        let mut buf = BytesMut::with_capacity(frame.wire_size());
        frame.encode(&mut buf)?;
        trace!(
            dlci = frame.dlci(),
            control = frame.control,
            len = frame.payload.len(),
            "tx frame"
        );
        self.transport.write_all(&buf)?;
        Ok(())
    }

    /// Build and write a frame of `kind` on `dlci`.
    pub fn send(
        &self,
        dlci: u8,
        command: bool,
        kind: FrameType,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        if !crate::channel::is_valid(dlci) {
            return Err(FrameError::InvalidDlci(dlci));
        }
        self.write_frame(&Frame::new(dlci, command, kind, payload))
    }

    /// Send `payload` on `dlci` as consecutive UIH frames of at most
    /// `max_frame_size` bytes each.
    ///
    /// Returns the number of frames written.
    pub fn send_data(&self, dlci: u8, payload: &[u8]) -> Result<usize> {
        if !crate::channel::is_valid(dlci) {
            return Err(FrameError::InvalidDlci(dlci));
        }
        let mut buf = BytesMut::new();
        let mut count = 0usize;
        for chunk in split_payload(payload, self.max_frame_size) {
            buf.clear();
            let address = (dlci << 2) | crate::codec::CR;
            encode_frame(address, FrameType::Uih.control(), chunk, &mut buf)?;
            self.transport.write_all(&buf)?;
            count += 1;
        }
        trace!(dlci, len = payload.len(), frames = count, "tx data");
        Ok(count)
    }

    /// Send a control-channel message on DLCI 0.
    pub fn send_control(&self, message: &ControlMessage) -> Result<()> {
        self.send(
            crate::channel::CONTROL,
            true,
            FrameType::Uih,
            message.encode(),
        )
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size.clamp(1, MAX_PAYLOAD);
    }

    /// Borrow the underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

/// Split `payload` into `ceil(len / max)` consecutive chunks; the last may
/// be shorter. An empty payload yields no chunks.
pub fn split_payload(payload: &[u8], max: usize) -> std::slice::Chunks<'_, u8> {
    payload.chunks(max.max(1))
}
