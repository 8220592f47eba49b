use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Opening and closing flag of every basic-option frame.
pub const FLAG: u8 = 0xF9;

/// Extension bit of the address and length octets.
pub const EA: u8 = 0x01;

/// Command/response bit of the address octet.
pub const CR: u8 = 0x02;

/// Poll/final bit of the control octet.
pub const PF: u8 = 0x10;

/// Flag, address, control and one length octet.
pub const MIN_HEADER_LEN: usize = 4;

/// Wire bytes around a payload with a short length field.
pub const FRAME_OVERHEAD: usize = 6;

/// Largest payload that fits a single length octet.
pub const SHORT_LENGTH_MAX: usize = 127;

/// Largest payload the 15-bit length field can carry.
pub const MAX_PAYLOAD: usize = 0x7FFF;

/// Basic-option maximum frame size when none is negotiated.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 127;

/// FCS residue of a frame checked together with its received FCS.
pub const GOOD_FCS_RESIDUE: u8 = 0xCF;

const QUIRK_LENGTH: u8 = 0xFF;

/// CRC-8, polynomial 0x07 reflected, as a lookup table.
const CRC_TABLE: [u8; 256] = build_crc_table();

const fn build_crc_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x01 != 0 {
                (crc >> 1) ^ 0xE0
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Run the FCS register over `bytes`, starting from `crc`.
pub fn crc8(crc: u8, bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(crc, |crc, &b| CRC_TABLE[usize::from(crc ^ b)])
}

/// Frame check sequence for a frame with the given header and payload.
///
/// UIH frames protect only address, control and length; every other type
/// also covers the payload.
pub fn compute_fcs(address: u8, control: u8, length: &[u8], payload: &[u8]) -> u8 {
    let mut crc = crc8(0xFF, &[address, control]);
    crc = crc8(crc, length);
    if FrameType::from_control(control) != Some(FrameType::Uih) {
        crc = crc8(crc, payload);
    }
    0xFF - crc
}

/// Control-field frame types. Comparison ignores the poll/final bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Set asynchronous balanced mode (establish).
    Sabm,
    /// Unnumbered acknowledgement.
    Ua,
    /// Disconnected mode.
    Dm,
    /// Disconnect.
    Disc,
    /// Unnumbered information with header check.
    Uih,
    /// Unnumbered information.
    Ui,
    /// Numbered information. Reserved; never sent.
    I,
}

impl FrameType {
    /// Wire value of the control octet as this stack sends it.
    pub const fn control(self) -> u8 {
        match self {
            FrameType::Sabm => 0x3F,
            FrameType::Ua => 0x73,
            FrameType::Dm => 0x1F,
            FrameType::Disc => 0x53,
            FrameType::Uih => 0xEF,
            FrameType::Ui => 0x03,
            FrameType::I => 0x00,
        }
    }

    /// Classify a received control octet.
    pub const fn from_control(control: u8) -> Option<Self> {
        match control & !PF {
            0x2F => Some(FrameType::Sabm),
            0x63 => Some(FrameType::Ua),
            0x0F => Some(FrameType::Dm),
            0x43 => Some(FrameType::Disc),
            0xEF => Some(FrameType::Uih),
            0x03 => Some(FrameType::Ui),
            c if c & 0x01 == 0 => Some(FrameType::I),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            FrameType::Sabm => "SABM",
            FrameType::Ua => "UA",
            FrameType::Dm => "DM",
            FrameType::Disc => "DISC",
            FrameType::Uih => "UIH",
            FrameType::Ui => "UI",
            FrameType::I => "I",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameStatus {
    Ok,
    EmptyFrame,
    BadFlags,
    ChecksumError,
}

/// Tolerances for non-conformant modems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compat {
    /// Treat a `0xFF` length octet as "everything up to the FCS" and skip
    /// its checksum.
    pub length_ff_quirk: bool,
    /// Accept UA frames without checking their FCS.
    pub trust_ua_fcs: bool,
}

impl Compat {
    /// Plain GSM 07.10 with no tolerances.
    pub const fn strict() -> Self {
        Self {
            length_ff_quirk: false,
            trust_ua_fcs: false,
        }
    }
}

impl Default for Compat {
    fn default() -> Self {
        Self {
            length_ff_quirk: true,
            trust_ua_fcs: true,
        }
    }
}

/// One basic-option frame.
///
/// `address` and `control` are kept exactly as sent or received; use
/// [`Frame::dlci`] and [`Frame::frame_type`] to interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub control: u8,
    pub payload: Bytes,
    pub fcs: u8,
    pub status: FrameStatus,
}

impl Frame {
    /// Build an outgoing frame. The EA bit is always set.
    pub fn new(dlci: u8, command: bool, kind: FrameType, payload: impl Into<Bytes>) -> Self {
        let address = ((dlci & 0x3F) << 2) | if command { CR } else { 0 } | EA;
        Self::from_parts(address, kind.control(), payload.into())
    }

    /// Build a frame from a raw address and control octet.
    pub fn from_parts(address: u8, control: u8, payload: Bytes) -> Self {
        let address = address | EA;
        let (length, n) = encode_length(payload.len());
        let fcs = compute_fcs(address, control, &length[..n], &payload);
        Self {
            address,
            control,
            payload,
            fcs,
            status: FrameStatus::Ok,
        }
    }

    pub fn dlci(&self) -> u8 {
        self.address >> 2
    }

    /// C/R bit of the address octet.
    pub fn is_command(&self) -> bool {
        self.address & CR != 0
    }

    pub fn poll_final(&self) -> bool {
        self.control & PF != 0
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_control(self.control)
    }

    /// True for a frame of `kind` on `dlci`, whatever the P/F bit.
    pub fn is(&self, dlci: u8, kind: FrameType) -> bool {
        self.dlci() == dlci && self.frame_type() == Some(kind)
    }

    pub fn is_ok(&self) -> bool {
        self.status == FrameStatus::Ok
    }

    /// Total bytes on the wire.
    pub fn wire_size(&self) -> usize {
        let len = self.payload.len();
        FRAME_OVERHEAD + len + usize::from(len > SHORT_LENGTH_MAX)
    }

    /// Serialize into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_frame(self.address, self.control, &self.payload, dst)
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut dst = BytesMut::with_capacity(self.wire_size());
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    /// Turn a decode status into an error.
    pub fn into_result(self) -> Result<Frame> {
        match self.status {
            FrameStatus::Ok => Ok(self),
            FrameStatus::EmptyFrame => Err(FrameError::Empty),
            FrameStatus::BadFlags => Err(FrameError::BadFlags),
            FrameStatus::ChecksumError => Err(FrameError::Checksum { fcs: self.fcs }),
        }
    }

    fn rejected(status: FrameStatus, fcs: u8) -> Self {
        Self {
            address: 0,
            control: 0,
            payload: Bytes::new(),
            fcs,
            status,
        }
    }
}

fn encode_length(len: usize) -> ([u8; 2], usize) {
    if len > SHORT_LENGTH_MAX {
        let field = (len << 1) & 0xFFFE;
        ([(field & 0xFF) as u8, (field >> 8) as u8], 2)
    } else {
        ([((len as u8) << 1) | EA, 0], 1)
    }
}

/// Decode a length field starting at `octets[0]`.
///
/// Returns the payload length and the number of length octets, or `None`
/// when the long form is cut short.
pub fn decode_length(octets: &[u8]) -> Option<(usize, usize)> {
    let first = *octets.first()?;
    if first & EA != 0 {
        Some((usize::from(first >> 1), 1))
    } else {
        let second = *octets.get(1)?;
        Some((usize::from(first >> 1) + (usize::from(second) << 7), 2))
    }
}

/// Encode one frame.
///
/// Wire format:
/// ```text
/// ┌──────┬─────────┬─────────┬────────────┬─────────┬─────┬──────┐
/// │ 0xF9 │ address │ control │ length 1-2 │ payload │ FCS │ 0xF9 │
/// └──────┴─────────┴─────────┴────────────┴─────────┴─────┴──────┘
/// ```
pub fn encode_frame(address: u8, control: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let address = address | EA;
    let (length, n) = encode_length(payload.len());
    dst.reserve(FRAME_OVERHEAD + 1 + payload.len());
    dst.put_u8(FLAG);
    dst.put_u8(address);
    dst.put_u8(control);
    dst.put_slice(&length[..n]);
    dst.put_slice(payload);
    dst.put_u8(compute_fcs(address, control, &length[..n], payload));
    dst.put_u8(FLAG);
    Ok(())
}

/// Decode one frame occupying `buf` from its opening flag.
///
/// Never fails outright: problems are reported through
/// [`Frame::status`], with address, control and payload cleared.
pub fn decode(buf: &[u8], compat: Compat) -> Frame {
    if buf.is_empty() {
        return Frame::rejected(FrameStatus::EmptyFrame, 0);
    }
    if buf.len() < MIN_HEADER_LEN || buf[0] != FLAG {
        return Frame::rejected(FrameStatus::BadFlags, 0);
    }

    let address = buf[1];
    let control = buf[2];
    let quirk = compat.length_ff_quirk && buf[3] == QUIRK_LENGTH;

    let (payload_len, header_len) = if quirk {
        // Deviates from GSM 07.10: some Quectel firmware puts 0xFF in the
        // length octet whatever the real length. The payload is everything
        // between the header and the FCS.
        if buf.len() < FRAME_OVERHEAD {
            return Frame::rejected(FrameStatus::EmptyFrame, 0);
        }
        (buf.len() - FRAME_OVERHEAD, MIN_HEADER_LEN)
    } else {
        match decode_length(&buf[3..]) {
            Some((len, octets)) => (len, 3 + octets),
            None => return Frame::rejected(FrameStatus::BadFlags, 0),
        }
    };

    let fcs_at = header_len + payload_len;
    if buf.len() < fcs_at + 2 || buf[fcs_at + 1] != FLAG {
        return Frame::rejected(FrameStatus::BadFlags, 0);
    }

    let fcs = buf[fcs_at];
    let payload = &buf[header_len..fcs_at];
    let exempt = quirk
        || (compat.trust_ua_fcs && FrameType::from_control(control) == Some(FrameType::Ua));
    if !exempt && compute_fcs(address, control, &buf[3..header_len], payload) != fcs {
        return Frame::rejected(FrameStatus::ChecksumError, fcs);
    }

    Frame {
        address,
        control,
        payload: Bytes::copy_from_slice(payload),
        fcs,
        status: FrameStatus::Ok,
    }
}

/// Decode one frame, mapping a bad status to an error.
pub fn decode_frame(buf: &[u8], compat: Compat) -> Result<Frame> {
    decode(buf, compat).into_result()
}

/// True when `buf` starts and ends with a flag and holds at least as many
/// bytes as its length field declares. Safe on any truncated input.
pub fn is_complete(buf: &[u8]) -> bool {
    if buf.len() < MIN_HEADER_LEN || buf[0] != FLAG || buf[buf.len() - 1] != FLAG {
        return false;
    }
    match decode_length(&buf[3..]) {
        Some((len, octets)) => buf.len() >= FRAME_OVERHEAD + len + (octets - 1),
        None => false,
    }
}

/// [`is_complete`] that also closes a `0xFF`-length frame at its first
/// trailing flag when the quirk is enabled.
pub fn is_complete_with(buf: &[u8], compat: Compat) -> bool {
    if compat.length_ff_quirk
        && buf.len() >= FRAME_OVERHEAD
        && buf[0] == FLAG
        && buf[3] == QUIRK_LENGTH
        && buf[buf.len() - 1] == FLAG
    {
        return true;
    }
    is_complete(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: &Frame) -> Vec<u8> {
        frame.to_bytes().unwrap().to_vec()
    }

    #[test]
    fn crc_table_matches_reference_entries() {
        assert_eq!(CRC_TABLE[0], 0x00);
        assert_eq!(CRC_TABLE[1], 0x91);
        assert_eq!(CRC_TABLE[2], 0xE3);
        assert_eq!(CRC_TABLE[255], 0xCF);
    }

    #[test]
    fn sabm_on_control_channel_is_bit_exact() {
        let frame = Frame::new(0, true, FrameType::Sabm, Bytes::new());
        assert_eq!(encoded(&frame), vec![0xF9, 0x03, 0x3F, 0x01, 0x1C, 0xF9]);
    }

    #[test]
    fn uih_test_vector_decodes_with_known_fcs() {
        let wire = [0xF9, 0x27, 0xEF, 0x01, 0xE2, 0xF9];
        let frame = decode(&wire, Compat::strict());
        assert_eq!(frame.status, FrameStatus::Ok);
        assert_eq!(frame.dlci(), 9);
        assert!(frame.is_command());
        assert_eq!(frame.frame_type(), Some(FrameType::Uih));
        assert_eq!(frame.fcs, 0xE2);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn received_fcs_leaves_good_residue() {
        let residue = crc8(0xFF, &[0x27, 0xEF, 0x01, 0xE2]);
        assert_eq!(residue, GOOD_FCS_RESIDUE);
    }

    #[test]
    fn round_trip_across_length_boundary() {
        for len in [0usize, 1, 126, 127, 128, 32767] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            for kind in [FrameType::Uih, FrameType::Ui] {
                let frame = Frame::new(5, true, kind, payload.clone());
                let wire = encoded(&frame);
                assert_eq!(wire.len(), frame.wire_size());
                let long = len > SHORT_LENGTH_MAX;
                assert_eq!(wire[3] & EA == 0, long, "length form for {len}");

                let decoded = decode(&wire, Compat::strict());
                assert_eq!(decoded, frame, "len {len} {kind}");
            }
        }
    }

    #[test]
    fn uih_fcs_excludes_payload() {
        let payload = b"AT+CSQ\r".to_vec();
        let uih = Frame::new(1, true, FrameType::Uih, payload.clone());
        let sabm = Frame::new(1, true, FrameType::Sabm, payload.clone());
        assert_ne!(uih.fcs, sabm.fcs);

        // Same length, different payload: only the UI FCS moves.
        let other_uih = Frame::new(1, true, FrameType::Uih, b"1234567".to_vec());
        assert_eq!(uih.fcs, other_uih.fcs);
        let ui = Frame::new(1, true, FrameType::Ui, payload);
        let other_ui = Frame::new(1, true, FrameType::Ui, b"1234567".to_vec());
        assert_ne!(ui.fcs, other_ui.fcs);
    }

    #[test]
    fn uih_fcs_covers_both_long_length_octets() {
        let a = Frame::new(3, true, FrameType::Uih, vec![0u8; 200]);
        let b = Frame::new(3, true, FrameType::Uih, vec![0u8; 328]);
        // First length octet is equal, second differs.
        assert_eq!(encoded(&a)[3], encoded(&b)[3]);
        assert_ne!(a.fcs, b.fcs);
    }

    #[test]
    fn flipped_payload_byte_is_checksum_error() {
        let frame = Frame::new(2, false, FrameType::Ui, b"+CREG: 1".to_vec());
        let wire = encoded(&frame);
        for i in 4..wire.len() - 2 {
            let mut corrupted = wire.clone();
            corrupted[i] ^= 0x01;
            let decoded = decode(&corrupted, Compat::default());
            assert_eq!(decoded.status, FrameStatus::ChecksumError, "byte {i}");
            assert_eq!(decoded.address, 0);
            assert_eq!(decoded.control, 0);
            assert!(decoded.payload.is_empty());
        }
    }

    #[test]
    fn checksum_error_maps_to_error() {
        let mut wire = encoded(&Frame::new(0, true, FrameType::Sabm, Bytes::new()));
        wire[4] ^= 0xFF;
        let err = decode_frame(&wire, Compat::strict()).unwrap_err();
        assert!(matches!(err, FrameError::Checksum { .. }));
    }

    #[test]
    fn ua_fcs_trusted_only_when_enabled() {
        let mut wire = encoded(&Frame::new(1, true, FrameType::Ua, Bytes::new()));
        wire[4] = 0x00;
        assert!(decode(&wire, Compat::default()).is_ok());
        assert_eq!(
            decode(&wire, Compat::strict()).status,
            FrameStatus::ChecksumError
        );
    }

    #[test]
    fn ff_length_quirk_takes_everything_before_fcs() {
        let mut wire = vec![0xF9, 0x09, 0xEF, 0xFF];
        wire.extend_from_slice(b"\r\nRING\r\n");
        wire.extend_from_slice(&[0x00, 0xF9]);

        let frame = decode(&wire, Compat::default());
        assert!(frame.is_ok());
        assert_eq!(frame.dlci(), 2);
        assert_eq!(frame.payload.as_ref(), b"\r\nRING\r\n");
        assert!(is_complete_with(&wire, Compat::default()));
        assert!(!is_complete(&wire));

        assert_eq!(decode(&wire, Compat::strict()).status, FrameStatus::BadFlags);
    }

    #[test]
    fn quirk_frame_shorter_than_overhead_is_empty() {
        let wire = [0xF9, 0x09, 0xEF, 0xFF, 0xF9];
        assert_eq!(
            decode(&wire, Compat::default()).status,
            FrameStatus::EmptyFrame
        );
    }

    #[test]
    fn bad_flags_and_empty() {
        assert_eq!(decode(&[], Compat::default()).status, FrameStatus::EmptyFrame);
        assert_eq!(
            decode(&[0xF9, 0x03, 0x3F], Compat::default()).status,
            FrameStatus::BadFlags
        );
        assert_eq!(
            decode(&[0x00, 0x03, 0x3F, 0x01, 0x1C, 0xF9], Compat::default()).status,
            FrameStatus::BadFlags
        );
        assert_eq!(
            decode(&[0xF9, 0x03, 0x3F, 0x01, 0x1C, 0x00], Compat::default()).status,
            FrameStatus::BadFlags
        );
        // Declared length longer than the buffer.
        assert_eq!(
            decode(&[0xF9, 0x03, 0xEF, 0x0B, 0x1C, 0xF9], Compat::default()).status,
            FrameStatus::BadFlags
        );
    }

    #[test]
    fn is_complete_rejects_every_proper_prefix() {
        for len in [3usize, 300] {
            let frame = Frame::new(1, true, FrameType::Uih, vec![0x41; len]);
            let wire = encoded(&frame);
            for end in 0..wire.len() {
                assert!(!is_complete(&wire[..end]), "prefix {end} of {len}");
            }
            assert!(is_complete(&wire));
        }
    }

    #[test]
    fn control_type_ignores_poll_final() {
        assert_eq!(FrameType::from_control(0x2F), Some(FrameType::Sabm));
        assert_eq!(FrameType::from_control(0x3F), Some(FrameType::Sabm));
        assert_eq!(FrameType::from_control(0x63), Some(FrameType::Ua));
        assert_eq!(FrameType::from_control(0xFF), Some(FrameType::Uih));
        assert_eq!(FrameType::from_control(0x13), Some(FrameType::Ui));
        assert_eq!(FrameType::from_control(0x00), Some(FrameType::I));
        assert_eq!(FrameType::from_control(0x0B), None);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let frame = Frame::new(3, true, FrameType::Uih, vec![0u8; MAX_PAYLOAD + 1]);
        assert!(matches!(
            frame.to_bytes(),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn compat_deserializes_partial_json() {
        let compat: Compat = serde_json::from_str(r#"{"trust_ua_fcs": false}"#).unwrap();
        assert!(compat.length_ff_quirk);
        assert!(!compat.trust_ua_fcs);
    }
}
