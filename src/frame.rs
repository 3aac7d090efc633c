//! The logical frame and its on-wire encoding.

use crate::crc32::Crc32;

// Special protocol bytes.
pub(crate) const HEADER_BYTE: u8 = 0xaa;
pub(crate) const STUFF_BYTE: u8 = 0x55;
pub(crate) const EOF_BYTE: u8 = 0x55;

// Reserved control ids. A NACK reuses the ACK id; the two are distinguished
// by protocol context only, not by wire tag.
pub(crate) const ACK: u8 = 0xff;
pub(crate) const RESET: u8 = 0xfe;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = 255;
/// Largest user frame id; the top two bits of the id byte are protocol-owned.
pub const MAX_ID: u8 = 63;

/// A single unit of information on the link.
///
/// Transport frames carry a sequence number and participate in the
/// acknowledge/retransmit protocol; unreliable frames are fire-and-forget.
#[derive(Debug, Clone)]
pub struct Frame {
    id: u8,
    payload: Vec<u8>,
    seq: u8,
    is_transport: bool,
    is_control: bool,
    /// When this frame was last put on the wire, if ever.
    pub(crate) last_sent_at: Option<u64>,
}

impl Frame {
    /// A transport (sequenced, acknowledged) frame. `id` is masked to 6 bits.
    pub fn transport(id: u8, seq: u8, payload: Vec<u8>) -> Self {
        Frame {
            id: id & MAX_ID,
            payload,
            seq,
            is_transport: true,
            is_control: false,
            last_sent_at: None,
        }
    }

    /// A one-shot frame outside the transport protocol. `id` is masked to
    /// 6 bits; the frame has no meaningful sequence number.
    pub fn unreliable(id: u8, payload: Vec<u8>) -> Self {
        Frame {
            id: id & MAX_ID,
            payload,
            seq: 0,
            is_transport: false,
            is_control: false,
            last_sent_at: None,
        }
    }

    /// ACK/NACK/RESET. Control frames keep the raw 8-bit id so the reserved
    /// values stay distinguishable from any user id.
    pub(crate) fn control(id: u8, seq: u8, payload: Vec<u8>) -> Self {
        Frame {
            id,
            payload,
            seq,
            is_transport: true,
            is_control: true,
            last_sent_at: None,
        }
    }

    /// Rebuild a frame from a validated wire header.
    pub(crate) fn received(id_control: u8, payload: Vec<u8>, seq: u8) -> Self {
        if id_control & 0x80 != 0 {
            Frame::transport(id_control, seq, payload)
        } else {
            Frame::unreliable(id_control, payload)
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    pub(crate) fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn is_transport(&self) -> bool {
        self.is_transport
    }

    fn id_control(&self) -> u8 {
        if self.is_control {
            self.id
        } else if self.is_transport {
            self.id | 0x80
        } else {
            self.id
        }
    }

    /// Produce the stuffed on-wire image of this frame.
    ///
    /// Layout before stuffing: id/control byte, sequence byte (transport and
    /// control frames only), length byte, payload, big-endian CRC-32 over all
    /// of the preceding bytes. The image is prefixed with three `0xAA` sync
    /// bytes, a `0x55` is inserted after every two consecutive in-body
    /// `0xAA`s, and a trailing `0x55` marks end-of-frame.
    ///
    /// Payloads longer than [`MAX_PAYLOAD`] are a caller-checked
    /// precondition; the length byte would otherwise be truncated.
    pub fn encode(&self) -> Vec<u8> {
        let id_control = self.id_control();

        let mut prolog = Vec::with_capacity(3 + self.payload.len() + 4);
        prolog.push(id_control);
        if id_control & 0x80 != 0 {
            prolog.push(self.seq);
        }
        prolog.push(self.payload.len() as u8);
        prolog.extend_from_slice(&self.payload);

        let mut crc = Crc32::new();
        for &byte in &prolog {
            crc.step(byte);
        }
        prolog.extend_from_slice(&crc.finalize().to_be_bytes());

        // Worst case every other byte is a stuff byte.
        let mut wire = Vec::with_capacity(4 + prolog.len() * 3 / 2);
        wire.extend_from_slice(&[HEADER_BYTE, HEADER_BYTE, HEADER_BYTE]);

        let mut header_run: u8 = 0;
        for &byte in &prolog {
            wire.push(byte);
            if byte == HEADER_BYTE {
                header_run += 1;
                if header_run == 2 {
                    wire.push(STUFF_BYTE);
                    header_run = 0;
                }
            } else {
                header_run = 0;
            }
        }

        // A non-header terminator so the end of one frame can never be
        // mistaken for the start of the next.
        wire.push(EOF_BYTE);
        wire
    }
}
