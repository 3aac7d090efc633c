//! Per-link ARQ bookkeeping: send FIFO, receive stash, sequence counters,
//! liveness timestamps and link statistics.

use std::collections::{BTreeMap, VecDeque};

use crate::frame::Frame;

/// Capacity of the outgoing transport FIFO.
pub const TRANSPORT_FIFO_SIZE: usize = 100;
/// Most unacknowledged frames allowed in flight at once.
pub const MAX_WINDOW_SIZE: u8 = 8;
/// How far ahead of `rn` a received frame may be and still be stashed.
pub const RX_WINDOW_SIZE: u8 = 16;

/// A peer silent for longer than this is considered gone; retransmission and
/// keep-alives stop rather than flood a dead line.
pub const IDLE_TIMEOUT_MS: u64 = 30_000;
/// Default time an unacknowledged frame waits before being resent. Keep it
/// considerably larger than the poll cadence or ACKs will routinely arrive
/// just too late and force pointless retransmits.
pub const FRAME_RETRANSMIT_TIMEOUT_MS: u64 = 50;
/// Minimum and default interval between keep-alive ACKs.
pub const ACK_RETRANSMIT_TIMEOUT_MS: u64 = 25;

/// Counters describing the health of the link. All are cumulative and
/// survive a transport reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    /// Frames rejected because the transport FIFO was full.
    pub dropped_frames: u32,
    /// ACKs naming a sequence number outside the outstanding window.
    pub spurious_acks: u32,
    /// RESET requests received from the peer.
    pub resets_received: u32,
    /// Received frames too far ahead of `rn` to stash.
    pub sequence_mismatch_drops: u32,
    /// Timeout-driven retransmissions of queued frames.
    pub retransmits: u32,
}

pub(crate) struct Transport {
    /// Ordered queue of transport frames awaiting acknowledgment. The frame
    /// at position `i` (for `i` inside the window) carries sequence
    /// `sn_min + i`.
    pub fifo: VecDeque<Frame>,
    /// Out-of-order frames held back until the gap before them is filled.
    pub stash: BTreeMap<u8, Frame>,
    /// Sequence number of the oldest unacknowledged sent frame.
    pub sn_min: u8,
    /// Next sequence number to assign to a newly sent frame.
    pub sn_max: u8,
    /// Next sequence number expected from the peer.
    pub rn: u8,
    /// Sequence the one permitted in-flight NACK is waiting on.
    pub nack_outstanding: Option<u8>,
    pub last_sent_ack_ms: Option<u64>,
    pub last_sent_frame_ms: Option<u64>,
    pub last_received_anything_ms: Option<u64>,
    pub last_received_frame_ms: Option<u64>,
    pub stats: Stats,
}

impl Transport {
    pub fn new() -> Self {
        Transport {
            fifo: VecDeque::with_capacity(TRANSPORT_FIFO_SIZE),
            stash: BTreeMap::new(),
            sn_min: 0,
            sn_max: 0,
            rn: 0,
            nack_outstanding: None,
            last_sent_ack_ms: None,
            last_sent_frame_ms: None,
            last_received_anything_ms: None,
            last_received_frame_ms: None,
            stats: Stats::default(),
        }
    }

    /// Back to a fresh connection: empty queues, sequence numbers at zero,
    /// liveness clocks unseeded. Statistics are kept.
    pub fn reset(&mut self) {
        self.fifo.clear();
        self.stash.clear();
        self.sn_min = 0;
        self.sn_max = 0;
        self.rn = 0;
        self.nack_outstanding = None;
        self.last_sent_ack_ms = None;
        self.last_sent_frame_ms = None;
        self.last_received_anything_ms = None;
        self.last_received_frame_ms = None;
    }

    /// Number of sent-but-unacknowledged frames, in wrapped sequence space.
    pub fn window_size(&self) -> u8 {
        self.sn_max.wrapping_sub(self.sn_min)
    }
}
