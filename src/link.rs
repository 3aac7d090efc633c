//! The link engine: receive state machine, ACK/NACK/RESET reconciliation and
//! the poll-driven send/retransmit loop.

use log::{debug, trace, warn};

use crate::channel::Channel;
use crate::crc32::Crc32;
use crate::error::Error;
use crate::frame::{Frame, ACK, EOF_BYTE, HEADER_BYTE, MAX_ID, MAX_PAYLOAD, RESET, STUFF_BYTE};
use crate::transport::{
    Stats, Transport, ACK_RETRANSMIT_TIMEOUT_MS, FRAME_RETRANSMIT_TIMEOUT_MS, IDLE_TIMEOUT_MS,
    MAX_WINDOW_SIZE, RX_WINDOW_SIZE, TRANSPORT_FIFO_SIZE,
};

/// Receiving state machine.
enum RxState {
    SearchingForSof,
    ReceivingIdControl,
    ReceivingSeq,
    ReceivingLength,
    ReceivingPayload,
    ReceivingChecksum3,
    ReceivingChecksum2,
    ReceivingChecksum1,
    ReceivingChecksum0,
    ReceivingEof,
}

/// One end of a point-to-point MIN link.
///
/// The engine is single-threaded and cooperative: nothing happens between
/// calls to [`poll`](Link::poll), and all timing decisions compare the
/// caller-supplied clock against stored timestamps. Poll well below the
/// retransmit timeout (a few milliseconds is typical for serial links).
pub struct Link<C: Channel> {
    /// Log target, so concurrent links can be told apart in the output.
    name: String,
    channel: C,
    transport: Transport,
    frame_retransmit_timeout_ms: u64,
    ack_retransmit_timeout_ms: u64,
    /// Consecutive header bytes seen, tracked independently of `rx_state`.
    rx_header_bytes_seen: u8,
    rx_state: RxState,
    rx_id_control: u8,
    rx_seq: u8,
    rx_length: u8,
    rx_payload: Vec<u8>,
    /// Running CRC over the frame being received.
    rx_checksum: Crc32,
    /// CRC received over the wire, accumulated high byte first.
    rx_wire_checksum: u32,
    rx_list: Vec<Frame>,
}

impl<C: Channel> Link<C> {
    pub fn new(name: String, channel: C) -> Self {
        Link {
            name,
            channel,
            transport: Transport::new(),
            frame_retransmit_timeout_ms: FRAME_RETRANSMIT_TIMEOUT_MS,
            ack_retransmit_timeout_ms: ACK_RETRANSMIT_TIMEOUT_MS,
            rx_header_bytes_seen: 0,
            rx_state: RxState::SearchingForSof,
            rx_id_control: 0,
            rx_seq: 0,
            rx_length: 0,
            rx_payload: Vec::new(),
            rx_checksum: Crc32::new(),
            rx_wire_checksum: 0,
            rx_list: Vec::new(),
        }
    }

    /// How long an unacknowledged frame waits before being resent. Make this
    /// considerably larger than the poll cadence, otherwise ACKs routinely
    /// arrive just after the deadline and frames are resent for no reason.
    pub fn set_retransmit_timeout(&mut self, timeout_ms: u64) {
        self.frame_retransmit_timeout_ms = timeout_ms;
    }

    /// Interval between keep-alive ACKs, clamped to the 25 ms protocol
    /// minimum. Set it high enough not to swamp the far end.
    pub fn set_keepalive_timeout(&mut self, timeout_ms: u64) {
        self.ack_retransmit_timeout_ms = timeout_ms.max(ACK_RETRANSMIT_TIMEOUT_MS);
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Frames queued and not yet fully acknowledged.
    pub fn pending(&self) -> usize {
        self.transport.fifo.len()
    }

    pub fn stats(&self) -> Stats {
        self.transport.stats
    }

    /// When a data frame last went out, if ever. Useful for callers pacing
    /// their own traffic around the engine's.
    pub fn last_frame_sent_at(&self) -> Option<u64> {
        self.transport.last_sent_frame_ms
    }

    /// Queue a frame for acknowledged, retransmitted, in-order delivery.
    /// This is the normal way of sending.
    pub fn enqueue(&mut self, id: u8, payload: &[u8]) -> Result<(), Error> {
        check_user_frame(id, payload)?;
        if self.transport.fifo.len() >= TRANSPORT_FIFO_SIZE {
            self.transport.stats.dropped_frames += 1;
            warn!(target: self.name.as_str(), "transport fifo full, dropping id={}", id);
            return Err(Error::FifoFull);
        }
        debug!(target: self.name.as_str(), "queued id={}, len={}", id, payload.len());
        self.transport
            .fifo
            .push_back(Frame::transport(id, 0, payload.to_vec()));
        Ok(())
    }

    /// Send a frame immediately, outside the transport protocol. It is never
    /// queued, acknowledged or retransmitted.
    pub fn send_unreliable(&mut self, id: u8, payload: &[u8]) -> Result<(), Error> {
        check_user_frame(id, payload)?;
        let wire = Frame::unreliable(id, payload.to_vec()).encode();
        trace!(target: self.name.as_str(), "send frame: id={}, len={}", id, payload.len());
        self.channel.write(&wire)?;
        Ok(())
    }

    /// Abort all in-flight state and start over as a fresh connection. With
    /// `inform_peer` set the request is transmitted twice first, in case one
    /// copy is lost on the wire.
    pub fn reset(&mut self, inform_peer: bool) -> Result<(), Error> {
        debug!(target: self.name.as_str(), "transport reset (inform_peer={})", inform_peer);
        if inform_peer {
            self.send_reset()?;
            self.send_reset()?;
        }
        self.transport.reset();
        self.rx_list.clear();
        Ok(())
    }

    /// Drive the engine: feed pending channel bytes through the receiver,
    /// transmit or retransmit queued frames, and emit keep-alives. Returns
    /// the frames delivered to the application, in order.
    ///
    /// `now_ms` is the caller's clock in milliseconds from any fixed origin;
    /// the engine never reads the wall clock itself.
    pub fn poll(&mut self, now_ms: u64) -> Result<Vec<Frame>, Error> {
        // A freshly created (or reset) link gets one idle-timeout grace
        // period before the liveness gates kick in.
        if self.transport.last_received_anything_ms.is_none() {
            self.transport.last_received_anything_ms = Some(now_ms);
            self.transport.last_sent_ack_ms = Some(now_ms);
        }

        let data = self.channel.read_available();
        if !data.is_empty() {
            self.transport.last_received_anything_ms = Some(now_ms);
            for &byte in &data {
                self.rx_byte(byte, now_ms)?;
            }
        }

        let remote_connected = elapsed(self.transport.last_received_anything_ms, now_ms)
            .is_some_and(|idle| idle < IDLE_TIMEOUT_MS);
        let remote_active = elapsed(self.transport.last_received_frame_ms, now_ms)
            .is_some_and(|idle| idle < IDLE_TIMEOUT_MS);

        let window_size = self.transport.window_size();
        if window_size < MAX_WINDOW_SIZE && self.transport.fifo.len() > window_size as usize {
            // Frames still to send: the one at the window edge gets the next
            // sequence number and its first trip on the wire.
            self.send_queued(window_size as usize, true, now_ms)?;
            self.transport.sn_max = self.transport.sn_max.wrapping_add(1);
        } else if window_size > 0 && remote_connected {
            // Can't open the window any further; resend the least recently
            // sent outstanding frame once it has waited long enough. This
            // timeout is the sole retransmission trigger.
            if let Some((index, last_sent)) = self.oldest_in_window() {
                if now_ms.saturating_sub(last_sent) > self.frame_retransmit_timeout_ms {
                    debug!(target: self.name.as_str(),
                        "retransmit (window={}, sn_min={}, sn_max={})",
                        window_size, self.transport.sn_min, self.transport.sn_max);
                    self.send_queued(index, false, now_ms)?;
                    self.transport.stats.retransmits += 1;
                }
            }
        }
        debug_assert!(self.transport.window_size() <= MAX_WINDOW_SIZE);

        // Keep-alive: a repeated ACK doubles as a liveness signal, but only
        // while the peer is actually talking transport to us.
        let ack_due = elapsed(self.transport.last_sent_ack_ms, now_ms)
            .map_or(true, |idle| idle > self.ack_retransmit_timeout_ms);
        if ack_due && remote_active {
            self.send_ack(now_ms)?;
        }

        Ok(std::mem::take(&mut self.rx_list))
    }

    /// Transmit the queued frame at `index`, stamping a fresh sequence
    /// number when it is going out for the first time.
    fn send_queued(&mut self, index: usize, assign_seq: bool, now_ms: u64) -> Result<(), Error> {
        let sn_max = self.transport.sn_max;
        let wire = match self.transport.fifo.get_mut(index) {
            Some(frame) => {
                if assign_seq {
                    frame.set_seq(sn_max);
                }
                frame.last_sent_at = Some(now_ms);
                trace!(target: self.name.as_str(),
                    "send T-frame: id={}, seq={}, len={}",
                    frame.id(), frame.seq(), frame.payload().len());
                frame.encode()
            }
            None => return Ok(()),
        };
        self.transport.last_sent_frame_ms = Some(now_ms);
        self.channel.write(&wire)?;
        Ok(())
    }

    /// Queue position and send time of the least recently sent frame inside
    /// the outstanding window.
    fn oldest_in_window(&self) -> Option<(usize, u64)> {
        let window_size = self.transport.window_size() as usize;
        let mut oldest: Option<(usize, u64)> = None;
        for (index, frame) in self.transport.fifo.iter().enumerate().take(window_size) {
            // Everything inside the window has been sent at least once.
            let sent = frame.last_sent_at.unwrap_or(0);
            if oldest.map_or(true, |(_, earliest)| sent < earliest) {
                oldest = Some((index, sent));
            }
        }
        oldest
    }

    fn send_ack(&mut self, now_ms: u64) -> Result<(), Error> {
        let rn = self.transport.rn;
        debug!(target: self.name.as_str(), "send ACK: rn={}", rn);
        let wire = Frame::control(ACK, rn, vec![rn]).encode();
        self.channel.write(&wire)?;
        self.transport.last_sent_ack_ms = Some(now_ms);
        Ok(())
    }

    /// A NACK is an ACK for `rn` whose payload names the sequence we want
    /// retransmission up to.
    fn send_nack(&mut self, to: u8, now_ms: u64) -> Result<(), Error> {
        let rn = self.transport.rn;
        debug!(target: self.name.as_str(), "send NACK: rn={}, to={}", rn, to);
        let wire = Frame::control(ACK, rn, vec![to]).encode();
        self.channel.write(&wire)?;
        self.transport.last_sent_ack_ms = Some(now_ms);
        Ok(())
    }

    fn send_reset(&mut self) -> Result<(), Error> {
        debug!(target: self.name.as_str(), "send RESET");
        let wire = Frame::control(RESET, 0, Vec::new()).encode();
        self.channel.write(&wire)?;
        Ok(())
    }

    /// Advance the expected sequence number, retiring the outstanding NACK
    /// once its target is reached.
    fn advance_rn(&mut self) {
        self.transport.rn = self.transport.rn.wrapping_add(1);
        if self.transport.nack_outstanding == Some(self.transport.rn) {
            self.transport.nack_outstanding = None;
        }
    }

    /// Sequence reconciliation for a frame that passed CRC and EOF checks.
    fn frame_received(&mut self, now_ms: u64) -> Result<(), Error> {
        let id_control = self.rx_id_control;
        let payload = std::mem::take(&mut self.rx_payload);
        let seq = self.rx_seq;

        if id_control & 0x80 == 0 {
            // Not a transport frame: no sequencing, no ACK, deliver as-is.
            debug!(target: self.name.as_str(),
                "incoming frame: id={}, len={}", id_control & MAX_ID, payload.len());
            self.rx_list.push(Frame::received(id_control, payload, 0));
            return Ok(());
        }

        match id_control {
            ACK => self.ack_received(seq),
            RESET => {
                debug!(target: self.name.as_str(), "received RESET, clearing transport state");
                self.transport.stats.resets_received += 1;
                self.transport.reset();
            }
            _ => self.transport_frame_received(id_control, payload, seq, now_ms)?,
        }
        Ok(())
    }

    /// Cumulative ACK: `seq` is the peer's next expected sequence number, so
    /// every frame before it can be retired from the head of the FIFO.
    fn ack_received(&mut self, seq: u8) {
        let number_acked = seq.wrapping_sub(self.transport.sn_min);
        let number_in_window = self.transport.window_size();
        if number_acked <= number_in_window {
            debug!(target: self.name.as_str(),
                "received ACK: seq={}, retiring {} frame(s)", seq, number_acked);
            self.transport.sn_min = seq;
            for _ in 0..number_acked {
                self.transport.fifo.pop_front();
            }
        } else {
            // A stale ACK from an old session could otherwise retire frames
            // that were never sent.
            warn!(target: self.name.as_str(), "spurious ACK: seq={}", seq);
            self.transport.stats.spurious_acks += 1;
        }
    }

    fn transport_frame_received(
        &mut self,
        id_control: u8,
        payload: Vec<u8>,
        seq: u8,
        now_ms: u64,
    ) -> Result<(), Error> {
        self.transport.last_received_frame_ms = Some(now_ms);
        let frame = Frame::received(id_control, payload, seq);

        if seq == self.transport.rn {
            debug!(target: self.name.as_str(),
                "incoming T-frame: id={}, seq={}, len={}",
                frame.id(), seq, frame.payload().len());
            self.rx_list.push(frame);
            self.advance_rn();

            // Drain every consecutive frame the stash can now supply.
            while let Some(stashed) = self.transport.stash.remove(&self.transport.rn) {
                trace!(target: self.name.as_str(),
                    "delivering stashed seq={}", self.transport.rn);
                self.rx_list.push(stashed);
                self.advance_rn();
            }

            if self.transport.nack_outstanding.is_none() {
                let earliest_stashed = self.transport.stash.keys().next().copied();
                if let Some(earliest) = earliest_stashed {
                    if earliest.wrapping_sub(self.transport.rn) < RX_WINDOW_SIZE {
                        // Still a gap ahead; chase it with a fresh NACK.
                        self.transport.nack_outstanding = Some(earliest);
                        self.send_nack(earliest, now_ms)?;
                    } else {
                        // The stash can never connect back to rn; give up on
                        // it and fall back to plain acknowledgment.
                        warn!(target: self.name.as_str(),
                            "unrecoverable gap: rn={}, earliest stash={}",
                            self.transport.rn, earliest);
                        self.transport.stash.clear();
                        self.send_ack(now_ms)?;
                    }
                } else {
                    self.send_ack(now_ms)?;
                }
            } else {
                self.send_ack(now_ms)?;
            }
        } else if seq.wrapping_sub(self.transport.rn) < RX_WINDOW_SIZE {
            // A future frame; hold it while the gap is NACKed. Only one NACK
            // may be in flight, so later gaps wait their turn.
            debug!(target: self.name.as_str(),
                "stashing out-of-order seq={} (rn={})", seq, self.transport.rn);
            if self.transport.nack_outstanding.is_none() {
                self.transport.nack_outstanding = Some(seq);
                self.send_nack(seq, now_ms)?;
            }
            self.transport.stash.insert(seq, frame);
        } else {
            // Too far ahead to recover locally; the sender's retransmits or
            // an explicit reset will sort it out.
            warn!(target: self.name.as_str(),
                "sequence mismatch: seq={}, rn={}", seq, self.transport.rn);
            self.transport.stats.sequence_mismatch_drops += 1;
        }
        Ok(())
    }

    /// Push one byte through the framing state machine.
    fn rx_byte(&mut self, byte: u8, now_ms: u64) -> Result<(), Error> {
        // Start-of-frame detection runs regardless of state: three header
        // bytes in a row always mean a new frame, and two followed by a
        // stuff byte mean the stuff byte is discarded.
        if self.rx_header_bytes_seen == 2 {
            self.rx_header_bytes_seen = 0;
            match byte {
                HEADER_BYTE => {
                    self.rx_state = RxState::ReceivingIdControl;
                    return Ok(());
                }
                STUFF_BYTE => {
                    // Stuffing; drop it and carry on with the next byte.
                    return Ok(());
                }
                _ => {
                    // Garbled framing; give up and hunt for the next header.
                    self.rx_state = RxState::SearchingForSof;
                }
            }
        }

        if byte == HEADER_BYTE {
            self.rx_header_bytes_seen += 1;
        } else {
            self.rx_header_bytes_seen = 0;
        }

        match self.rx_state {
            RxState::SearchingForSof => {}
            RxState::ReceivingIdControl => {
                self.rx_id_control = byte;
                self.rx_checksum = Crc32::new();
                self.rx_checksum.step(byte);
                if byte & 0x80 != 0 {
                    self.rx_state = RxState::ReceivingSeq;
                } else {
                    self.rx_seq = 0;
                    self.rx_state = RxState::ReceivingLength;
                }
            }
            RxState::ReceivingSeq => {
                self.rx_seq = byte;
                self.rx_checksum.step(byte);
                self.rx_state = RxState::ReceivingLength;
            }
            RxState::ReceivingLength => {
                self.rx_length = byte;
                self.rx_checksum.step(byte);
                self.rx_payload = Vec::with_capacity(byte as usize);
                if self.rx_length > 0 {
                    self.rx_state = RxState::ReceivingPayload;
                } else {
                    self.rx_state = RxState::ReceivingChecksum3;
                }
            }
            RxState::ReceivingPayload => {
                self.rx_payload.push(byte);
                self.rx_checksum.step(byte);
                if self.rx_payload.len() == self.rx_length as usize {
                    self.rx_state = RxState::ReceivingChecksum3;
                }
            }
            RxState::ReceivingChecksum3 => {
                self.rx_wire_checksum = u32::from(byte) << 24;
                self.rx_state = RxState::ReceivingChecksum2;
            }
            RxState::ReceivingChecksum2 => {
                self.rx_wire_checksum |= u32::from(byte) << 16;
                self.rx_state = RxState::ReceivingChecksum1;
            }
            RxState::ReceivingChecksum1 => {
                self.rx_wire_checksum |= u32::from(byte) << 8;
                self.rx_state = RxState::ReceivingChecksum0;
            }
            RxState::ReceivingChecksum0 => {
                self.rx_wire_checksum |= u32::from(byte);
                if self.rx_checksum.finalize() != self.rx_wire_checksum {
                    // Corrupted in transit; drop silently and resync.
                    warn!(target: self.name.as_str(), "crc mismatch, dropping frame");
                    self.rx_state = RxState::SearchingForSof;
                } else {
                    self.rx_state = RxState::ReceivingEof;
                }
            }
            RxState::ReceivingEof => {
                if byte == EOF_BYTE {
                    self.frame_received(now_ms)?;
                } else {
                    warn!(target: self.name.as_str(), "missing EOF, dropping frame");
                }
                self.rx_state = RxState::SearchingForSof;
            }
        }
        Ok(())
    }
}

fn check_user_frame(id: u8, payload: &[u8]) -> Result<(), Error> {
    if id > MAX_ID {
        return Err(Error::InvalidId(id));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::PayloadTooLong(payload.len()));
    }
    Ok(())
}

fn elapsed(since: Option<u64>, now_ms: u64) -> Option<u64> {
    since.map(|t| now_ms.saturating_sub(t))
}
