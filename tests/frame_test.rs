//! Framing-level behavior: encoding, stuffing, destuffing, corruption.

use std::collections::VecDeque;
use std::io;

use min_link::{Channel, Error, Frame, Link};

struct TestChannel {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

impl TestChannel {
    fn new() -> Self {
        TestChannel {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
        }
    }

    fn feed(&mut self, data: &[u8]) {
        self.inbound.extend(data);
    }
}

impl Channel for TestChannel {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.outbound.extend_from_slice(data);
        Ok(())
    }

    fn read_available(&mut self) -> Vec<u8> {
        self.inbound.drain(..).collect()
    }
}

fn link(name: &str) -> Link<TestChannel> {
    Link::new(String::from(name), TestChannel::new())
}

#[test]
fn transport_frame_round_trip() {
    let payload = vec![0x01, 0x02, 0x03, 0xfe, 0xff];
    let wire = Frame::transport(34, 0, payload.clone()).encode();

    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    let delivered = rx.poll(0).unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id(), 34);
    assert_eq!(delivered[0].seq(), 0);
    assert!(delivered[0].is_transport());
    assert_eq!(delivered[0].payload(), payload.as_slice());
}

#[test]
fn unreliable_frame_round_trip() {
    let payload = b"status report".to_vec();
    let wire = Frame::unreliable(9, payload.clone()).encode();

    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    let delivered = rx.poll(0).unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id(), 9);
    assert!(!delivered[0].is_transport());
    assert_eq!(delivered[0].payload(), payload.as_slice());
    // No sequencing, no ACK: nothing goes back out.
    assert!(rx.channel().outbound.is_empty());
}

#[test]
fn send_unreliable_writes_immediately() {
    let mut tx = link("tx");
    tx.send_unreliable(9, b"status report").unwrap();

    // Straight onto the wire, nothing queued for acknowledgment.
    let wire = tx.channel().outbound.clone();
    assert!(!wire.is_empty());
    assert_eq!(tx.pending(), 0);

    // And never retransmitted, even long past the retransmit timeout.
    tx.poll(60).unwrap();
    assert_eq!(tx.channel().outbound.len(), wire.len());

    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    let delivered = rx.poll(0).unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id(), 9);
    assert!(!delivered[0].is_transport());
    let frame = delivered.into_iter().next().unwrap();
    assert_eq!(frame.into_payload(), b"status report");
}

#[test]
fn stuffed_payload_round_trip() {
    // Runs of header bytes inside the payload must be escaped on the wire
    // and restored on the way back in.
    let payload = vec![0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x55, 0xaa, 0xaa];
    let wire = Frame::unreliable(1, payload.clone()).encode();
    assert!(wire[3..].windows(3).any(|w| w == [0xaa, 0xaa, 0x55]));

    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    let delivered = rx.poll(0).unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload(), payload.as_slice());
}

#[test]
fn destuffs_known_wire_image() {
    let wire: [u8; 19] = [
        0xaa, 0xaa, 0xaa, // SOF
        0x00, // ID/control
        0x08, // Length
        0xaa, 0xaa, 0x55, 0xaa, 0x00, 0x00, 0x00, 0x00, 0x00, // Data with a stuff byte
        0x38, 0x83, 0x8f, 0x82, // CRC checksum
        0x55, // EOF
    ];

    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    let delivered = rx.poll(0).unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id(), 0);
    assert_eq!(
        delivered[0].payload(),
        &[0xaa, 0xaa, 0xaa, 0x00, 0x00, 0x00, 0x00, 0x00]
    );
}

#[test]
fn corrupted_byte_drops_frame_without_desync() {
    let mut first = Frame::unreliable(2, vec![1, 2, 3, 4]).encode();
    let second = Frame::unreliable(3, b"intact".to_vec()).encode();

    // Flip a payload byte; the checksum no longer matches.
    first[5] ^= 0x20;

    let mut rx = link("rx");
    rx.channel_mut().feed(&first);
    rx.channel_mut().feed(&second);
    let delivered = rx.poll(0).unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id(), 3);
    assert_eq!(delivered[0].payload(), b"intact");
}

#[test]
fn missing_eof_drops_frame() {
    let mut wire = Frame::unreliable(4, vec![7, 7, 7]).encode();
    *wire.last_mut().unwrap() = 0x00;

    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    assert!(rx.poll(0).unwrap().is_empty());
}

#[test]
fn sof_mid_frame_restarts_reception() {
    // A new start-of-frame abandons whatever was in progress; the second
    // frame must still come through cleanly.
    let mut wire = vec![0xaa, 0xaa, 0xaa, 0x00, 0x08];
    wire.extend_from_slice(&Frame::unreliable(5, b"ok".to_vec()).encode());

    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    let delivered = rx.poll(0).unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id(), 5);
    assert_eq!(delivered[0].payload(), b"ok");
}

#[test]
fn oversized_payload_rejected_before_io() {
    let mut tx = link("tx");
    let payload = vec![0u8; 256];
    assert!(matches!(
        tx.send_unreliable(1, &payload),
        Err(Error::PayloadTooLong(256))
    ));
    assert!(tx.channel().outbound.is_empty());
}

#[test]
fn out_of_range_id_rejected_before_io() {
    let mut tx = link("tx");
    assert!(matches!(tx.send_unreliable(64, b"x"), Err(Error::InvalidId(64))));
    assert!(matches!(tx.send_unreliable(0xff, b"x"), Err(Error::InvalidId(0xff))));
    assert!(tx.channel().outbound.is_empty());
}

#[test]
fn max_length_payload_round_trip() {
    // 255 bytes is the wire limit.
    let payload: Vec<u8> = (0u16..255).map(|v| v as u8).collect();

    let wire = Frame::unreliable(63, payload.clone()).encode();
    let mut rx = link("rx");
    rx.channel_mut().feed(&wire);
    let delivered = rx.poll(0).unwrap();

    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload(), payload.as_slice());
}
