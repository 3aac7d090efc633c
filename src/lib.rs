//! # MIN link
//! Host-side implementation of the
//! [MIN](https://github.com/min-protocol/min/wiki) (Microcontroller
//! Interconnect Network) protocol: a byte-stuffed, CRC-checked framing
//! format plus a sliding-window transport giving ordered, reliable delivery
//! of frames over an unreliable point-to-point byte stream, typically a
//! serial line to a microcontroller.
//!
//! A [`Link`] owns one [`Channel`] (the raw byte pipe) and is driven
//! entirely by calling [`Link::poll`] on a regular cadence with a
//! caller-supplied millisecond clock; there are no internal threads or
//! timers. Queued frames are transmitted inside a bounded window,
//! retransmitted on timeout until acknowledged, and incoming frames are
//! re-ordered before delivery. Corrupted bytes on the wire are absorbed
//! silently; the receiver resynchronizes on the next start-of-frame marker.
//!
//! ## Example
//! ```
//! use min_link::{Channel, Link};
//! use std::io;
//!
//! /// A loopback channel: everything written comes straight back.
//! struct Loopback(Vec<u8>);
//!
//! impl Channel for Loopback {
//!     fn write(&mut self, data: &[u8]) -> io::Result<()> {
//!         self.0.extend_from_slice(data);
//!         Ok(())
//!     }
//!
//!     fn read_available(&mut self) -> Vec<u8> {
//!         std::mem::take(&mut self.0)
//!     }
//! }
//!
//! let mut link = Link::new(String::from("demo"), Loopback(Vec::new()));
//! link.enqueue(34, b"Hello world").unwrap();
//!
//! // First poll puts the frame on the wire; the second reads it back off
//! // the loopback and delivers it.
//! link.poll(0).unwrap();
//! let delivered = link.poll(1).unwrap();
//! assert_eq!(delivered.len(), 1);
//! assert_eq!(delivered[0].id(), 34);
//! assert_eq!(delivered[0].payload(), b"Hello world");
//! ```

mod channel;
mod crc32;
mod error;
mod frame;
mod link;
pub mod transport;

pub use channel::Channel;
pub use error::Error;
pub use frame::{Frame, MAX_ID, MAX_PAYLOAD};
pub use link::Link;
pub use transport::Stats;
