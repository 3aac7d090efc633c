use thiserror::Error;

/// Caller-facing failures.
///
/// Link noise (checksum mismatch, missing EOF, spurious ACK, out-of-window
/// sequence numbers) is expected on a serial line and never surfaces here;
/// those frames are dropped silently and counted in
/// [`Stats`](crate::transport::Stats).
#[derive(Debug, Error)]
pub enum Error {
    /// The transport FIFO is at capacity; back off or reset the link.
    #[error("transport fifo full")]
    FifoFull,

    /// Payload longer than the 255-byte wire limit. Rejected before any I/O.
    #[error("payload length {0} exceeds 255 bytes")]
    PayloadTooLong(usize),

    /// User frame id outside the 6-bit range 0-63. Rejected before any I/O.
    #[error("id {0} outside user range 0-63")]
    InvalidId(u8),

    /// The channel failed to write. The engine does not retry raw I/O.
    #[error("channel i/o: {0}")]
    Io(#[from] std::io::Error),
}
