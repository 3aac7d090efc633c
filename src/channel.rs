use std::io;

/// Duplex byte channel a [`Link`](crate::Link) drives, typically a serial
/// port. Port configuration (baud rate, parity, OS handles) lives behind the
/// implementation; the engine only needs these two primitives.
pub trait Channel {
    /// Write the whole buffer or fail. A partial write must be reported as an
    /// error, never silently tolerated.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Return every byte currently available without blocking. An empty
    /// vector means nothing is pending.
    fn read_available(&mut self) -> Vec<u8>;
}
