//! Bitwise CRC-32 (ISO-HDLC) used for the frame trailer.
//!
//! The reflected form is computed incrementally so that the encoder and the
//! byte-at-a-time receive state machine can both feed it one byte per step.

const CRC_SEED: u32 = 0xffffffff;
const CRC_POLYNOMIAL_REVERSED: u32 = 0xedb88320;

pub(crate) struct Crc32 {
    crc: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Crc32 { crc: CRC_SEED }
    }

    pub fn step(&mut self, byte: u8) {
        self.crc ^= u32::from(byte);
        for _ in 0..8 {
            if self.crc & 1 == 1 {
                self.crc = (self.crc >> 1) ^ CRC_POLYNOMIAL_REVERSED;
            } else {
                self.crc >>= 1;
            }
        }
    }

    pub fn finalize(&self) -> u32 {
        !self.crc
    }
}
