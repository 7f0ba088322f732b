//! Ring buffer offset arithmetic.
//!
//! Offsets are byte positions relative to the buffer's device address. The
//! device never writes into the last [`RING_GUARD`] bytes before the read
//! offset, so `cnt() + space() == size - RING_GUARD` holds between
//! operations.

use crate::error::{HscError, Result};

/// Bytes the device always leaves free in front of the reader.
pub const RING_GUARD: u64 = 8;

/// Read, write and checkpoint offsets of one ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBuffer {
    phys: u64,
    size: u64,
    size_chk: u64,
    rd: u64,
    wr: u64,
    chk: u64,
}

impl RingBuffer {
    /// Offsets for a ring of `size` bytes at device address `phys`, with a
    /// checkpoint every `size_chk` bytes.
    pub const fn new(phys: u64, size: u64, size_chk: u64) -> Self {
        Self {
            phys,
            size,
            size_chk,
            rd: 0,
            wr: 0,
            chk: size_chk,
        }
    }

    /// Device address of offset 0.
    pub const fn phys(&self) -> u64 {
        self.phys
    }

    /// Ring size in bytes.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Checkpoint stride.
    pub const fn size_chk(&self) -> u64 {
        self.size_chk
    }

    /// Read offset.
    pub const fn rd(&self) -> u64 {
        self.rd
    }

    /// Write offset.
    pub const fn wr(&self) -> u64 {
        self.wr
    }

    /// Next checkpoint offset.
    pub const fn chk(&self) -> u64 {
        self.chk
    }

    /// Bytes written and not yet read.
    pub const fn cnt(&self) -> u64 {
        if self.rd <= self.wr {
            self.wr - self.rd
        } else {
            self.size - (self.rd - self.wr)
        }
    }

    /// Unread bytes readable without wrapping.
    pub const fn cnt_to_end(&self) -> u64 {
        if self.rd <= self.wr {
            self.wr - self.rd
        } else {
            self.size - self.rd
        }
    }

    /// Bytes the device may still write.
    pub const fn space(&self) -> u64 {
        if self.rd <= self.wr {
            self.size - (self.wr - self.rd) - RING_GUARD
        } else {
            self.rd - self.wr - RING_GUARD
        }
    }

    /// Writable bytes without wrapping.
    pub const fn space_to_end(&self) -> u64 {
        if self.rd > self.wr {
            self.rd - self.wr - RING_GUARD
        } else if self.rd > 0 {
            self.size - self.wr
        } else {
            self.size - self.wr - RING_GUARD
        }
    }

    /// Return to the empty state with the first checkpoint armed.
    pub fn reset(&mut self) {
        self.rd = 0;
        self.wr = 0;
        self.chk = self.size_chk;
    }

    /// Consume `n` bytes and re-arm the checkpoint `size_chk` past the
    /// current write offset.
    pub fn advance_rd(&mut self, n: u64) {
        self.rd += n;
        if self.rd >= self.size {
            self.rd -= self.size;
        }
        self.chk = self.wr + self.size_chk;
        if self.chk >= self.size {
            self.chk -= self.size;
        }
    }

    /// Adopt a write pointer read back from the device.
    ///
    /// A pointer sitting on the end address is the wrapped start.
    ///
    /// # Errors
    ///
    /// `HardwareError` if `addr` lies outside the ring; offsets stay as
    /// they were.
    pub fn set_wr_addr(&mut self, addr: u64) -> Result<()> {
        match addr.checked_sub(self.phys) {
            Some(off) if off <= self.size => {
                self.wr = if off == self.size { 0 } else { off };
                Ok(())
            }
            _ => Err(HscError::hardware_error(format!(
                "write pointer {addr:#x} outside ring {:#x}+{:#x}",
                self.phys, self.size
            ))),
        }
    }

    /// Device address of the read offset.
    pub const fn rd_addr(&self) -> u64 {
        self.phys + self.rd
    }

    /// Device address of the write offset.
    pub const fn wr_addr(&self) -> u64 {
        self.phys + self.wr
    }

    /// Device address of the checkpoint.
    pub const fn chk_addr(&self) -> u64 {
        self.phys + self.chk
    }

    /// Device address one past the last byte.
    pub const fn end_addr(&self) -> u64 {
        self.phys + self.size
    }

    #[cfg(test)]
    pub(crate) fn set_offsets(&mut self, rd: u64, wr: u64) {
        self.rd = rd;
        self.wr = wr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u64 = 192 * 1024 * 20;

    #[test]
    fn guard_is_constant() {
        let mut rb = RingBuffer::new(0x1000_0000, SIZE, SIZE / 4);
        for (rd, wr) in [(0, 0), (0, 192 * 50), (SIZE - 192, 192), (4096, 100), (SIZE - 8, 0)] {
            rb.set_offsets(rd, wr);
            assert_eq!(rb.cnt() + rb.space(), SIZE - RING_GUARD, "rd={rd} wr={wr}");
        }
    }

    #[test]
    fn to_end_stops_at_wrap() {
        let mut rb = RingBuffer::new(0, 1000, 250);
        rb.set_offsets(900, 100);
        assert_eq!(rb.cnt(), 200);
        assert_eq!(rb.cnt_to_end(), 100);
        assert_eq!(rb.space(), 792);
        assert_eq!(rb.space_to_end(), 792);

        rb.set_offsets(100, 900);
        assert_eq!(rb.space_to_end(), 100);
        rb.set_offsets(0, 900);
        assert_eq!(rb.space_to_end(), 92);
    }

    #[test]
    fn advance_wraps_read_and_checkpoint() {
        let mut rb = RingBuffer::new(0, 1000, 250);
        rb.set_offsets(900, 800);
        rb.advance_rd(100);
        assert_eq!(rb.rd(), 0);
        assert_eq!(rb.chk(), 50);

        rb.reset();
        assert_eq!((rb.rd(), rb.wr(), rb.chk()), (0, 0, 250));
    }

    #[test]
    fn write_pointer_outside_window_is_rejected() {
        let mut rb = RingBuffer::new(0x2000, 1000, 250);
        rb.set_wr_addr(0x2000 + 384).unwrap();
        assert_eq!(rb.wr(), 384);

        assert!(rb.set_wr_addr(0x1fff).is_err());
        assert!(rb.set_wr_addr(0x2000 + 1001).is_err());
        assert_eq!(rb.wr(), 384);

        rb.set_wr_addr(0x2000 + 1000).unwrap();
        assert_eq!(rb.wr(), 0);
    }
}
