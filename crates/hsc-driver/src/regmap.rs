//! Register map over the HSC window.
//!
//! [`Regmap`] wraps a raw 32-bit [`RegisterIo`] (a VFIO mapping on real
//! hardware, a simulated register file in tests) and serialises every
//! access through one lock, so a read-modify-write from
//! [`Regmap::update_bits`] is atomic with respect to any other access on
//! the same map. An update that would not change the register skips the
//! write.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use hsc_chip::regs::MAX_REGISTER;

use crate::error::{HscError, Result};

/// Raw 32-bit register access.
///
/// Implementors perform exactly one bus access per call. Offsets are
/// validated by [`Regmap`] before they get here.
pub trait RegisterIo: fmt::Debug + Send + Sync {
    /// Read the register at `offset`.
    fn read32(&self, offset: u32) -> u32;

    /// Write `value` to the register at `offset`.
    fn write32(&self, offset: u32, value: u32);
}

/// Serialised, range-checked register access.
pub struct Regmap {
    io: Arc<dyn RegisterIo>,
    lock: Mutex<()>,
    max_register: u32,
}

impl fmt::Debug for Regmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Regmap")
            .field("io", &self.io)
            .field("max_register", &format_args!("{:#x}", self.max_register))
            .finish_non_exhaustive()
    }
}

impl Regmap {
    /// Wrap a register window covering `0..=MAX_REGISTER`.
    pub fn new(io: Arc<dyn RegisterIo>) -> Self {
        Self::with_max_register(io, MAX_REGISTER)
    }

    /// Wrap a register window with an explicit upper bound.
    pub fn with_max_register(io: Arc<dyn RegisterIo>, max_register: u32) -> Self {
        Self {
            io,
            lock: Mutex::new(()),
            max_register,
        }
    }

    fn check(&self, reg: u32) -> Result<()> {
        if reg % 4 != 0 || reg > self.max_register {
            return Err(HscError::invalid_argument(format!(
                "register {reg:#x} outside window (stride 4, max {:#x})",
                self.max_register
            )));
        }
        Ok(())
    }

    /// Read a register.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unaligned or out-of-window offset.
    pub fn read(&self, reg: u32) -> Result<u32> {
        self.check(reg)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.io.read32(reg))
    }

    /// Write a register.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unaligned or out-of-window offset.
    pub fn write(&self, reg: u32, val: u32) -> Result<()> {
        self.check(reg)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.io.write32(reg, val);
        Ok(())
    }

    /// Replace the bits selected by `mask` with the same bits of `val`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unaligned or out-of-window offset.
    pub fn update_bits(&self, reg: u32, mask: u32, val: u32) -> Result<()> {
        self.check(reg)?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let old = self.io.read32(reg);
        let new = (old & !mask) | (val & mask);
        if new != old {
            self.io.write32(reg, new);
        }
        Ok(())
    }

    /// Set or clear the bits of `mask`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unaligned or out-of-window offset.
    pub fn assign_bits(&self, reg: u32, mask: u32, on: bool) -> Result<()> {
        self.update_bits(reg, mask, if on { !0 } else { 0 })
    }

    /// Write a 64-bit value as a low/high register pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either offset is outside the window.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write64(&self, lo: u32, hi: u32, val: u64) -> Result<()> {
        self.write(lo, val as u32)?;
        self.write(hi, (val >> 32) as u32)
    }

    /// Read a 64-bit value from a low/high register pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if either offset is outside the window.
    pub fn read64(&self, lo: u32, hi: u32) -> Result<u64> {
        let l = self.read(lo)?;
        let h = self.read(hi)?;
        Ok(u64::from(h) << 32 | u64::from(l))
    }

    /// Raw access object behind this map.
    pub fn io(&self) -> &Arc<dyn RegisterIo> {
        &self.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counting {
        value: std::sync::atomic::AtomicU32,
        writes: AtomicUsize,
    }

    impl RegisterIo for Counting {
        fn read32(&self, _offset: u32) -> u32 {
            self.value.load(Ordering::SeqCst)
        }

        fn write32(&self, _offset: u32, value: u32) {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.value.store(value, Ordering::SeqCst);
        }
    }

    #[test]
    fn update_bits_merges_and_skips_noop() {
        let io = Arc::new(Counting::default());
        let map = Regmap::new(io.clone());

        map.write(0x100, 0xf0).unwrap();
        map.update_bits(0x100, 0x0f, 0x05).unwrap();
        assert_eq!(map.read(0x100).unwrap(), 0xf5);
        assert_eq!(io.writes.load(Ordering::SeqCst), 2);

        map.update_bits(0x100, 0x0f, 0x05).unwrap();
        assert_eq!(io.writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejects_offsets_outside_window() {
        let map = Regmap::new(Arc::new(Counting::default()));
        assert!(matches!(
            map.read(0x10_0000),
            Err(HscError::InvalidArgument { .. })
        ));
        assert!(map.write(0x102, 0).is_err());
        assert!(map.read(MAX_REGISTER).is_ok());
    }
}
