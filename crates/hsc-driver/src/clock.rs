//! Clock and reset control.
//!
//! Bring-up enables the `stdmac` and `hsc` clocks, then deasserts the two
//! matching resets; teardown runs the same steps backwards. On a hosted
//! platform the kernel usually owns both, in which case [`AlwaysOn`] stands
//! in for each handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// A gateable clock.
pub trait ClockGate: fmt::Debug + Send + Sync {
    /// Ungate the clock.
    ///
    /// # Errors
    ///
    /// Platform specific.
    fn enable(&self) -> Result<()>;

    /// Gate the clock.
    fn disable(&self);
}

/// A reset line.
pub trait ResetLine: fmt::Debug + Send + Sync {
    /// Hold the block in reset.
    ///
    /// # Errors
    ///
    /// Platform specific.
    fn assert(&self) -> Result<()>;

    /// Release the block.
    ///
    /// # Errors
    ///
    /// Platform specific.
    fn deassert(&self) -> Result<()>;
}

/// Handle for a clock or reset managed elsewhere. Every call succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOn;

impl ClockGate for AlwaysOn {
    fn enable(&self) -> Result<()> {
        Ok(())
    }

    fn disable(&self) {}
}

impl ResetLine for AlwaysOn {
    fn assert(&self) -> Result<()> {
        Ok(())
    }

    fn deassert(&self) -> Result<()> {
        Ok(())
    }
}

/// Clock or reset that remembers its state. Used by the simulator.
#[derive(Debug, Default)]
pub struct TrackedLine {
    on: AtomicBool,
}

impl TrackedLine {
    /// Clock enabled, or reset deasserted.
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }
}

impl ClockGate for TrackedLine {
    fn enable(&self) -> Result<()> {
        self.on.store(true, Ordering::Release);
        Ok(())
    }

    fn disable(&self) {
        self.on.store(false, Ordering::Release);
    }
}

impl ResetLine for TrackedLine {
    fn assert(&self) -> Result<()> {
        self.on.store(false, Ordering::Release);
        Ok(())
    }

    fn deassert(&self) -> Result<()> {
        self.on.store(true, Ordering::Release);
        Ok(())
    }
}

/// The clocks and resets of one controller.
#[derive(Debug, Clone)]
pub struct ChipClocks {
    /// Stream DMAC clock.
    pub stdmac: Arc<dyn ClockGate>,
    /// HSC clock.
    pub hsc: Arc<dyn ClockGate>,
    /// Stream DMAC reset.
    pub rst_stdmac: Arc<dyn ResetLine>,
    /// HSC reset.
    pub rst_hsc: Arc<dyn ResetLine>,
}

impl Default for ChipClocks {
    fn default() -> Self {
        Self::always_on()
    }
}

impl ChipClocks {
    /// Every handle owned by the platform.
    pub fn always_on() -> Self {
        Self {
            stdmac: Arc::new(AlwaysOn),
            hsc: Arc::new(AlwaysOn),
            rst_stdmac: Arc::new(AlwaysOn),
            rst_hsc: Arc::new(AlwaysOn),
        }
    }

    /// Enable clocks, then release resets. A failed step undoes the steps
    /// before it.
    ///
    /// # Errors
    ///
    /// The first failing handle's error.
    pub fn enable(&self) -> Result<()> {
        self.stdmac.enable()?;
        if let Err(e) = self.hsc.enable() {
            self.stdmac.disable();
            return Err(e);
        }
        if let Err(e) = self.rst_stdmac.deassert() {
            self.hsc.disable();
            self.stdmac.disable();
            return Err(e);
        }
        if let Err(e) = self.rst_hsc.deassert() {
            let _ = self.rst_stdmac.assert();
            self.hsc.disable();
            self.stdmac.disable();
            return Err(e);
        }
        tracing::debug!("HSC clocks enabled, resets released");
        Ok(())
    }

    /// Assert resets, then gate clocks.
    pub fn disable(&self) {
        if let Err(e) = self.rst_hsc.assert() {
            tracing::warn!("HSC reset assert failed: {e}");
        }
        if let Err(e) = self.rst_stdmac.assert() {
            tracing::warn!("stdmac reset assert failed: {e}");
        }
        self.hsc.disable();
        self.stdmac.disable();
        tracing::debug!("HSC clocks disabled");
    }
}
