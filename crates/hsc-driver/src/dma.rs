//! Stream DMA: ring buffer registers and output channels.
//!
//! An output channel drains one TS input lane into a host ring buffer. The
//! device advances the write pointer; software owns the read pointer and a
//! checkpoint address at which the device raises a transit interrupt.
//!
//! ```text
//! Idle ──start(true)──▶ Started ──sync()──▶ Running
//!   ▲                                          │
//!   └──────────── Stopped ◀──start(false)──────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use hsc_chip::regs::{
    cdmbc_chctrl1, cdmbc_chdstamode, cdmbc_chid, cdmbc_chie, cdmbc_chir, cdmbc_chiradrsd,
    cdmbc_chiradrsu, cdmbc_chtdctrlh, cdmbc_rbbgnadrsd, cdmbc_rbbgnadrsu, cdmbc_rbendadrsd,
    cdmbc_rbendadrsu, cdmbc_rbrdptrd, cdmbc_rbrdptru, cdmbc_rbwrptrd, cdmbc_rbwrptru, chamode,
    chctrl1, chi, chtdctrlh, field_prep,
};
use hsc_chip::spec::{DmaSpec, HscSpec, RegBit};

use crate::error::{HscError, Result};
use crate::regmap::Regmap;
use crate::ring::RingBuffer;

/// Program the begin and end addresses of ring buffer `rb_ch`.
///
/// # Errors
///
/// Propagates register access errors.
pub fn rb_set_buffer(regs: &Regmap, rb_ch: u32, bg: u64, ed: u64) -> Result<()> {
    regs.write64(cdmbc_rbbgnadrsd(rb_ch), cdmbc_rbbgnadrsu(rb_ch), bg)?;
    regs.write64(cdmbc_rbendadrsd(rb_ch), cdmbc_rbendadrsu(rb_ch), ed)
}

/// Read pointer of ring buffer `rb_ch`.
///
/// # Errors
///
/// Propagates register access errors.
pub fn rb_rp(regs: &Regmap, rb_ch: u32) -> Result<u64> {
    regs.read64(cdmbc_rbrdptrd(rb_ch), cdmbc_rbrdptru(rb_ch))
}

/// Set the read pointer of ring buffer `rb_ch`.
///
/// # Errors
///
/// Propagates register access errors.
pub fn rb_set_rp(regs: &Regmap, rb_ch: u32, pos: u64) -> Result<()> {
    regs.write64(cdmbc_rbrdptrd(rb_ch), cdmbc_rbrdptru(rb_ch), pos)
}

/// Write pointer of ring buffer `rb_ch`.
///
/// # Errors
///
/// Propagates register access errors.
pub fn rb_wp(regs: &Regmap, rb_ch: u32) -> Result<u64> {
    regs.read64(cdmbc_rbwrptrd(rb_ch), cdmbc_rbwrptru(rb_ch))
}

/// Set the write pointer of ring buffer `rb_ch`.
///
/// # Errors
///
/// Propagates register access errors.
pub fn rb_set_wp(regs: &Regmap, rb_ch: u32, pos: u64) -> Result<()> {
    regs.write64(cdmbc_rbwrptrd(rb_ch), cdmbc_rbwrptru(rb_ch), pos)
}

fn set_chkp(regs: &Regmap, dma_ch: u32, pos: u64) -> Result<()> {
    regs.write64(cdmbc_chiradrsd(dma_ch), cdmbc_chiradrsu(dma_ch), pos)
}

/// Drive a channel start bit to `enable`.
///
/// The start registers toggle on a written one, so the bit is only written
/// when the current state differs.
///
/// # Errors
///
/// Propagates register access errors.
pub fn set_enable(regs: &Regmap, en: RegBit, enable: bool) -> Result<()> {
    let now = regs.read(en.reg)? & en.mask() != 0;
    if now != enable {
        regs.write(en.reg, en.mask())?;
    }
    Ok(())
}

/// Lifecycle of an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DmaState {
    /// Bound, never started.
    Idle = 0,
    /// Programmed and enabled, no pointer exchange yet.
    Started = 1,
    /// Pointers exchanged with the device at least once.
    Running = 2,
    /// Disabled after running.
    Stopped = 3,
}

impl DmaState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Started,
            2 => Self::Running,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for DmaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

/// One stream output DMA channel.
#[derive(Debug)]
pub struct DmaOut {
    regs: Arc<Regmap>,
    id: usize,
    spec: DmaSpec,
    state: AtomicU8,
}

impl DmaOut {
    /// Bind output channel `id`. Does not touch hardware.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `id` is outside the table or its descriptor is
    /// absent.
    pub fn new(regs: Arc<Regmap>, spec: &HscSpec, id: usize) -> Result<Self> {
        let spec = *spec
            .dma_out(id)
            .ok_or_else(|| HscError::invalid_argument(format!("DMA output {id} not present")))?;
        Ok(Self {
            regs,
            id,
            spec,
            state: AtomicU8::new(DmaState::Idle as u8),
        })
    }

    /// Channel id.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Channel descriptor.
    pub const fn spec(&self) -> &DmaSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DmaState {
        DmaState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: DmaState) {
        self.state.store(s as u8, Ordering::Release);
    }

    /// Feed this channel from TS input lane `tsi`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the channel has no transfer destination (CIP
    /// file channels).
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_src_ts_in(&self, tsi: usize) -> Result<()> {
        let td = self.spec.td_ch.ok_or_else(|| {
            HscError::invalid_argument(format!("DMA output {} has no stream destination", self.id))
        })?;
        let m = chtdctrlh::STREM_MASK | chtdctrlh::ALL_EN;
        let v = field_prep(chtdctrlh::STREM_MASK, tsi as u32) | chtdctrlh::ALL_EN;
        self.regs.update_bits(cdmbc_chtdctrlh(td), m, v)
    }

    /// Start or stop the channel on `buf`.
    ///
    /// Both directions reprogram the ring window and reset `buf` to empty;
    /// the transit interrupt and the top level interrupt bit follow
    /// `enable`. Repeating a call leaves the start bit as it is.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn start(&self, buf: &mut RingBuffer, enable: bool) -> Result<()> {
        let regs = &*self.regs;
        let s = &self.spec;

        rb_set_buffer(regs, s.rb_ch, buf.phys(), buf.end_addr())?;

        buf.reset();
        rb_set_rp(regs, s.rb_ch, buf.rd_addr())?;
        rb_set_wp(regs, s.rb_ch, buf.wr_addr())?;
        set_chkp(regs, s.dma_ch, buf.chk_addr())?;

        regs.assign_bits(cdmbc_chdstamode(s.dma_ch), chamode::TYPE_RB, true)?;
        regs.assign_bits(cdmbc_chctrl1(s.dma_ch), chctrl1::IND_SIZE_UND, true)?;

        regs.assign_bits(cdmbc_chie(s.dma_ch), chi::TRANSIT, enable)?;
        regs.assign_bits(s.intr.reg, s.intr.mask(), enable)?;

        set_enable(regs, s.en, enable)?;

        let next = if enable {
            DmaState::Started
        } else if self.state() == DmaState::Idle {
            DmaState::Idle
        } else {
            DmaState::Stopped
        };
        self.set_state(next);
        tracing::debug!(
            "DMA out {}: {} (ring {:#x}+{:#x})",
            self.id,
            next,
            buf.phys(),
            buf.size()
        );
        Ok(())
    }

    /// Exchange pointers with the device: push the read offset, pull the
    /// write offset, push the checkpoint.
    ///
    /// Callers hold the lock guarding `buf`.
    ///
    /// # Errors
    ///
    /// `HardwareError` if the device write pointer lies outside the ring.
    pub fn sync(&self, buf: &mut RingBuffer) -> Result<()> {
        let regs = &*self.regs;
        let s = &self.spec;

        rb_set_rp(regs, s.rb_ch, buf.rd_addr())?;
        let wp = rb_wp(regs, s.rb_ch)?;
        buf.set_wr_addr(wp)?;
        set_chkp(regs, s.dma_ch, buf.chk_addr())?;

        if self.state() == DmaState::Started {
            self.set_state(DmaState::Running);
        }
        tracing::trace!(
            "DMA out {} sync: rd={:#x} wr={:#x} chk={:#x}",
            self.id,
            buf.rd(),
            buf.wr(),
            buf.chk()
        );
        Ok(())
    }

    /// Pending interrupt causes (request AND enable).
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn intr(&self) -> Result<u32> {
        self.regs.read(cdmbc_chid(self.spec.dma_ch))
    }

    /// Acknowledge interrupt causes.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn clear_intr(&self, clear: u32) -> Result<()> {
        self.regs.write(cdmbc_chir(self.spec.dma_ch), clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SimRegisters;
    use hsc_chip::ports::dma;
    use hsc_chip::regs::{CDMBC_TDSTRT, IOB_INTREN1};
    use hsc_chip::SocVariant;

    const SIZE: u64 = 192 * 1024 * 20;

    fn fixture() -> (Arc<SimRegisters>, Arc<Regmap>) {
        let sim = Arc::new(SimRegisters::new(SocVariant::Ld11.spec()));
        let map = Arc::new(Regmap::new(sim.clone()));
        (sim, map)
    }

    #[test]
    fn init_validates_table() {
        let (_sim, regs) = fixture();
        let spec = SocVariant::Ld11.spec();
        assert!(DmaOut::new(regs.clone(), spec, dma::OUT5).is_ok());
        for bad in [6, 9, 12, 100] {
            assert!(matches!(
                DmaOut::new(regs.clone(), spec, bad),
                Err(HscError::InvalidArgument { .. })
            ));
        }
    }

    #[test]
    fn source_select_sets_stream_and_all_enable() {
        let (sim, regs) = fixture();
        let out = DmaOut::new(regs, SocVariant::Ld11.spec(), dma::OUT1).unwrap();
        out.set_src_ts_in(3).unwrap();
        assert_eq!(sim.peek(cdmbc_chtdctrlh(2)), (3 << 16) | chtdctrlh::ALL_EN);

        let (_sim, regs) = fixture();
        let cip = DmaOut::new(regs, SocVariant::Ld11.spec(), dma::CIP_OUT0).unwrap();
        assert!(cip.set_src_ts_in(0).is_err());
    }

    #[test]
    fn start_is_idempotent_at_the_bit_level() {
        let (sim, regs) = fixture();
        let out = DmaOut::new(regs, SocVariant::Ld11.spec(), dma::OUT3).unwrap();
        let mut rb = RingBuffer::new(0x1000_0000, SIZE, SIZE / 4);
        let en = 1 << 9;

        out.start(&mut rb, true).unwrap();
        assert_eq!(sim.peek(CDMBC_TDSTRT) & en, en);
        out.start(&mut rb, true).unwrap();
        assert_eq!(sim.peek(CDMBC_TDSTRT) & en, en);
        assert_eq!(out.state(), DmaState::Started);

        assert_eq!(sim.peek(cdmbc_chie(19)) & chi::TRANSIT, chi::TRANSIT);
        assert_eq!(sim.peek(IOB_INTREN1), 1 << 16);
        assert_eq!(sim.peek(cdmbc_rbendadrsd(17)), 0x1000_0000 + SIZE as u32);
        assert_eq!(sim.peek(cdmbc_chiradrsd(19)), 0x1000_0000 + (SIZE / 4) as u32);

        out.start(&mut rb, false).unwrap();
        assert_eq!(sim.peek(CDMBC_TDSTRT) & en, 0);
        out.start(&mut rb, false).unwrap();
        assert_eq!(sim.peek(CDMBC_TDSTRT) & en, 0);
        assert_eq!(sim.peek(IOB_INTREN1), 0);
        assert_eq!(out.state(), DmaState::Stopped);
    }

    #[test]
    fn sync_exchanges_pointers() {
        let (sim, regs) = fixture();
        let out = DmaOut::new(regs.clone(), SocVariant::Ld11.spec(), dma::OUT0).unwrap();
        let mut rb = RingBuffer::new(0x1000_0000, SIZE, SIZE / 4);
        out.start(&mut rb, true).unwrap();

        rb_set_wp(&regs, 1, 0x1000_0000 + 192 * 10).unwrap();
        out.sync(&mut rb).unwrap();
        assert_eq!(rb.wr(), 192 * 10);
        assert_eq!(out.state(), DmaState::Running);

        rb.advance_rd(192 * 10);
        out.sync(&mut rb).unwrap();
        assert_eq!(rb_rp(&regs, 1).unwrap(), 0x1000_0000 + 192 * 10);
        assert_eq!(
            sim.peek(cdmbc_chiradrsd(1)),
            0x1000_0000 + 192 * 10 + (SIZE / 4) as u32
        );

        rb_set_wp(&regs, 1, 0x4000).unwrap();
        assert!(matches!(out.sync(&mut rb), Err(HscError::HardwareError { .. })));
        assert_eq!(rb.wr(), 192 * 10);
    }
}
