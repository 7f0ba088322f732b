//! Software (simulated HSC) backend
//!
//! A register file with the hardware behaviour the engine depends on, plus
//! a DMA mapper whose device addresses the simulated device can read and
//! write. Used for CI and for the `hsc simulate` pipeline.
//!
//! Register semantics reproduced:
//!
//! | Register | Behaviour |
//! |----------|-----------|
//! | `CDMBC_TDSTRT` | a written 1 bit toggles the channel |
//! | `CDMBC_STRT(1)` | kicks the CIP file channels; the transfer completes at once |
//! | `CDMBC_CHIR(n)`, `CDMBC_RBIR(n)`, `TSI_SYNCSTATUS(n)` | write one to clear |
//! | `CDMBC_CHID(n)` | reads `CHIR & CHIE` |
//!
//! Everything else is plain storage reading back what was written, zero
//! before the first write.
//!
//! The device side is driven explicitly: [`SimRegisters::push_packets`]
//! writes stream bytes at the ring write pointer and raises the transit
//! interrupt, [`SimRegisters::raise_sync_status`] latches TS input status.

// Simulated addresses are 32-bit register halves and host pointers
#![allow(clippy::cast_possible_truncation)]

use std::collections::{BTreeMap, HashMap};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hsc_chip::regs::{
    cdmbc_chid, cdmbc_chie, cdmbc_chir, cdmbc_itsteps, cdmbc_rbbgnadrsd, cdmbc_rbbgnadrsu,
    cdmbc_rbendadrsd, cdmbc_rbendadrsu, cdmbc_rbir, cdmbc_rbrdptrd, cdmbc_rbrdptru,
    cdmbc_rbwrptrd, cdmbc_rbwrptru, cdmbc_strt, chi, intr_mbc_ch, tsi_syncstatus, CDMBC_TDSTRT,
    CDMBC_STRT_CIP_KICK, CIP_F_CTRL,
};
use hsc_chip::spec::{DmaSpec, HscSpec};
use hsc_chip::SocVariant;
use tracing::{debug, info, trace};

use crate::backend::{BackendType, HscBackend};
use crate::coherent::{DmaAllocator, IovaMapper, DMA_PAGE_SIZE};
use crate::error::{HscError, Result};
use crate::irq::{IrqLine, IrqSource, SoftIrq};
use crate::regmap::{RegisterIo, Regmap};
use crate::ring::RING_GUARD;

/// First device address handed out by [`SoftwareMapper`].
pub const SOFT_IOVA_BASE: u64 = 0x1000_0000;

// Highest DMA channel, ring and TS input index decoded by the simulator.
const SIM_DMA_CHANNELS: u32 = 34;
const SIM_RB_CHANNELS: u32 = 32;
const SIM_TS_INPUTS: u32 = 10;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct MapperState {
    next_iova: u64,
    used: usize,
    // iova -> (host address, size)
    regions: BTreeMap<u64, (usize, usize)>,
}

/// Bump-allocating DMA mapper with a device-address registry.
#[derive(Debug)]
pub struct SoftwareMapper {
    state: Mutex<MapperState>,
    limit: Option<usize>,
}

impl Default for SoftwareMapper {
    fn default() -> Self {
        Self {
            state: Mutex::new(MapperState {
                next_iova: SOFT_IOVA_BASE,
                used: 0,
                regions: BTreeMap::new(),
            }),
            limit: None,
        }
    }
}

impl SoftwareMapper {
    /// Mapper refusing to hold more than `limit` bytes at once.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Bytes currently mapped.
    pub fn used(&self) -> usize {
        lock(&self.state).used
    }

    /// Number of live mappings.
    pub fn mappings(&self) -> usize {
        lock(&self.state).regions.len()
    }

    fn locate(state: &MapperState, iova: u64, len: usize) -> Result<*mut u8> {
        let (&base, &(vaddr, size)) = state
            .regions
            .range(..=iova)
            .next_back()
            .ok_or_else(|| HscError::hardware_error(format!("no mapping at iova {iova:#x}")))?;
        let off = (iova - base) as usize;
        match off.checked_add(len) {
            Some(end) if end <= size => Ok((vaddr + off) as *mut u8),
            _ => Err(HscError::hardware_error(format!(
                "device access {iova:#x}+{len:#x} crosses mapping {base:#x}+{size:#x}"
            ))),
        }
    }

    /// Device-side write of `data` at device address `iova`.
    ///
    /// # Errors
    ///
    /// `HardwareError` if the range is not inside one live mapping.
    pub fn write_phys(&self, iova: u64, data: &[u8]) -> Result<()> {
        let state = lock(&self.state);
        let dst = Self::locate(&state, iova, data.len())?;
        // SAFETY: dst..dst+len lies inside a live mapping (checked by locate). Mappings are
        // removed under this lock before their memory is released, so the memory stays valid
        // for the copy.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
        Ok(())
    }

    /// Device-side read of `buf.len()` bytes at device address `iova`.
    ///
    /// # Errors
    ///
    /// `HardwareError` if the range is not inside one live mapping.
    pub fn read_phys(&self, iova: u64, buf: &mut [u8]) -> Result<()> {
        let state = lock(&self.state);
        let src = Self::locate(&state, iova, buf.len())?;
        // SAFETY: as in write_phys; buf is a distinct allocation.
        unsafe { std::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }
}

impl IovaMapper for SoftwareMapper {
    fn map(&self, vaddr: NonNull<u8>, size: usize) -> Result<u64> {
        let mut state = lock(&self.state);
        if let Some(limit) = self.limit {
            if state.used + size > limit {
                return Err(HscError::OutOfMemory { size });
            }
        }
        let iova = state.next_iova;
        let span = size.div_ceil(DMA_PAGE_SIZE) * DMA_PAGE_SIZE;
        state.next_iova += span as u64;
        state.used += size;
        state.regions.insert(iova, (vaddr.as_ptr() as usize, size));
        trace!("soft map {iova:#x}+{size:#x}");
        Ok(iova)
    }

    fn unmap(&self, iova: u64, size: usize) {
        let mut state = lock(&self.state);
        if state.regions.remove(&iova).is_some() {
            state.used -= size;
        }
        trace!("soft unmap {iova:#x}+{size:#x}");
    }
}

/// A CIP file transfer completed by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    /// `CIP_F_CTRL` at kick time (selects the target engine).
    pub engine: u32,
    /// Device address of the source ring.
    pub src: u64,
    /// Bytes to transfer (`CDMBC_ITSTEPS` of the read channel).
    pub len: u32,
    /// Source bytes, when a mapper is attached.
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct SimState {
    regs: HashMap<u32, u32>,
    log: Option<Vec<(u32, u32)>>,
    cip_stall: bool,
    transfers: Vec<FileTransfer>,
}

impl SimState {
    fn get(&self, reg: u32) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn set(&mut self, reg: u32, val: u32) {
        self.regs.insert(reg, val);
    }

    fn get64(&self, lo: u32, hi: u32) -> u64 {
        u64::from(self.get(hi)) << 32 | u64::from(self.get(lo))
    }

    fn set64(&mut self, lo: u32, hi: u32, val: u64) {
        self.set(lo, val as u32);
        self.set(hi, (val >> 32) as u32);
    }
}

/// Kind of register behind an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Toggle,
    CipStart,
    WriteOneClear,
    Detect(u32),
    Plain,
}

fn indexed(reg: u32, base: u32, stride: u32, count: u32) -> Option<u32> {
    let off = reg.checked_sub(base)?;
    (off % stride == 0 && off / stride < count).then_some(off / stride)
}

fn classify(reg: u32) -> Slot {
    if reg == CDMBC_TDSTRT {
        return Slot::Toggle;
    }
    if reg == cdmbc_strt(1) {
        return Slot::CipStart;
    }
    if indexed(reg, cdmbc_chir(0), 0x50, SIM_DMA_CHANNELS).is_some()
        || indexed(reg, cdmbc_rbir(0), 0x40, SIM_RB_CHANNELS).is_some()
        || indexed(reg, tsi_syncstatus(0), 0x70, SIM_TS_INPUTS).is_some()
    {
        return Slot::WriteOneClear;
    }
    if let Some(ch) = indexed(reg, cdmbc_chid(0), 0x50, SIM_DMA_CHANNELS) {
        return Slot::Detect(ch);
    }
    Slot::Plain
}

/// Simulated HSC register file.
#[derive(Debug)]
pub struct SimRegisters {
    spec: &'static HscSpec,
    mapper: Option<Arc<SoftwareMapper>>,
    state: Mutex<SimState>,
}

impl SimRegisters {
    /// Register file for `spec` with no memory behind it.
    pub fn new(spec: &'static HscSpec) -> Self {
        Self {
            spec,
            mapper: None,
            state: Mutex::default(),
        }
    }

    /// Register file whose device side reaches host memory through `mapper`.
    pub fn with_mapper(spec: &'static HscSpec, mapper: Arc<SoftwareMapper>) -> Self {
        Self {
            mapper: Some(mapper),
            ..Self::new(spec)
        }
    }

    /// Descriptor table the simulator decodes channels with.
    pub const fn spec(&self) -> &'static HscSpec {
        self.spec
    }

    /// Raw register contents, bypassing read side effects.
    pub fn peek(&self, reg: u32) -> u32 {
        lock(&self.state).get(reg)
    }

    /// Set raw register contents, bypassing write side effects.
    pub fn poke(&self, reg: u32, val: u32) {
        lock(&self.state).set(reg, val);
    }

    /// Start or stop recording register writes.
    pub fn record_writes(&self, on: bool) {
        lock(&self.state).log = on.then(Vec::new);
    }

    /// Values written to `reg` since recording started, oldest first.
    pub fn writes(&self, reg: u32) -> Vec<u32> {
        lock(&self.state)
            .log
            .iter()
            .flatten()
            .filter(|(r, _)| *r == reg)
            .map(|&(_, v)| v)
            .collect()
    }

    /// Every recorded write as `(reg, value)`.
    pub fn write_log(&self) -> Vec<(u32, u32)> {
        lock(&self.state).log.clone().unwrap_or_default()
    }

    /// Hold CIP file transfers: a kick is stored but never completes.
    pub fn set_cip_stall(&self, stall: bool) {
        lock(&self.state).cip_stall = stall;
    }

    /// CIP file transfers completed so far.
    pub fn file_transfers(&self) -> Vec<FileTransfer> {
        lock(&self.state).transfers.clone()
    }

    /// Latch TS input status bits of lane `tsi`.
    pub fn raise_sync_status(&self, tsi: usize, bits: u32) {
        let reg = tsi_syncstatus(tsi as u32);
        let mut st = lock(&self.state);
        let v = st.get(reg) | bits;
        st.set(reg, v);
    }

    /// Whether the start bit of `ch` is set.
    pub fn is_running(&self, ch: &DmaSpec) -> bool {
        lock(&self.state).get(ch.en.reg) & ch.en.mask() != 0
    }

    /// Device-side write of stream bytes into the ring of output channel `ch`.
    ///
    /// Bytes land at the write pointer, wrapping at the ring end, limited by
    /// the free space in front of the read pointer. The write pointer moves
    /// and the transit interrupt is raised on every push that stores data.
    /// Returns the number of bytes stored; a stopped channel stores nothing.
    ///
    /// # Errors
    ///
    /// `InvalidState` if no mapper is attached or the ring is not programmed;
    /// `HardwareError` if the ring is not backed by mapped memory.
    pub fn push_packets(&self, ch: &DmaSpec, data: &[u8]) -> Result<usize> {
        let mapper = self
            .mapper
            .as_ref()
            .ok_or_else(|| HscError::invalid_state("simulator has no memory attached"))?;
        let mut st = lock(&self.state);
        if st.get(ch.en.reg) & ch.en.mask() == 0 {
            return Ok(0);
        }
        let ring = SimRing::read(&st, ch.rb_ch)?;

        let n = (ring.space() as usize).min(data.len());
        let first = n.min((ring.size - ring.wr) as usize);
        mapper.write_phys(ring.bg + ring.wr, &data[..first])?;
        if n > first {
            mapper.write_phys(ring.bg, &data[first..n])?;
        }

        let wr = (ring.wr + n as u64) % ring.size;
        st.set64(cdmbc_rbwrptrd(ch.rb_ch), cdmbc_rbwrptru(ch.rb_ch), ring.bg + wr);
        if n > 0 {
            let ir = st.get(cdmbc_chir(ch.dma_ch)) | chi::TRANSIT;
            st.set(cdmbc_chir(ch.dma_ch), ir);
        }
        trace!("sim: rb{} +{n} bytes, wp={:#x}", ch.rb_ch, ring.bg + wr);
        Ok(n)
    }

    /// Move the write pointer of `ch` by `n` bytes without writing memory
    /// and raise the transit interrupt.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the ring is not programmed.
    pub fn advance_write_pointer(&self, ch: &DmaSpec, n: u64) -> Result<()> {
        let mut st = lock(&self.state);
        let ring = SimRing::read(&st, ch.rb_ch)?;
        let wr = (ring.wr + n) % ring.size;
        st.set64(cdmbc_rbwrptrd(ch.rb_ch), cdmbc_rbwrptru(ch.rb_ch), ring.bg + wr);
        let ir = st.get(cdmbc_chir(ch.dma_ch)) | chi::TRANSIT;
        st.set(cdmbc_chir(ch.dma_ch), ir);
        Ok(())
    }

    fn kick_file_channels(&self, st: &mut SimState, val: u32) {
        if val & CDMBC_STRT_CIP_KICK == 0 || st.cip_stall {
            st.set(cdmbc_strt(1), val);
            return;
        }
        for r in self.spec.dma_in.iter().flatten() {
            let Some(cip) = r.cip_ch else { continue };
            if val & r.en.mask() == 0 {
                continue;
            }
            let w = self
                .spec
                .dma_out
                .iter()
                .flatten()
                .find(|w| w.cip_ch == Some(cip) && val & w.en.mask() != 0);
            let Some(w) = w else { continue };

            let src = st.get64(cdmbc_rbbgnadrsd(r.rb_ch), cdmbc_rbbgnadrsu(r.rb_ch));
            let len = r.it_ch.map_or(0, |it| st.get(cdmbc_itsteps(it)));
            let mut data = vec![0u8; len as usize];
            if let Some(m) = &self.mapper {
                if let Err(e) = m.read_phys(src, &mut data) {
                    debug!("sim: CIP source unreadable: {e}");
                    data.clear();
                }
            } else {
                data.clear();
            }

            st.transfers.push(FileTransfer {
                engine: st.get(CIP_F_CTRL),
                src,
                len,
                data,
            });
            for ch in [r.dma_ch, w.dma_ch] {
                let ir = st.get(cdmbc_chir(ch)) | intr_mbc_ch::WDONE;
                st.set(cdmbc_chir(ch), ir);
            }
            debug!("sim: CIP file transfer {len:#x} bytes from {src:#x}");
        }
        st.set(cdmbc_strt(1), 0);
    }
}

struct SimRing {
    bg: u64,
    size: u64,
    rd: u64,
    wr: u64,
}

impl SimRing {
    fn read(st: &SimState, rb: u32) -> Result<Self> {
        let bg = st.get64(cdmbc_rbbgnadrsd(rb), cdmbc_rbbgnadrsu(rb));
        let ed = st.get64(cdmbc_rbendadrsd(rb), cdmbc_rbendadrsu(rb));
        if ed <= bg + RING_GUARD {
            return Err(HscError::invalid_state(format!("ring {rb} not programmed")));
        }
        let size = ed - bg;
        let rp = st.get64(cdmbc_rbrdptrd(rb), cdmbc_rbrdptru(rb));
        let wp = st.get64(cdmbc_rbwrptrd(rb), cdmbc_rbwrptru(rb));
        let off = |p: u64| p.saturating_sub(bg).min(size) % size;
        Ok(Self {
            bg,
            size,
            rd: off(rp),
            wr: off(wp),
        })
    }

    fn space(&self) -> u64 {
        if self.rd <= self.wr {
            self.size - (self.wr - self.rd) - RING_GUARD
        } else {
            self.rd - self.wr - RING_GUARD
        }
    }
}

impl RegisterIo for SimRegisters {
    fn read32(&self, offset: u32) -> u32 {
        let st = lock(&self.state);
        match classify(offset) {
            Slot::Detect(ch) => st.get(cdmbc_chir(ch)) & st.get(cdmbc_chie(ch)),
            _ => st.get(offset),
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut st = lock(&self.state);
        if let Some(log) = st.log.as_mut() {
            log.push((offset, value));
        }
        match classify(offset) {
            Slot::Toggle => {
                let v = st.get(offset) ^ value;
                st.set(offset, v);
            }
            Slot::CipStart => self.kick_file_channels(&mut st, value),
            Slot::WriteOneClear => {
                let v = st.get(offset) & !value;
                st.set(offset, v);
            }
            Slot::Detect(_) => {}
            Slot::Plain => st.set(offset, value),
        }
    }
}

/// Software backend: simulated registers, memory and interrupt lines.
#[derive(Debug)]
pub struct SoftwareBackend {
    variant: SocVariant,
    sim: Arc<SimRegisters>,
    regmap: Arc<Regmap>,
    mapper: Arc<SoftwareMapper>,
    irq_ts: Arc<SoftIrq>,
    irq_dma: Arc<SoftIrq>,
}

impl SoftwareBackend {
    /// Simulated controller of `variant`.
    pub fn new(variant: SocVariant) -> Self {
        let mapper = Arc::new(SoftwareMapper::default());
        let sim = Arc::new(SimRegisters::with_mapper(variant.spec(), Arc::clone(&mapper)));
        let regmap = Arc::new(Regmap::new(Arc::clone(&sim) as Arc<dyn RegisterIo>));
        info!("SoftwareBackend: simulated {variant} HSC");
        Self {
            variant,
            sim,
            regmap,
            mapper,
            irq_ts: Arc::new(SoftIrq::new()),
            irq_dma: Arc::new(SoftIrq::new()),
        }
    }

    /// Simulated register file.
    pub fn sim(&self) -> &Arc<SimRegisters> {
        &self.sim
    }

    /// Simulated memory.
    pub fn mapper(&self) -> &Arc<SoftwareMapper> {
        &self.mapper
    }

    fn out_channel(&self, dma_out: usize) -> Result<DmaSpec> {
        self.variant
            .spec()
            .dma_out(dma_out)
            .copied()
            .ok_or_else(|| HscError::invalid_argument(format!("DMA output {dma_out} not present")))
    }

    /// Write stream bytes into output channel `dma_out` and fire the DMA
    /// interrupt line. Returns the number of bytes stored.
    ///
    /// # Errors
    ///
    /// As [`SimRegisters::push_packets`], or `InvalidArgument` for an
    /// unknown channel.
    pub fn push_packets(&self, dma_out: usize, data: &[u8]) -> Result<usize> {
        let ch = self.out_channel(dma_out)?;
        let n = self.sim.push_packets(&ch, data)?;
        if n > 0 {
            self.irq_dma.trigger();
        }
        Ok(n)
    }

    /// Move the write pointer of `dma_out` and fire the DMA interrupt line.
    ///
    /// # Errors
    ///
    /// As [`SimRegisters::advance_write_pointer`].
    pub fn advance_write_pointer(&self, dma_out: usize, n: u64) -> Result<()> {
        let ch = self.out_channel(dma_out)?;
        self.sim.advance_write_pointer(&ch, n)?;
        self.irq_dma.trigger();
        Ok(())
    }

    /// Latch status bits on lane `tsi` and fire the TS input interrupt line.
    pub fn raise_sync_status(&self, tsi: usize, bits: u32) {
        self.sim.raise_sync_status(tsi, bits);
        self.irq_ts.trigger();
    }

    /// See [`SimRegisters::set_cip_stall`].
    pub fn set_cip_stall(&self, stall: bool) {
        self.sim.set_cip_stall(stall);
    }

    /// See [`SimRegisters::file_transfers`].
    pub fn file_transfers(&self) -> Vec<FileTransfer> {
        self.sim.file_transfers()
    }
}

impl HscBackend for SoftwareBackend {
    /// `device` names the simulated variant (`ld11`, `ld20`); anything else
    /// simulates LD11.
    fn init(device: &str) -> Result<Self> {
        let variant = device.parse().unwrap_or(SocVariant::Ld11);
        Ok(Self::new(variant))
    }

    fn regmap(&self) -> Arc<Regmap> {
        Arc::clone(&self.regmap)
    }

    fn dma_allocator(&self) -> DmaAllocator {
        DmaAllocator::new(Arc::clone(&self.mapper) as Arc<dyn IovaMapper>)
    }

    fn irq_source(&self, line: IrqLine) -> Result<Arc<dyn IrqSource>> {
        Ok(match line {
            IrqLine::TsIn => Arc::clone(&self.irq_ts) as Arc<dyn IrqSource>,
            IrqLine::Dma => Arc::clone(&self.irq_dma) as Arc<dyn IrqSource>,
        })
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn variant(&self) -> SocVariant {
        self.variant
    }

    fn device_name(&self) -> &str {
        "sim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsc_chip::ports::dma;
    use hsc_chip::regs::{cdmbc_chie, intr2, tsi_intr};

    #[test]
    fn toggle_and_write_one_clear() {
        let sim = SimRegisters::new(SocVariant::Ld11.spec());
        sim.write32(CDMBC_TDSTRT, 1 << 3);
        sim.write32(CDMBC_TDSTRT, 1 << 5);
        assert_eq!(sim.peek(CDMBC_TDSTRT), (1 << 3) | (1 << 5));
        sim.write32(CDMBC_TDSTRT, 1 << 3);
        assert_eq!(sim.peek(CDMBC_TDSTRT), 1 << 5);

        sim.poke(cdmbc_chir(4), 0xff);
        sim.write32(cdmbc_chir(4), 0x0f);
        assert_eq!(sim.peek(cdmbc_chir(4)), 0xf0);

        sim.raise_sync_status(2, tsi_intr::SERR);
        sim.write32(tsi_syncstatus(2), 0xffff);
        assert_eq!(sim.peek(tsi_syncstatus(2)), 0);
    }

    #[test]
    fn detect_is_request_and_enable() {
        let sim = SimRegisters::new(SocVariant::Ld11.spec());
        sim.poke(cdmbc_chir(1), chi::TRANSIT | chi::STARTING);
        assert_eq!(sim.read32(cdmbc_chid(1)), 0);
        sim.write32(cdmbc_chie(1), chi::TRANSIT);
        assert_eq!(sim.read32(cdmbc_chid(1)), chi::TRANSIT);
    }

    #[test]
    fn push_wraps_and_respects_guard() {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let alloc = backend.dma_allocator();
        let buf = alloc.alloc(1024).unwrap();
        let ch = *SocVariant::Ld11.spec().dma_out(dma::OUT0).unwrap();
        let sim = backend.sim();

        let bg = buf.phys();
        for (lo, hi, v) in [
            (cdmbc_rbbgnadrsd(ch.rb_ch), cdmbc_rbbgnadrsu(ch.rb_ch), bg),
            (cdmbc_rbendadrsd(ch.rb_ch), cdmbc_rbendadrsu(ch.rb_ch), bg + 1024),
            (cdmbc_rbrdptrd(ch.rb_ch), cdmbc_rbrdptru(ch.rb_ch), bg + 1000),
            (cdmbc_rbwrptrd(ch.rb_ch), cdmbc_rbwrptru(ch.rb_ch), bg + 1000),
        ] {
            sim.poke(lo, v as u32);
            sim.poke(hi, (v >> 32) as u32);
        }

        assert_eq!(sim.push_packets(&ch, &[1; 10]).unwrap(), 0, "stopped channel");
        sim.poke(ch.en.reg, ch.en.mask());

        let n = sim.push_packets(&ch, &[7u8; 2000]).unwrap();
        assert_eq!(n, 1024 - 8);
        let mut tail = [0u8; 24];
        buf.read_at(1000, &mut tail).unwrap();
        assert!(tail.iter().all(|&b| b == 7));
        let mut head = [0u8; 4];
        buf.read_at(0, &mut head).unwrap();
        assert_eq!(head, [7; 4]);
        assert_eq!(sim.peek(cdmbc_rbwrptrd(ch.rb_ch)) as u64, bg + 1000 - 8);
        assert_ne!(sim.peek(cdmbc_chir(ch.dma_ch)) & chi::TRANSIT, 0);
    }

    #[test]
    fn cip_kick_completes_unless_stalled() {
        let backend = SoftwareBackend::new(SocVariant::Ld20);
        let spec = SocVariant::Ld20.spec();
        let r = spec.dma_in(dma::CIP_IN0).unwrap();
        let w = spec.dma_out(dma::CIP_OUT0).unwrap();
        let sim = backend.sim();
        let kick = CDMBC_STRT_CIP_KICK | r.en.mask() | w.en.mask();

        backend.set_cip_stall(true);
        sim.write32(cdmbc_strt(1), kick);
        assert_eq!(sim.peek(cdmbc_chir(r.dma_ch)), 0);
        assert!(backend.file_transfers().is_empty());

        backend.set_cip_stall(false);
        sim.write32(CIP_F_CTRL, 0x2f09_0001);
        sim.write32(cdmbc_itsteps(r.it_ch.unwrap()), 0);
        sim.write32(cdmbc_strt(1), kick);
        assert_eq!(sim.peek(cdmbc_chir(r.dma_ch)), intr_mbc_ch::WDONE);
        assert_eq!(sim.peek(cdmbc_chir(w.dma_ch)), intr_mbc_ch::WDONE);
        assert_eq!(backend.file_transfers()[0].engine, 0x2f09_0001);
        assert_eq!(intr2::mbc_cip_w(0), 1 << 9);
    }

    #[test]
    fn mapper_tracks_usage() {
        let mapper = Arc::new(SoftwareMapper::default());
        let alloc = DmaAllocator::new(mapper.clone());
        let a = alloc.alloc(100).unwrap();
        assert_eq!(a.phys(), SOFT_IOVA_BASE);
        mapper.write_phys(a.phys() + 4, &[9, 9]).unwrap();
        let mut out = [0u8; 2];
        a.read_at(4, &mut out).unwrap();
        assert_eq!(out, [9, 9]);
        assert!(mapper.write_phys(a.phys() + 4095, &[0, 0]).is_err());
        drop(a);
        assert_eq!(mapper.mappings(), 0);
        assert_eq!(mapper.used(), 0);
    }
}
