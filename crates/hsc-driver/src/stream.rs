//! Stream interfaces: one TS input lane and one output DMA channel per
//! adapter.
//!
//! A [`TsIf`] owns the routing of a tuner port into its TS input lane and
//! the debounced lane restart that follows a sync loss. A [`DmaIf`] owns
//! the ring buffer memory of its output channel and the feed work that
//! drains it. An [`Adapter`] pairs the two and starts or stops the feed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hsc_chip::board::HscConf;
use hsc_chip::ports::{css_out_to_dpll_src, css_out_to_ts_in};
use hsc_chip::spec::HscSpec;
use tracing::{debug, error, info, warn};

use crate::coherent::{CoherentBuffer, DmaAllocator};
use crate::config::HscConfig;
use crate::css::{Css, Polarity};
use crate::dma::DmaOut;
use crate::error::{HscError, Result};
use crate::feed::{Demux, FeedCounters, FeedPump, FeedStats};
use crate::irq::IrqReturn;
use crate::regmap::Regmap;
use crate::ring::RingBuffer;
use crate::ts::{TsFormat, TsInputs};
use crate::work::Work;

/// Status bits written back to acknowledge an interrupt.
pub const INTR_CLEAR_ALL: u32 = 0xffff;

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct TsIfCore {
    regs: Arc<Regmap>,
    spec: &'static HscSpec,
    tsi: usize,
    running: AtomicBool,
    recoveries: AtomicU64,
}

impl TsIfCore {
    fn inputs(&self) -> TsInputs<'_> {
        TsInputs::new(&self.regs, self.spec)
    }

    fn recover(&self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        match self.inputs().set_enable(self.tsi, true) {
            Ok(()) => {
                self.recoveries.fetch_add(1, Ordering::Relaxed);
                info!("TS {}: lane restarted", self.tsi);
            }
            Err(e) => error!("TS {}: restart failed: {e}", self.tsi),
        }
    }
}

/// TS input side of an adapter.
pub struct TsIf {
    recover: Work,
    core: Arc<TsIfCore>,
    conf: HscConf,
    recover_delay: Duration,
}

impl fmt::Debug for TsIf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsIf")
            .field("tsi", &self.core.tsi)
            .field("conf", &self.conf)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TsIf {
    /// Route `conf.css_in` to the lane behind `conf.css_out`, select the
    /// timestamped stream format and lock `conf.dpll` to the lane.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `conf.css_out` is not a TSI output or any index
    /// is outside the SoC tables.
    pub fn init(
        regs: Arc<Regmap>,
        spec: &'static HscSpec,
        conf: &HscConf,
        config: &HscConfig,
    ) -> Result<Self> {
        let tsi = css_out_to_ts_in(conf.css_out).ok_or_else(|| {
            HscError::invalid_argument(format!("CSS output {} feeds no TS input", conf.css_out))
        })?;
        let dpll_src = css_out_to_dpll_src(conf.css_out).ok_or_else(|| {
            HscError::invalid_argument(format!("CSS output {} has no DPLL source", conf.css_out))
        })?;

        let css = Css::new(&regs, spec);
        css.connect(conf.css_in, conf.css_out, true)?;
        css.set_in_polarity(conf.css_in, Polarity::default())?;
        TsInputs::new(&regs, spec).set_dmaparam(tsi, TsFormat::Mpeg2TsAts)?;
        css.dpll_set_src(conf.dpll, Some(dpll_src))?;

        let core = Arc::new(TsIfCore {
            regs,
            spec,
            tsi,
            running: AtomicBool::new(false),
            recoveries: AtomicU64::new(0),
        });
        let c = Arc::clone(&core);
        let recover = Work::new(format!("hsc-recover{tsi}"), move || c.recover())?;

        debug!(
            "TS {tsi}: CSS in {} -> out {}, DPLL{} src {dpll_src}",
            conf.css_in, conf.css_out, conf.dpll
        );
        Ok(Self {
            recover,
            core,
            conf: *conf,
            recover_delay: config.recover_delay,
        })
    }

    /// TS input lane index.
    pub fn tsi(&self) -> usize {
        self.core.tsi
    }

    /// Adapter wiring.
    pub const fn conf(&self) -> &HscConf {
        &self.conf
    }

    /// Whether the feed is on.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    /// Lane restarts performed after sync loss.
    pub fn recoveries(&self) -> u64 {
        self.core.recoveries.load(Ordering::Relaxed)
    }

    /// Whether a lane restart is waiting for its delay.
    pub fn recovery_pending(&self) -> bool {
        self.recover.is_pending()
    }

    fn set_running(&self, on: bool) {
        self.core.running.store(on, Ordering::Release);
    }

    fn set_enable(&self, on: bool) -> Result<()> {
        self.core.inputs().set_enable(self.core.tsi, on)
    }

    /// Interrupt line 0 handler for this lane.
    ///
    /// Reads and acknowledges the sync status. A sync error, start of frame
    /// error or transport overflow schedules a lane restart after the
    /// recovery delay; further errors before it runs change nothing.
    pub fn irq(&self) -> IrqReturn {
        if !self.is_running() {
            return IrqReturn::None;
        }
        let tsi = self.core.tsi;
        let ts = self.core.inputs();
        let st = match ts.intr(tsi) {
            Ok(st) if !st.is_empty() => st,
            Ok(_) => return IrqReturn::None,
            Err(e) => {
                warn!("TS {tsi}: status read failed: {e}");
                return IrqReturn::None;
            }
        };
        if let Err(e) = ts.clear_intr(tsi, INTR_CLEAR_ALL) {
            warn!("TS {tsi}: status clear failed: {e}");
        }

        if st.is_error() {
            warn!("TS {tsi} Sync lost, try recovery. ({st:?})");
            self.recover.schedule_after(self.recover_delay);
        }
        IrqReturn::Handled
    }

    /// Drop a pending lane restart and wait for a running one.
    pub fn release(self) {
        self.recover.cancel();
        debug!("TS {}: released", self.core.tsi);
    }
}

struct DmaIfCore {
    dma: DmaOut,
    ring: Mutex<RingBuffer>,
    buf: CoherentBuffer,
    running: AtomicBool,
    stats: FeedStats,
    demux: Mutex<Box<dyn Demux>>,
}

impl DmaIfCore {
    fn pump(&self) -> FeedPump<'_> {
        FeedPump::new(&self.dma, &self.ring, &self.buf, &self.running, &self.stats)
    }

    fn feed(&self) {
        let pump = self.pump();
        pump.note_invocation();
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        let mut demux = lock(&self.demux);
        if let Err(e) = pump.run(&mut **demux) {
            error!("DMA out {}: feed failed: {e}", self.dma.id());
        }
    }
}

/// Output DMA side of an adapter.
pub struct DmaIf {
    // Declared first: its worker holds the core and is joined before the
    // core's memory can go.
    feed: Work,
    core: Arc<DmaIfCore>,
}

impl fmt::Debug for DmaIf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaIf")
            .field("dma", &self.core.dma)
            .field("ring", &*lock(&self.core.ring))
            .field("buf", &self.core.buf)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DmaIf {
    /// Bind output channel `conf.dma_out` and allocate its ring.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown channel, `OutOfMemory` if the ring
    /// cannot be allocated.
    pub fn init(
        regs: Arc<Regmap>,
        spec: &HscSpec,
        conf: &HscConf,
        alloc: &DmaAllocator,
        config: &HscConfig,
        demux: Box<dyn Demux>,
    ) -> Result<Self> {
        let dma = DmaOut::new(regs, spec, conf.dma_out)?;
        let buf = alloc.alloc(config.ring_size)?;
        let ring = RingBuffer::new(buf.phys(), config.ring_size as u64, config.size_chk() as u64);

        let id = dma.id();
        let core = Arc::new(DmaIfCore {
            dma,
            ring: Mutex::new(ring),
            buf,
            running: AtomicBool::new(false),
            stats: FeedStats::default(),
            demux: Mutex::new(demux),
        });
        let c = Arc::clone(&core);
        let feed = Work::new(format!("hsc-feed{id}"), move || c.feed())?;

        debug!(
            "DMA out {id}: ring {:#x}+{:#x}, checkpoint {:#x}",
            core.buf.phys(),
            config.ring_size,
            config.size_chk()
        );
        Ok(Self { feed, core })
    }

    /// Output channel.
    pub fn dma(&self) -> &DmaOut {
        &self.core.dma
    }

    /// Copy of the ring offsets.
    pub fn ring(&self) -> RingBuffer {
        lock(&self.core.ring).clone()
    }

    /// Feed counters.
    pub fn counters(&self) -> FeedCounters {
        self.core.stats.snapshot()
    }

    /// Whether the feed is on.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    fn set_running(&self, on: bool) {
        self.core.running.store(on, Ordering::Release);
    }

    /// Queue the feed work. Returns `false` if it is already queued.
    pub fn schedule_feed(&self) -> bool {
        self.feed.schedule()
    }

    /// Run queued feed work now and wait until it is idle.
    pub fn flush(&self) {
        self.feed.flush();
    }

    /// Interrupt line 1 handler for this channel.
    ///
    /// Acknowledges the channel causes, refreshes the write offset and
    /// queues the feed work.
    pub fn irq(&self) -> IrqReturn {
        if !self.is_running() {
            return IrqReturn::None;
        }
        let dma = &self.core.dma;
        match dma.intr() {
            Ok(0) => return IrqReturn::None,
            Ok(_) => {}
            Err(e) => {
                warn!("DMA out {}: status read failed: {e}", dma.id());
                return IrqReturn::None;
            }
        }
        if let Err(e) = dma.clear_intr(INTR_CLEAR_ALL) {
            warn!("DMA out {}: status clear failed: {e}", dma.id());
        }
        if let Err(e) = dma.sync(&mut lock(&self.core.ring)) {
            warn!("DMA out {}: {e}", dma.id());
        }
        self.feed.schedule();
        IrqReturn::Handled
    }

    /// Finish queued feed work, then free the ring. Returns the final
    /// counters.
    pub fn release(self) -> FeedCounters {
        self.feed.flush();
        let counters = self.core.stats.snapshot();
        let id = self.core.dma.id();
        drop(self.feed);
        drop(self.core);
        debug!("DMA out {id}: released");
        counters
    }
}

/// One tuner path: TS input lane plus output channel.
#[derive(Debug)]
pub struct Adapter {
    id: usize,
    tsif: TsIf,
    dmaif: DmaIf,
}

impl Adapter {
    /// Bring up the TS input, then the output channel, of adapter `id`.
    ///
    /// # Errors
    ///
    /// As [`TsIf::init`] and [`DmaIf::init`]. A failed output channel
    /// releases the TS input again.
    pub fn init(
        id: usize,
        regs: &Arc<Regmap>,
        spec: &'static HscSpec,
        conf: &HscConf,
        alloc: &DmaAllocator,
        config: &HscConfig,
        demux: Box<dyn Demux>,
    ) -> Result<Self> {
        let tsif = TsIf::init(Arc::clone(regs), spec, conf, config)?;
        let dmaif = match DmaIf::init(Arc::clone(regs), spec, conf, alloc, config, demux) {
            Ok(d) => d,
            Err(e) => {
                tsif.release();
                return Err(e);
            }
        };
        info!("adapter {id}: TS {} -> DMA out {}", tsif.tsi(), conf.dma_out);
        Ok(Self { id, tsif, dmaif })
    }

    /// Adapter index.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// TS input side.
    pub const fn tsif(&self) -> &TsIf {
        &self.tsif
    }

    /// Output side.
    pub const fn dmaif(&self) -> &DmaIf {
        &self.dmaif
    }

    /// Enable the lane, point the channel at it and start the channel.
    ///
    /// # Errors
    ///
    /// Propagates register errors; the feed is left off.
    pub fn start_feed(&self) -> Result<()> {
        let tsi = self.tsif.tsi();
        self.tsif.set_running(true);
        self.dmaif.set_running(true);

        let res = self.tsif.set_enable(true).and_then(|()| {
            let dma = self.dmaif.dma();
            dma.set_src_ts_in(tsi)?;
            dma.start(&mut lock(&self.dmaif.core.ring), true)
        });
        if let Err(e) = res {
            self.dmaif.set_running(false);
            self.tsif.set_running(false);
            error!("adapter {}: start feed failed: {e}", self.id);
            return Err(e);
        }
        info!("adapter {}: feed started", self.id);
        Ok(())
    }

    /// Drop any pending lane restart, disable the lane, then stop the
    /// channel.
    ///
    /// The channel stops and the feed is marked off under the ring lock, so
    /// a feed pass in flight never advances the reset ring.
    ///
    /// # Errors
    ///
    /// Propagates register errors; the feed is marked off regardless.
    pub fn stop_feed(&self) -> Result<()> {
        self.tsif.set_running(false);
        self.tsif.recover.cancel();
        let lane = self.tsif.set_enable(false);
        let chan = {
            let mut ring = lock(&self.dmaif.core.ring);
            let r = self.dmaif.dma().start(&mut ring, false);
            self.dmaif.set_running(false);
            r
        };
        info!("adapter {}: feed stopped", self.id);
        lane.and(chan)
    }

    /// Release the output side, then the TS input side.
    pub fn release(self) -> FeedCounters {
        let counters = self.dmaif.release();
        self.tsif.release();
        debug!("adapter {}: released, {counters:?}", self.id);
        counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HscBackend;
    use crate::backends::software::SoftwareBackend;
    use hsc_chip::board::Board;
    use hsc_chip::ports::{css_in, css_out, dpll};
    use hsc_chip::regs::{tsi_config, tsi_intr};
    use hsc_chip::SocVariant;

    fn small_config() -> HscConfig {
        HscConfig {
            ring_size: 192 * 64,
            recover_delay: Duration::from_millis(40),
            ..HscConfig::default()
        }
    }

    #[test]
    fn tsif_init_routes_and_locks_dpll() {
        let backend = SoftwareBackend::new(SocVariant::Ld20);
        let regs = backend.regmap();
        let spec = SocVariant::Ld20.spec();
        let conf = Board::Ld20Mn884434.confs()[1];
        let tsif = TsIf::init(regs.clone(), spec, &conf, &small_config()).unwrap();
        assert_eq!(tsif.tsi(), 1);

        let css = Css::new(&regs, spec);
        assert_eq!(css.source(css_out::TSI1).unwrap(), (css_in::SRLTS3, true));
        assert_eq!(css.dpll_src(dpll::DPLL1).unwrap(), css_out_to_dpll_src(css_out::TSI1));
        tsif.release();
    }

    #[test]
    fn tsif_rejects_non_tsi_output() {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let conf = HscConf {
            css_out: css_out::PARTS0,
            ..Board::Ld11Mn884433.confs()[0]
        };
        let err = TsIf::init(backend.regmap(), SocVariant::Ld11.spec(), &conf, &small_config());
        assert!(matches!(err, Err(HscError::InvalidArgument { .. })));
    }

    #[test]
    fn stopped_interfaces_ignore_interrupts() {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let conf = Board::Ld11Mn884433.confs()[0];
        let a = Adapter::init(
            0,
            &backend.regmap(),
            SocVariant::Ld11.spec(),
            &conf,
            &backend.dma_allocator(),
            &small_config(),
            Box::new(|_: &[u8]| {}),
        )
        .unwrap();
        backend.raise_sync_status(0, tsi_intr::SERR);
        assert_eq!(a.tsif().irq(), IrqReturn::None);
        assert_eq!(a.dmaif().irq(), IrqReturn::None);
        assert!(!a.tsif().recovery_pending());
        a.release();
    }

    #[test]
    fn recovery_restarts_lane_once() {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let conf = Board::Ld11Mn884433.confs()[0];
        let a = Adapter::init(
            0,
            &backend.regmap(),
            SocVariant::Ld11.spec(),
            &conf,
            &backend.dma_allocator(),
            &small_config(),
            Box::new(|_: &[u8]| {}),
        )
        .unwrap();
        a.start_feed().unwrap();

        for _ in 0..5 {
            backend.raise_sync_status(0, tsi_intr::SOF);
            assert_eq!(a.tsif().irq(), IrqReturn::Handled);
        }
        assert!(a.tsif().recovery_pending());
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(a.tsif().recoveries(), 1);
        assert!(!a.tsif().recovery_pending());

        // Non-error status is acknowledged without a restart.
        backend.raise_sync_status(0, tsi_intr::LOCK);
        assert_eq!(a.tsif().irq(), IrqReturn::Handled);
        assert!(!a.tsif().recovery_pending());

        a.stop_feed().unwrap();
        a.release();
    }

    #[test]
    fn recovery_after_stop_is_skipped() {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let conf = Board::Ld11Mn884433.confs()[0];
        let a = Adapter::init(
            0,
            &backend.regmap(),
            SocVariant::Ld11.spec(),
            &conf,
            &backend.dma_allocator(),
            &small_config(),
            Box::new(|_: &[u8]| {}),
        )
        .unwrap();
        a.start_feed().unwrap();
        backend.raise_sync_status(0, tsi_intr::TOF);
        a.tsif().irq();
        a.stop_feed().unwrap();
        assert!(!a.tsif().recovery_pending());
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(a.tsif().recoveries(), 0);
        assert_eq!(backend.sim().peek(tsi_config(0)) & tsi_config::CHEN_START, 0);
        a.release();
    }

    #[test]
    fn stop_feed_disables_lane_before_channel() {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let spec = SocVariant::Ld11.spec();
        let conf = Board::Ld11Mn884433.confs()[0];
        let a = Adapter::init(
            0,
            &backend.regmap(),
            spec,
            &conf,
            &backend.dma_allocator(),
            &small_config(),
            Box::new(|_: &[u8]| {}),
        )
        .unwrap();
        a.start_feed().unwrap();
        let tsi = a.tsif().tsi() as u32;
        let en = a.dmaif().dma().spec().en;

        backend.sim().record_writes(true);
        a.stop_feed().unwrap();
        let log = backend.sim().write_log();

        let lane_off = log
            .iter()
            .position(|&(reg, val)| reg == tsi_config(tsi) && val & tsi_config::CHEN_START == 0)
            .expect("lane disable not written");
        let chan_off = log
            .iter()
            .position(|&(reg, _)| reg == en.reg)
            .expect("channel stop not written");
        assert!(lane_off < chan_off, "{log:x?}");
        assert_eq!(backend.sim().peek(en.reg) & en.mask(), 0);
        a.release();
    }

    #[test]
    fn ring_allocation_failure_releases_tsif() {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let mapper = Arc::new(crate::backends::software::SoftwareMapper::with_limit(4096));
        let alloc = DmaAllocator::new(mapper);
        let conf = Board::Ld11Mn884433.confs()[0];
        let err = Adapter::init(
            0,
            &backend.regmap(),
            SocVariant::Ld11.spec(),
            &conf,
            &alloc,
            &small_config(),
            Box::new(|_: &[u8]| {}),
        );
        assert!(matches!(err, Err(HscError::OutOfMemory { .. })));
    }
}
