//! Controller lifecycle.
//!
//! Probe order: clocks and resets, microcode, interrupt threads. Adapters
//! are added afterwards, one per board wiring entry. Removal undoes the
//! same steps backwards.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hsc_chip::board::HscConf;
use hsc_chip::regs::IOB_HSCREV;
use hsc_chip::spec::HscSpec;
use hsc_chip::SocVariant;
use tracing::{debug, error, info, warn};

use crate::backend::HscBackend;
use crate::clock::ChipClocks;
use crate::coherent::DmaAllocator;
use crate::config::HscConfig;
use crate::error::{HscError, Result};
use crate::feed::{Demux, FeedCounters};
use crate::firmware::FirmwareSource;
use crate::irq::{IrqLine, IrqReturn, IrqThread};
use crate::regmap::Regmap;
use crate::stream::Adapter;
use crate::ucode::{LoadedUcode, UcodeLoader, UcodeRevision};

type Adapters = Arc<RwLock<Vec<Adapter>>>;

fn read(a: &Adapters) -> RwLockReadGuard<'_, Vec<Adapter>> {
    a.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(a: &Adapters) -> RwLockWriteGuard<'_, Vec<Adapter>> {
    a.write().unwrap_or_else(PoisonError::into_inner)
}

/// A probed controller.
pub struct Chip {
    irqs: Vec<IrqThread>,
    adapters: Adapters,
    ucode: Option<LoadedUcode>,
    revision: UcodeRevision,
    hsc_rev: u32,
    regs: Arc<Regmap>,
    alloc: DmaAllocator,
    config: HscConfig,
    clocks: ChipClocks,
    backend: Arc<dyn HscBackend>,
}

impl fmt::Debug for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chip")
            .field("device", &self.backend.device_name())
            .field("variant", &self.variant())
            .field("hsc_rev", &format_args!("{:#x}", self.hsc_rev))
            .field("ucode", &self.revision)
            .field("adapters", &self.adapter_count())
            .finish_non_exhaustive()
    }
}

impl Chip {
    /// Bring up the controller behind `backend`.
    ///
    /// # Errors
    ///
    /// The first failing step's error. Steps already done are undone.
    pub fn probe(
        backend: Arc<dyn HscBackend>,
        clocks: ChipClocks,
        firmware: &dyn FirmwareSource,
        config: HscConfig,
    ) -> Result<Self> {
        config.validate()?;
        let variant = backend.variant();
        info!(
            "probing {variant} HSC on {} ({})",
            backend.device_name(),
            backend.backend_type()
        );

        clocks.enable()?;

        let regs = backend.regmap();
        let alloc = backend.dma_allocator();
        let loader = UcodeLoader::new(&regs, variant.spec(), &alloc, &config);
        let ucode = match loader.load_all(firmware) {
            Ok(u) => u,
            Err(e) => {
                error!("microcode load failed: {e}");
                clocks.disable();
                return Err(e);
            }
        };
        let read_revs = || -> Result<(u32, UcodeRevision)> {
            let hsc_rev = regs.read(IOB_HSCREV)?;
            if hsc_rev == u32::MAX {
                return Err(HscError::hardware_error("IOB_HSCREV reads all ones"));
            }
            Ok((hsc_rev, loader.revision()?))
        };
        let (hsc_rev, revision) = match read_revs() {
            Ok(r) => r,
            Err(e) => {
                error!("revision readout failed: {e}");
                if let Err(e) = loader.unload_all(ucode) {
                    warn!("core stop failed: {e}");
                }
                clocks.disable();
                return Err(e);
            }
        };
        info!(
            "HSC rev {hsc_rev:#x}, SPU ucode {:#x}, ACE ucode {:#x}",
            revision.spu, revision.ace
        );

        let mut chip = Self {
            irqs: Vec::new(),
            adapters: Arc::new(RwLock::new(Vec::new())),
            ucode: Some(ucode),
            revision,
            hsc_rev,
            regs,
            alloc,
            config,
            clocks,
            backend,
        };
        // Drop of a partly built chip runs the teardown.
        chip.start_irqs()?;
        Ok(chip)
    }

    fn start_irqs(&mut self) -> Result<()> {
        for line in IrqLine::ALL {
            let source = self.backend.irq_source(line)?;
            let adapters = Arc::clone(&self.adapters);
            let th = match line {
                IrqLine::TsIn => IrqThread::spawn(line, source, move || {
                    read(&adapters)
                        .iter()
                        .fold(IrqReturn::None, |r, a| r | a.tsif().irq())
                })?,
                IrqLine::Dma => IrqThread::spawn(line, source, move || {
                    read(&adapters)
                        .iter()
                        .fold(IrqReturn::None, |r, a| r | a.dmaif().irq())
                })?,
            };
            self.irqs.push(th);
        }
        Ok(())
    }

    /// SoC generation.
    pub fn variant(&self) -> SocVariant {
        self.backend.variant()
    }

    /// SoC tables.
    pub fn spec(&self) -> &'static HscSpec {
        self.variant().spec()
    }

    /// Register map.
    pub fn regs(&self) -> &Arc<Regmap> {
        &self.regs
    }

    /// `IOB_HSCREV` read at probe.
    pub const fn hsc_revision(&self) -> u32 {
        self.hsc_rev
    }

    /// Microcode revisions read at probe.
    pub const fn ucode_revision(&self) -> UcodeRevision {
        self.revision
    }

    /// Adapters added so far.
    pub fn adapter_count(&self) -> usize {
        read(&self.adapters).len()
    }

    /// Bring up an adapter wired as `conf`, delivering packets to `demux`.
    /// Returns its index.
    ///
    /// # Errors
    ///
    /// As [`Adapter::init`].
    pub fn add_adapter(&self, conf: &HscConf, demux: Box<dyn Demux>) -> Result<usize> {
        let mut adapters = write(&self.adapters);
        let id = adapters.len();
        let a = Adapter::init(
            id,
            &self.regs,
            self.spec(),
            conf,
            &self.alloc,
            &self.config,
            demux,
        )?;
        adapters.push(a);
        Ok(id)
    }

    /// Run `f` on adapter `id`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if there is no such adapter, or `f`'s error.
    pub fn with_adapter<T>(&self, id: usize, f: impl FnOnce(&Adapter) -> Result<T>) -> Result<T> {
        let adapters = read(&self.adapters);
        let a = adapters
            .get(id)
            .ok_or_else(|| HscError::invalid_argument(format!("no adapter {id}")))?;
        f(a)
    }

    /// Start the feed of adapter `id`.
    ///
    /// # Errors
    ///
    /// As [`Chip::with_adapter`] and [`Adapter::start_feed`].
    pub fn start_feed(&self, id: usize) -> Result<()> {
        self.with_adapter(id, Adapter::start_feed)
    }

    /// Stop the feed of adapter `id`.
    ///
    /// # Errors
    ///
    /// As [`Chip::with_adapter`] and [`Adapter::stop_feed`].
    pub fn stop_feed(&self, id: usize) -> Result<()> {
        self.with_adapter(id, Adapter::stop_feed)
    }

    /// Feed counters of adapter `id`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if there is no such adapter.
    pub fn counters(&self, id: usize) -> Result<FeedCounters> {
        self.with_adapter(id, |a| Ok(a.dmaif().counters()))
    }

    /// Tear the controller down. Returns the final counters per adapter.
    pub fn remove(mut self) -> Vec<FeedCounters> {
        self.teardown()
    }

    fn teardown(&mut self) -> Vec<FeedCounters> {
        for th in self.irqs.drain(..) {
            th.stop();
        }

        let adapters: Vec<Adapter> = write(&self.adapters).drain(..).collect();
        let counters = adapters
            .into_iter()
            .map(|a| {
                if a.tsif().is_running() {
                    if let Err(e) = a.stop_feed() {
                        warn!("adapter {}: {e}", a.id());
                    }
                }
                a.release()
            })
            .collect();

        if let Some(ucode) = self.ucode.take() {
            let loader = UcodeLoader::new(&self.regs, self.spec(), &self.alloc, &self.config);
            if let Err(e) = loader.unload_all(ucode) {
                warn!("core stop failed: {e}");
            }
            self.clocks.disable();
            info!("{} HSC removed", self.variant());
        }
        debug!("teardown done");
        counters
    }
}

impl Drop for Chip {
    fn drop(&mut self) {
        if self.ucode.is_some() {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareBackend;
    use crate::clock::TrackedLine;
    use crate::firmware::FirmwareMap;
    use hsc_chip::board::Board;
    use hsc_chip::regs::IOB_CLKSTOP;

    fn images() -> FirmwareMap {
        FirmwareMap::new()
            .with("hsc_spu_code.bin", vec![0x11u8; 256])
            .with("hsc_spu_data.bin", vec![0x22u8; 64])
            .with("hsc_ace_code.bin", vec![0x33u8; 128])
            .with("hsc_ace_data.bin", vec![0x44u8; 32])
    }

    fn config() -> HscConfig {
        HscConfig {
            ring_size: 192 * 128,
            ..HscConfig::default()
        }
    }

    #[test]
    fn probe_and_remove_sequence_clocks() {
        let backend = Arc::new(SoftwareBackend::new(SocVariant::Ld11));
        backend.sim().poke(IOB_HSCREV, 0x0011_0001);
        let hsc = Arc::new(TrackedLine::default());
        let clocks = ChipClocks {
            hsc: hsc.clone(),
            ..ChipClocks::always_on()
        };

        let chip = Chip::probe(backend.clone(), clocks, &images(), config()).unwrap();
        assert!(hsc.is_on());
        assert_eq!(chip.hsc_revision(), 0x0011_0001);
        assert_eq!(backend.file_transfers().len(), 2);

        let id = chip
            .add_adapter(&Board::Ld11Mn884433.confs()[0], Box::new(|_: &[u8]| {}))
            .unwrap();
        assert_eq!(id, 0);
        chip.start_feed(0).unwrap();

        let counters = chip.remove();
        assert_eq!(counters.len(), 1);
        assert!(!hsc.is_on());
        assert_eq!(backend.sim().peek(IOB_CLKSTOP), !0);
    }

    #[test]
    fn missing_firmware_unwinds_clocks() {
        let backend = Arc::new(SoftwareBackend::new(SocVariant::Ld20));
        let stdmac = Arc::new(TrackedLine::default());
        let clocks = ChipClocks {
            stdmac: stdmac.clone(),
            ..ChipClocks::always_on()
        };
        let fw = FirmwareMap::new().with("hsc_spu_code.bin", vec![0u8; 16]);
        let err = Chip::probe(backend, clocks, &fw, config()).unwrap_err();
        assert!(matches!(err, HscError::FirmwareNotFound { .. }));
        assert!(!stdmac.is_on());
    }

    #[test]
    fn dead_revision_register_unwinds_microcode_and_clocks() {
        let backend = Arc::new(SoftwareBackend::new(SocVariant::Ld11));
        backend.sim().poke(IOB_HSCREV, !0);
        let hsc = Arc::new(TrackedLine::default());
        let clocks = ChipClocks {
            hsc: hsc.clone(),
            ..ChipClocks::always_on()
        };

        let err = Chip::probe(backend.clone(), clocks, &images(), config()).unwrap_err();
        assert!(matches!(err, HscError::HardwareError { .. }));
        assert_eq!(backend.file_transfers().len(), 2);
        assert_eq!(backend.sim().peek(IOB_CLKSTOP), !0);
        assert_eq!(backend.mapper().mappings(), 0);
        assert!(!hsc.is_on());
    }

    #[test]
    fn unknown_adapter_is_rejected() {
        let backend = Arc::new(SoftwareBackend::new(SocVariant::Ld11));
        let chip = Chip::probe(backend, ChipClocks::always_on(), &images(), config()).unwrap();
        assert!(matches!(chip.start_feed(3), Err(HscError::InvalidArgument { .. })));
    }
}
