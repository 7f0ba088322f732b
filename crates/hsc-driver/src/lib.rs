//! Userspace driver for the UniPhier High-speed Stream Controller (HSC).
//!
//! The HSC takes transport streams from tuner ports, routes them through
//! the Cross Stream Switch into TS input lanes and writes them with arrival
//! timestamps into host ring buffers. This crate brings the controller up
//! (clocks, microcode), wires adapters and pumps packets from the rings
//! into a demultiplexer.
//!
//! # Backend hierarchy
//!
//! ```text
//! Hardware:
//!   VfioBackend     : platform device bound to vfio-platform, IOMMU DMA
//!
//! Development / CI:
//!   SoftwareBackend : simulated register file and device memory
//! ```
//!
//! # Data path
//!
//! ```text
//! tuner ─▶ CSS in ─▶ CSS out (TSI) ─▶ TS input ─▶ DMA out ─▶ ring ─▶ feed ─▶ Demux
//!                                        │                    │
//!                                  irq0: sync loss     irq1: transit
//!                                  (delayed restart)   (schedule feed)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use hsc_driver::{Chip, ChipClocks, FirmwareDir, HscConfig, SoftwareBackend};
//! use hsc_chip::{Board, SocVariant};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HscConfig::from_env()?;
//! let firmware = FirmwareDir::with_system_dirs(&config.firmware_path);
//! let backend = Arc::new(SoftwareBackend::new(SocVariant::Ld11));
//! let chip = Chip::probe(backend, ChipClocks::always_on(), &firmware, config)?;
//!
//! let conf = Board::Ld11Mn884433.confs()[0];
//! let mut packets = 0u64;
//! let id = chip.add_adapter(&conf, Box::new(move |_pkt: &[u8]| packets += 1))?;
//! chip.start_feed(id)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod chip;
pub mod clock;
mod coherent;
mod config;
pub mod css;
mod discovery;
pub mod dma;
mod error;
pub mod feed;
mod firmware;
pub mod irq;
pub mod mmio;
pub mod regmap;
pub mod ring;
pub mod stream;
pub mod ts;
pub mod ucode;
mod work;

pub use backend::{select_backend, BackendSelection, BackendType, HscBackend};
pub use backends::software::{SimRegisters, SoftwareBackend, SoftwareMapper};
pub use backends::vfio::{bind_to_vfio, iommu_group, unbind_from_vfio, VfioBackend};
pub use chip::Chip;
pub use clock::{AlwaysOn, ChipClocks, ClockGate, ResetLine, TrackedLine};
pub use coherent::{CoherentBuffer, DmaAllocator, IovaMapper, DMA_PAGE_SIZE};
pub use config::{HscConfig, DEFAULT_RING_SIZE};
pub use discovery::{variant_of, DeviceInfo, DeviceManager, PLATFORM_DEVICES};
pub use error::{HscError, Result};
pub use feed::{Demux, FeedCounters};
pub use firmware::{FirmwareDir, FirmwareMap, FirmwareSource, SYSTEM_FIRMWARE_DIRS};
pub use irq::{IrqLine, IrqReturn};
pub use stream::Adapter;
pub use work::Work;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Adapter, Chip, ChipClocks, Demux, DeviceManager, FeedCounters, FirmwareDir, HscBackend,
        HscConfig, HscError, Result, SoftwareBackend, VfioBackend,
    };
}
