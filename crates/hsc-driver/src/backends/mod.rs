//! HSC backend implementations
//!
//! Two backends available:
//! - **VFIO**: the platform device bound to `vfio-platform`; registers through
//!   region 0, DMA through the IOMMU, interrupts through eventfds
//! - **Software**: simulated register file and memory, for CI and the
//!   `hsc simulate` pipeline

pub mod software;
pub mod vfio;

pub use software::{FileTransfer, SimRegisters, SoftwareBackend, SoftwareMapper};
pub use vfio::VfioBackend;
