//! Backend abstraction for HSC drivers
//!
//! A backend provides the three things the engine needs from a platform:
//! the register window, device-addressable memory and the two interrupt
//! lines. Everything above it is backend-agnostic.

use std::fmt::Debug;
use std::sync::Arc;

use hsc_chip::SocVariant;

use crate::coherent::DmaAllocator;
use crate::error::Result;
use crate::irq::{IrqLine, IrqSource};
use crate::regmap::Regmap;

/// HSC backend trait - unified interface for hardware and simulation
pub trait HscBackend: Debug + Send + Sync {
    /// Open the backend for `device`
    ///
    /// # Errors
    ///
    /// Returns error if device cannot be found or initialized.
    fn init(device: &str) -> Result<Self>
    where
        Self: Sized;

    /// Register map over the controller window
    fn regmap(&self) -> Arc<Regmap>;

    /// Allocator for memory the controller can address
    fn dma_allocator(&self) -> DmaAllocator;

    /// Interrupt source for `line`
    ///
    /// # Errors
    ///
    /// Returns error if the platform cannot deliver the line.
    fn irq_source(&self, line: IrqLine) -> Result<Arc<dyn IrqSource>>;

    /// Get backend type for debugging
    fn backend_type(&self) -> BackendType;

    /// SoC generation of the controller
    fn variant(&self) -> SocVariant;

    /// Device name the backend was opened with
    fn device_name(&self) -> &str;
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// VFIO platform device
    Vfio,

    /// Simulated controller, no hardware required
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vfio => write!(f, "VFIO"),
            Self::Software => write!(f, "Software (simulated HSC)"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSelection {
    /// VFIO if the device opens, simulation otherwise
    Auto,

    /// Force VFIO
    Vfio,

    /// Force the software backend
    Software,
}

/// Select appropriate backend based on availability
///
/// # Errors
///
/// Returns error if no suitable backend can be initialized for the given device.
pub fn select_backend(selection: BackendSelection, device: &str) -> Result<Box<dyn HscBackend>> {
    use crate::backends::software::SoftwareBackend;
    use crate::backends::vfio::VfioBackend;

    match selection {
        BackendSelection::Auto => match VfioBackend::init(device) {
            Ok(backend) => {
                tracing::info!("Using VFIO backend for {device}");
                Ok(Box::new(backend))
            }
            Err(e) => {
                tracing::info!("VFIO unavailable for {device} ({e}), using software backend");
                SoftwareBackend::init(device).map(|b| Box::new(b) as Box<dyn HscBackend>)
            }
        },

        BackendSelection::Vfio => {
            VfioBackend::init(device).map(|b| Box::new(b) as Box<dyn HscBackend>)
        }

        BackendSelection::Software => {
            SoftwareBackend::init(device).map(|b| Box::new(b) as Box<dyn HscBackend>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_software_selection() {
        let b = select_backend(BackendSelection::Software, "ld20").unwrap();
        assert_eq!(b.backend_type(), BackendType::Software);
        assert_eq!(b.variant(), SocVariant::Ld20);
    }

    #[test]
    fn auto_falls_back_without_vfio() {
        let b = select_backend(BackendSelection::Auto, "no-such-hsc").unwrap();
        assert_eq!(b.backend_type(), BackendType::Software);
    }

    #[test]
    fn display_names() {
        assert_eq!(BackendType::Vfio.to_string(), "VFIO");
    }
}
