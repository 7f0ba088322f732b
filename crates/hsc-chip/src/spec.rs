//! Per-SoC description of an HSC instance.
//!
//! An [`HscSpec`] is a plain immutable value: register locations and bit
//! positions that differ between SoC generations, the microcode file names
//! and the RAM regions to initialise before loading microcode. The engine
//! is written once against this description; a variant is selected at
//! construction time through [`SocVariant`].
//!
//! Absent descriptors are `None`, never sentinel integers.

use std::fmt;
use std::str::FromStr;

/// A single interrupt-enable or start bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegBit {
    /// Register offset.
    pub reg: u32,
    /// Bit position.
    pub shift: u32,
}

impl RegBit {
    /// Create a register bit descriptor.
    #[must_use]
    pub const fn new(reg: u32, shift: u32) -> Self {
        Self { reg, shift }
    }

    /// Mask with only this bit set.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        1 << self.shift
    }
}

/// Polarity straps of a CSS port.
///
/// Each strap is an optional bit position inside `reg`; ports that lack a
/// strap leave it `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolarityField {
    /// Register offset.
    pub reg: u32,
    /// Sync pulse polarity bit.
    pub sync: Option<u32>,
    /// Valid signal polarity bit.
    pub val: Option<u32>,
    /// Clock edge bit (set = falling edge).
    pub clk: Option<u32>,
}

impl PolarityField {
    /// Mask covering the straps present on this port.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        let mut m = 0;
        if let Some(s) = self.sync {
            m |= 1 << s;
        }
        if let Some(s) = self.val {
            m |= 1 << s;
        }
        if let Some(s) = self.clk {
            m |= 1 << s;
        }
        m
    }
}

/// Source-select field of a CSS output port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectField {
    /// Register offset.
    pub reg: u32,
    /// Field mask.
    pub mask: u32,
    /// Field shift.
    pub shift: u32,
}

/// One CSS port: optional polarity straps and optional source select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CssPortSpec {
    /// Polarity straps.
    pub pol: Option<PolarityField>,
    /// Source select (output ports only).
    pub sel: Option<SelectField>,
}

impl CssPortSpec {
    /// A port with neither polarity nor source select.
    pub const NONE: Self = Self { pol: None, sel: None };
}

/// A TS input lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsInSpec {
    /// Top level interrupt enable bit of the lane.
    pub intr: RegBit,
}

/// A stream DMA channel and the register blocks it drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSpec {
    /// Channel for `CDMBC_CH*` registers.
    pub dma_ch: u32,
    /// Ring buffer for `CDMBC_RB*` registers.
    pub rb_ch: u32,
    /// CIP file channel for `CDMBC_CIP*` registers.
    pub cip_ch: Option<u32>,
    /// Intermittent transfer channel for `CDMBC_IT*` registers.
    pub it_ch: Option<u32>,
    /// Transfer destination for `CDMBC_CHTDCTR*` registers (outputs only).
    pub td_ch: Option<u32>,
    /// Start/stop bit.
    pub en: RegBit,
    /// Top level interrupt enable bit.
    pub intr: RegBit,
}

/// A RAM region filled with a fixed pattern before microcode load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitRam {
    /// First register offset.
    pub addr: u32,
    /// Size in bytes.
    pub size: u32,
    /// Word written to every 32-bit location.
    pub pattern: u32,
}

/// Microcode image pair of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UcodeSpec {
    /// Instruction image, streamed through the CIP file channel.
    pub code: &'static str,
    /// Data image, referenced by address.
    pub data: &'static str,
}

/// Description of one HSC generation.
#[derive(Debug)]
pub struct HscSpec {
    /// Short name, e.g. `ld11`.
    pub name: &'static str,
    /// Devicetree compatible string.
    pub compatible: &'static str,
    /// Stream processing unit microcode.
    pub ucode_spu: UcodeSpec,
    /// Authentication / crypto engine microcode.
    pub ucode_ace: UcodeSpec,
    /// RAM regions initialised by the loader.
    pub init_rams: &'static [InitRam],
    /// CSS input ports, indexed by [`crate::ports::css_in`].
    pub css_in: &'static [CssPortSpec],
    /// CSS output ports, indexed by [`crate::ports::css_out`].
    pub css_out: &'static [CssPortSpec],
    /// TS input lanes, indexed by [`crate::ports::ts_in`].
    pub ts_in: &'static [Option<TsInSpec>],
    /// Input DMA channels, indexed by [`crate::ports::dma`] `IN*`.
    pub dma_in: &'static [Option<DmaSpec>],
    /// Output DMA channels, indexed by [`crate::ports::dma`] `OUT*`.
    pub dma_out: &'static [Option<DmaSpec>],
}

impl HscSpec {
    /// CSS input port, if the index is inside the table.
    #[must_use]
    pub fn css_in(&self, port: usize) -> Option<&CssPortSpec> {
        self.css_in.get(port)
    }

    /// CSS output port, if the index is inside the table.
    #[must_use]
    pub fn css_out(&self, port: usize) -> Option<&CssPortSpec> {
        self.css_out.get(port)
    }

    /// TS input lane descriptor, if present.
    #[must_use]
    pub fn ts_in(&self, tsi: usize) -> Option<&TsInSpec> {
        self.ts_in.get(tsi).and_then(Option::as_ref)
    }

    /// Input DMA channel descriptor, if present.
    #[must_use]
    pub fn dma_in(&self, id: usize) -> Option<&DmaSpec> {
        self.dma_in.get(id).and_then(Option::as_ref)
    }

    /// Output DMA channel descriptor, if present.
    #[must_use]
    pub fn dma_out(&self, id: usize) -> Option<&DmaSpec> {
        self.dma_out.get(id).and_then(Option::as_ref)
    }

    /// Total bytes written by the RAM initialisation pass.
    #[must_use]
    pub fn init_ram_bytes(&self) -> u64 {
        self.init_rams.iter().map(|r| u64::from(r.size)).sum()
    }
}

/// UniPhier SoC generations carrying an HSC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocVariant {
    /// LD11.
    Ld11,
    /// LD20.
    Ld20,
}

impl SocVariant {
    /// Every known variant.
    pub const ALL: [Self; 2] = [Self::Ld11, Self::Ld20];

    /// Table of this variant.
    #[must_use]
    pub const fn spec(self) -> &'static HscSpec {
        match self {
            Self::Ld11 => &crate::variants::LD11,
            Self::Ld20 => &crate::variants::LD20,
        }
    }

    /// Variant matching a devicetree compatible string.
    #[must_use]
    pub fn from_compatible(compatible: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.spec().compatible == compatible)
    }
}

impl fmt::Display for SocVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().name)
    }
}

/// Error returned when a variant name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown SoC variant '{}' (expected ld11 or ld20)", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for SocVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ld11" => Ok(Self::Ld11),
            "ld20" => Ok(Self::Ld20),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{css_in, css_out, dma};

    #[test]
    fn parse_and_display() {
        assert_eq!("LD20".parse::<SocVariant>(), Ok(SocVariant::Ld20));
        assert_eq!(SocVariant::Ld11.to_string(), "ld11");
        assert!("pxs3".parse::<SocVariant>().is_err());
        assert_eq!(
            SocVariant::from_compatible("socionext,uniphier-ld20-hsc"),
            Some(SocVariant::Ld20)
        );
    }

    #[test]
    fn absent_descriptors_are_none() {
        let spec = SocVariant::Ld11.spec();
        assert!(spec.dma_out(dma::OUT5).is_some());
        assert!(spec.dma_out(6).is_none());
        assert!(spec.dma_out(12).is_none());
        assert!(spec.ts_in(5).is_none());
        assert_eq!(spec.css_in(css_in::IN_1394_0), Some(&CssPortSpec::NONE));
        assert!(spec.css_out(css_out::PKTFF1).is_none());
    }

    #[test]
    fn polarity_mask_skips_missing_straps() {
        let pol = SocVariant::Ld11.spec().css_in[css_in::SRLTS1]
            .pol
            .expect("SRLTS1 has straps");
        assert_eq!(pol.mask(), (1 << 11) | (1 << 8));
    }

    #[test]
    fn ld20_initialises_more_share_memory() {
        let ld11 = SocVariant::Ld11.spec().init_ram_bytes();
        let ld20 = SocVariant::Ld20.spec().init_ram_bytes();
        assert_eq!(ld20 - ld11, 2 * 0x1000);
    }
}
