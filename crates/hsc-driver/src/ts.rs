//! TS input lane control.

#![allow(clippy::cast_possible_truncation)]

use std::fmt;

use hsc_chip::regs::{
    field_prep, sbc_dmaparama, tsi_config, tsi_intr, tsi_intren, tsi_stat, tsi_synccntrol,
    tsi_syncstatus,
};
use hsc_chip::spec::{HscSpec, TsInSpec};

use crate::error::{HscError, Result};
use crate::regmap::Regmap;

/// Input stream format of a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsFormat {
    /// Plain 188-byte MPEG2-TS.
    Mpeg2Ts = 0,
    /// MPEG2-TS with a 4-byte arrival timestamp added per packet.
    Mpeg2TsAts = 1,
}

impl TryFrom<u32> for TsFormat {
    type Error = HscError;

    fn try_from(v: u32) -> Result<Self> {
        match v {
            0 => Ok(Self::Mpeg2Ts),
            1 => Ok(Self::Mpeg2TsAts),
            _ => Err(HscError::invalid_argument(format!("unknown TS format {v}"))),
        }
    }
}

/// Contents of a lane's `TSI_SYNCSTATUS` register.
///
/// The low half carries latched interrupt causes, the high half the live
/// synchroniser state.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatus(pub u32);

impl SyncStatus {
    /// Interrupt causes that call for a lane restart.
    pub const ERROR_MASK: u32 = tsi_intr::SERR | tsi_intr::SOF | tsi_intr::TOF;

    /// Raw register value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Nothing latched and no state bits.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Sync error, start-of-frame or transport overflow latched.
    pub const fn is_error(self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }

    /// Packet start error.
    pub const fn packet_start_error(self) -> bool {
        self.0 & tsi_stat::PKTST_ERR != 0
    }

    /// Packet longer than expected.
    pub const fn large_error(self) -> bool {
        self.0 & tsi_stat::LARGE_ERR != 0
    }

    /// Packet shorter than expected.
    pub const fn small_error(self) -> bool {
        self.0 & tsi_stat::SMALL_ERR != 0
    }

    /// Synchroniser locked.
    pub const fn locked(self) -> bool {
        self.0 & tsi_stat::LOCK != 0
    }

    /// In sync.
    pub const fn in_sync(self) -> bool {
        self.0 & tsi_stat::SYNC != 0
    }

    /// Searching for sync bytes.
    pub const fn searching(self) -> bool {
        self.0 & tsi_stat::SEARCH != 0
    }

    /// Stream lost.
    pub const fn lost(self) -> bool {
        self.0 & tsi_intr::LOST != 0
    }
}

impl fmt::Debug for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (tsi_stat::PKTST_ERR, "PKTST_ERR"),
            (tsi_stat::LARGE_ERR, "LARGE_ERR"),
            (tsi_stat::SMALL_ERR, "SMALL_ERR"),
            (tsi_stat::LOCK, "LOCK"),
            (tsi_stat::SYNC, "SYNC"),
            (tsi_stat::SEARCH, "SEARCH"),
            (tsi_intr::NTP, "NTP"),
            (tsi_intr::NTPCNT, "NTPCNT"),
            (tsi_intr::PKTEND, "PKTEND"),
            (tsi_intr::PCR, "PCR"),
            (tsi_intr::LOAD, "LOAD"),
            (tsi_intr::SERR, "SERR"),
            (tsi_intr::SOF, "SOF"),
            (tsi_intr::TOF, "TOF"),
            (tsi_intr::UL, "UL"),
            (tsi_intr::LL, "LL"),
            (tsi_intr::CNT, "CNT"),
            (tsi_intr::LOST, "LOST"),
            (tsi_intr::LOCK, "ILOCK"),
        ];
        let mut set = f.debug_set();
        for (mask, name) in names {
            if self.0 & mask != 0 {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()?;
        write!(f, " ({:#010x})", self.0)
    }
}

/// TS input lanes of one chip.
#[derive(Debug, Clone, Copy)]
pub struct TsInputs<'a> {
    regs: &'a Regmap,
    spec: &'a HscSpec,
}

impl<'a> TsInputs<'a> {
    /// Bind to a chip.
    pub const fn new(regs: &'a Regmap, spec: &'a HscSpec) -> Self {
        Self { regs, spec }
    }

    fn lane(&self, tsi: usize) -> Result<&'a TsInSpec> {
        self.spec
            .ts_in(tsi)
            .ok_or_else(|| HscError::invalid_argument(format!("TS input {tsi} not present")))
    }

    /// Start or stop lane `tsi`.
    ///
    /// Framing is always external sync 2 and both the arrival timestamp and
    /// the system time clock are derived from the DPLL. Sync error and
    /// stream lost interrupts follow `enable`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the lane has no descriptor.
    pub fn set_enable(&self, tsi: usize, enable: bool) -> Result<()> {
        let lane = self.lane(tsi)?;
        let i = tsi as u32;

        self.regs.update_bits(
            tsi_synccntrol(i),
            tsi_synccntrol::FRAME_MASK,
            tsi_synccntrol::FRAME_EXTSYNC2,
        )?;

        let m = tsi_config::ATSMD_MASK | tsi_config::STCMD_MASK | tsi_config::CHEN_START;
        let mut v = tsi_config::ATSMD_DPLL | tsi_config::STCMD_DPLL;
        if enable {
            v |= tsi_config::CHEN_START;
        }
        self.regs.update_bits(tsi_config(i), m, v)?;

        self.regs
            .assign_bits(tsi_intren(i), tsi_intr::SERR | tsi_intr::LOST, enable)?;
        self.regs
            .assign_bits(lane.intr.reg, lane.intr.mask(), enable)?;

        tracing::debug!("TSI{tsi} {}", if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Select the DMA transfer profile of lane `tsi`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the lane has no descriptor.
    pub fn set_dmaparam(&self, tsi: usize, format: TsFormat) -> Result<()> {
        self.lane(tsi)?;
        let i = tsi as u32;

        let ats = match format {
            TsFormat::Mpeg2Ts => 0,
            TsFormat::Mpeg2TsAts => tsi_config::ATSADD_ON,
        };
        self.regs
            .update_bits(tsi_config(i), tsi_config::ATSADD_ON, ats)?;

        let v = field_prep(sbc_dmaparama::OFFSET_MASK, sbc_dmaparama::OFFSET_TS)
            | field_prep(sbc_dmaparama::LOOPADDR_MASK, sbc_dmaparama::LOOPADDR_TS)
            | field_prep(sbc_dmaparama::COUNT_MASK, sbc_dmaparama::COUNT_TS);
        self.regs.write(hsc_chip::regs::sbc_dmaparama(i), v)
    }

    /// Read the sync status of lane `tsi`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `tsi` is outside the register blocks.
    pub fn intr(&self, tsi: usize) -> Result<SyncStatus> {
        Ok(SyncStatus(self.regs.read(status_reg(tsi)?)?))
    }

    /// Clear latched status bits of lane `tsi`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `tsi` is outside the register blocks.
    pub fn clear_intr(&self, tsi: usize, clear: u32) -> Result<()> {
        self.regs.write(status_reg(tsi)?, clear)
    }
}

fn status_reg(tsi: usize) -> Result<u32> {
    if tsi >= hsc_chip::ports::ts_in::NUM {
        return Err(HscError::invalid_argument(format!("TS input {tsi} out of range")));
    }
    Ok(tsi_syncstatus(tsi as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SimRegisters;
    use hsc_chip::regs::{sbc_dmaparama as dmaparama_reg, IOB_INTREN0};
    use hsc_chip::SocVariant;
    use std::sync::Arc;

    fn fixture() -> (Arc<SimRegisters>, Regmap) {
        let sim = Arc::new(SimRegisters::new(SocVariant::Ld11.spec()));
        let map = Regmap::new(sim.clone());
        (sim, map)
    }

    #[test]
    fn enable_programs_lane_and_interrupts() {
        let (sim, regs) = fixture();
        let ts = TsInputs::new(&regs, SocVariant::Ld11.spec());

        ts.set_enable(1, true).unwrap();
        assert_eq!(sim.peek(tsi_synccntrol(1)) & tsi_synccntrol::FRAME_MASK, 1 << 16);
        let cfg = sim.peek(tsi_config(1));
        assert_eq!(cfg & tsi_config::ATSMD_MASK, tsi_config::ATSMD_DPLL);
        assert_eq!(cfg & tsi_config::STCMD_MASK, tsi_config::STCMD_DPLL);
        assert_ne!(cfg & tsi_config::CHEN_START, 0);
        assert_eq!(sim.peek(tsi_intren(1)), tsi_intr::SERR | tsi_intr::LOST);
        assert_eq!(sim.peek(IOB_INTREN0), 1 << 14);

        ts.set_enable(1, false).unwrap();
        assert_eq!(sim.peek(tsi_config(1)) & tsi_config::CHEN_START, 0);
        assert_eq!(sim.peek(tsi_intren(1)), 0);
        assert_eq!(sim.peek(IOB_INTREN0), 0);
    }

    #[test]
    fn missing_lane_is_rejected() {
        let (_sim, regs) = fixture();
        let ts = TsInputs::new(&regs, SocVariant::Ld11.spec());
        assert!(matches!(
            ts.set_enable(5, true),
            Err(HscError::InvalidArgument { .. })
        ));
        assert!(ts.set_dmaparam(7, TsFormat::Mpeg2Ts).is_err());
    }

    #[test]
    fn dmaparam_toggles_ats_only() {
        let (sim, regs) = fixture();
        let ts = TsInputs::new(&regs, SocVariant::Ld11.spec());

        ts.set_dmaparam(0, TsFormat::Mpeg2TsAts).unwrap();
        assert_ne!(sim.peek(tsi_config(0)) & tsi_config::ATSADD_ON, 0);
        assert_eq!(sim.peek(dmaparama_reg(0)), 0x5880_00c4);

        ts.set_dmaparam(0, TsFormat::Mpeg2Ts).unwrap();
        assert_eq!(sim.peek(tsi_config(0)) & tsi_config::ATSADD_ON, 0);
        assert_eq!(sim.peek(dmaparama_reg(0)), 0x5880_00c4);

        assert!(TsFormat::try_from(2).is_err());
        assert_eq!(TsFormat::try_from(1).unwrap(), TsFormat::Mpeg2TsAts);
    }

    #[test]
    fn status_is_write_one_to_clear() {
        let (sim, regs) = fixture();
        let ts = TsInputs::new(&regs, SocVariant::Ld11.spec());

        sim.poke(tsi_syncstatus(0), tsi_stat::LOCK | tsi_intr::SERR);
        let st = ts.intr(0).unwrap();
        assert!(st.is_error() && st.locked() && !st.searching());

        ts.clear_intr(0, 0xffff).unwrap();
        let st = ts.intr(0).unwrap();
        assert!(!st.is_error());
        assert!(st.locked());
    }

    #[test]
    fn status_debug_names_bits() {
        let s = format!("{:?}", SyncStatus(tsi_stat::SYNC | tsi_intr::TOF));
        assert!(s.contains("SYNC") && s.contains("TOF"));
    }
}
