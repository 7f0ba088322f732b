//! HSC register map.
//!
//! Offsets are byte addresses inside the controller's 1 MiB register window
//! (`0x00000..=0xffffc`, 32-bit registers, stride 4). Indexed blocks are
//! exposed as `const fn` taking the channel number; bit definitions live in
//! a nested module named after the register they belong to.
//!
//! ```text
//! 0x0a000  filter pattern RAM         0x1c00  CSS (cross stream switch)
//! 0x0b000  filter mask RAM            0x2300  CDMBC (DMA block controller)
//! 0x10000  share memories 0..7        0x3200  CDMBC ring buffers
//! 0x1540   CIP file control           0x6000  SBC (stream buffer control)
//! 0x1a00   IOB (resets, interrupts)   0x7100  TSI (TS input lanes)
//! 0x10fd0  microcode mailbox
//! ```

/// Bit `n` as a mask.
#[must_use]
pub const fn bit(n: u32) -> u32 {
    1 << n
}

/// Contiguous mask covering bits `l..=h`.
#[must_use]
pub const fn genmask(h: u32, l: u32) -> u32 {
    (u32::MAX >> (31 - h)) & (u32::MAX << l)
}

/// Shift `val` into the field described by `mask` (`FIELD_PREP`).
#[must_use]
pub const fn field_prep(mask: u32, val: u32) -> u32 {
    (val << mask.trailing_zeros()) & mask
}

/// Extract the field described by `mask` from `reg` (`FIELD_GET`).
#[must_use]
pub const fn field_get(mask: u32, reg: u32) -> u32 {
    (reg & mask) >> mask.trailing_zeros()
}

/// Highest valid register offset.
pub const MAX_REGISTER: u32 = 0xf_fffc;

/// Size of the register window in bytes.
pub const WINDOW_SIZE: usize = 0x10_0000;

// ── Filter and share memories ────────────────────────────────────────────────

/// PID filter pattern RAM.
pub const FLT_PATN_RAM_TOP_ADDR: u32 = 0x0a000;
/// PID filter mask RAM.
pub const FLT_MASK_RAM_TOP_ADDR: u32 = 0x0b000;
/// Size of the pattern RAM.
pub const FLT_PATN_RAM_SIZE: u32 = 0x0800;
/// Size of the mask RAM.
pub const FLT_MASK_RAM_SIZE: u32 = 0x0800;
/// Leading part of share memory 0 holding the PID pattern.
pub const FLT_PIDPATTERN_SIZE: u32 = 0x0160;

/// Share memory `n` (0..=7), normal access window.
#[must_use]
pub const fn share_memory(n: u32) -> u32 {
    0x10000 + n * 0x1000
}

/// Size of one share memory.
pub const SHARE_MEMORY_SIZE: u32 = 0x1000;

// ── CIP file control ─────────────────────────────────────────────────────────

/// CIP file id.
pub const CIP_F_ID: u32 = 0x1540;
/// CIP file mode.
pub const CIP_F_MODE: u32 = 0x1544;
/// CIP file control. Selects the engine targeted by a microcode transfer.
pub const CIP_F_CTRL: u32 = 0x1548;
/// CIP file skip.
pub const CIP_F_SKIP: u32 = 0x154c;
/// CIP file payload.
pub const CIP_F_PAYLOAD: u32 = 0x1560;

/// `CIP_F_CTRL` values used for microcode loads.
pub mod cip_f_ctrl {
    /// Stream processing unit microcode.
    pub const SPU: u32 = 0x2f09_0001;
    /// Authentication / crypto engine microcode.
    pub const ACE: u32 = 0x3f09_0001;
}

// ── SBC ──────────────────────────────────────────────────────────────────────

/// ACE DMA enable.
pub const SBC_ACE_DMA_EN: u32 = 0x6000;
/// DMA parameter 21.
pub const SBC_DMAPARAM21: u32 = 0x6004;
/// ACE interrupt enable.
pub const SBC_ACE_INTREN: u32 = 0x6008;
/// ACE interrupt status.
pub const SBC_ACE_INTRST: u32 = 0x600c;
/// DMA status 0.
pub const SBC_DMA_STATUS0: u32 = 0x6010;
/// DMA status 1.
pub const SBC_DMA_STATUS1: u32 = 0x6014;

/// Per TS input DMA burst shape.
#[must_use]
pub const fn sbc_dmaparama(i: u32) -> u32 {
    0x6018 + i * 0x04
}

/// Secondary per TS input DMA parameters.
#[must_use]
pub const fn sbc_dmaparamb(i: u32) -> u32 {
    0x6038 + i * 0x04
}

/// `SBC_DMAPARAMA` fields.
pub mod sbc_dmaparama {
    use super::genmask;

    /// Offset field.
    pub const OFFSET_MASK: u32 = genmask(31, 29);
    /// Loop address field.
    pub const LOOPADDR_MASK: u32 = genmask(28, 23);
    /// Count field.
    pub const COUNT_MASK: u32 = genmask(7, 0);

    /// Offset used for 188/192 byte transport streams.
    pub const OFFSET_TS: u32 = 0x02;
    /// Loop address used for transport streams.
    pub const LOOPADDR_TS: u32 = 0x31;
    /// Count used for transport streams.
    pub const COUNT_TS: u32 = 0xc4;
}

// ── IOB ──────────────────────────────────────────────────────────────────────

/// Packet counter.
pub const IOB_PKTCNT: u32 = 0x1740;
/// Packet counter reset.
pub const IOB_PKTCNTRST: u32 = 0x1744;
/// Dummy packet enable.
pub const IOB_DUMMY_ENABLE: u32 = 0x1748;
/// Format change enable.
pub const IOB_FORMATCHANGE_EN: u32 = 0x174c;
/// SPU interrupt enable.
pub const IOB_SPUINTREN: u32 = 0x1778;

/// Hardware revision.
pub const IOB_HSCREV: u32 = 0x1a00;

/// Block reset 0. Writing 1 holds a block in reset.
pub const IOB_RESET0: u32 = 0x1a14;
/// Block reset 1.
pub const IOB_RESET1: u32 = 0x1a18;
/// Clock stop.
pub const IOB_CLKSTOP: u32 = 0x1a1c;
/// Debug control.
pub const IOB_DEBUG: u32 = 0x1a20;

/// `IOB_RESET0` bits.
pub mod iob_reset0 {
    /// AP core reset, released last after both microcode loads.
    pub const APCORE: u32 = super::bit(20);
}

/// `IOB_DEBUG` bits.
pub mod iob_debug {
    /// Halt the stream processing unit.
    pub const SPUHALT: u32 = super::bit(0);
}

/// Top level interrupt enable bank 0 (TS inputs).
pub const IOB_INTREN0: u32 = 0x1a24;
/// Top level interrupt status bank 0.
pub const IOB_INTRST0: u32 = 0x1a28;
/// Top level interrupt enable bank 1 (stream DMA).
pub const IOB_INTREN1: u32 = 0x1a3c;
/// Top level interrupt status bank 1.
pub const IOB_INTRST1: u32 = 0x1a40;
/// Top level interrupt enable bank 2 (CIP).
pub const IOB_INTREN2: u32 = 0x1a4c;
/// Top level interrupt status bank 2.
pub const IOB_INTRST2: u32 = 0x1a50;
/// Top level interrupt enable bank 3.
pub const IOB_INTREN3: u32 = 0x1a54;
/// Top level interrupt status bank 3.
pub const IOB_INTRST3: u32 = 0x1a58;
/// Top level interrupt enable bank 4.
pub const IOB_INTREN4: u32 = 0x1a5c;
/// Top level interrupt status bank 4.
pub const IOB_INTRST4: u32 = 0x1a60;

/// `IOB_INTREN2` / `IOB_INTRST2` bits.
pub mod intr2 {
    use super::bit;

    /// Driver interrupt.
    pub const DRV: u32 = bit(31);
    /// CIP normal.
    pub const CIP_NORMAL: u32 = bit(16);
    /// Secure clock A.
    pub const SEC_CLK_A: u32 = bit(15);
    /// Secure clock S.
    pub const SEC_CLK_S: u32 = bit(14);
    /// CIP authentication A.
    pub const CIP_AUTH_A: u32 = bit(1);
    /// CIP authentication S.
    pub const CIP_AUTH_S: u32 = bit(0);

    /// CIP format interrupt of channel `i`.
    #[must_use]
    pub const fn cip_frmt(i: u32) -> u32 {
        bit(i + 16)
    }

    /// CIP write channel `i` done.
    #[must_use]
    pub const fn mbc_cip_w(i: u32) -> u32 {
        bit(i + 9)
    }

    /// CIP read channel `i` done.
    #[must_use]
    pub const fn mbc_cip_r(i: u32) -> u32 {
        bit(i + 4)
    }
}

// ── CDMBC global ─────────────────────────────────────────────────────────────

/// Start register bank `i` (1-based). Bank 1 starts the CIP file channels.
#[must_use]
pub const fn cdmbc_strt(i: u32) -> u32 {
    0x2300 + (i - 1) * 0x4
}

/// Value OR-ed into `CDMBC_STRT(1)` when starting CIP file channels.
pub const CDMBC_STRT_CIP_KICK: u32 = 0x0100_0000;

/// Performance counter config.
pub const CDMBC_PERFCNFG: u32 = 0x230c;

/// Status bank `i`.
#[must_use]
pub const fn cdmbc_stat(i: u32) -> u32 {
    0x2320 + i * 0x4
}

/// Soft flush request.
pub const CDMBC_SOFTFLRQ: u32 = 0x239c;

/// Transfer-destination start/stop. Writing a 1 bit toggles that channel.
pub const CDMBC_TDSTRT: u32 = 0x23a0;

/// Channel interrupt bits reported through `CDMBC_CHIR` for file channels.
pub mod intr_mbc_ch {
    use super::bit;

    /// Transfer end.
    pub const END: u32 = bit(15);
    /// Channel stopped.
    pub const STOP: u32 = bit(13);
    /// Address reached.
    pub const ADDR: u32 = bit(6);
    /// Intermediate write done.
    pub const IWDONE: u32 = bit(3);
    /// Write done.
    pub const WDONE: u32 = bit(1);
}

/// Transfer-destination control (high word) for output channel `i`.
#[must_use]
pub const fn cdmbc_chtdctrlh(i: u32) -> u32 {
    0x23a4 + i * 0x10
}

/// Transfer-destination control (low word) for output channel `i`.
#[must_use]
pub const fn cdmbc_chtdctrlu(i: u32) -> u32 {
    0x23a8 + i * 0x10
}

/// `CDMBC_CHTDCTRLH` fields.
pub mod chtdctrlh {
    use super::{bit, genmask};

    /// Source TS input select.
    pub const STREM_MASK: u32 = genmask(20, 16);
    /// Bypass PID filter.
    pub const NOT_FLT: u32 = bit(7);
    /// Pass all packets.
    pub const ALL_EN: u32 = bit(6);
}

/// CIP mode of CIP channel `i`.
#[must_use]
pub const fn cdmbc_cipmode(i: u32) -> u32 {
    0x24fc + i * 0x4
}

/// `CDMBC_CIPMODE` bits.
pub mod cipmode {
    /// Push mode.
    pub const PUSH: u32 = super::bit(0);
}

/// CIP priority of CIP channel `i`.
#[must_use]
pub const fn cdmbc_cippriority(i: u32) -> u32 {
    0x2510 + i * 0x4
}

/// `CDMBC_CIPPRIORITY` fields.
pub mod cippriority {
    /// Priority field.
    pub const PRIOR_MASK: u32 = super::genmask(1, 0);
}

// ── CDMBC per DMA channel (stride 0x50) ──────────────────────────────────────

/// Channel control 1.
#[must_use]
pub const fn cdmbc_chctrl1(i: u32) -> u32 {
    0x2540 + i * 0x50
}

/// Channel control 2.
#[must_use]
pub const fn cdmbc_chctrl2(i: u32) -> u32 {
    0x2544 + i * 0x50
}

/// Channel DDR / IOMMU control.
#[must_use]
pub const fn cdmbc_chddr(i: u32) -> u32 {
    0x2548 + i * 0x50
}

/// Channel cause control.
#[must_use]
pub const fn cdmbc_chcausectrl(i: u32) -> u32 {
    0x254c + i * 0x50
}

/// Channel status.
#[must_use]
pub const fn cdmbc_chstat(i: u32) -> u32 {
    0x2550 + i * 0x50
}

/// Channel interrupt request. Write one to clear.
#[must_use]
pub const fn cdmbc_chir(i: u32) -> u32 {
    0x2554 + i * 0x50
}

/// Channel interrupt enable.
#[must_use]
pub const fn cdmbc_chie(i: u32) -> u32 {
    0x2558 + i * 0x50
}

/// Channel interrupt detect (request masked by enable).
#[must_use]
pub const fn cdmbc_chid(i: u32) -> u32 {
    0x255c + i * 0x50
}

/// Channel source addressing mode.
#[must_use]
pub const fn cdmbc_chsrcamode(i: u32) -> u32 {
    0x2560 + i * 0x50
}

/// Channel destination addressing mode.
#[must_use]
pub const fn cdmbc_chdstamode(i: u32) -> u32 {
    0x2564 + i * 0x50
}

/// Channel source start address, low word.
#[must_use]
pub const fn cdmbc_chsrcstrtadrsd(i: u32) -> u32 {
    0x2568 + i * 0x50
}

/// Channel source start address, high word.
#[must_use]
pub const fn cdmbc_chsrcstrtadrsu(i: u32) -> u32 {
    0x256c + i * 0x50
}

/// Channel destination start address, low word.
#[must_use]
pub const fn cdmbc_chdststrtadrsd(i: u32) -> u32 {
    0x2570 + i * 0x50
}

/// Channel destination start address, high word.
#[must_use]
pub const fn cdmbc_chdststrtadrsu(i: u32) -> u32 {
    0x2574 + i * 0x50
}

/// Channel transfer size.
#[must_use]
pub const fn cdmbc_chsize(i: u32) -> u32 {
    0x2578 + i * 0x50
}

/// Channel checkpoint (interrupt) address, low word.
#[must_use]
pub const fn cdmbc_chiradrsd(i: u32) -> u32 {
    0x2580 + i * 0x50
}

/// Channel checkpoint (interrupt) address, high word.
#[must_use]
pub const fn cdmbc_chiradrsu(i: u32) -> u32 {
    0x2584 + i * 0x50
}

/// `CDMBC_CHCTRL1` fields.
pub mod chctrl1 {
    use super::{bit, genmask};

    /// Linked channel.
    pub const LINKCH1_MASK: u32 = genmask(12, 10);
    /// Status select.
    pub const STATSEL_MASK: u32 = genmask(9, 7);
    /// Intermittent transfer type.
    pub const TYPE_INTERMIT: u32 = bit(1);
    /// Undefined index size (endless ring transfer).
    pub const IND_SIZE_UND: u32 = bit(0);
}

/// `CDMBC_CHDDR` fields.
pub mod chddr {
    use super::{bit, genmask};

    /// Reload registers on start.
    pub const REG_LOAD_ON: u32 = bit(4);
    /// Address translation on channel enable.
    pub const AT_CHEN_ON: u32 = bit(3);
    /// MCB select.
    pub const SET_MCB_MASK: u32 = genmask(2, 1);
    /// MCB write port.
    pub const SET_MCB_WR: u32 = 0x0 << 1;
    /// MCB read port.
    pub const SET_MCB_RD: u32 = 0x3 << 1;
    /// DDR 1 select.
    pub const SET_DDR_1: u32 = bit(0);
}

/// `CDMBC_CHIR` / `CDMBC_CHIE` / `CDMBC_CHID` bits for stream channels.
pub mod chi {
    use super::bit;

    /// Channel stopped.
    pub const STOPPED: u32 = bit(13);
    /// Checkpoint passed (data available).
    pub const TRANSIT: u32 = bit(6);
    /// Channel starting.
    pub const STARTING: u32 = bit(1);
}

/// `CDMBC_CHSRCAMODE` / `CDMBC_CHDSTAMODE` fields.
pub mod chamode {
    use super::{bit, genmask};

    /// Transfer unit.
    pub const TUNIT_MASK: u32 = genmask(29, 28);
    /// Endianness.
    pub const ENDIAN_MASK: u32 = genmask(17, 16);
    /// Address update mode.
    pub const AUPDT_MASK: u32 = genmask(5, 4);
    /// Ring buffer addressing.
    pub const TYPE_RB: u32 = bit(2);
}

/// `CDMBC_CHDSTSTRTADRSD` fields for CIP transfers.
pub mod chdststrtadrs {
    use super::{bit, genmask};

    /// Target id.
    pub const TID_MASK: u32 = genmask(31, 28);
    /// Key id 1 enable.
    pub const ID1_EN_MASK: u32 = bit(15);
    /// Key id 1.
    pub const KEY_ID1_MASK: u32 = genmask(12, 8);
    /// Key id 0.
    pub const KEY_ID0_MASK: u32 = genmask(4, 0);

    /// Target id of the microcode loader.
    pub const TID_UCODE: u32 = 0xc;
}

// ── CDMBC intermittent transfer (stride 0x20) ────────────────────────────────

/// Intermittent transfer control.
#[must_use]
pub const fn cdmbc_itctrl(i: u32) -> u32 {
    0x3000 + i * 0x20
}

/// Intermittent transfer steps (total bytes).
#[must_use]
pub const fn cdmbc_itsteps(i: u32) -> u32 {
    0x3018 + i * 0x20
}

// ── CDMBC ring buffers (stride 0x40) ─────────────────────────────────────────

/// Ring begin address, low word.
#[must_use]
pub const fn cdmbc_rbbgnadrsd(i: u32) -> u32 {
    0x3200 + i * 0x40
}

/// Ring begin address, high word.
#[must_use]
pub const fn cdmbc_rbbgnadrsu(i: u32) -> u32 {
    0x3204 + i * 0x40
}

/// Ring end address, low word.
#[must_use]
pub const fn cdmbc_rbendadrsd(i: u32) -> u32 {
    0x3208 + i * 0x40
}

/// Ring end address, high word.
#[must_use]
pub const fn cdmbc_rbendadrsu(i: u32) -> u32 {
    0x320c + i * 0x40
}

/// Ring interrupt request. Write one to clear.
#[must_use]
pub const fn cdmbc_rbir(i: u32) -> u32 {
    0x3214 + i * 0x40
}

/// Ring interrupt enable.
#[must_use]
pub const fn cdmbc_rbie(i: u32) -> u32 {
    0x3218 + i * 0x40
}

/// Ring interrupt detect.
#[must_use]
pub const fn cdmbc_rbid(i: u32) -> u32 {
    0x321c + i * 0x40
}

/// Ring read pointer, low word.
#[must_use]
pub const fn cdmbc_rbrdptrd(i: u32) -> u32 {
    0x3220 + i * 0x40
}

/// Ring read pointer, high word.
#[must_use]
pub const fn cdmbc_rbrdptru(i: u32) -> u32 {
    0x3224 + i * 0x40
}

/// Ring write pointer, low word.
#[must_use]
pub const fn cdmbc_rbwrptrd(i: u32) -> u32 {
    0x3228 + i * 0x40
}

/// Ring write pointer, high word.
#[must_use]
pub const fn cdmbc_rbwrptru(i: u32) -> u32 {
    0x322c + i * 0x40
}

/// Ring error configuration.
#[must_use]
pub const fn cdmbc_rberrcnfg(i: u32) -> u32 {
    0x3238 + i * 0x40
}

// ── CSS ──────────────────────────────────────────────────────────────────────

/// Parallel TS output config.
pub const CSS_PTSOCONFIG: u32 = 0x1c00;
/// Parallel TS input polarity.
pub const CSS_PTSISIGNALPOL: u32 = 0x1c04;

/// Serial TS input polarity bank `i` (four lanes per register).
#[must_use]
pub const fn css_signalpolch(i: u32) -> u32 {
    0x1c08 + i * 0x4
}

/// Output enable, one bit per CSS output port.
pub const CSS_OUTPUTENABLE: u32 = 0x1c10;

/// Output source select bank `i` (four ports per register).
#[must_use]
pub const fn css_outputctrl(i: u32) -> u32 {
    0x1c14 + i * 0x4
}

/// Serial TS output config.
pub const CSS_STSOCONFIG: u32 = 0x1c2c;
/// Serial TS output polarity.
pub const CSS_STSOSIGNALPOL: u32 = 0x1c30;
/// Demodulator input polarity.
pub const CSS_DMDSIGNALPOL: u32 = 0x1c34;
/// Parallel TS output polarity.
pub const CSS_PTSOSIGNALPOL: u32 = 0x1c38;
/// Packet FIFO 0 config.
pub const CSS_PF0CONFIG: u32 = 0x1c3c;
/// Packet FIFO 1 config.
pub const CSS_PF1CONFIG: u32 = 0x1c40;
/// Packet FIFO interrupt enable.
pub const CSS_PFINTENABLE: u32 = 0x1c44;
/// Packet FIFO interrupt status.
pub const CSS_PFINTSTATUS: u32 = 0x1c48;

/// AV output control `i`.
#[must_use]
pub const fn css_avoutputctrl(i: u32) -> u32 {
    0x1c4c + i * 0x4
}

/// DPLL `i` source select (one-hot).
#[must_use]
pub const fn css_dpctrl(i: u32) -> u32 {
    0x1c54 + i * 0x4
}

/// `CSS_DPCTRL` fields.
pub mod dpctrl {
    use super::{bit, genmask};

    /// Source select field.
    pub const DPSEL_MASK: u32 = genmask(22, 0);
    /// Replay 5.
    pub const DPSEL_PLAY5: u32 = bit(15);
    /// Replay 4.
    pub const DPSEL_PLAY4: u32 = bit(14);
    /// Replay 3.
    pub const DPSEL_PLAY3: u32 = bit(13);
    /// Replay 2.
    pub const DPSEL_PLAY2: u32 = bit(12);
    /// Replay 1.
    pub const DPSEL_PLAY1: u32 = bit(11);
    /// Replay 0.
    pub const DPSEL_PLAY0: u32 = bit(10);
    /// TS input 4.
    pub const DPSEL_TSI4: u32 = bit(4);
    /// TS input 3.
    pub const DPSEL_TSI3: u32 = bit(3);
    /// TS input 2.
    pub const DPSEL_TSI2: u32 = bit(2);
    /// TS input 1.
    pub const DPSEL_TSI1: u32 = bit(1);
    /// TS input 0.
    pub const DPSEL_TSI0: u32 = bit(0);
}

// ── TSI (stride 0x70) ────────────────────────────────────────────────────────

/// Sync control of TS input `i`.
#[must_use]
pub const fn tsi_synccntrol(i: u32) -> u32 {
    0x7100 + i * 0x70
}

/// Configuration of TS input `i`.
#[must_use]
pub const fn tsi_config(i: u32) -> u32 {
    0x7104 + i * 0x70
}

/// Rate upper limit of TS input `i`.
#[must_use]
pub const fn tsi_rateuplmt(i: u32) -> u32 {
    0x7108 + i * 0x70
}

/// Rate lower limit of TS input `i`.
#[must_use]
pub const fn tsi_ratelowlmt(i: u32) -> u32 {
    0x710c + i * 0x70
}

/// Count interrupt threshold of TS input `i`.
#[must_use]
pub const fn tsi_cntintr(i: u32) -> u32 {
    0x7110 + i * 0x70
}

/// Interrupt enable of TS input `i`.
#[must_use]
pub const fn tsi_intren(i: u32) -> u32 {
    0x7114 + i * 0x70
}

/// Sync status of TS input `i`. Write one to clear.
#[must_use]
pub const fn tsi_syncstatus(i: u32) -> u32 {
    0x7118 + i * 0x70
}

/// `TSI_SYNCCNTROL` fields.
pub mod tsi_synccntrol {
    use super::genmask;

    /// Framing mode.
    pub const FRAME_MASK: u32 = genmask(18, 16);
    /// External sync, mode 1.
    pub const FRAME_EXTSYNC1: u32 = 0x0 << 16;
    /// External sync, mode 2.
    pub const FRAME_EXTSYNC2: u32 = 0x1 << 16;
}

/// `TSI_CONFIG` fields.
pub mod tsi_config {
    use super::{bit, genmask};

    /// Arrival timestamp clock source.
    pub const ATSMD_MASK: u32 = genmask(22, 21);
    /// ATS from PCR PLL 0.
    pub const ATSMD_PCRPLL0: u32 = 0x0 << 21;
    /// ATS from PCR PLL 1.
    pub const ATSMD_PCRPLL1: u32 = 0x1 << 21;
    /// ATS from the DPLL.
    pub const ATSMD_DPLL: u32 = 0x3 << 21;
    /// Prepend the arrival timestamp to each packet.
    pub const ATSADD_ON: u32 = bit(20);
    /// System time clock source.
    pub const STCMD_MASK: u32 = genmask(7, 6);
    /// STC from PCR PLL 0.
    pub const STCMD_PCRPLL0: u32 = 0x0 << 6;
    /// STC from PCR PLL 1.
    pub const STCMD_PCRPLL1: u32 = 0x1 << 6;
    /// STC from the DPLL.
    pub const STCMD_DPLL: u32 = 0x3 << 6;
    /// Channel start.
    pub const CHEN_START: u32 = bit(0);
}

/// `TSI_INTREN` bits.
pub mod tsi_intr {
    use super::bit;

    /// NTP.
    pub const NTP: u32 = bit(13);
    /// NTP count.
    pub const NTPCNT: u32 = bit(12);
    /// Packet end.
    pub const PKTEND: u32 = bit(11);
    /// PCR received.
    pub const PCR: u32 = bit(9);
    /// Load.
    pub const LOAD: u32 = bit(8);
    /// Sync error.
    pub const SERR: u32 = bit(7);
    /// Start-of-frame error.
    pub const SOF: u32 = bit(6);
    /// Transport overflow.
    pub const TOF: u32 = bit(5);
    /// Rate above upper limit.
    pub const UL: u32 = bit(4);
    /// Rate below lower limit.
    pub const LL: u32 = bit(3);
    /// Count reached.
    pub const CNT: u32 = bit(2);
    /// Stream lost.
    pub const LOST: u32 = bit(1);
    /// Sync locked.
    pub const LOCK: u32 = bit(0);
}

/// `TSI_SYNCSTATUS` bits.
pub mod tsi_stat {
    use super::bit;

    /// Packet start error.
    pub const PKTST_ERR: u32 = bit(21);
    /// Packet too large.
    pub const LARGE_ERR: u32 = bit(20);
    /// Packet too small.
    pub const SMALL_ERR: u32 = bit(19);
    /// Locked.
    pub const LOCK: u32 = bit(18);
    /// In sync.
    pub const SYNC: u32 = bit(17);
    /// Searching for sync.
    pub const SEARCH: u32 = bit(16);
}

// ── Microcode mailbox ────────────────────────────────────────────────────────

/// ACE microcode revision.
pub const UCODE_REVISION_AM: u32 = 0x10fd0;
/// ACE data address, high word.
pub const CIP_UCODEADDR_AM1: u32 = 0x10fd4;
/// ACE data address, low word.
pub const CIP_UCODEADDR_AM0: u32 = 0x10fd8;
/// ATS correction control.
pub const CORRECTATS_CTRL: u32 = 0x10fdc;
/// SPU microcode revision.
pub const UCODE_REVISION: u32 = 0x10fe0;
/// ACE page control.
pub const AM_UCODE_IGPGCTRL: u32 = 0x10fe4;
/// Replay DPLL enable.
pub const REPDPLLCTRLEN: u32 = 0x10fe8;
/// SPU data address, high word.
pub const UCODE_DLADDR1: u32 = 0x10fec;
/// SPU data address, low word.
pub const UCODE_DLADDR0: u32 = 0x10ff0;
/// Microcode error log control.
pub const UCODE_ERRLOGCTRL: u32 = 0x10ff4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_helpers() {
        assert_eq!(genmask(22, 0), 0x007f_ffff);
        assert_eq!(genmask(20, 16), 0x001f_0000);
        assert_eq!(genmask(31, 29), 0xe000_0000);
        assert_eq!(field_prep(chtdctrlh::STREM_MASK, 3), 0x0003_0000);
        assert_eq!(field_get(chctrl1::STATSEL_MASK, 4 << 7), 4);
    }

    #[test]
    fn indexed_blocks() {
        assert_eq!(cdmbc_strt(1), 0x2300);
        assert_eq!(cdmbc_chir(9), 0x2554 + 9 * 0x50);
        assert_eq!(cdmbc_rbwrptru(1), 0x326c);
        assert_eq!(tsi_syncstatus(2), 0x71f8);
        assert_eq!(css_dpctrl(3), 0x1c60);
        assert_eq!(share_memory(7), 0x17000);
    }

    #[test]
    fn dma_burst_shape() {
        let v = field_prep(sbc_dmaparama::OFFSET_MASK, sbc_dmaparama::OFFSET_TS)
            | field_prep(sbc_dmaparama::LOOPADDR_MASK, sbc_dmaparama::LOOPADDR_TS)
            | field_prep(sbc_dmaparama::COUNT_MASK, sbc_dmaparama::COUNT_TS);
        assert_eq!(v, 0x5880_00c4);
    }

    #[test]
    fn registers_inside_window() {
        assert!(UCODE_ERRLOGCTRL <= MAX_REGISTER);
        assert!(tsi_syncstatus(9) <= MAX_REGISTER);
    }
}
