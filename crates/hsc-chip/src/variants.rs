//! LD11 and LD20 descriptor tables.
//!
//! Both generations share the CSS, TS input and DMA layouts; LD20 has two
//! more share-memory banks to initialise.

use crate::regs::{
    CDMBC_TDSTRT, CSS_DMDSIGNALPOL, CSS_PTSISIGNALPOL, CSS_PTSOSIGNALPOL, CSS_STSOSIGNALPOL,
    FLT_MASK_RAM_SIZE, FLT_MASK_RAM_TOP_ADDR, FLT_PATN_RAM_SIZE, FLT_PATN_RAM_TOP_ADDR,
    FLT_PIDPATTERN_SIZE, IOB_INTREN0, IOB_INTREN1, IOB_INTREN2, SHARE_MEMORY_SIZE,
    cdmbc_strt, css_outputctrl, css_signalpolch, genmask, share_memory,
};
use crate::spec::{
    CssPortSpec, DmaSpec, HscSpec, InitRam, PolarityField, RegBit, SelectField, TsInSpec,
    UcodeSpec,
};

const fn pol(
    reg: u32,
    sync: Option<u32>,
    val: Option<u32>,
    clk: Option<u32>,
) -> Option<PolarityField> {
    Some(PolarityField { reg, sync, val, clk })
}

const fn sel(reg: u32, shift: u32) -> Option<SelectField> {
    Some(SelectField {
        reg,
        mask: genmask(shift + 4, shift),
        shift,
    })
}

const fn in_port(pol: Option<PolarityField>) -> CssPortSpec {
    CssPortSpec { pol, sel: None }
}

const fn out_port(pol: Option<PolarityField>, sel: Option<SelectField>) -> CssPortSpec {
    CssPortSpec { pol, sel }
}

const fn ts_in(shift: u32) -> Option<TsInSpec> {
    Some(TsInSpec {
        intr: RegBit::new(IOB_INTREN0, shift),
    })
}

/// Stream channel started from `CDMBC_TDSTRT`.
const fn stream_ch(
    dma_ch: u32,
    rb_ch: u32,
    it_ch: Option<u32>,
    td_ch: Option<u32>,
    en: u32,
    intr: u32,
) -> Option<DmaSpec> {
    Some(DmaSpec {
        dma_ch,
        rb_ch,
        cip_ch: None,
        it_ch,
        td_ch,
        en: RegBit::new(CDMBC_TDSTRT, en),
        intr: RegBit::new(IOB_INTREN1, intr),
    })
}

/// CIP file channel started from `CDMBC_STRT(1)`.
const fn cip_ch(
    dma_ch: u32,
    rb_ch: u32,
    cip: u32,
    it_ch: Option<u32>,
    en: u32,
    intr: u32,
) -> Option<DmaSpec> {
    Some(DmaSpec {
        dma_ch,
        rb_ch,
        cip_ch: Some(cip),
        it_ch,
        td_ch: None,
        en: RegBit::new(cdmbc_strt(1), en),
        intr: RegBit::new(IOB_INTREN2, intr),
    })
}

const UCODE_SPU: UcodeSpec = UcodeSpec {
    code: "hsc_spu_code.bin",
    data: "hsc_spu_data.bin",
};

const UCODE_ACE: UcodeSpec = UcodeSpec {
    code: "hsc_ace_code.bin",
    data: "hsc_ace_data.bin",
};

const fn sm(n: u32) -> InitRam {
    InitRam {
        addr: share_memory(n),
        size: SHARE_MEMORY_SIZE,
        pattern: 0,
    }
}

const RAM_PATN: InitRam = InitRam {
    addr: FLT_PATN_RAM_TOP_ADDR,
    size: FLT_PATN_RAM_SIZE,
    pattern: !0,
};

const RAM_MASK: InitRam = InitRam {
    addr: FLT_MASK_RAM_TOP_ADDR,
    size: FLT_MASK_RAM_SIZE,
    pattern: 0,
};

// The first bytes of bank 0 hold the PID pattern table and start all-ones.
const RAM_SM0_PID: InitRam = InitRam {
    addr: share_memory(0),
    size: FLT_PIDPATTERN_SIZE,
    pattern: !0,
};

const RAM_SM0_REST: InitRam = InitRam {
    addr: share_memory(0) + FLT_PIDPATTERN_SIZE,
    size: SHARE_MEMORY_SIZE - FLT_PIDPATTERN_SIZE,
    pattern: 0,
};

static LD11_INIT_RAMS: [InitRam; 9] = [
    RAM_PATN,
    RAM_MASK,
    RAM_SM0_PID,
    RAM_SM0_REST,
    sm(1),
    sm(2),
    sm(3),
    sm(4),
    sm(5),
];

static LD20_INIT_RAMS: [InitRam; 11] = [
    RAM_PATN,
    RAM_MASK,
    RAM_SM0_PID,
    RAM_SM0_REST,
    sm(1),
    sm(2),
    sm(3),
    sm(4),
    sm(5),
    sm(6),
    sm(7),
];

// Indexed by `ports::css_in`.
static CSS_IN: [CssPortSpec; 18] = [
    CssPortSpec::NONE,                                           // 1394_0
    CssPortSpec::NONE,                                           // 1394_1
    CssPortSpec::NONE,                                           // 1394_2
    CssPortSpec::NONE,                                           // 1394_3
    in_port(pol(CSS_DMDSIGNALPOL, None, None, Some(16))),        // DMD0
    CssPortSpec::NONE,                                           // DMD1
    in_port(pol(css_signalpolch(0), None, Some(3), Some(0))),    // SRLTS0
    in_port(pol(css_signalpolch(0), None, Some(11), Some(8))),   // SRLTS1
    in_port(pol(css_signalpolch(0), None, Some(19), Some(16))),  // SRLTS2
    in_port(pol(css_signalpolch(0), None, Some(27), Some(24))),  // SRLTS3
    in_port(pol(css_signalpolch(1), None, Some(3), Some(0))),    // SRLTS4
    CssPortSpec::NONE,                                           // SRLTS5
    CssPortSpec::NONE,                                           // SRLTS6
    CssPortSpec::NONE,                                           // SRLTS7
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    in_port(pol(CSS_PTSISIGNALPOL, None, None, Some(0))),        // PARTS0
    in_port(pol(CSS_PTSISIGNALPOL, None, None, Some(8))),        // PARTS1
];

// Indexed by `ports::css_out`.
static CSS_OUT: [CssPortSpec; 21] = [
    out_port(pol(CSS_STSOSIGNALPOL, Some(6), None, Some(0)), sel(css_outputctrl(0), 0)), // SRLTS0
    out_port(pol(CSS_STSOSIGNALPOL, Some(14), None, Some(8)), sel(css_outputctrl(0), 8)), // SRLTS1
    CssPortSpec::NONE,                                  // SRLTS2
    CssPortSpec::NONE,                                  // SRLTS3
    out_port(None, sel(css_outputctrl(1), 0)),          // TSI0
    out_port(None, sel(css_outputctrl(1), 8)),          // TSI1
    out_port(None, sel(css_outputctrl(1), 16)),         // TSI2
    out_port(None, sel(css_outputctrl(1), 24)),         // TSI3
    out_port(None, sel(css_outputctrl(2), 0)),          // TSI4
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    out_port(pol(CSS_PTSOSIGNALPOL, None, None, Some(0)), sel(css_outputctrl(4), 0)), // PARTS0
    CssPortSpec::NONE,                                  // PARTS1
    CssPortSpec::NONE,
    CssPortSpec::NONE,
    out_port(None, sel(css_outputctrl(5), 0)),          // PKTFF0
];

static TS_IN: [Option<TsInSpec>; 5] = [ts_in(13), ts_in(14), ts_in(15), ts_in(16), ts_in(17)];

static DMA_IN: [Option<DmaSpec>; 12] = [
    stream_ch(5, 4, Some(0), None, 5, 1),
    stream_ch(6, 5, Some(1), None, 6, 2),
    stream_ch(7, 6, Some(2), None, 7, 3),
    stream_ch(22, 20, Some(13), None, 13, 4),
    stream_ch(23, 21, Some(14), None, 14, 5),
    stream_ch(24, 22, Some(15), None, 15, 6),
    None,
    None,
    None,
    None,
    cip_ch(8, 7, 0, Some(3), 0, 4),
    cip_ch(10, 9, 1, Some(5), 2, 5),
];

static DMA_OUT: [Option<DmaSpec>; 12] = [
    stream_ch(1, 1, None, Some(0), 1, 13),
    stream_ch(2, 2, None, Some(2), 2, 14),
    stream_ch(3, 3, None, Some(4), 3, 15),
    stream_ch(19, 17, None, Some(1), 9, 16),
    stream_ch(20, 18, None, Some(3), 10, 17),
    stream_ch(21, 19, None, Some(5), 11, 18),
    None,
    None,
    None,
    None,
    cip_ch(9, 8, 0, None, 1, 9),
    cip_ch(11, 10, 1, None, 3, 10),
];

/// LD11.
pub static LD11: HscSpec = HscSpec {
    name: "ld11",
    compatible: "socionext,uniphier-ld11-hsc",
    ucode_spu: UCODE_SPU,
    ucode_ace: UCODE_ACE,
    init_rams: &LD11_INIT_RAMS,
    css_in: &CSS_IN,
    css_out: &CSS_OUT,
    ts_in: &TS_IN,
    dma_in: &DMA_IN,
    dma_out: &DMA_OUT,
};

/// LD20.
pub static LD20: HscSpec = HscSpec {
    name: "ld20",
    compatible: "socionext,uniphier-ld20-hsc",
    ucode_spu: UCODE_SPU,
    ucode_ace: UCODE_ACE,
    init_rams: &LD20_INIT_RAMS,
    css_in: &CSS_IN,
    css_out: &CSS_OUT,
    ts_in: &TS_IN,
    dma_in: &DMA_IN,
    dma_out: &DMA_OUT,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{css_in, css_out, dma, ts_in};

    #[test]
    fn srlts_polarity_layout() {
        let p = CSS_IN[css_in::SRLTS4].pol.unwrap();
        assert_eq!(p.reg, css_signalpolch(1));
        assert_eq!((p.sync, p.val, p.clk), (None, Some(3), Some(0)));
        assert!(CSS_IN[css_in::SRLTS5].pol.is_none());
    }

    #[test]
    fn tsi_select_fields() {
        let s = CSS_OUT[css_out::TSI3].sel.unwrap();
        assert_eq!(s.reg, css_outputctrl(1));
        assert_eq!(s.mask, 0x1f00_0000);
        assert_eq!(s.shift, 24);
        assert!(CSS_OUT[css_out::TSI0].pol.is_none());
    }

    #[test]
    fn dma_out_channels() {
        let o = LD11.dma_out(dma::OUT3).unwrap();
        assert_eq!((o.dma_ch, o.rb_ch, o.td_ch), (19, 17, Some(1)));
        assert_eq!(o.en, RegBit::new(CDMBC_TDSTRT, 9));
        assert_eq!(o.intr, RegBit::new(IOB_INTREN1, 16));

        let c = LD11.dma_out(dma::CIP_OUT0).unwrap();
        assert_eq!(c.en, RegBit::new(cdmbc_strt(1), 1));
        assert_eq!(c.intr, RegBit::new(IOB_INTREN2, 9));
    }

    #[test]
    fn cip_read_channel_has_intermit() {
        let r = LD20.dma_in(dma::CIP_IN0).unwrap();
        assert_eq!((r.dma_ch, r.rb_ch, r.cip_ch, r.it_ch), (8, 7, Some(0), Some(3)));
    }

    #[test]
    fn ts_lane_interrupts() {
        assert_eq!(LD11.ts_in(ts_in::TSI4).unwrap().intr.shift, 17);
    }

    #[test]
    fn init_rams_cover_whole_banks() {
        let sm0: u32 = LD11_INIT_RAMS[2].size + LD11_INIT_RAMS[3].size;
        assert_eq!(sm0, SHARE_MEMORY_SIZE);
        assert_eq!(LD20_INIT_RAMS.last().unwrap().addr, share_memory(7));
        assert!(LD11_INIT_RAMS.iter().all(|r| r.size % 4 == 0));
    }
}
