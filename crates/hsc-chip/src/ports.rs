//! Port, lane, channel and clock-recovery identifiers.
//!
//! Numbering follows the hardware: a CSS input index is the value written
//! into an output's source-select field, a CSS output index is the bit
//! position in `CSS_OUTPUTENABLE`, and so on. Gaps in the numbering are
//! reserved by the silicon.

/// CSS input ports.
pub mod css_in {
    /// IEEE 1394 input 0.
    pub const IN_1394_0: usize = 0;
    /// IEEE 1394 input 1.
    pub const IN_1394_1: usize = 1;
    /// IEEE 1394 input 2.
    pub const IN_1394_2: usize = 2;
    /// IEEE 1394 input 3.
    pub const IN_1394_3: usize = 3;
    /// Demodulator 0.
    pub const DMD0: usize = 4;
    /// Demodulator 1.
    pub const DMD1: usize = 5;
    /// Serial TS input 0.
    pub const SRLTS0: usize = 6;
    /// Serial TS input 1.
    pub const SRLTS1: usize = 7;
    /// Serial TS input 2.
    pub const SRLTS2: usize = 8;
    /// Serial TS input 3.
    pub const SRLTS3: usize = 9;
    /// Serial TS input 4.
    pub const SRLTS4: usize = 10;
    /// Serial TS input 5.
    pub const SRLTS5: usize = 11;
    /// Serial TS input 6.
    pub const SRLTS6: usize = 12;
    /// Serial TS input 7.
    pub const SRLTS7: usize = 13;
    /// Parallel TS input 0.
    pub const PARTS0: usize = 16;
    /// Parallel TS input 1.
    pub const PARTS1: usize = 17;
    /// Parallel TS input 2.
    pub const PARTS2: usize = 18;
    /// Parallel TS input 3.
    pub const PARTS3: usize = 19;
    /// TS output loopback 0.
    pub const TSO0: usize = 24;
    /// TS output loopback 1.
    pub const TSO1: usize = 25;
    /// TS output loopback 2.
    pub const TSO2: usize = 26;
    /// TS output loopback 3.
    pub const TSO3: usize = 27;
    /// Encoder 0.
    pub const ENCODER0_IN: usize = 28;
    /// Encoder 1.
    pub const ENCODER1_IN: usize = 29;

    /// Symbolic name of an input port, if it has one.
    #[must_use]
    pub const fn name(port: usize) -> Option<&'static str> {
        Some(match port {
            IN_1394_0 => "1394_0",
            IN_1394_1 => "1394_1",
            IN_1394_2 => "1394_2",
            IN_1394_3 => "1394_3",
            DMD0 => "DMD0",
            DMD1 => "DMD1",
            SRLTS0 => "SRLTS0",
            SRLTS1 => "SRLTS1",
            SRLTS2 => "SRLTS2",
            SRLTS3 => "SRLTS3",
            SRLTS4 => "SRLTS4",
            SRLTS5 => "SRLTS5",
            SRLTS6 => "SRLTS6",
            SRLTS7 => "SRLTS7",
            PARTS0 => "PARTS0",
            PARTS1 => "PARTS1",
            PARTS2 => "PARTS2",
            PARTS3 => "PARTS3",
            TSO0 => "TSO0",
            TSO1 => "TSO1",
            TSO2 => "TSO2",
            TSO3 => "TSO3",
            ENCODER0_IN => "ENCODER0",
            ENCODER1_IN => "ENCODER1",
            _ => return None,
        })
    }
}

/// CSS output ports.
pub mod css_out {
    /// Serial TS output 0.
    pub const SRLTS0: usize = 0;
    /// Serial TS output 1.
    pub const SRLTS1: usize = 1;
    /// Serial TS output 2.
    pub const SRLTS2: usize = 2;
    /// Serial TS output 3.
    pub const SRLTS3: usize = 3;
    /// TS input interface 0.
    pub const TSI0: usize = 4;
    /// TS input interface 1.
    pub const TSI1: usize = 5;
    /// TS input interface 2.
    pub const TSI2: usize = 6;
    /// TS input interface 3.
    pub const TSI3: usize = 7;
    /// TS input interface 4.
    pub const TSI4: usize = 8;
    /// TS input interface 5.
    pub const TSI5: usize = 9;
    /// TS input interface 6.
    pub const TSI6: usize = 10;
    /// TS input interface 7.
    pub const TSI7: usize = 11;
    /// TS input interface 8.
    pub const TSI8: usize = 12;
    /// TS input interface 9.
    pub const TSI9: usize = 13;
    /// Parallel TS output 0.
    pub const PARTS0: usize = 16;
    /// Parallel TS output 1.
    pub const PARTS1: usize = 17;
    /// Packet FIFO 0.
    pub const PKTFF0: usize = 20;
    /// Packet FIFO 1.
    pub const PKTFF1: usize = 21;

    /// Symbolic name of an output port, if it has one.
    #[must_use]
    pub const fn name(port: usize) -> Option<&'static str> {
        Some(match port {
            SRLTS0 => "SRLTS0",
            SRLTS1 => "SRLTS1",
            SRLTS2 => "SRLTS2",
            SRLTS3 => "SRLTS3",
            TSI0 => "TSI0",
            TSI1 => "TSI1",
            TSI2 => "TSI2",
            TSI3 => "TSI3",
            TSI4 => "TSI4",
            TSI5 => "TSI5",
            TSI6 => "TSI6",
            TSI7 => "TSI7",
            TSI8 => "TSI8",
            TSI9 => "TSI9",
            PARTS0 => "PARTS0",
            PARTS1 => "PARTS1",
            PKTFF0 => "PKTFF0",
            PKTFF1 => "PKTFF1",
            _ => return None,
        })
    }
}

/// TS input interfaces.
pub mod ts_in {
    /// Lane 0.
    pub const TSI0: usize = 0;
    /// Lane 1.
    pub const TSI1: usize = 1;
    /// Lane 2.
    pub const TSI2: usize = 2;
    /// Lane 3.
    pub const TSI3: usize = 3;
    /// Lane 4.
    pub const TSI4: usize = 4;
    /// Number of lane register blocks.
    pub const NUM: usize = 10;
}

/// Stream DMA channels.
pub mod dma {
    /// Input channel 0.
    pub const IN0: usize = 0;
    /// Input channel 1.
    pub const IN1: usize = 1;
    /// Input channel 2.
    pub const IN2: usize = 2;
    /// Input channel 3.
    pub const IN3: usize = 3;
    /// Input channel 4.
    pub const IN4: usize = 4;
    /// Input channel 5.
    pub const IN5: usize = 5;
    /// CIP file read channel 0.
    pub const CIP_IN0: usize = 10;
    /// CIP file read channel 1.
    pub const CIP_IN1: usize = 11;

    /// Output channel 0.
    pub const OUT0: usize = 0;
    /// Output channel 1.
    pub const OUT1: usize = 1;
    /// Output channel 2.
    pub const OUT2: usize = 2;
    /// Output channel 3.
    pub const OUT3: usize = 3;
    /// Output channel 4.
    pub const OUT4: usize = 4;
    /// Output channel 5.
    pub const OUT5: usize = 5;
    /// CIP file write channel 0.
    pub const CIP_OUT0: usize = 10;
    /// CIP file write channel 1.
    pub const CIP_OUT1: usize = 11;
}

/// Clock-recovery PLLs.
pub mod dpll {
    /// DPLL 0.
    pub const DPLL0: usize = 0;
    /// DPLL 1.
    pub const DPLL1: usize = 1;
    /// DPLL 2.
    pub const DPLL2: usize = 2;
    /// DPLL 3.
    pub const DPLL3: usize = 3;
    /// Number of DPLLs.
    pub const NUM: usize = 4;

    /// Source: TS input 0. Sources TSI1..TSI9 follow consecutively.
    pub const SRC_TSI0: usize = 0;
    /// Source: replay 0. Sources REP1..REP5 follow consecutively.
    pub const SRC_REP0: usize = 10;
    /// Number of selectable sources.
    pub const SRC_NUM: usize = 16;
}

/// Number of (TS input, DMA output) interface pairs owned by one controller.
pub const STREAM_IF_NUM: usize = 2;

/// TS input lane fed by a CSS output port.
///
/// Only the TSI0..TSI9 outputs feed a lane; every other port yields `None`.
#[must_use]
pub const fn css_out_to_ts_in(out: usize) -> Option<usize> {
    if out >= css_out::TSI0 && out <= css_out::TSI9 {
        Some(ts_in::TSI0 + (out - css_out::TSI0))
    } else {
        None
    }
}

/// DPLL source recovering the clock of a CSS output port.
#[must_use]
pub const fn css_out_to_dpll_src(out: usize) -> Option<usize> {
    if out >= css_out::TSI0 && out <= css_out::TSI9 {
        Some(dpll::SRC_TSI0 + (out - css_out::TSI0))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_to_lane_covers_tsi_range_only() {
        assert_eq!(css_out_to_ts_in(css_out::TSI0), Some(0));
        assert_eq!(css_out_to_ts_in(css_out::TSI9), Some(9));
        assert_eq!(css_out_to_ts_in(css_out::SRLTS3), None);
        assert_eq!(css_out_to_ts_in(css_out::PARTS0), None);
        assert_eq!(css_out_to_dpll_src(css_out::TSI2), Some(2));
        assert_eq!(css_out_to_dpll_src(css_out::PKTFF0), None);
    }

    #[test]
    fn names() {
        assert_eq!(css_in::name(css_in::SRLTS4), Some("SRLTS4"));
        assert_eq!(css_in::name(14), None);
        assert_eq!(css_out::name(css_out::PKTFF1), Some("PKTFF1"));
    }
}
