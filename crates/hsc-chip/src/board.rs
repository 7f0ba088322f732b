//! Board routing presets.
//!
//! A board ties tuner-facing CSS inputs to TS input lanes, clock-recovery
//! PLLs and output DMA channels. Entries beyond the adapter count are kept
//! but not brought up.

use std::fmt;
use std::str::FromStr;

use crate::ports::{css_in, css_out, dma, dpll};
use crate::spec::{SocVariant, UnknownVariant};

/// Routing of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HscConf {
    /// CSS input port fed by the tuner.
    pub css_in: usize,
    /// CSS output port (a TSI output) driving the TS input lane.
    pub css_out: usize,
    /// DPLL recovering the stream clock.
    pub dpll: usize,
    /// Output DMA channel receiving the stream.
    pub dma_out: usize,
}

/// Known boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Board {
    /// LD11 with one MN884433 tuner.
    Ld11Mn884433,
    /// LD20 with MN884434 tuners.
    Ld20Mn884434,
}

static LD11_MN884433: [HscConf; 1] = [HscConf {
    css_in: css_in::SRLTS0,
    css_out: css_out::TSI0,
    dpll: dpll::DPLL0,
    dma_out: dma::OUT0,
}];

static LD20_MN884434: [HscConf; 3] = [
    HscConf {
        css_in: css_in::SRLTS2,
        css_out: css_out::TSI0,
        dpll: dpll::DPLL0,
        dma_out: dma::OUT0,
    },
    HscConf {
        css_in: css_in::SRLTS3,
        css_out: css_out::TSI1,
        dpll: dpll::DPLL1,
        dma_out: dma::OUT1,
    },
    HscConf {
        css_in: css_in::SRLTS4,
        css_out: css_out::TSI2,
        dpll: dpll::DPLL2,
        dma_out: dma::OUT2,
    },
];

impl Board {
    /// Every known board.
    pub const ALL: [Self; 2] = [Self::Ld11Mn884433, Self::Ld20Mn884434];

    /// SoC carrying this board's controller.
    #[must_use]
    pub const fn variant(self) -> SocVariant {
        match self {
            Self::Ld11Mn884433 => SocVariant::Ld11,
            Self::Ld20Mn884434 => SocVariant::Ld20,
        }
    }

    /// Number of adapters brought up.
    #[must_use]
    pub const fn adapters(self) -> usize {
        match self {
            Self::Ld11Mn884433 => 1,
            Self::Ld20Mn884434 => 2,
        }
    }

    /// Routing table, one entry per wired tuner.
    #[must_use]
    pub fn confs(self) -> &'static [HscConf] {
        match self {
            Self::Ld11Mn884433 => &LD11_MN884433,
            Self::Ld20Mn884434 => &LD20_MN884434,
        }
    }

    /// Routing of the adapters that are brought up.
    #[must_use]
    pub fn active_confs(self) -> &'static [HscConf] {
        let confs = self.confs();
        &confs[..self.adapters().min(confs.len())]
    }

    /// Short name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ld11Mn884433 => "ld11-mn884433",
            Self::Ld20Mn884434 => "ld20-mn884434",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Board {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|b| b.name() == lower || b.variant().spec().name == lower)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{css_out_to_dpll_src, css_out_to_ts_in};

    #[test]
    fn ld20_brings_up_two_of_three() {
        let b = Board::Ld20Mn884434;
        assert_eq!(b.confs().len(), 3);
        assert_eq!(b.active_confs().len(), 2);
        assert_eq!(b.active_confs()[1].css_in, css_in::SRLTS3);
    }

    #[test]
    fn every_conf_routes_to_a_lane() {
        for board in Board::ALL {
            let spec = board.variant().spec();
            for conf in board.confs() {
                let tsi = css_out_to_ts_in(conf.css_out).unwrap();
                assert!(spec.ts_in(tsi).is_some());
                assert!(css_out_to_dpll_src(conf.css_out).is_some());
                assert!(spec.dma_out(conf.dma_out).and_then(|d| d.td_ch).is_some());
                assert!(spec.css_in(conf.css_in).and_then(|p| p.pol).is_some());
            }
        }
    }

    #[test]
    fn parse_by_board_or_soc_name() {
        assert_eq!("ld11".parse::<Board>(), Ok(Board::Ld11Mn884433));
        assert_eq!("LD20-MN884434".parse::<Board>(), Ok(Board::Ld20Mn884434));
        assert!("ld30".parse::<Board>().is_err());
    }
}
