//! Cross Stream Switch (CSS) routing and DPLL source selection.
//!
//! The CSS connects a physical TS input port to an output port, usually one
//! of the TSI outputs feeding a TS input lane. Routing changes take effect
//! immediately; callers keep the destination pipeline idle while
//! reconnecting it.

// Port and channel indices are small table offsets
#![allow(clippy::cast_possible_truncation)]

use hsc_chip::ports::dpll;
use hsc_chip::regs::{bit, css_dpctrl, dpctrl, CSS_OUTPUTENABLE};
use hsc_chip::spec::{CssPortSpec, HscSpec, PolarityField};

use crate::error::{HscError, Result};
use crate::regmap::Regmap;

/// Signal polarity straps of a CSS port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Polarity {
    /// `true`: sync lasts one bit period; `false`: eight bit periods.
    pub sync_bit: bool,
    /// `true`: valid does not hold for eight bit periods; `false`: it does.
    pub val_bit: bool,
    /// `true`: latch data on the falling clock edge; `false`: rising edge.
    pub clk_fall: bool,
}

/// CSS view over a register map and SoC tables.
#[derive(Debug, Clone, Copy)]
pub struct Css<'a> {
    regs: &'a Regmap,
    spec: &'a HscSpec,
}

impl<'a> Css<'a> {
    /// Bind to a chip.
    pub const fn new(regs: &'a Regmap, spec: &'a HscSpec) -> Self {
        Self { regs, spec }
    }

    fn in_spec(&self, port: usize) -> Result<&'a CssPortSpec> {
        self.spec
            .css_in(port)
            .ok_or_else(|| HscError::invalid_argument(format!("CSS input {port} out of range")))
    }

    fn out_spec(&self, port: usize) -> Result<&'a CssPortSpec> {
        self.spec
            .css_out(port)
            .ok_or_else(|| HscError::invalid_argument(format!("CSS output {port} out of range")))
    }

    /// Route input `input` to output `out` and enable or disable the path.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `input` is outside the input table, or `out` is
    /// outside the output table or has no source selector.
    pub fn connect(&self, input: usize, out: usize, enable: bool) -> Result<()> {
        self.in_spec(input)?;
        let sel = self.out_spec(out)?.sel.ok_or_else(|| {
            HscError::invalid_argument(format!("CSS output {out} has no source selector"))
        })?;

        let input_val = input as u32;
        self.regs
            .update_bits(sel.reg, sel.mask, input_val << sel.shift)?;
        self.regs
            .assign_bits(CSS_OUTPUTENABLE, bit(out as u32), enable)?;

        tracing::debug!("CSS: in {input} -> out {out} ({})", if enable { "on" } else { "off" });
        Ok(())
    }

    /// Input currently selected by `out` and whether the path is enabled.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `out` is outside the table or has no selector.
    pub fn source(&self, out: usize) -> Result<(usize, bool)> {
        let sel = self.out_spec(out)?.sel.ok_or_else(|| {
            HscError::invalid_argument(format!("CSS output {out} has no source selector"))
        })?;
        let v = self.regs.read(sel.reg)?;
        let input = (v & sel.mask) >> sel.shift;
        let en = self.regs.read(CSS_OUTPUTENABLE)? & bit(out as u32) != 0;
        Ok((input as usize, en))
    }

    /// Polarity straps of input `port`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the port is unknown or has no polarity control.
    pub fn in_polarity(&self, port: usize) -> Result<Polarity> {
        let pol = polarity_field(self.in_spec(port)?, "input", port)?;
        self.get_polarity(&pol)
    }

    /// Program polarity straps of input `port`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the port is unknown, has no polarity control, or
    /// `true` is requested for a strap the port does not have.
    pub fn set_in_polarity(&self, port: usize, p: Polarity) -> Result<()> {
        let pol = polarity_field(self.in_spec(port)?, "input", port)?;
        self.set_polarity(&pol, p)
    }

    /// Polarity straps of output `port`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the port is unknown or has no polarity control.
    pub fn out_polarity(&self, port: usize) -> Result<Polarity> {
        let pol = polarity_field(self.out_spec(port)?, "output", port)?;
        self.get_polarity(&pol)
    }

    /// Program polarity straps of output `port`.
    ///
    /// # Errors
    ///
    /// As [`Css::set_in_polarity`].
    pub fn set_out_polarity(&self, port: usize, p: Polarity) -> Result<()> {
        let pol = polarity_field(self.out_spec(port)?, "output", port)?;
        self.set_polarity(&pol, p)
    }

    fn get_polarity(&self, pol: &PolarityField) -> Result<Polarity> {
        let v = self.regs.read(pol.reg)?;
        let strap = |s: Option<u32>| s.is_some_and(|s| v & bit(s) != 0);
        Ok(Polarity {
            sync_bit: strap(pol.sync),
            val_bit: strap(pol.val),
            clk_fall: strap(pol.clk),
        })
    }

    fn set_polarity(&self, pol: &PolarityField, p: Polarity) -> Result<()> {
        let mut m = 0;
        let mut v = 0;
        for (name, shift, on) in [
            ("sync", pol.sync, p.sync_bit),
            ("val", pol.val, p.val_bit),
            ("clk", pol.clk, p.clk_fall),
        ] {
            match shift {
                Some(s) => {
                    m |= bit(s);
                    if on {
                        v |= bit(s);
                    }
                }
                None if on => {
                    return Err(HscError::invalid_argument(format!(
                        "polarity strap '{name}' not present at {:#x}",
                        pol.reg
                    )));
                }
                None => {}
            }
        }
        self.regs.update_bits(pol.reg, m, v)
    }

    /// Select the clock source of DPLL `id`; `None` disconnects it.
    ///
    /// The source field is one-hot: selecting a source clears any other.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `id` or `src` is out of range.
    pub fn dpll_set_src(&self, id: usize, src: Option<usize>) -> Result<()> {
        if id >= dpll::NUM {
            return Err(HscError::invalid_argument(format!("DPLL {id} out of range")));
        }
        let v = match src {
            Some(s) if s >= dpll::SRC_NUM => {
                return Err(HscError::invalid_argument(format!(
                    "DPLL source {s} out of range"
                )));
            }
            Some(s) => bit(s as u32),
            None => 0,
        };
        self.regs.write(css_dpctrl(id as u32), v)?;
        tracing::debug!("DPLL{id} source {src:?}");
        Ok(())
    }

    /// Clock source of DPLL `id`, `None` when disconnected.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `id` is out of range.
    pub fn dpll_src(&self, id: usize) -> Result<Option<usize>> {
        if id >= dpll::NUM {
            return Err(HscError::invalid_argument(format!("DPLL {id} out of range")));
        }
        let v = self.regs.read(css_dpctrl(id as u32))? & dpctrl::DPSEL_MASK;
        Ok((v != 0).then(|| v.trailing_zeros() as usize))
    }
}

fn polarity_field(port: &CssPortSpec, dir: &str, idx: usize) -> Result<PolarityField> {
    port.pol.ok_or_else(|| {
        HscError::invalid_argument(format!("CSS {dir} {idx} has no polarity control"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SimRegisters;
    use hsc_chip::ports::{css_in, css_out};
    use hsc_chip::regs::{css_outputctrl, css_signalpolch};
    use hsc_chip::SocVariant;
    use std::sync::Arc;

    fn fixture() -> (Arc<SimRegisters>, Regmap) {
        let sim = Arc::new(SimRegisters::new(SocVariant::Ld11.spec()));
        let map = Regmap::new(sim.clone());
        (sim, map)
    }

    #[test]
    fn connect_programs_selector_and_enable() {
        let (sim, regs) = fixture();
        let css = Css::new(&regs, SocVariant::Ld11.spec());

        css.connect(css_in::SRLTS3, css_out::TSI2, true).unwrap();
        assert_eq!(sim.peek(css_outputctrl(1)), 9 << 16);
        assert_eq!(sim.peek(CSS_OUTPUTENABLE), 1 << 6);
        assert_eq!(css.source(css_out::TSI2).unwrap(), (css_in::SRLTS3, true));

        css.connect(css_in::SRLTS0, css_out::TSI2, false).unwrap();
        assert_eq!(css.source(css_out::TSI2).unwrap(), (css_in::SRLTS0, false));
    }

    #[test]
    fn connect_rejects_bad_ports() {
        let (_sim, regs) = fixture();
        let css = Css::new(&regs, SocVariant::Ld11.spec());
        let n_out = SocVariant::Ld11.spec().css_out.len();

        for out in [n_out, n_out + 5, css_out::SRLTS2] {
            assert!(matches!(
                css.connect(css_in::SRLTS0, out, true),
                Err(HscError::InvalidArgument { .. })
            ));
        }
        assert!(css.connect(18, css_out::TSI0, true).is_err());
    }

    #[test]
    fn polarity_leaves_missing_straps_alone() {
        let (sim, regs) = fixture();
        let css = Css::new(&regs, SocVariant::Ld11.spec());
        sim.poke(css_signalpolch(0), 0x8000_0000);

        let p = Polarity {
            sync_bit: false,
            val_bit: true,
            clk_fall: true,
        };
        css.set_in_polarity(css_in::SRLTS1, p).unwrap();
        assert_eq!(sim.peek(css_signalpolch(0)), 0x8000_0000 | (1 << 11) | (1 << 8));
        assert_eq!(css.in_polarity(css_in::SRLTS1).unwrap(), p);

        let bad = Polarity {
            sync_bit: true,
            ..Polarity::default()
        };
        assert!(css.set_in_polarity(css_in::SRLTS1, bad).is_err());
        assert!(css.in_polarity(css_in::SRLTS5).is_err());
        assert!(css.out_polarity(css_out::TSI0).is_err());
    }

    #[test]
    fn output_polarity_with_sync_strap() {
        let (_sim, regs) = fixture();
        let css = Css::new(&regs, SocVariant::Ld11.spec());
        let p = Polarity {
            sync_bit: true,
            val_bit: false,
            clk_fall: true,
        };
        css.set_out_polarity(css_out::SRLTS1, p).unwrap();
        assert_eq!(css.out_polarity(css_out::SRLTS1).unwrap(), p);
    }

    #[test]
    fn dpll_source_is_one_hot() {
        let (sim, regs) = fixture();
        let css = Css::new(&regs, SocVariant::Ld11.spec());

        css.dpll_set_src(dpll::DPLL1, Some(3)).unwrap();
        css.dpll_set_src(dpll::DPLL1, Some(10)).unwrap();
        assert_eq!(css.dpll_src(dpll::DPLL1).unwrap(), Some(10));
        assert_eq!(sim.peek(css_dpctrl(1)), 1 << 10);

        css.dpll_set_src(dpll::DPLL1, None).unwrap();
        assert_eq!(css.dpll_src(dpll::DPLL1).unwrap(), None);

        assert!(css.dpll_set_src(dpll::NUM, Some(0)).is_err());
        assert!(css.dpll_set_src(0, Some(dpll::SRC_NUM)).is_err());
        assert!(css.dpll_src(dpll::NUM).is_err());
    }
}
