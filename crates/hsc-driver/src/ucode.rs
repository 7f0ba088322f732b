//! Microcode loader.
//!
//! Two engines run microcode: the stream processing unit (SPU) and the
//! authentication / crypto engine (ACE). Each gets a code image and a data
//! image. The data image stays in host memory and is referenced by
//! address; the code image is streamed into the engine through the CIP
//! file channel pair `CIP_IN0` → `CIP_OUT0`.
//!
//! ```text
//! core_start ─▶ load SPU ─▶ release SPU halt ─▶ load ACE ─▶ release AP core
//! ```
//!
//! Both image pairs stay allocated until [`UcodeLoader::unload_all`].

#![allow(clippy::cast_possible_truncation)]

use std::time::{Duration, Instant};

use hsc_chip::ports::dma;
use hsc_chip::regs::{
    cdmbc_chcausectrl, cdmbc_chctrl1, cdmbc_chddr, cdmbc_chdstamode, cdmbc_chdststrtadrsd,
    cdmbc_chir, cdmbc_chsize, cdmbc_chsrcamode, cdmbc_cipmode, cdmbc_cippriority, cdmbc_itsteps,
    cdmbc_rbir, cdmbc_strt, chamode, chctrl1, chddr, chdststrtadrs, cip_f_ctrl, cipmode,
    cippriority, field_prep, intr_mbc_ch, iob_debug, iob_reset0, CDMBC_STRT_CIP_KICK,
    CIP_F_CTRL, CIP_UCODEADDR_AM0, CIP_UCODEADDR_AM1, IOB_CLKSTOP, IOB_DEBUG, IOB_RESET0,
    IOB_RESET1, UCODE_DLADDR0, UCODE_DLADDR1, UCODE_REVISION, UCODE_REVISION_AM,
};
use hsc_chip::spec::{DmaSpec, HscSpec, UcodeSpec};

use crate::coherent::{CoherentBuffer, DmaAllocator};
use crate::config::HscConfig;
use crate::dma::{rb_set_buffer, rb_set_rp, rb_set_wp};
use crate::error::{HscError, Result};
use crate::firmware::FirmwareSource;
use crate::regmap::Regmap;

/// Microcode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Stream processing unit.
    Spu,
    /// Authentication / crypto engine.
    Ace,
}

impl Engine {
    fn images(self, spec: &HscSpec) -> &UcodeSpec {
        match self {
            Self::Spu => &spec.ucode_spu,
            Self::Ace => &spec.ucode_ace,
        }
    }

    const fn cip_f_ctrl(self) -> u32 {
        match self {
            Self::Spu => cip_f_ctrl::SPU,
            Self::Ace => cip_f_ctrl::ACE,
        }
    }

    const fn data_addr_regs(self) -> (u32, u32) {
        match self {
            Self::Spu => (UCODE_DLADDR0, UCODE_DLADDR1),
            Self::Ace => (CIP_UCODEADDR_AM0, CIP_UCODEADDR_AM1),
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Spu => "SPU",
            Self::Ace => "ACE",
        })
    }
}

/// Code and data images of one engine, in device-visible memory.
#[derive(Debug)]
pub struct UcodeBuf {
    code: CoherentBuffer,
    data: CoherentBuffer,
}

impl UcodeBuf {
    /// Code image.
    pub const fn code(&self) -> &CoherentBuffer {
        &self.code
    }

    /// Data image.
    pub const fn data(&self) -> &CoherentBuffer {
        &self.data
    }
}

/// Images of both engines. Dropping frees them.
#[derive(Debug)]
pub struct LoadedUcode {
    /// Stream processing unit.
    pub spu: UcodeBuf,
    /// Authentication / crypto engine.
    pub ace: UcodeBuf,
}

/// Microcode revisions reported by the engines after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UcodeRevision {
    /// `UCODE_REVISION`.
    pub spu: u32,
    /// `UCODE_REVISION_AM`.
    pub ace: u32,
}

/// Parameters of one CIP file transfer.
#[derive(Debug, Clone, Copy)]
struct FileDmaParam {
    cipr_start: u64,
    cipw_start: u64,
    inter_size: u32,
    total_size: u32,
    key_id1: u32,
    key_id0: u32,
    endian: u32,
    id1_en: bool,
    push: bool,
}

/// Core reset sequencing and microcode transfer.
#[derive(Debug, Clone, Copy)]
pub struct UcodeLoader<'a> {
    regs: &'a Regmap,
    spec: &'a HscSpec,
    alloc: &'a DmaAllocator,
    config: &'a HscConfig,
}

impl<'a> UcodeLoader<'a> {
    /// Bind to a chip.
    pub const fn new(
        regs: &'a Regmap,
        spec: &'a HscSpec,
        alloc: &'a DmaAllocator,
        config: &'a HscConfig,
    ) -> Self {
        Self {
            regs,
            spec,
            alloc,
            config,
        }
    }

    /// Reset every block, release all but the AP core, halt the SPU and
    /// fill the initialised RAM regions.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn core_start(&self) -> Result<()> {
        let r = self.regs;
        r.write(IOB_RESET0, !0)?;
        r.write(IOB_RESET1, !0)?;

        r.write(IOB_CLKSTOP, 0)?;
        r.write(IOB_RESET0, iob_reset0::APCORE)?;
        r.write(IOB_RESET1, 0)?;

        r.write(IOB_DEBUG, iob_debug::SPUHALT)?;

        for ram in self.spec.init_rams {
            for s in (0..ram.size).step_by(4) {
                r.write(ram.addr + s, ram.pattern)?;
            }
        }
        tracing::debug!(
            "core started, {} bytes of RAM initialised",
            self.spec.init_ram_bytes()
        );
        Ok(())
    }

    /// Release resets and stop the core clock.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn core_stop(&self) -> Result<()> {
        self.regs.write(IOB_RESET0, 0)?;
        self.regs.write(IOB_RESET1, 0)?;
        self.regs.write(IOB_CLKSTOP, !0)
    }

    fn file_channels(&self) -> Result<(&'a DmaSpec, &'a DmaSpec)> {
        let r = self.spec.dma_in(dma::CIP_IN0);
        let w = self.spec.dma_out(dma::CIP_OUT0);
        match (r, w) {
            (Some(r), Some(w)) if r.cip_ch.is_some() && r.it_ch.is_some() => Ok((r, w)),
            _ => Err(HscError::invalid_argument(format!(
                "{}: no CIP file channel pair",
                self.spec.name
            ))),
        }
    }

    fn file_channel_dma_set(&self, rd: &DmaSpec, wr: &DmaSpec, p: &FileDmaParam) -> Result<()> {
        let r = self.regs;
        let (Some(cip), Some(it)) = (rd.cip_ch, rd.it_ch) else {
            return Err(HscError::invalid_argument("CIP read channel lacks cip/it index"));
        };

        // Read side: memory ring -> CIP.
        let v = field_prep(chctrl1::LINKCH1_MASK, 1)
            | field_prep(chctrl1::STATSEL_MASK, 4)
            | chctrl1::TYPE_INTERMIT;
        r.write(cdmbc_chctrl1(rd.dma_ch), v)?;
        r.write(cdmbc_chcausectrl(rd.dma_ch), 0)?;

        let v = field_prep(chamode::ENDIAN_MASK, p.endian)
            | field_prep(chamode::AUPDT_MASK, 0)
            | chamode::TYPE_RB;
        r.write(cdmbc_chsrcamode(rd.dma_ch), v)?;
        let v = field_prep(chamode::ENDIAN_MASK, 1) | field_prep(chamode::AUPDT_MASK, 2);
        r.write(cdmbc_chdstamode(rd.dma_ch), v)?;

        let v = field_prep(chdststrtadrs::TID_MASK, chdststrtadrs::TID_UCODE)
            | field_prep(chdststrtadrs::ID1_EN_MASK, u32::from(p.id1_en))
            | field_prep(chdststrtadrs::KEY_ID1_MASK, p.key_id1)
            | field_prep(chdststrtadrs::KEY_ID0_MASK, p.key_id0);
        r.write(cdmbc_chdststrtadrsd(rd.dma_ch), v)?;
        r.write(cdmbc_chsize(rd.dma_ch), p.inter_size)?;

        let cipr_end = p.cipr_start + u64::from(p.total_size);
        rb_set_buffer(r, rd.rb_ch, p.cipr_start, cipr_end)?;
        rb_set_rp(r, rd.rb_ch, p.cipr_start)?;
        rb_set_wp(r, rd.rb_ch, cipr_end)?;

        // Write side: CIP -> engine memory.
        let v = field_prep(chctrl1::LINKCH1_MASK, 5)
            | field_prep(chctrl1::STATSEL_MASK, 4)
            | chctrl1::TYPE_INTERMIT
            | chctrl1::IND_SIZE_UND;
        r.write(cdmbc_chctrl1(wr.dma_ch), v)?;

        let v = field_prep(chamode::ENDIAN_MASK, 1) | field_prep(chamode::AUPDT_MASK, 2);
        r.write(cdmbc_chsrcamode(wr.dma_ch), v)?;
        let v = field_prep(chamode::ENDIAN_MASK, p.endian)
            | field_prep(chamode::AUPDT_MASK, 0)
            | chamode::TYPE_RB;
        r.write(cdmbc_chdstamode(wr.dma_ch), v)?;

        let cipw_end = p.cipw_start + u64::from(p.total_size);
        rb_set_buffer(r, wr.rb_ch, p.cipw_start, cipw_end)?;
        rb_set_rp(r, wr.rb_ch, cipw_end)?;
        rb_set_wp(r, wr.rb_ch, p.cipw_start)?;

        r.write(cdmbc_itsteps(it), p.total_size)?;
        r.write(cdmbc_cipmode(cip), if p.push { cipmode::PUSH } else { 0 })?;
        r.write(
            cdmbc_cippriority(cip),
            field_prep(cippriority::PRIOR_MASK, 3),
        )
    }

    fn file_channel_start(
        &self,
        rd: &DmaSpec,
        wr: &DmaSpec,
        push: bool,
        mmu_en: bool,
    ) -> Result<()> {
        let r = self.regs;
        if let Some(cip) = rd.cip_ch {
            r.write(cdmbc_cipmode(cip), if push { cipmode::PUSH } else { 0 })?;
        }

        if mmu_en {
            let v = chddr::REG_LOAD_ON | chddr::AT_CHEN_ON;
            r.write(cdmbc_chddr(rd.dma_ch), v | chddr::SET_MCB_RD)?;
            r.write(cdmbc_chddr(wr.dma_ch), v | chddr::SET_MCB_WR)?;
        }

        r.write(
            cdmbc_strt(1),
            CDMBC_STRT_CIP_KICK | rd.en.mask() | wr.en.mask(),
        )
    }

    /// Wait for write-done on `ch`, then acknowledge it and the ring status.
    fn file_channel_wait(&self, ch: &DmaSpec) -> Result<()> {
        let r = self.regs;
        let start = Instant::now();
        let mut v = r.read(cdmbc_chir(ch.dma_ch))?;
        while v & intr_mbc_ch::WDONE == 0 {
            if let Some(limit) = self.config.ucode_timeout {
                if start.elapsed() >= limit {
                    tracing::error!(
                        "CIP channel {} did not complete within {limit:?}",
                        ch.dma_ch
                    );
                    return Err(HscError::timeout(limit));
                }
            }
            std::thread::sleep(self.config.ucode_poll.max(Duration::from_micros(100)));
            v = r.read(cdmbc_chir(ch.dma_ch))?;
        }
        r.write(cdmbc_chir(ch.dma_ch), v)?;

        // Ring status is acknowledged at the channel index.
        let rb = r.read(cdmbc_rbir(ch.dma_ch))?;
        r.write(cdmbc_rbir(ch.dma_ch), rb)
    }

    fn load_dma(&self, engine: Engine, code: &CoherentBuffer) -> Result<()> {
        let (rd, wr) = self.file_channels()?;
        self.regs.write(CIP_F_CTRL, engine.cip_f_ctrl())?;

        let size = u32::try_from(code.len())
            .map_err(|_| HscError::invalid_argument(format!("{engine} code image too large")))?;
        let p = FileDmaParam {
            cipr_start: code.phys(),
            cipw_start: 0,
            inter_size: size,
            total_size: size,
            key_id1: 0,
            key_id0: 0,
            endian: 1,
            id1_en: false,
            push: true,
        };
        self.file_channel_dma_set(rd, wr, &p)?;
        self.file_channel_start(rd, wr, p.push, false)?;

        self.file_channel_wait(rd)?;
        self.file_channel_wait(wr)
    }

    /// Fetch, place and transfer the images of `engine`.
    ///
    /// # Errors
    ///
    /// `FirmwareNotFound` for a missing image, `OutOfMemory` if the images
    /// cannot be placed, `Timeout` if the transfer never completes.
    pub fn load(&self, engine: Engine, fw: &dyn FirmwareSource) -> Result<UcodeBuf> {
        let names = engine.images(self.spec);
        let code_img = fw.fetch(names.code).inspect_err(|e| {
            tracing::error!("Failed to load firmware '{}': {e}", names.code);
        })?;
        let data_img = fw.fetch(names.data).inspect_err(|e| {
            tracing::error!("Failed to load firmware '{}': {e}", names.data);
        })?;

        let code = self.alloc.alloc(code_img.len())?;
        let data = self.alloc.alloc(data_img.len())?;
        code.write_at(0, &code_img)?;
        data.write_at(0, &data_img)?;

        let (lo, hi) = engine.data_addr_regs();
        self.regs.write64(lo, hi, data.phys())?;

        self.load_dma(engine, &code)?;
        tracing::info!(
            "{engine} microcode loaded: code {} bytes, data {} bytes",
            code.len(),
            data.len()
        );
        Ok(UcodeBuf { code, data })
    }

    /// Full bring-up: core start, SPU load, SPU run, ACE load, AP core run.
    ///
    /// # Errors
    ///
    /// The first failing step's error. Images loaded before the failure
    /// are freed.
    pub fn load_all(&self, fw: &dyn FirmwareSource) -> Result<LoadedUcode> {
        self.core_start()?;

        let spu = self.load(Engine::Spu, fw)?;
        self.regs.write(IOB_DEBUG, 0)?;

        let ace = self.load(Engine::Ace, fw)?;
        self.regs.write(IOB_RESET0, 0)?;

        Ok(LoadedUcode { spu, ace })
    }

    /// Stop the core and free both image pairs.
    ///
    /// # Errors
    ///
    /// Propagates register access errors; the images are freed regardless.
    pub fn unload_all(&self, loaded: LoadedUcode) -> Result<()> {
        let res = self.core_stop();
        drop(loaded);
        tracing::debug!("microcode unloaded");
        res
    }

    /// Revisions reported by the running microcode.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn revision(&self) -> Result<UcodeRevision> {
        Ok(UcodeRevision {
            spu: self.regs.read(UCODE_REVISION)?,
            ace: self.regs.read(UCODE_REVISION_AM)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareBackend;
    use crate::backend::HscBackend;
    use crate::firmware::FirmwareMap;
    use hsc_chip::regs::{share_memory, FLT_PATN_RAM_TOP_ADDR};
    use hsc_chip::SocVariant;

    fn images() -> FirmwareMap {
        FirmwareMap::new()
            .with("hsc_spu_code.bin", vec![0x11u8; 300])
            .with("hsc_spu_data.bin", vec![0x22u8; 64])
            .with("hsc_ace_code.bin", vec![0x33u8; 128])
            .with("hsc_ace_data.bin", vec![0x44u8; 32])
    }

    #[test]
    fn load_all_streams_both_code_images() {
        let b = SoftwareBackend::new(SocVariant::Ld11);
        let regs = b.regmap();
        let alloc = b.dma_allocator();
        let cfg = HscConfig::default();
        let loader = UcodeLoader::new(&regs, b.variant().spec(), &alloc, &cfg);

        let loaded = loader.load_all(&images()).unwrap();
        let xfers = b.file_transfers();
        assert_eq!(xfers.len(), 2);
        assert_eq!(xfers[0].engine, cip_f_ctrl::SPU);
        assert_eq!(xfers[0].data, vec![0x11u8; 300]);
        assert_eq!(xfers[0].src, loaded.spu.code().phys());
        assert_eq!(xfers[1].engine, cip_f_ctrl::ACE);
        assert_eq!(xfers[1].len, 128);

        let sim = b.sim();
        assert_eq!(
            u64::from(sim.peek(UCODE_DLADDR0)),
            loaded.spu.data().phys() & 0xffff_ffff
        );
        assert_eq!(
            u64::from(sim.peek(CIP_UCODEADDR_AM0)),
            loaded.ace.data().phys() & 0xffff_ffff
        );
        assert_eq!(sim.peek(IOB_DEBUG), 0);
        assert_eq!(sim.peek(IOB_RESET0), 0);
        assert_eq!(sim.peek(FLT_PATN_RAM_TOP_ADDR), !0);
        assert_eq!(sim.peek(share_memory(0)), !0);
        assert_eq!(sim.peek(share_memory(1)), 0);

        let used = b.mapper().used();
        loader.unload_all(loaded).unwrap();
        assert!(b.mapper().used() < used);
        assert_eq!(sim.peek(IOB_CLKSTOP), !0);
    }

    #[test]
    fn reset_sequence_order() {
        let b = SoftwareBackend::new(SocVariant::Ld20);
        let regs = b.regmap();
        let alloc = b.dma_allocator();
        let cfg = HscConfig::default();
        b.sim().record_writes(true);
        UcodeLoader::new(&regs, b.variant().spec(), &alloc, &cfg)
            .load_all(&images())
            .unwrap();
        assert_eq!(b.sim().writes(IOB_RESET0), vec![!0, iob_reset0::APCORE, 0]);
        assert_eq!(b.sim().writes(IOB_DEBUG), vec![iob_debug::SPUHALT, 0]);
    }

    #[test]
    fn missing_image_aborts() {
        let b = SoftwareBackend::new(SocVariant::Ld11);
        let regs = b.regmap();
        let alloc = b.dma_allocator();
        let cfg = HscConfig::default();
        let fw = FirmwareMap::new()
            .with("hsc_spu_code.bin", vec![1u8; 16])
            .with("hsc_spu_data.bin", vec![2u8; 16]);
        let err = UcodeLoader::new(&regs, b.variant().spec(), &alloc, &cfg)
            .load_all(&fw)
            .unwrap_err();
        assert!(
            matches!(err, HscError::FirmwareNotFound { ref name } if name == "hsc_ace_code.bin")
        );
        assert_eq!(b.mapper().mappings(), 0);
    }

    #[test]
    fn stalled_transfer_times_out() {
        let b = SoftwareBackend::new(SocVariant::Ld11);
        b.set_cip_stall(true);
        let regs = b.regmap();
        let alloc = b.dma_allocator();
        let cfg = HscConfig {
            ucode_timeout: Some(Duration::from_millis(20)),
            ..HscConfig::default()
        };
        let err = UcodeLoader::new(&regs, b.variant().spec(), &alloc, &cfg)
            .load_all(&images())
            .unwrap_err();
        assert!(matches!(err, HscError::Timeout { duration_ms: 20 }));
        assert_eq!(b.mapper().mappings(), 0);
    }
}
