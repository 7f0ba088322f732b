//! Command-line interface for the UniPhier HSC.
//!
//! ```text
//! USAGE:
//!   hsc variants                     List SoC variants
//!   hsc spec <variant>               Dump routing, TS input and DMA tables
//!   hsc boards                       List board wiring presets
//!   hsc discover                     List HSC platform devices
//!   hsc bind-vfio <dev>              Bind a device to vfio-platform (root)
//!   hsc unbind-vfio <dev>            Unbind a device from vfio-platform (root)
//!   hsc iommu-group <dev>            Query the IOMMU group of a device
//!   hsc capture <dev> ...            Record a transport stream over VFIO
//!   hsc simulate ...                 Run the feed pipeline on the simulator
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hsc_chip::ports::{css_in, css_out};
use hsc_chip::{Board, SocVariant, M2TS_PACKET_SIZE, TS_PACKET_SIZE};
use hsc_driver::{
    Chip, ChipClocks, DeviceManager, FeedCounters, FirmwareDir, FirmwareMap, HscBackend,
    HscConfig, SoftwareBackend, VfioBackend,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hsc", about = "UniPhier High-speed Stream Controller CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List SoC variants with their port and channel counts.
    Variants,
    /// Dump the tables of one SoC variant.
    Spec {
        /// Variant name (ld11, ld20).
        variant: SocVariant,
    },
    /// List board wiring presets.
    Boards,
    /// List HSC platform devices.
    Discover,
    /// Bind a device to vfio-platform (requires root / CAP_SYS_ADMIN).
    BindVfio {
        /// Platform device name (e.g. 65000000.hsc).
        device: String,
    },
    /// Unbind a device from vfio-platform.
    UnbindVfio {
        /// Platform device name (e.g. 65000000.hsc).
        device: String,
    },
    /// Query the IOMMU group for a device.
    IommuGroup {
        /// Platform device name (e.g. 65000000.hsc).
        device: String,
    },
    /// Probe a device over VFIO and record one adapter's stream.
    Capture {
        /// Platform device name (e.g. 65000000.hsc).
        device: String,
        /// Board wiring preset.
        #[arg(long)]
        board: Board,
        /// Adapter index on the board.
        #[arg(long, default_value_t = 0)]
        adapter: usize,
        /// Recording length.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Output file for 188-byte TS packets.
        #[arg(long, short)]
        output: PathBuf,
        /// Extra directory searched for microcode first.
        #[arg(long)]
        firmware_dir: Option<PathBuf>,
    },
    /// Run the whole pipeline against the simulated controller.
    Simulate {
        /// Board wiring preset.
        #[arg(long, default_value = "ld20-mn884434")]
        board: Board,
        /// Packets pushed into each adapter.
        #[arg(long, default_value_t = 10_000)]
        packets: usize,
        /// Raise a sync loss on every lane halfway through.
        #[arg(long)]
        sync_loss: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Variants => cmd_variants(),
        Cmd::Spec { variant } => cmd_spec(variant),
        Cmd::Boards => cmd_boards(),
        Cmd::Discover => cmd_discover()?,
        Cmd::BindVfio { device } => cmd_bind_vfio(&device)?,
        Cmd::UnbindVfio { device } => cmd_unbind_vfio(&device)?,
        Cmd::IommuGroup { device } => cmd_iommu_group(&device)?,
        Cmd::Capture {
            device,
            board,
            adapter,
            seconds,
            output,
            firmware_dir,
        } => cmd_capture(
            &device,
            board,
            adapter,
            Duration::from_secs(seconds),
            &output,
            firmware_dir,
        )?,
        Cmd::Simulate {
            board,
            packets,
            sync_loss,
        } => cmd_simulate(board, packets, sync_loss)?,
    }

    Ok(())
}

fn cmd_variants() {
    for v in SocVariant::ALL {
        let s = v.spec();
        let present = |t: &[Option<hsc_chip::spec::DmaSpec>]| t.iter().flatten().count();
        println!("{v}  ({})", s.compatible);
        println!("     CSS   {} in / {} out", s.css_in.len(), s.css_out.len());
        println!(
            "     TSI   {}   DMA  {} in / {} out",
            s.ts_in.iter().flatten().count(),
            present(s.dma_in),
            present(s.dma_out)
        );
        println!("     SPU   {} + {}", s.ucode_spu.code, s.ucode_spu.data);
        println!("     ACE   {} + {}", s.ucode_ace.code, s.ucode_ace.data);
        println!("     RAM   {} bytes initialised", s.init_ram_bytes());
        println!();
    }
}

fn cmd_spec(variant: SocVariant) {
    let s = variant.spec();
    println!("{variant} ({})", s.compatible);

    println!("\nCSS outputs:");
    for (port, p) in s.css_out.iter().enumerate() {
        let name = css_out::name(port).unwrap_or("-");
        match p.sel {
            Some(sel) => println!(
                "  {port:>2} {name:<8} sel {:#06x}[{}:{}]  pol {}",
                sel.reg,
                sel.shift + 4,
                sel.shift,
                if p.pol.is_some() { "yes" } else { "no" }
            ),
            None => println!("  {port:>2} {name:<8} -"),
        }
    }

    println!("\nCSS inputs with polarity control:");
    for (port, p) in s.css_in.iter().enumerate() {
        if let Some(pol) = p.pol {
            println!(
                "  {port:>2} {:<8} {:#06x} sync={:?} val={:?} clk={:?}",
                css_in::name(port).unwrap_or("-"),
                pol.reg,
                pol.sync,
                pol.val,
                pol.clk
            );
        }
    }

    println!("\nTS inputs:");
    for (tsi, t) in s.ts_in.iter().enumerate() {
        if let Some(t) = t {
            println!("  TSI{tsi}  intr {:#06x} bit {}", t.intr.reg, t.intr.shift);
        }
    }

    for (label, table) in [("DMA inputs", s.dma_in), ("DMA outputs", s.dma_out)] {
        println!("\n{label}:");
        println!("  id  ch  rb  cip  it   td   en        intr");
        for (id, d) in table.iter().enumerate() {
            let Some(d) = d else { continue };
            let opt = |v: Option<u32>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
            println!(
                "  {id:>2} {:>3} {:>3} {:>4} {:>3} {:>4}   {:#06x}:{:<2} {:#06x}:{}",
                d.dma_ch,
                d.rb_ch,
                opt(d.cip_ch),
                opt(d.it_ch),
                opt(d.td_ch),
                d.en.reg,
                d.en.shift,
                d.intr.reg,
                d.intr.shift
            );
        }
    }
}

fn cmd_boards() {
    for b in Board::ALL {
        println!("{b}  ({}, {} adapters)", b.variant(), b.adapters());
        for (i, c) in b.confs().iter().enumerate() {
            let active = if i < b.adapters() { "" } else { "  (unused)" };
            println!(
                "  [{i}] {} -> {} -> TSI{}  DPLL{}  DMA out {}{active}",
                css_in::name(c.css_in).unwrap_or("?"),
                css_out::name(c.css_out).unwrap_or("?"),
                hsc_chip::ports::css_out_to_ts_in(c.css_out).map_or(-1, |t| t as i64),
                c.dpll,
                c.dma_out
            );
        }
        println!();
    }
}

fn cmd_discover() -> Result<()> {
    let mgr = DeviceManager::discover()?;

    println!("HSC devices: {}", mgr.device_count());
    println!();

    for info in mgr.devices() {
        println!("{}  {}", info.name, info.variant);
        println!(
            "     driver  {}",
            info.driver.as_deref().unwrap_or("(none)")
        );
        match info.iommu_group {
            Some(g) => println!("     IOMMU   group {g}"),
            None => println!("     IOMMU   (none)"),
        }
    }

    Ok(())
}

fn cmd_bind_vfio(device: &str) -> Result<()> {
    println!("Binding {device} to vfio-platform ...");
    hsc_driver::bind_to_vfio(device)?;
    let group = hsc_driver::iommu_group(device)?;
    println!("Done. IOMMU group: {group}");
    println!("Grant access:  sudo chown $USER /dev/vfio/{group}");
    Ok(())
}

fn cmd_unbind_vfio(device: &str) -> Result<()> {
    println!("Unbinding {device} from vfio-platform ...");
    hsc_driver::unbind_from_vfio(device)?;
    println!("Done.");
    Ok(())
}

fn cmd_iommu_group(device: &str) -> Result<()> {
    let group = hsc_driver::iommu_group(device)?;
    println!("IOMMU group for {device}: {group}");
    println!("Device file: /dev/vfio/{group}");
    Ok(())
}

fn print_counters(id: usize, c: &FeedCounters) {
    println!(
        "adapter {id}: {} packets, {} feed runs, {} extra passes",
        c.packets, c.invocations, c.extra_passes
    );
}

fn cmd_capture(
    device: &str,
    board: Board,
    adapter: usize,
    duration: Duration,
    output: &Path,
    firmware_dir: Option<PathBuf>,
) -> Result<()> {
    let conf = *board
        .active_confs()
        .get(adapter)
        .with_context(|| format!("{board} has no adapter {adapter}"))?;

    let mut config = HscConfig::from_env()?;
    if let Some(dir) = firmware_dir {
        config.firmware_path.insert(0, dir);
    }
    let firmware = FirmwareDir::with_system_dirs(&config.firmware_path);

    let backend = VfioBackend::init(device).with_context(|| format!("opening {device}"))?;
    if backend.variant() != board.variant() {
        bail!(
            "{device} is an {} controller, {board} needs {}",
            backend.variant(),
            board.variant()
        );
    }
    let chip = Chip::probe(Arc::new(backend), ChipClocks::always_on(), &firmware, config)
        .context("bring-up failed")?;
    println!(
        "{} HSC rev {:#x}, ucode SPU {:#x} ACE {:#x}",
        chip.variant(),
        chip.hsc_revision(),
        chip.ucode_revision().spu,
        chip.ucode_revision().ace
    );

    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let out = Arc::new(Mutex::new(BufWriter::new(file)));
    let sink = Arc::clone(&out);
    let id = chip.add_adapter(
        &conf,
        Box::new(move |pkt: &[u8]| {
            let mut w = sink.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Err(e) = w.write_all(pkt) {
                tracing::error!("write failed: {e}");
            }
        }),
    )?;

    chip.start_feed(id)?;
    println!("Recording adapter {adapter} for {}s to {} ...", duration.as_secs(), output.display());
    std::thread::sleep(duration);
    chip.stop_feed(id)?;

    let counters = chip.remove();
    out.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .flush()
        .context("flushing output")?;
    for (i, c) in counters.iter().enumerate() {
        print_counters(i, c);
    }
    Ok(())
}

/// Microcode stand-ins the simulator accepts.
fn sim_firmware(variant: SocVariant) -> FirmwareMap {
    let s = variant.spec();
    FirmwareMap::new()
        .with(s.ucode_spu.code, vec![0u8; 4096])
        .with(s.ucode_spu.data, vec![0u8; 1024])
        .with(s.ucode_ace.code, vec![0u8; 4096])
        .with(s.ucode_ace.data, vec![0u8; 1024])
}

/// `n` M2TS packets with a running continuity counter on PID `pid`.
fn synthetic_stream(pid: u16, n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n * M2TS_PACKET_SIZE);
    for i in 0..n {
        let ats = (i as u32).wrapping_mul(1000).to_be_bytes();
        out.extend_from_slice(&ats);
        let [hi, lo] = pid.to_be_bytes();
        out.extend_from_slice(&[0x47, hi & 0x1f, lo, 0x10 | (i as u8 & 0x0f)]);
        out.resize(out.len() + TS_PACKET_SIZE - 4, 0xff);
    }
    out
}

fn cmd_simulate(board: Board, packets: usize, sync_loss: bool) -> Result<()> {
    let variant = board.variant();
    let backend = Arc::new(SoftwareBackend::new(variant));
    let config = HscConfig::from_env()?;
    let chip = Chip::probe(
        backend.clone(),
        ChipClocks::always_on(),
        &sim_firmware(variant),
        config,
    )?;

    let bad = Arc::new(AtomicU64::new(0));
    for conf in board.active_confs() {
        let bad = Arc::clone(&bad);
        let id = chip.add_adapter(
            conf,
            Box::new(move |pkt: &[u8]| {
                if pkt.len() != TS_PACKET_SIZE || pkt[0] != 0x47 {
                    bad.fetch_add(1, Ordering::Relaxed);
                }
            }),
        )?;
        chip.start_feed(id)?;
    }

    let start = Instant::now();
    for (id, conf) in board.active_confs().iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let data = synthetic_stream(0x100 + id as u16, packets);
        let mut off = 0;
        while off < data.len() {
            let n = backend.push_packets(conf.dma_out, &data[off..])?;
            off += n;
            if n == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
            if sync_loss && off >= data.len() / 2 && off - n < data.len() / 2 {
                let tsi = hsc_chip::ports::css_out_to_ts_in(conf.css_out).unwrap_or(0);
                backend.raise_sync_status(tsi, hsc_chip::regs::tsi_intr::SERR);
            }
        }
    }

    let want = packets as u64;
    let deadline = Instant::now() + Duration::from_secs(30);
    for id in 0..chip.adapter_count() {
        while chip.counters(id)?.packets < want {
            if Instant::now() > deadline {
                bail!("adapter {id} stalled at {} packets", chip.counters(id)?.packets);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    let elapsed = start.elapsed();
    let recoveries: Vec<u64> = (0..chip.adapter_count())
        .map(|id| chip.with_adapter(id, |a| Ok(a.tsif().recoveries())))
        .collect::<hsc_driver::Result<_>>()?;

    let counters = chip.remove();
    println!("{board}: {packets} packets per adapter in {elapsed:.2?}");
    for (id, c) in counters.iter().enumerate() {
        print_counters(id, c);
        if sync_loss {
            println!("           {} lane recoveries", recoveries[id]);
        }
    }
    let bad = bad.load(Ordering::Relaxed);
    if bad > 0 {
        bail!("{bad} malformed packets");
    }
    Ok(())
}
