//! Feed pipeline tests against the simulated controller
//!
//! Packets are written device-side into the ring, the transit interrupt is
//! handled and the feed work drains the ring into a demultiplexer.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hsc_chip::board::Board;
use hsc_chip::ports::dma;
use hsc_chip::regs::tsi_intr;
use hsc_chip::SocVariant;
use hsc_driver::{
    Adapter, Chip, ChipClocks, FirmwareMap, HscBackend, HscConfig, IrqReturn, SoftwareBackend,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_test_writer()
        .try_init();
}

fn images() -> FirmwareMap {
    FirmwareMap::new()
        .with("hsc_spu_code.bin", vec![0xaau8; 512])
        .with("hsc_spu_data.bin", vec![0xbbu8; 128])
        .with("hsc_ace_code.bin", vec![0xccu8; 256])
        .with("hsc_ace_data.bin", vec![0xddu8; 64])
}

/// `n` M2TS packets: timestamp `ts:i`, sync byte, then the packet index.
fn m2ts(n: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(n * 192);
    for i in 0..n {
        out.extend_from_slice(&[0x7f, 0x7f, 0x7f, i as u8]);
        out.push(0x47);
        out.extend(std::iter::repeat(i as u8).take(187));
    }
    out
}

fn adapter(
    backend: &SoftwareBackend,
    config: &HscConfig,
    demux: Box<dyn hsc_driver::Demux>,
) -> Adapter {
    Adapter::init(
        0,
        &backend.regmap(),
        backend.variant().spec(),
        &Board::Ld11Mn884433.confs()[0],
        &backend.dma_allocator(),
        config,
        demux,
    )
    .unwrap()
}

fn wait_for(what: &str, timeout: Duration, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < timeout, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn fifty_packets_drain_in_one_invocation() {
    let backend = SoftwareBackend::new(SocVariant::Ld11);
    let config = HscConfig::default();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let a = adapter(
        &backend,
        &config,
        Box::new(move |_: &[u8]| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
    );
    a.start_feed().unwrap();

    let size = 192 * 1024 * 20;
    let before = a.dmaif().ring();
    assert_eq!((before.size(), before.size_chk()), (size, size / 4));

    backend.advance_write_pointer(dma::OUT0, 192 * 50).unwrap();
    assert_eq!(a.dmaif().irq(), IrqReturn::Handled);
    a.dmaif().flush();

    let ring = a.dmaif().ring();
    assert_eq!(count.load(Ordering::SeqCst), 50);
    assert_eq!(ring.rd() - before.rd(), 192 * 50);
    assert_eq!(ring.chk(), (ring.wr() + size / 4) % size);

    let counters = a.dmaif().counters();
    assert_eq!(counters.packets, 50);
    assert_eq!(counters.invocations, 1);
    assert_eq!(counters.extra_passes, 0);

    a.stop_feed().unwrap();
    a.release();
}

#[test]
fn demux_sees_payload_without_timestamp() {
    let backend = SoftwareBackend::new(SocVariant::Ld11);
    let config = HscConfig {
        ring_size: 192 * 256,
        ..HscConfig::default()
    };
    let got = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let g = got.clone();
    let a = adapter(
        &backend,
        &config,
        Box::new(move |p: &[u8]| g.lock().unwrap().push(p.to_vec())),
    );
    a.start_feed().unwrap();

    let data = m2ts(7);
    assert_eq!(backend.push_packets(dma::OUT0, &data).unwrap(), data.len());
    a.dmaif().irq();
    a.dmaif().flush();

    let got = got.lock().unwrap();
    assert_eq!(got.len(), 7);
    for (i, pkt) in got.iter().enumerate() {
        assert_eq!(pkt.as_slice(), &data[i * 192 + 4..(i + 1) * 192]);
    }
    drop(got);
    a.release();
}

#[test]
fn release_waits_for_running_feed_before_freeing() {
    let backend = SoftwareBackend::new(SocVariant::Ld11);
    let config = HscConfig {
        ring_size: 192 * 256,
        ..HscConfig::default()
    };
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (s, f) = (started.clone(), finished.clone());
    let a = adapter(
        &backend,
        &config,
        Box::new(move |_: &[u8]| {
            s.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            f.store(true, Ordering::SeqCst);
        }),
    );
    a.start_feed().unwrap();
    let mapped = backend.mapper().used();
    assert!(mapped >= 192 * 256);

    backend.push_packets(dma::OUT0, &m2ts(4)).unwrap();
    a.dmaif().irq();
    wait_for("feed start", Duration::from_secs(2), || started.load(Ordering::SeqCst));

    a.stop_feed().unwrap();
    let counters = a.release();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(counters.invocations, 1);
    assert_eq!(backend.mapper().used(), 0);
}

#[test]
fn queued_feed_runs_before_release_returns() {
    let backend = SoftwareBackend::new(SocVariant::Ld11);
    let config = HscConfig {
        ring_size: 192 * 256,
        ..HscConfig::default()
    };
    let a = adapter(&backend, &config, Box::new(|_: &[u8]| {}));
    a.start_feed().unwrap();
    a.stop_feed().unwrap();

    a.dmaif().schedule_feed();
    let counters = a.release();
    assert_eq!(counters.invocations, 1);
    assert_eq!(counters.packets, 0);
    assert_eq!(backend.mapper().used(), 0);
}

#[test]
fn probed_chip_delivers_through_interrupt_threads() {
    init_tracing();
    let backend = Arc::new(SoftwareBackend::new(SocVariant::Ld20));
    let config = HscConfig {
        ring_size: 192 * 1024,
        recover_delay: Duration::from_millis(30),
        ..HscConfig::default()
    };
    let chip = Chip::probe(backend.clone(), ChipClocks::always_on(), &images(), config).unwrap();

    let counts: Vec<Arc<AtomicUsize>> = (0..2).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (conf, n) in Board::Ld20Mn884434.active_confs().iter().zip(&counts) {
        let n = n.clone();
        let id = chip
            .add_adapter(
                conf,
                Box::new(move |p: &[u8]| {
                    assert_eq!(p.len(), 188);
                    n.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        chip.start_feed(id).unwrap();
    }

    backend.push_packets(dma::OUT0, &m2ts(100)).unwrap();
    backend.push_packets(dma::OUT1, &m2ts(30)).unwrap();
    wait_for("adapter 0", Duration::from_secs(5), || counts[0].load(Ordering::SeqCst) == 100);
    wait_for("adapter 1", Duration::from_secs(5), || counts[1].load(Ordering::SeqCst) == 30);

    backend.raise_sync_status(1, tsi_intr::SERR);
    wait_for("recovery", Duration::from_secs(5), || {
        chip.with_adapter(1, |a| Ok(a.tsif().recoveries())).unwrap() == 1
    });
    assert_eq!(chip.with_adapter(0, |a| Ok(a.tsif().recoveries())).unwrap(), 0);

    let counters = chip.remove();
    assert_eq!(counters[0].packets, 100);
    assert_eq!(counters[1].packets, 30);
    assert_eq!(backend.mapper().mappings(), 0);
}
