//! Feed pump: ring buffer to demultiplexer.
//!
//! The device writes 192-byte M2TS packets (4-byte arrival timestamp plus a
//! 188-byte TS packet) into the ring. One pump pass syncs pointers with the
//! device, hands every whole packet between the read offset and the write
//! offset (or the ring end, whichever comes first) to the [`Demux`] without
//! its timestamp, then advances the read offset. If at least half a
//! checkpoint stride is still unread, one more pass follows; never more.
//!
//! Stopping the feed resets the ring under its lock. A pass that finds the
//! feed stopped once it retakes the lock leaves the offsets alone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hsc_chip::{M2TS_PACKET_SIZE, M2TS_TIMESTAMP_SIZE, TS_PACKET_SIZE};

use crate::coherent::CoherentBuffer;
use crate::dma::DmaOut;
use crate::error::Result;
use crate::ring::RingBuffer;

/// Extra passes allowed per pump invocation.
pub const MAX_EXTRA_PASSES: u32 = 1;

/// Consumer of transport stream packets.
pub trait Demux: Send {
    /// Accept one 188-byte TS packet.
    fn accept_packet(&mut self, pkt: &[u8]);
}

impl<F> Demux for F
where
    F: FnMut(&[u8]) + Send,
{
    fn accept_packet(&mut self, pkt: &[u8]) {
        self(pkt);
    }
}

/// Counters of one output interface.
#[derive(Debug, Default)]
pub struct FeedStats {
    packets: AtomicU64,
    invocations: AtomicU64,
    extra_passes: AtomicU64,
}

/// Snapshot of [`FeedStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedCounters {
    /// Packets handed to the demultiplexer.
    pub packets: u64,
    /// Pump invocations, including those that found the feed stopped.
    pub invocations: u64,
    /// Second passes taken.
    pub extra_passes: u64,
}

impl FeedStats {
    /// Current values.
    pub fn snapshot(&self) -> FeedCounters {
        FeedCounters {
            packets: self.packets.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            extra_passes: self.extra_passes.load(Ordering::Relaxed),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Packet bytes in a contiguous run, rounded down to whole packets.
pub const fn whole_packets(cnt: u64) -> u64 {
    cnt / M2TS_PACKET_SIZE as u64 * M2TS_PACKET_SIZE as u64
}

/// Pump over one output channel, its ring offsets and its memory.
#[derive(Debug, Clone, Copy)]
pub struct FeedPump<'a> {
    dma: &'a DmaOut,
    ring: &'a Mutex<RingBuffer>,
    buf: &'a CoherentBuffer,
    running: &'a AtomicBool,
    stats: &'a FeedStats,
}

impl<'a> FeedPump<'a> {
    /// Bind the pieces of one output interface. `running` is cleared
    /// under the ring lock when the feed stops.
    pub const fn new(
        dma: &'a DmaOut,
        ring: &'a Mutex<RingBuffer>,
        buf: &'a CoherentBuffer,
        running: &'a AtomicBool,
        stats: &'a FeedStats,
    ) -> Self {
        Self {
            dma,
            ring,
            buf,
            running,
            stats,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drain available packets into `demux`. Returns packets delivered.
    ///
    /// The ring lock is held for pointer exchange and offset updates only;
    /// packet copies run without it, on bytes the device will not touch
    /// until the read offset moves.
    ///
    /// # Errors
    ///
    /// `HardwareError` if the device reports a write pointer outside the
    /// ring; offsets are left unchanged.
    pub fn run(&self, demux: &mut dyn Demux) -> Result<u64> {
        let mut delivered = 0;
        let mut pass = 0;
        loop {
            let (rd, cnt) = {
                let mut ring = lock(self.ring);
                if !self.is_running() {
                    break;
                }
                self.dma.sync(&mut ring)?;
                (ring.rd(), whole_packets(ring.cnt_to_end()))
            };

            let mut pkt = [0u8; M2TS_PACKET_SIZE];
            let mut off = 0;
            while off < cnt {
                // rd + off < size, which the buffer length bounds
                #[allow(clippy::cast_possible_truncation)]
                let at = (rd + off) as usize;
                self.buf.read_at(at, &mut pkt)?;
                demux.accept_packet(
                    &pkt[M2TS_TIMESTAMP_SIZE..M2TS_TIMESTAMP_SIZE + TS_PACKET_SIZE],
                );
                off += M2TS_PACKET_SIZE as u64;
            }
            let n = cnt / M2TS_PACKET_SIZE as u64;
            delivered += n;
            self.stats.packets.fetch_add(n, Ordering::Relaxed);

            let mut ring = lock(self.ring);
            if !self.is_running() {
                break;
            }
            ring.advance_rd(cnt);
            if pass < MAX_EXTRA_PASSES && ring.cnt() >= ring.size_chk() / 2 {
                pass += 1;
                self.stats.extra_passes.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.dma.sync(&mut ring)?;
            break;
        }
        tracing::trace!("DMA out {}: {delivered} packets", self.dma.id());
        Ok(delivered)
    }

    /// Count one invocation.
    pub fn note_invocation(&self) {
        self.stats.invocations.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareBackend;
    use crate::backend::HscBackend;
    use hsc_chip::ports::dma;
    use hsc_chip::SocVariant;

    struct Fixture {
        backend: SoftwareBackend,
        dma: DmaOut,
        ring: Mutex<RingBuffer>,
        buf: CoherentBuffer,
        running: AtomicBool,
        stats: FeedStats,
    }

    impl Fixture {
        fn pump(&self) -> FeedPump<'_> {
            FeedPump::new(&self.dma, &self.ring, &self.buf, &self.running, &self.stats)
        }
    }

    fn fixture(size: usize) -> Fixture {
        let backend = SoftwareBackend::new(SocVariant::Ld11);
        let dma = DmaOut::new(backend.regmap(), backend.variant().spec(), dma::OUT0).unwrap();
        let buf = backend.dma_allocator().alloc(size).unwrap();
        let mut ring = RingBuffer::new(buf.phys(), size as u64, size as u64 / 4);
        dma.start(&mut ring, true).unwrap();
        Fixture {
            backend,
            dma,
            ring: Mutex::new(ring),
            buf,
            running: AtomicBool::new(true),
            stats: FeedStats::default(),
        }
    }

    fn packets(n: usize) -> Vec<u8> {
        (0..n)
            .flat_map(|i| {
                let mut p = vec![0xa5u8; 4];
                p.push(0x47);
                p.extend(std::iter::repeat(i as u8).take(187));
                p
            })
            .collect()
    }

    #[test]
    fn strips_timestamp_prefix() {
        let f = fixture(192 * 64);
        f.backend.push_packets(dma::OUT0, &packets(3)).unwrap();

        let mut got = Vec::new();
        let pump = f.pump();
        let n = pump.run(&mut |p: &[u8]| got.push(p.to_vec())).unwrap();
        assert_eq!(n, 3);
        assert_eq!(got.len(), 3);
        for (i, p) in got.iter().enumerate() {
            assert_eq!(p.len(), 188);
            assert_eq!(p[0], 0x47);
            assert!(p[1..].iter().all(|&b| b == i as u8));
        }
        assert_eq!(f.ring.lock().unwrap().rd(), 192 * 3);
    }

    #[test]
    fn partial_packet_waits() {
        let f = fixture(192 * 64);
        let mut data = packets(2);
        data.truncate(192 + 100);
        f.backend.push_packets(dma::OUT0, &data).unwrap();

        let mut count = 0;
        let pump = f.pump();
        pump.run(&mut |_: &[u8]| count += 1).unwrap();
        assert_eq!(count, 1);
        assert_eq!(f.ring.lock().unwrap().rd(), 192);
    }

    #[test]
    fn wrapped_data_takes_one_extra_pass() {
        let f = fixture(192 * 16);
        // Move both pointers near the end so new data wraps.
        f.backend.push_packets(dma::OUT0, &packets(12)).unwrap();
        let pump = f.pump();
        pump.run(&mut |_: &[u8]| {}).unwrap();

        f.backend.push_packets(dma::OUT0, &packets(8)).unwrap();
        let mut count = 0;
        pump.run(&mut |_: &[u8]| count += 1).unwrap();
        assert_eq!(count, 8);
        assert_eq!(f.stats.snapshot().extra_passes, 1);
        assert_eq!(f.ring.lock().unwrap().rd(), 192 * 4);
    }

    #[test]
    fn at_most_two_passes() {
        let f = fixture(192 * 16);
        f.backend.push_packets(dma::OUT0, &packets(14)).unwrap();
        let pump = f.pump();
        pump.run(&mut |_: &[u8]| {}).unwrap();
        f.backend.push_packets(dma::OUT0, &packets(2)).unwrap();

        // The device keeps writing while packets are consumed.
        let backend = &f.backend;
        let mut refills = 0;
        pump.run(&mut |_: &[u8]| {
            if refills < 4 {
                refills += 1;
                backend.push_packets(dma::OUT0, &packets(2)).unwrap();
            }
        })
        .unwrap();
        assert_eq!(f.stats.snapshot().extra_passes, 1);
        assert_eq!(f.stats.snapshot().packets, 14 + 6);
        assert_eq!(f.ring.lock().unwrap().cnt(), 192 * 4);
    }

    #[test]
    fn stopped_feed_leaves_offsets() {
        let f = fixture(192 * 16);
        f.backend.push_packets(dma::OUT0, &packets(4)).unwrap();
        let pump = f.pump();

        let running = &f.running;
        let mut seen = 0;
        pump.run(&mut |_: &[u8]| {
            seen += 1;
            running.store(false, Ordering::Release);
        })
        .unwrap();
        assert_eq!(seen, 4);
        assert_eq!(f.ring.lock().unwrap().rd(), 0);
        assert_eq!(pump.run(&mut |_: &[u8]| unreachable!()).unwrap(), 0);
    }
}
