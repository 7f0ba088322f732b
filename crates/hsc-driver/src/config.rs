//! Driver tunables.
//!
//! Defaults match the hardware driver: a 3.75 MiB ring per output channel
//! drained in quarter-ring checkpoints, 100 ms before a lane that lost sync
//! is re-enabled. Environment overrides:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `HSC_RING_SIZE` | `ring_size` (bytes) |
//! | `HSC_RECOVER_DELAY_MS` | `recover_delay` |
//! | `HSC_UCODE_TIMEOUT_MS` | `ucode_timeout` (0 waits forever) |
//! | `HSC_FIRMWARE_PATH` | `firmware_path` (colon separated) |

use std::path::PathBuf;
use std::time::Duration;

use hsc_chip::M2TS_PACKET_SIZE;

use crate::error::{HscError, Result};
use crate::ring::RING_GUARD;

/// Default ring size: 20 Ki packets of 192 bytes.
pub const DEFAULT_RING_SIZE: usize = M2TS_PACKET_SIZE * 1024 * 20;

/// Driver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HscConfig {
    /// Ring buffer size per output channel, in bytes
    pub ring_size: usize,

    /// Ring size divided by this is the checkpoint stride
    pub chk_divisor: usize,

    /// Delay before a lane that reported a sync error is re-enabled
    pub recover_delay: Duration,

    /// Poll interval of the microcode transfer wait
    pub ucode_poll: Duration,

    /// Bound on the microcode transfer wait (`None` waits forever)
    pub ucode_timeout: Option<Duration>,

    /// Directories searched for microcode before the system ones
    pub firmware_path: Vec<PathBuf>,
}

impl Default for HscConfig {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            chk_divisor: 4,
            recover_delay: Duration::from_millis(100),
            ucode_poll: Duration::from_millis(1),
            ucode_timeout: Some(Duration::from_secs(5)),
            firmware_path: Vec::new(),
        }
    }
}

impl HscConfig {
    /// Defaults overlaid with `HSC_*` environment variables.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a malformed value or a configuration rejected
    /// by [`HscConfig::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// # Errors
    ///
    /// As [`HscConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("HSC_RING_SIZE") {
            cfg.ring_size = parse_num("HSC_RING_SIZE", &v)?;
        }
        if let Some(v) = lookup("HSC_RECOVER_DELAY_MS") {
            cfg.recover_delay = Duration::from_millis(parse_num("HSC_RECOVER_DELAY_MS", &v)?);
        }
        if let Some(v) = lookup("HSC_UCODE_TIMEOUT_MS") {
            let ms: u64 = parse_num("HSC_UCODE_TIMEOUT_MS", &v)?;
            cfg.ucode_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(v) = lookup("HSC_FIRMWARE_PATH") {
            cfg.firmware_path = v
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }

        cfg.validate()?;
        tracing::debug!("config: {cfg:?}");
        Ok(cfg)
    }

    /// Checkpoint stride in bytes.
    pub const fn size_chk(&self) -> usize {
        self.ring_size / self.chk_divisor
    }

    /// Check the ring geometry.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the ring is not a whole number of packets, is
    /// smaller than two checkpoint strides, or cannot hold a packet beside
    /// the guard bytes.
    pub fn validate(&self) -> Result<()> {
        if self.chk_divisor == 0 {
            return Err(HscError::invalid_argument("checkpoint divisor must be non-zero"));
        }
        if self.ring_size % M2TS_PACKET_SIZE != 0 {
            return Err(HscError::invalid_argument(format!(
                "ring size {} is not a multiple of {M2TS_PACKET_SIZE}",
                self.ring_size
            )));
        }
        if self.ring_size < M2TS_PACKET_SIZE + RING_GUARD as usize {
            return Err(HscError::invalid_argument(format!(
                "ring size {} leaves no room beside the {RING_GUARD}-byte guard",
                self.ring_size
            )));
        }
        if self.size_chk() == 0 || self.ring_size < 2 * self.size_chk() {
            return Err(HscError::invalid_argument(format!(
                "ring size {} is smaller than two checkpoints of {}",
                self.ring_size,
                self.size_chk()
            )));
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, v: &str) -> Result<T> {
    v.trim()
        .parse()
        .map_err(|_| HscError::invalid_argument(format!("{key}: cannot parse '{v}'")))
}
