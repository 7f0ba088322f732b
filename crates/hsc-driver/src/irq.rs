//! Interrupt delivery.
//!
//! The controller raises two lines: line 0 for TS input lanes and line 1
//! for stream DMA. A backend supplies one [`IrqSource`] per line; an
//! [`IrqThread`] waits on it, calls the chip handler and unmasks.
//!
//! Handlers only read and acknowledge status registers and schedule work,
//! so they never block on the feed path.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{HscError, Result};

/// Outcome of a handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Nothing pending for this device.
    None,
    /// At least one cause was acknowledged.
    Handled,
}

impl std::ops::BitOr for IrqReturn {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        if self == Self::Handled || rhs == Self::Handled {
            Self::Handled
        } else {
            Self::None
        }
    }
}

/// Interrupt lines of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqLine {
    /// TS input sync status.
    TsIn = 0,
    /// Stream DMA transit.
    Dma = 1,
}

impl IrqLine {
    /// Both lines in index order.
    pub const ALL: [Self; 2] = [Self::TsIn, Self::Dma];

    /// Interrupt index on the platform device.
    pub const fn index(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TsIn => write!(f, "irq0 (ts-in)"),
            Self::Dma => write!(f, "irq1 (dma)"),
        }
    }
}

/// A waitable interrupt line.
pub trait IrqSource: fmt::Debug + Send + Sync {
    /// Block until the line fires or `timeout` passes.
    ///
    /// Returns `true` if the line fired.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait itself fails.
    fn wait(&self, timeout: Duration) -> Result<bool>;

    /// Re-enable delivery after handling.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the unmask.
    fn unmask(&self) -> Result<()> {
        Ok(())
    }
}

/// Line that reports a firing on every wait, after sleeping.
///
/// For platforms without interrupt delivery; the handlers tolerate
/// spurious invocations.
#[derive(Debug, Clone, Copy)]
pub struct PollingIrq {
    interval: Duration,
}

impl PollingIrq {
    /// Poll every `interval`.
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl IrqSource for PollingIrq {
    fn wait(&self, timeout: Duration) -> Result<bool> {
        std::thread::sleep(self.interval.min(timeout));
        Ok(true)
    }
}

/// Line triggered from software.
#[derive(Debug, Default)]
pub struct SoftIrq {
    pending: Mutex<bool>,
    cv: Condvar,
    raised: AtomicU64,
}

impl SoftIrq {
    /// Create an idle line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the line.
    pub fn trigger(&self) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        let mut p = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *p = true;
        self.cv.notify_all();
    }

    /// Number of triggers so far.
    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }
}

impl IrqSource for SoftIrq {
    fn wait(&self, timeout: Duration) -> Result<bool> {
        let guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut p, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |p| !*p)
            .unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::take(&mut *p))
    }
}

/// Thread servicing one interrupt line.
#[derive(Debug)]
pub struct IrqThread {
    line: IrqLine,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// How long a wait may block before the stop flag is rechecked.
const WAIT_SLICE: Duration = Duration::from_millis(50);

impl IrqThread {
    /// Start servicing `line` from `source` with `handler`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn<F>(line: IrqLine, source: Arc<dyn IrqSource>, handler: F) -> Result<Self>
    where
        F: Fn() -> IrqReturn + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("hsc-irq{}", line.index()))
            .spawn(move || {
                tracing::debug!("{line} thread running");
                while !flag.load(Ordering::Acquire) {
                    match source.wait(WAIT_SLICE) {
                        Ok(true) => {
                            if handler() == IrqReturn::None {
                                tracing::trace!("{line}: spurious");
                            }
                            if let Err(e) = source.unmask() {
                                tracing::error!("{line}: unmask failed: {e}");
                            }
                        }
                        Ok(false) => {}
                        Err(e) => {
                            tracing::error!("{line}: wait failed: {e}");
                            break;
                        }
                    }
                }
                tracing::debug!("{line} thread exiting");
            })
            .map_err(HscError::from)?;
        Ok(Self {
            line,
            stop,
            handle: Some(handle),
        })
    }

    /// Line served by this thread.
    pub const fn line(&self) -> IrqLine {
        self.line
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                tracing::error!("{}: handler panicked", self.line);
            }
        }
    }
}

impl Drop for IrqThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn soft_irq_wakes_waiter_once() {
        let irq = SoftIrq::new();
        irq.trigger();
        assert!(irq.wait(Duration::from_millis(10)).unwrap());
        assert!(!irq.wait(Duration::from_millis(10)).unwrap());
        assert_eq!(irq.raised(), 1);
    }

    #[test]
    fn thread_calls_handler_per_trigger() {
        let irq = Arc::new(SoftIrq::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let t = IrqThread::spawn(IrqLine::Dma, irq.clone(), move || {
            c.fetch_add(1, Ordering::SeqCst);
            IrqReturn::Handled
        })
        .unwrap();

        irq.trigger();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while calls.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        t.stop();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn irq_return_combines() {
        assert_eq!(IrqReturn::None | IrqReturn::Handled, IrqReturn::Handled);
        assert_eq!(IrqReturn::None | IrqReturn::None, IrqReturn::None);
    }
}
