//! Deferred work items.
//!
//! A [`Work`] owns one worker thread running one function. Scheduling is
//! single-flight: while the item is pending, further [`Work::schedule`]
//! calls are no-ops. Scheduling while the function runs queues exactly one
//! more run. [`Work::schedule_after`] delays the run; a pending item keeps
//! its original deadline.
//!
//! Interrupt handlers only schedule; the function runs on the worker
//! thread, where it may block on locks.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{HscError, Result};

#[derive(Debug, Default)]
struct State {
    deadline: Option<Instant>,
    running: bool,
    shutdown: bool,
    runs: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, g: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.cv.wait(g).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-flight deferred function.
pub struct Work {
    name: String,
    shared: Arc<Shared>,
    th: Option<JoinHandle<()>>,
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.lock();
        f.debug_struct("Work")
            .field("name", &self.name)
            .field("pending", &st.deadline.is_some())
            .field("running", &st.running)
            .field("runs", &st.runs)
            .finish()
    }
}

impl Work {
    /// Start a worker thread named `name` for `f`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn new<F>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared::default());
        let s = Arc::clone(&shared);
        let th = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker(&s, &f))
            .map_err(|e| HscError::hardware_error(format!("cannot spawn {name}: {e}")))?;
        Ok(Self {
            name,
            shared,
            th: Some(th),
        })
    }

    /// Run the function as soon as possible. Returns `false` if already
    /// pending.
    pub fn schedule(&self) -> bool {
        self.schedule_after(Duration::ZERO)
    }

    /// Run the function after `delay`. Returns `false` if already pending,
    /// in which case the earlier deadline stands.
    pub fn schedule_after(&self, delay: Duration) -> bool {
        let mut st = self.shared.lock();
        if st.shutdown || st.deadline.is_some() {
            return false;
        }
        st.deadline = Some(Instant::now() + delay);
        drop(st);
        self.shared.cv.notify_all();
        true
    }

    /// Whether a run is queued and has not started.
    pub fn is_pending(&self) -> bool {
        self.shared.lock().deadline.is_some()
    }

    /// Completed runs.
    pub fn runs(&self) -> u64 {
        self.shared.lock().runs
    }

    /// Run a pending item now and wait until the function is idle.
    ///
    /// Must not be called from the function itself.
    pub fn flush(&self) {
        let mut st = self.shared.lock();
        if st.deadline.is_some() {
            st.deadline = Some(Instant::now());
            self.shared.cv.notify_all();
        }
        while (st.deadline.is_some() || st.running) && !st.shutdown {
            st = self.shared.wait(st);
        }
    }

    /// Drop a pending run and wait for a running one to finish.
    ///
    /// Must not be called from the function itself.
    pub fn cancel(&self) {
        let mut st = self.shared.lock();
        st.deadline = None;
        while st.running {
            st = self.shared.wait(st);
        }
    }
}

fn worker(s: &Shared, f: &dyn Fn()) {
    let mut st = s.lock();
    loop {
        if st.shutdown {
            return;
        }
        match st.deadline {
            None => st = s.wait(st),
            Some(at) => {
                let now = Instant::now();
                if now < at {
                    st = s
                        .cv
                        .wait_timeout(st, at - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    continue;
                }
                st.deadline = None;
                st.running = true;
                drop(st);

                f();

                st = s.lock();
                st.running = false;
                st.runs += 1;
                s.cv.notify_all();
            }
        }
    }
}

impl Drop for Work {
    fn drop(&mut self) {
        {
            let mut st = self.shared.lock();
            st.deadline = None;
            st.shutdown = true;
        }
        self.shared.cv.notify_all();
        if let Some(th) = self.th.take() {
            if th.join().is_err() {
                tracing::error!("{}: worker panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Work) {
        let n = Arc::new(AtomicUsize::new(0));
        let c = n.clone();
        let w = Work::new("test-work", move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (n, w)
    }

    #[test]
    fn pending_schedule_is_a_noop() {
        let (n, w) = counter();
        assert!(w.schedule_after(Duration::from_millis(50)));
        assert!(!w.schedule_after(Duration::from_millis(50)));
        assert!(!w.schedule());
        assert!(w.is_pending());
        thread::sleep(Duration::from_millis(150));
        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert!(!w.is_pending());
    }

    #[test]
    fn flush_runs_pending_item_immediately() {
        let (n, w) = counter();
        w.schedule_after(Duration::from_secs(60));
        w.flush();
        assert_eq!(n.load(Ordering::SeqCst), 1);
        assert_eq!(w.runs(), 1);
    }

    #[test]
    fn cancel_drops_pending_item() {
        let (n, w) = counter();
        w.schedule_after(Duration::from_millis(30));
        w.cancel();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(n.load(Ordering::SeqCst), 0);
        assert!(w.schedule());
        w.flush();
        assert_eq!(n.load(Ordering::SeqCst), 1);
    }
}
