//! Bounded, cancellable polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default pause between header checks once spinning is exhausted.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_nanos(100);

/// Default number of busy spins before sleeping between checks.
pub const DEFAULT_SPIN: u32 = 64;

/// Default bound on how long to wait for the peer.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a side waits for the header to reach the state it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Checks done back to back (with a CPU spin hint) before sleeping.
    pub spin: u32,
    /// Sleep between checks after the spin budget is used up.
    pub poll_interval: Duration,
    /// Give up after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            spin: DEFAULT_SPIN,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl WaitPolicy {
    /// Same policy without a timeout.
    pub fn forever(self) -> Self {
        Self {
            timeout: None,
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }
}

/// Cooperative cancellation for a pending wait. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Why a wait ended without the condition becoming true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stopped {
    TimedOut(Duration),
    Cancelled,
}

/// Call `check` until it yields a value, an error, or the policy gives up.
pub(crate) fn poll<T, E>(
    policy: &WaitPolicy,
    cancel: Option<&CancelToken>,
    mut check: impl FnMut() -> Result<Option<T>, E>,
    stopped: impl FnOnce(Stopped) -> E,
) -> Result<T, E> {
    let start = Instant::now();
    let mut spins = 0u32;

    loop {
        if let Some(value) = check()? {
            return Ok(value);
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(stopped(Stopped::Cancelled));
        }
        if let Some(timeout) = policy.timeout
            && start.elapsed() >= timeout
        {
            return Err(stopped(Stopped::TimedOut(start.elapsed())));
        }

        if spins < policy.spin {
            spins += 1;
            std::hint::spin_loop();
        } else {
            std::thread::sleep(policy.poll_interval);
        }
    }
}
