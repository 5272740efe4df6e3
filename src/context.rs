use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Longest timeout any single run or command may be given.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(86_400);

/// Shared bounds of one scan or fix run: an optional overall deadline and a
/// cancellation flag. Per-operation timeouts are derived from it and never
/// outlive it.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(deadline_after(Instant::now(), timeout)),
            cancel: CancelToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deadline for one operation started now with its own `timeout`.
    pub fn child_deadline(&self, timeout: Duration) -> Instant {
        let own = deadline_after(Instant::now(), timeout);
        match self.deadline {
            Some(shared) if shared < own => shared,
            _ => own,
        }
    }
}

fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    let capped = timeout.min(MAX_TIMEOUT);
    now.checked_add(capped).unwrap_or(now)
}
