use crate::platform::{BoxedAbortListener, MaybeSend, SharedPtr};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};
use tokio::time::Instant;

/// Why a signal was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    Aborted(Option<String>),
    /// The signal's deadline passed.
    Timeout,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Aborted(Some(reason)) => write!(f, "aborted: {}", reason),
            AbortReason::Aborted(None) => write!(f, "aborted"),
            AbortReason::Timeout => write!(f, "signal timed out"),
        }
    }
}

struct SignalState {
    aborted: AtomicBool,
    reason: Mutex<Option<AbortReason>>,
    deadline: Option<Instant>,
    // Signals this one follows (see `AbortSignal::any`)
    parents: Vec<AbortSignal>,
    listeners: Mutex<Vec<(u64, BoxedAbortListener)>>,
    next_listener_id: AtomicU64,
}

/// Cooperative cancellation flag shared between an [`AbortController`] and
/// the readers observing it.
///
/// Nothing is interrupted when a signal aborts: readers poll
/// [`aborted`](Self::aborted) at their own checkpoints. Deadline and derived
/// signals are settled lazily by that same poll.
#[derive(Clone)]
pub struct AbortSignal {
    state: SharedPtr<SignalState>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.state.aborted.load(Ordering::SeqCst))
            .field("reason", &*self.state.reason.lock())
            .field("deadline", &self.state.deadline)
            .finish()
    }
}

impl AbortSignal {
    fn with_parts(deadline: Option<Instant>, parents: Vec<AbortSignal>) -> Self {
        Self {
            state: SharedPtr::new(SignalState {
                aborted: AtomicBool::new(false),
                reason: Mutex::new(None),
                deadline,
                parents,
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    /// A signal that is already aborted with `reason`.
    pub fn abort(reason: AbortReason) -> Self {
        let signal = Self::with_parts(None, Vec::new());
        signal.settle(reason);
        signal
    }

    /// A signal that aborts with [`AbortReason::Timeout`] once `duration`
    /// has elapsed.
    pub fn timeout(duration: Duration) -> Self {
        Self::with_parts(Some(Instant::now() + duration), Vec::new())
    }

    /// A signal that aborts as soon as any of `signals` has, adopting the
    /// reason of the first one found aborted.
    pub fn any<I>(signals: I) -> Self
    where
        I: IntoIterator<Item = AbortSignal>,
    {
        let signal = Self::with_parts(None, signals.into_iter().collect());
        // Settle right away if an input is already aborted
        signal.aborted();
        signal
    }

    pub fn aborted(&self) -> bool {
        if self.state.aborted.load(Ordering::SeqCst) {
            return true;
        }

        if let Some(deadline) = self.state.deadline {
            if Instant::now() >= deadline {
                self.settle(AbortReason::Timeout);
                return true;
            }
        }

        for parent in &self.state.parents {
            if let Some(reason) = parent.reason() {
                self.settle(reason);
                return true;
            }
        }

        false
    }

    /// The abort reason, or `None` while the signal is still live.
    pub fn reason(&self) -> Option<AbortReason> {
        if !self.aborted() {
            return None;
        }
        self.state.reason.lock().clone()
    }

    /// Register `listener` to run once when the signal aborts.
    ///
    /// Listeners added after the signal has aborted never run. Dropping the
    /// returned guard detaches the listener.
    pub fn add_abort_listener<F>(&self, listener: F) -> AbortListenerGuard
    where
        F: FnOnce(&AbortReason) + MaybeSend + 'static,
    {
        self.push_listener(Box::new(listener))
    }

    fn push_listener(&self, listener: BoxedAbortListener) -> AbortListenerGuard {
        let id = self.state.next_listener_id.fetch_add(1, Ordering::SeqCst);
        if !self.state.aborted.load(Ordering::SeqCst) {
            self.state.listeners.lock().push((id, listener));
        }
        AbortListenerGuard {
            signal: self.clone(),
            id,
        }
    }

    fn settle(&self, reason: AbortReason) {
        {
            let mut slot = self.state.reason.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(reason.clone());
            self.state.aborted.store(true, Ordering::SeqCst);
        }

        // Run listeners outside the lock so they may touch the signal
        let listeners = std::mem::take(&mut *self.state.listeners.lock());
        for (_, listener) in listeners {
            listener(&reason);
        }
    }
}

/// Detaches an abort listener when dropped.
#[must_use = "dropping the guard detaches the listener immediately"]
pub struct AbortListenerGuard {
    signal: AbortSignal,
    id: u64,
}

impl Drop for AbortListenerGuard {
    fn drop(&mut self) {
        self.signal
            .state
            .listeners
            .lock()
            .retain(|(id, _)| *id != self.id);
    }
}

/// Owner side of an [`AbortSignal`].
#[derive(Debug, Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl Default for AbortController {
    fn default() -> Self {
        Self {
            signal: AbortSignal::with_parts(None, Vec::new()),
        }
    }
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self) {
        self.signal.settle(AbortReason::Aborted(None));
    }

    /// Abort with an explicit reason. Only the first abort takes effect.
    pub fn abort_with(&self, reason: AbortReason) {
        self.signal.settle(reason);
    }
}
