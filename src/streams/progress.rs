use crate::platform::{BoxedListener, MaybeSend};
use futures::channel::mpsc::{UnboundedReceiver, unbounded};
use std::{fmt, time::Duration};
use tokio::time::Instant;

/// Minimum spacing between two `progress` notifications of one read.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    LoadStart,
    Progress,
    Load,
    Abort,
    Timeout,
    Error,
    LoadEnd,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LoadStart => "loadstart",
            EventType::Progress => "progress",
            EventType::Load => "load",
            EventType::Abort => "abort",
            EventType::Timeout => "timeout",
            EventType::Error => "error",
            EventType::LoadEnd => "loadend",
        }
    }

    /// Whether this event settles the outcome of a read.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::Load | EventType::Abort | EventType::Timeout | EventType::Error
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a read's progress, delivered with every lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub event_type: EventType,
    pub loaded: u64,
    /// Declared size of the read, or 0 when it was not declared.
    pub total: u64,
    pub length_computable: bool,
}

impl ProgressEvent {
    pub fn new(event_type: EventType, loaded: u64, total: Option<u64>) -> Self {
        Self {
            event_type,
            loaded,
            total: total.unwrap_or(0),
            length_computable: total.is_some(),
        }
    }

    /// `loaded / total`, when the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        if !self.length_computable || self.total == 0 {
            return None;
        }
        Some(self.loaded as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    // `None` receives every event
    filter: Option<EventType>,
    callback: BoxedListener,
}

/// Ordered subscriber list with `progress` rate limiting.
///
/// Lifecycle events always go out; `progress` is dropped when the previous
/// one was delivered less than the configured interval ago.
pub struct ProgressNotifier {
    listeners: Vec<Listener>,
    next_id: u64,
    min_interval: Duration,
    last_progress_at: Option<Instant>,
}

impl Default for ProgressNotifier {
    fn default() -> Self {
        Self::with_interval(DEFAULT_PROGRESS_INTERVAL)
    }
}

impl fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressNotifier")
            .field("listeners", &self.listeners.len())
            .field("min_interval", &self.min_interval)
            .field("last_progress_at", &self.last_progress_at)
            .finish()
    }
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            listeners: Vec::new(),
            next_id: 0,
            min_interval,
            last_progress_at: None,
        }
    }

    pub fn set_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    pub fn last_progress_at(&self) -> Option<Instant> {
        self.last_progress_at
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Register `callback` for events of `filter`, or for every event when
    /// `filter` is `None`.
    pub fn add_listener<F>(&mut self, filter: Option<EventType>, callback: F) -> ListenerId
    where
        F: FnMut(&ProgressEvent) + MaybeSend + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push(Listener {
            id,
            filter,
            callback: Box::new(callback),
        });
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        self.listeners.len() != before
    }

    /// Forward every event into a channel. The channel closes when the
    /// notifier is cleared or dropped.
    pub fn subscribe(&mut self) -> UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = unbounded();
        self.add_listener(None, move |event| {
            // A dropped receiver just stops listening
            let _ = tx.unbounded_send(*event);
        });
        rx
    }

    /// Deliver `event` to matching listeners, in registration order.
    ///
    /// Returns `false` if a `progress` event was throttled.
    pub fn notify(&mut self, event: ProgressEvent) -> bool {
        if event.event_type == EventType::Progress {
            let now = Instant::now();
            if let Some(last) = self.last_progress_at {
                if now.duration_since(last) < self.min_interval {
                    return false;
                }
            }
            self.last_progress_at = Some(now);
        }

        for listener in &mut self.listeners {
            if listener.filter.is_none_or(|wanted| wanted == event.event_type) {
                (listener.callback)(&event);
            }
        }
        true
    }

    /// Drop every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SharedPtr;
    use futures::StreamExt;
    use parking_lot::Mutex;

    fn progress(loaded: u64) -> ProgressEvent {
        ProgressEvent::new(EventType::Progress, loaded, None)
    }

    #[test]
    fn payload_reflects_declared_total() {
        let unknown = ProgressEvent::new(EventType::LoadStart, 0, None);
        assert_eq!(unknown.total, 0);
        assert!(!unknown.length_computable);
        assert_eq!(unknown.fraction(), None);

        let known = ProgressEvent::new(EventType::Progress, 25, Some(100));
        assert_eq!(known.total, 100);
        assert!(known.length_computable);
        assert_eq!(known.fraction(), Some(0.25));
    }

    #[test]
    fn event_names_match_progress_event_model() {
        let names: Vec<_> = [
            EventType::LoadStart,
            EventType::Progress,
            EventType::Load,
            EventType::Abort,
            EventType::Timeout,
            EventType::Error,
            EventType::LoadEnd,
        ]
        .iter()
        .map(|t| t.to_string())
        .collect();
        assert_eq!(
            names,
            ["loadstart", "progress", "load", "abort", "timeout", "error", "loadend"]
        );
        assert!(EventType::Timeout.is_terminal());
        assert!(!EventType::LoadEnd.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn throttles_only_progress() {
        let mut notifier = ProgressNotifier::new();
        let rx = notifier.subscribe();

        assert!(notifier.notify(ProgressEvent::new(EventType::LoadStart, 0, None)));
        assert!(notifier.notify(progress(1)));
        assert!(!notifier.notify(progress(2)));

        tokio::time::advance(Duration::from_millis(49)).await;
        assert!(!notifier.notify(progress(3)));
        assert!(notifier.notify(ProgressEvent::new(EventType::Load, 3, None)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(notifier.notify(progress(4)));
        assert!(notifier.notify(ProgressEvent::new(EventType::LoadEnd, 4, None)));

        notifier.clear();
        let seen: Vec<_> = rx.map(|e| (e.event_type, e.loaded)).collect().await;
        assert_eq!(
            seen,
            vec![
                (EventType::LoadStart, 0),
                (EventType::Progress, 1),
                (EventType::Load, 3),
                (EventType::Progress, 4),
                (EventType::LoadEnd, 4),
            ]
        );
    }

    #[test]
    fn filtered_listeners_see_only_their_type() {
        let mut notifier = ProgressNotifier::new();
        let seen = SharedPtr::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        notifier.add_listener(Some(EventType::Load), move |e| sink.lock().push(e.event_type));
        let sink = seen.clone();
        let all = notifier.add_listener(None, move |e| sink.lock().push(e.event_type));

        notifier.notify(ProgressEvent::new(EventType::LoadStart, 0, None));
        notifier.notify(ProgressEvent::new(EventType::Load, 0, None));
        assert!(notifier.remove_listener(all));
        assert!(!notifier.remove_listener(all));
        notifier.notify(ProgressEvent::new(EventType::LoadEnd, 0, None));

        assert_eq!(
            *seen.lock(),
            vec![EventType::LoadStart, EventType::Load, EventType::Load]
        );
    }
}
