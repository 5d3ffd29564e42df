use super::{
    buffer::{DEFAULT_CHUNK_SIZE, GrowableByteBuffer, MAX_INITIAL_CAPACITY},
    error::{ErrorKind, ReadError, ReadResult},
    options::ReadOptions,
    progress::{EventType, ListenerId, ProgressEvent, ProgressNotifier},
    signal::{AbortReason, AbortSignal},
    source::ChunkSource,
};
use crate::platform::{MaybeSend, SharedPtr};
use bytes::Bytes;
use futures::channel::mpsc::UnboundedReceiver;
use parking_lot::Mutex;
use std::{
    fmt,
    ops::{Deref, DerefMut},
};
use tokio::time::Instant;

/// Lifecycle of a [`StreamReader`]. Moves forward only, once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Empty,
    Loading,
    Done,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::Empty => write!(f, "EMPTY"),
            ReadyState::Loading => write!(f, "LOADING"),
            ReadyState::Done => write!(f, "DONE"),
        }
    }
}

/// Single-use reader that drains a [`ChunkSource`] into one contiguous
/// buffer, reporting progress to its listeners.
///
/// Events of one read arrive as `loadstart`, zero or more throttled
/// `progress`, exactly one of `load`/`abort`/`timeout`/`error`, then
/// `loadend`. Listeners are dropped once `loadend` has been delivered.
///
/// Cancellation is cooperative: the abort signal is checked once per chunk,
/// after the pull completes, so an abort only takes effect at a chunk
/// boundary.
#[derive(Debug)]
pub struct StreamReader {
    ready_state: ReadyState,
    loaded_byte_length: u64,
    total_byte_length: Option<u64>,
    notifier: ProgressNotifier,
}

impl Default for StreamReader {
    fn default() -> Self {
        Self {
            ready_state: ReadyState::Empty,
            loaded_byte_length: 0,
            total_byte_length: None,
            notifier: ProgressNotifier::new(),
        }
    }
}

impl StreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn loaded_byte_length(&self) -> u64 {
        self.loaded_byte_length
    }

    pub fn total_byte_length(&self) -> Option<u64> {
        self.total_byte_length
    }

    pub fn add_event_listener<F>(&mut self, event_type: EventType, listener: F) -> ListenerId
    where
        F: FnMut(&ProgressEvent) + MaybeSend + 'static,
    {
        self.notifier.add_listener(Some(event_type), listener)
    }

    /// Listen to every event type.
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ProgressEvent) + MaybeSend + 'static,
    {
        self.notifier.add_listener(None, listener)
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        self.notifier.remove_listener(id)
    }

    /// Receive every event of the read as a stream. It ends after `loadend`.
    pub fn subscribe(&mut self) -> UnboundedReceiver<ProgressEvent> {
        self.notifier.subscribe()
    }

    /// Read `source` to exhaustion and return its bytes.
    ///
    /// Fails without emitting any event when the reader was already used or
    /// the signal is already aborted. Any other failure discards the partial
    /// buffer and returns the original error. Dropping the returned future
    /// mid-read finishes the reader with `abort` and `loadend`.
    #[tracing::instrument(
        name = "stream_reader.read",
        skip_all,
        fields(total_byte_length = ?options.total_byte_length)
    )]
    pub async fn read<S>(&mut self, mut source: S, options: ReadOptions) -> ReadResult<Bytes>
    where
        S: ChunkSource,
    {
        if self.ready_state != ReadyState::Empty {
            return Err(ReadError::InvalidState(self.ready_state));
        }
        let signal = options.effective_signal();
        if signal.as_ref().is_some_and(AbortSignal::aborted) {
            return Err(ReadError::Aborted("already aborted".into()));
        }

        let mut reader = LoadingGuard { reader: self };
        reader.ready_state = ReadyState::Loading;
        reader.total_byte_length = options.total_byte_length;
        reader.notifier.set_interval(options.progress_interval);

        let abort_requested_at = SharedPtr::new(Mutex::new(None));
        let abort_listener = signal.as_ref().map(|signal| {
            let slot = SharedPtr::clone(&abort_requested_at);
            signal.add_abort_listener(move |_| *slot.lock() = Some(Instant::now()))
        });

        let capacity = initial_capacity(options.total_byte_length);
        let mut buffer = GrowableByteBuffer::with_capacity(capacity);
        tracing::debug!(capacity, "loadstart");
        reader.emit(EventType::LoadStart);

        let outcome = match reader.pump(&mut source, &mut buffer, signal.as_ref()).await {
            Ok(()) => {
                tracing::debug!(loaded = reader.loaded_byte_length, "load");
                reader.emit(EventType::Load);
                Ok(buffer.into_bytes())
            }
            Err(error) => {
                let event_type = match error.kind() {
                    ErrorKind::Abort => EventType::Abort,
                    ErrorKind::Timeout => EventType::Timeout,
                    _ => EventType::Error,
                };
                if let Some(requested_at) = *abort_requested_at.lock() {
                    tracing::debug!(
                        waited = ?requested_at.elapsed(),
                        "abort honored at chunk boundary"
                    );
                }
                tracing::debug!(
                    %error,
                    event = %event_type,
                    loaded = reader.loaded_byte_length,
                    "read failed"
                );
                reader.emit(event_type);
                drop(buffer);
                Err(error)
            }
        };

        source.release();
        drop(abort_listener);
        reader.finish();

        outcome
    }

    async fn pump<S>(
        &mut self,
        source: &mut S,
        buffer: &mut GrowableByteBuffer,
        signal: Option<&AbortSignal>,
    ) -> ReadResult<()>
    where
        S: ChunkSource,
    {
        loop {
            let pulled = source.pull().await;

            if let Some(reason) = signal.and_then(AbortSignal::reason) {
                return Err(match reason {
                    AbortReason::Timeout => ReadError::Timeout(reason.to_string()),
                    AbortReason::Aborted(_) => ReadError::Aborted("aborted".into()),
                });
            }

            let Some(chunk) = pulled? else {
                return Ok(());
            };

            buffer.put(&chunk);
            self.loaded_byte_length = buffer.position() as u64;
            tracing::trace!(
                chunk_len = chunk.len(),
                loaded = self.loaded_byte_length,
                "chunk appended"
            );
            self.emit(EventType::Progress);
        }
    }

    fn emit(&mut self, event_type: EventType) {
        self.notifier.notify(ProgressEvent::new(
            event_type,
            self.loaded_byte_length,
            self.total_byte_length,
        ));
    }
}

/// Initial buffer size for a read. A declared total is only a hint, so it
/// is capped rather than trusted.
fn initial_capacity(total_byte_length: Option<u64>) -> usize {
    match total_byte_length {
        Some(total) => usize::try_from(total)
            .map_or(MAX_INITIAL_CAPACITY, |total| total.min(MAX_INITIAL_CAPACITY)),
        None => DEFAULT_CHUNK_SIZE,
    }
}

/// Holds a reader while it is `Loading` and closes the read out if the read
/// future is dropped before it completes.
struct LoadingGuard<'a> {
    reader: &'a mut StreamReader,
}

impl LoadingGuard<'_> {
    fn finish(&mut self) {
        self.reader.ready_state = ReadyState::Done;
        tracing::debug!(loaded = self.reader.loaded_byte_length, "loadend");
        self.reader.emit(EventType::LoadEnd);
        self.reader.notifier.clear();
    }
}

impl Deref for LoadingGuard<'_> {
    type Target = StreamReader;

    fn deref(&self) -> &StreamReader {
        self.reader
    }
}

impl DerefMut for LoadingGuard<'_> {
    fn deref_mut(&mut self) -> &mut StreamReader {
        self.reader
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.reader.ready_state == ReadyState::Loading {
            tracing::debug!(
                loaded = self.reader.loaded_byte_length,
                "read dropped before completion"
            );
            self.reader.emit(EventType::Abort);
            self.finish();
        }
    }
}

/// Read `source` with a fresh, throwaway [`StreamReader`].
pub async fn read_all<S>(source: S, options: ReadOptions) -> ReadResult<Bytes>
where
    S: ChunkSource,
{
    StreamReader::new().read(source, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{
        signal::AbortController,
        source::{AsyncIterSource, IterSource},
    };
    use futures::{StreamExt, stream};
    use std::time::Duration;

    async fn collect_events(rx: UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        rx.collect().await
    }

    fn types(events: &[ProgressEvent]) -> Vec<EventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    #[tokio::test]
    async fn concatenates_chunks_in_order() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();

        let bytes = reader
            .read(
                IterSource::new(vec![vec![1u8, 2], vec![3, 4, 5], vec![]]),
                ReadOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(bytes, Bytes::from_static(&[1, 2, 3, 4, 5]));
        assert_eq!(reader.ready_state(), ReadyState::Done);
        assert_eq!(reader.loaded_byte_length(), 5);

        let events = collect_events(events).await;
        let seen = types(&events);
        assert_eq!(seen.first(), Some(&EventType::LoadStart));
        assert_eq!(seen.last(), Some(&EventType::LoadEnd));
        assert_eq!(seen.iter().filter(|t| **t == EventType::Load).count(), 1);
        assert_eq!(events.last().unwrap().loaded, 5);
    }

    #[tokio::test]
    async fn empty_source_yields_empty_bytes() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();

        let bytes = reader
            .read(IterSource::new(Vec::<Vec<u8>>::new()), ReadOptions::new())
            .await
            .unwrap();

        assert!(bytes.is_empty());
        assert_eq!(
            types(&collect_events(events).await),
            vec![EventType::LoadStart, EventType::Load, EventType::LoadEnd]
        );
    }

    #[tokio::test]
    async fn second_read_is_rejected() {
        let mut reader = StreamReader::new();
        reader
            .read(IterSource::new([vec![1u8]]), ReadOptions::new())
            .await
            .unwrap();

        let err = reader
            .read(
                IterSource::new([vec![2u8]]),
                ReadOptions::new().with_signal(AbortSignal::abort(AbortReason::Aborted(None))),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReadError::InvalidState(ReadyState::Done)));
        assert_eq!(reader.loaded_byte_length(), 1);
    }

    #[tokio::test]
    async fn pre_aborted_signal_fails_before_loadstart() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();
        let controller = AbortController::new();
        controller.abort();

        let err = reader
            .read(
                IterSource::new([vec![1u8]]),
                ReadOptions::new().with_signal(controller.signal()),
            )
            .await
            .unwrap_err();

        assert!(matches!(&err, ReadError::Aborted(msg) if msg == "already aborted"));
        assert_eq!(reader.ready_state(), ReadyState::Empty);
        assert_eq!(reader.loaded_byte_length(), 0);

        drop(reader);
        assert!(collect_events(events).await.is_empty());
    }

    #[tokio::test]
    async fn declared_total_makes_progress_computable() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();

        reader
            .read(
                IterSource::new([vec![0u8; 4], vec![0u8; 4]]),
                ReadOptions::new().with_total_byte_length(8),
            )
            .await
            .unwrap();

        assert_eq!(reader.total_byte_length(), Some(8));
        for event in collect_events(events).await {
            assert!(event.length_computable);
            assert_eq!(event.total, 8);
        }
    }

    #[tokio::test]
    async fn declared_total_is_only_a_hint() {
        let bytes = read_all(
            IterSource::new([vec![7u8; 10], vec![8u8; 10]]),
            ReadOptions::new().with_total_byte_length(4),
        )
        .await
        .unwrap();

        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..10], &[7u8; 10]);
        assert_eq!(&bytes[10..], &[8u8; 10]);
    }

    #[tokio::test]
    async fn non_chunk_value_is_a_type_error() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();

        let err = reader
            .read(
                IterSource::new([Some(vec![1u8]), None]),
                ReadOptions::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReadError::InvalidChunk));
        let seen = types(&collect_events(events).await);
        assert!(seen.contains(&EventType::Error));
        assert!(!seen.contains(&EventType::Load));
    }

    #[tokio::test]
    async fn source_error_is_classified_as_error() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();
        let items: Vec<Result<Vec<u8>, ReadError>> = vec![Ok(vec![1, 2]), Err("boom".into())];

        let err = reader
            .read(AsyncIterSource::new(stream::iter(items)), ReadOptions::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(reader.loaded_byte_length(), 2);
        let seen = types(&collect_events(events).await);
        assert_eq!(seen.iter().filter(|t| **t == EventType::Error).count(), 1);
        assert_eq!(seen.last(), Some(&EventType::LoadEnd));
        assert!(!seen.contains(&EventType::Abort));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_option_emits_timeout() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();
        let slow = stream::iter(0..10u8).then(|i| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            vec![i]
        });

        let err = reader
            .read(
                AsyncIterSource::new(slow),
                ReadOptions::new().with_timeout(Duration::from_millis(25)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReadError::Timeout(_)));
        assert_eq!(reader.loaded_byte_length(), 2);
        let seen = types(&collect_events(events).await);
        assert!(seen.contains(&EventType::Timeout));
        assert!(!seen.contains(&EventType::Abort));
        assert!(!seen.contains(&EventType::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_throttled_but_lifecycle_is_not() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();
        let chunks = stream::iter(0..10u8).then(|i| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            vec![i]
        });

        reader
            .read(AsyncIterSource::new(chunks), ReadOptions::new())
            .await
            .unwrap();

        let events = collect_events(events).await;
        let progress: Vec<u64> = events
            .iter()
            .filter(|e| e.event_type == EventType::Progress)
            .map(|e| e.loaded)
            .collect();
        // Chunks land every 20ms, so only every third one clears the 50ms gap
        assert_eq!(progress, vec![1, 4, 7, 10]);
        assert_eq!(types(&events).first(), Some(&EventType::LoadStart));
        assert_eq!(types(&events).last(), Some(&EventType::LoadEnd));
    }

    #[tokio::test]
    async fn listeners_are_dropped_after_loadend() {
        let mut reader = StreamReader::new();
        let seen = SharedPtr::new(Mutex::new(Vec::new()));
        let sink = SharedPtr::clone(&seen);
        reader.add_event_listener(EventType::LoadEnd, move |e| sink.lock().push(e.loaded));

        reader
            .read(IterSource::new([vec![1u8, 2, 3]]), ReadOptions::new())
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec![3]);
        assert_eq!(SharedPtr::strong_count(&seen), 1);
    }

    #[tokio::test]
    async fn oversized_total_is_capped_not_allocated() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();

        let bytes = reader
            .read(
                IterSource::new([vec![1u8, 2, 3]]),
                ReadOptions::new().with_total_byte_length(u64::MAX),
            )
            .await
            .unwrap();

        assert_eq!(bytes.as_ref(), &[1, 2, 3]);
        assert_eq!(reader.ready_state(), ReadyState::Done);
        assert_eq!(reader.total_byte_length(), Some(u64::MAX));

        let seen = types(&collect_events(events).await);
        assert_eq!(seen.first(), Some(&EventType::LoadStart));
        assert_eq!(seen.iter().filter(|t| **t == EventType::Load).count(), 1);
        assert_eq!(seen.last(), Some(&EventType::LoadEnd));
    }

    #[test]
    fn initial_capacity_follows_hint_up_to_ceiling() {
        assert_eq!(initial_capacity(None), DEFAULT_CHUNK_SIZE);
        assert_eq!(initial_capacity(Some(0)), 0);
        assert_eq!(initial_capacity(Some(4096)), 4096);
        assert_eq!(initial_capacity(Some(1 << 40)), MAX_INITIAL_CAPACITY);
        assert_eq!(initial_capacity(Some(u64::MAX)), MAX_INITIAL_CAPACITY);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_read_still_ends_with_loadend() {
        let mut reader = StreamReader::new();
        let events = reader.subscribe();
        let slow = stream::iter(0..10u8).then(|i| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            vec![i]
        });

        let outcome = tokio::time::timeout(
            Duration::from_millis(15),
            reader.read(AsyncIterSource::new(slow), ReadOptions::new()),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(reader.ready_state(), ReadyState::Done);
        assert_eq!(reader.loaded_byte_length(), 1);

        let events = collect_events(events).await;
        assert_eq!(
            types(&events),
            vec![
                EventType::LoadStart,
                EventType::Progress,
                EventType::Abort,
                EventType::LoadEnd
            ]
        );
        assert_eq!(events.last().unwrap().loaded, 1);
    }
}
