use super::{
    error::{ReadError, ReadResult},
    source::{ChunkSource, IntoChunk},
};
use crate::platform::{MaybeSend, SharedPtr};
use bytes::Bytes;
use futures::{
    channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded},
    stream::StreamExt,
};
use parking_lot::Mutex;
use std::future::Future;

/// Result of one `read` on a push-stream reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadChunk<T> {
    pub done: bool,
    pub value: Option<T>,
}

impl<T> ReadChunk<T> {
    pub fn value(value: T) -> Self {
        Self {
            done: false,
            value: Some(value),
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            value: None,
        }
    }
}

/// A stream that hands its chunks out through an exclusive reader.
pub trait PushStream: MaybeSend {
    type Chunk: IntoChunk + MaybeSend;
    type Reader: PushStreamReader<Chunk = Self::Chunk>;

    /// Lock the stream to a new reader. Fails with [`ReadError::Locked`]
    /// while another reader holds the lock.
    fn get_reader(&mut self) -> ReadResult<Self::Reader>;
}

pub trait PushStreamReader: MaybeSend {
    type Chunk;

    fn read(&mut self) -> impl Future<Output = ReadResult<ReadChunk<Self::Chunk>>> + MaybeSend;

    /// Unlock the stream this reader was created from.
    fn release_lock(self);
}

/// Adapts a [`PushStream`] to [`ChunkSource`]: locks on the first pull and
/// unlocks once the stream reports `done` or the read is released.
pub struct PushSource<P: PushStream> {
    stream: P,
    reader: Option<P::Reader>,
}

impl<P: PushStream> PushSource<P> {
    pub fn new(stream: P) -> Self {
        Self {
            stream,
            reader: None,
        }
    }

    /// Give the stream back, e.g. to read it again after a failed read.
    pub fn into_inner(mut self) -> P {
        self.unlock();
        self.stream
    }

    fn unlock(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.release_lock();
        }
    }
}

impl<P: PushStream> ChunkSource for PushSource<P> {
    fn pull(&mut self) -> impl Future<Output = ReadResult<Option<Bytes>>> + MaybeSend {
        async move {
            if self.reader.is_none() {
                let reader = self.stream.get_reader()?;
                self.reader = Some(reader);
            }
            let Some(reader) = self.reader.as_mut() else {
                return Err(ReadError::Locked);
            };

            let result = reader.read().await?;
            if result.done {
                self.unlock();
                return Ok(None);
            }
            result.value.into_chunk().map(Some)
        }
    }

    fn release(&mut self) {
        self.unlock();
    }
}

enum PushMsg<T> {
    Chunk(T),
    Error(ReadError),
}

/// Create a push stream fed through a [`PushController`].
///
/// The stream ends when [`PushController::close`] is called or every
/// controller has been dropped.
pub fn push_channel<T>() -> (PushController<T>, ChannelStream<T>) {
    let (tx, rx) = unbounded();
    (
        PushController { tx },
        ChannelStream {
            slot: SharedPtr::new(Mutex::new(Some(rx))),
        },
    )
}

/// Producer side of [`push_channel`].
pub struct PushController<T> {
    tx: UnboundedSender<PushMsg<T>>,
}

impl<T> Clone for PushController<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> PushController<T> {
    pub fn enqueue(&self, chunk: T) -> ReadResult<()> {
        self.tx
            .unbounded_send(PushMsg::Chunk(chunk))
            .map_err(|_| "push stream is closed".into())
    }

    /// End the stream after the chunks already enqueued.
    pub fn close(&self) {
        self.tx.close_channel();
    }

    /// Fail the stream; readers see `error` after the chunks already
    /// enqueued.
    pub fn error(&self, error: ReadError) -> ReadResult<()> {
        let sent: ReadResult<()> = self
            .tx
            .unbounded_send(PushMsg::Error(error))
            .map_err(|_| "push stream is closed".into());
        self.tx.close_channel();
        sent
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of [`push_channel`].
pub struct ChannelStream<T> {
    // Empty while a reader holds the receiver
    slot: SharedPtr<Mutex<Option<UnboundedReceiver<PushMsg<T>>>>>,
}

impl<T> ChannelStream<T> {
    pub fn locked(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T> PushStream for ChannelStream<T>
where
    T: IntoChunk + MaybeSend + 'static,
{
    type Chunk = T;
    type Reader = ChannelReader<T>;

    fn get_reader(&mut self) -> ReadResult<ChannelReader<T>> {
        let rx = self.slot.lock().take().ok_or(ReadError::Locked)?;
        Ok(ChannelReader {
            rx: Some(rx),
            slot: SharedPtr::clone(&self.slot),
        })
    }
}

pub struct ChannelReader<T> {
    rx: Option<UnboundedReceiver<PushMsg<T>>>,
    slot: SharedPtr<Mutex<Option<UnboundedReceiver<PushMsg<T>>>>>,
}

impl<T> ChannelReader<T> {
    fn unlock(&mut self) {
        if let Some(rx) = self.rx.take() {
            *self.slot.lock() = Some(rx);
        }
    }
}

impl<T> PushStreamReader for ChannelReader<T>
where
    T: MaybeSend + 'static,
{
    type Chunk = T;

    fn read(&mut self) -> impl Future<Output = ReadResult<ReadChunk<T>>> + MaybeSend {
        async move {
            let Some(rx) = self.rx.as_mut() else {
                return Ok(ReadChunk::done());
            };
            match rx.next().await {
                Some(PushMsg::Chunk(chunk)) => Ok(ReadChunk::value(chunk)),
                Some(PushMsg::Error(error)) => Err(error),
                None => Ok(ReadChunk::done()),
            }
        }
    }

    fn release_lock(mut self) {
        self.unlock();
    }
}

impl<T> Drop for ChannelReader<T> {
    fn drop(&mut self) {
        self.unlock();
    }
}
