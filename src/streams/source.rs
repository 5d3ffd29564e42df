use super::error::{ReadError, ReadResult};
use crate::platform::MaybeSend;
use bytes::{Bytes, BytesMut};
use futures::{
    future,
    stream::{Stream, StreamExt},
};
use std::{future::Future, pin::Pin};

/// Conversion of a value produced by a source into a byte chunk.
///
/// `None` stands for a produced value that is not a byte chunk and fails
/// with [`ReadError::InvalidChunk`]. `Err` is a failure raised by the source
/// itself and is passed through unchanged.
pub trait IntoChunk {
    fn into_chunk(self) -> ReadResult<Bytes>;
}

impl IntoChunk for Bytes {
    fn into_chunk(self) -> ReadResult<Bytes> {
        Ok(self)
    }
}

impl IntoChunk for BytesMut {
    fn into_chunk(self) -> ReadResult<Bytes> {
        Ok(self.freeze())
    }
}

impl IntoChunk for Vec<u8> {
    fn into_chunk(self) -> ReadResult<Bytes> {
        Ok(Bytes::from(self))
    }
}

impl IntoChunk for Box<[u8]> {
    fn into_chunk(self) -> ReadResult<Bytes> {
        Ok(Bytes::from(self))
    }
}

impl IntoChunk for &'static [u8] {
    fn into_chunk(self) -> ReadResult<Bytes> {
        Ok(Bytes::from_static(self))
    }
}

impl<const N: usize> IntoChunk for [u8; N] {
    fn into_chunk(self) -> ReadResult<Bytes> {
        Ok(Bytes::copy_from_slice(&self))
    }
}

impl<C: IntoChunk> IntoChunk for Option<C> {
    fn into_chunk(self) -> ReadResult<Bytes> {
        match self {
            Some(chunk) => chunk.into_chunk(),
            None => Err(ReadError::InvalidChunk),
        }
    }
}

impl<C, E> IntoChunk for Result<C, E>
where
    C: IntoChunk,
    E: Into<ReadError>,
{
    fn into_chunk(self) -> ReadResult<Bytes> {
        self.map_err(Into::into)?.into_chunk()
    }
}

/// Uniform "pull one chunk, or signal the end" view over every supported
/// source shape.
///
/// A reader issues one `pull` at a time and never pulls again before the
/// previous chunk has been consumed.
pub trait ChunkSource: MaybeSend {
    /// Next chunk, or `None` once the source is exhausted.
    fn pull(&mut self) -> impl Future<Output = ReadResult<Option<Bytes>>> + MaybeSend;

    /// Give back whatever the source holds (e.g. a stream lock). Called once
    /// when the read finishes, whatever its outcome.
    fn release(&mut self) {}
}

/// Lets a caller keep the source, e.g. to reclaim a push stream after the read.
impl<S: ChunkSource> ChunkSource for &mut S {
    fn pull(&mut self) -> impl Future<Output = ReadResult<Option<Bytes>>> + MaybeSend {
        (**self).pull()
    }

    fn release(&mut self) {
        (**self).release();
    }
}

/// Synchronous iterable, driven as if it were asynchronous.
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I>
where
    I: Iterator,
{
    pub fn new<T>(iter: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            iter: iter.into_iter(),
        }
    }
}

impl<I> ChunkSource for IterSource<I>
where
    I: Iterator + MaybeSend,
    I::Item: IntoChunk,
{
    fn pull(&mut self) -> impl Future<Output = ReadResult<Option<Bytes>>> + MaybeSend {
        future::ready(self.iter.next().map(IntoChunk::into_chunk).transpose())
    }
}

/// Asynchronous iterable: any [`Stream`] of chunk-like items.
pub struct AsyncIterSource<S> {
    stream: Pin<Box<S>>,
}

impl<S> AsyncIterSource<S>
where
    S: Stream,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Box::pin(stream),
        }
    }
}

impl<S> ChunkSource for AsyncIterSource<S>
where
    S: Stream + MaybeSend,
    S::Item: IntoChunk,
{
    fn pull(&mut self) -> impl Future<Output = ReadResult<Option<Bytes>>> + MaybeSend {
        async move {
            match self.stream.next().await {
                Some(item) => item.into_chunk().map(Some),
                None => Ok(None),
            }
        }
    }
}
