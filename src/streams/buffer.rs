use bytes::Bytes;
use std::ops::Range;

/// Capacity used when the total length of a read is not known up front, and
/// the minimum extent a single growth step is computed from.
pub const DEFAULT_CHUNK_SIZE: usize = 1_048_576;

/// Upper bound on the up-front allocation a declared total may request.
/// Larger reads still reach their size through growth.
pub const MAX_INITIAL_CAPACITY: usize = 64 * DEFAULT_CHUNK_SIZE;

/// How many extents are reserved past the write position on every growth.
pub const GROWTH_FACTOR: usize = 10;

/// Append-only byte region with a tracked write position.
///
/// The storage is over-allocated geometrically when the final size is
/// unknown, trading peak memory for fewer copies. Bytes before `position`
/// are never rewritten; the buffer never shrinks.
#[derive(Debug)]
pub struct GrowableByteBuffer {
    // Zero-filled; `storage.len()` is the capacity
    storage: Vec<u8>,
    position: usize,
}

impl Default for GrowableByteBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHUNK_SIZE)
    }
}

impl GrowableByteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0; capacity],
            position: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Append `chunk` at the write position, growing the storage first if it
    /// would not fit.
    pub fn put(&mut self, chunk: &[u8]) {
        let end = self.position + chunk.len();
        if end > self.capacity() {
            self.grow(chunk.len());
        }
        self.storage[self.position..end].copy_from_slice(chunk);
        self.position = end;
    }

    fn grow(&mut self, incoming: usize) {
        let extent = incoming.max(DEFAULT_CHUNK_SIZE);
        let new_capacity = self
            .position
            .saturating_add(extent.saturating_mul(GROWTH_FACTOR));

        tracing::trace!(
            from = self.capacity(),
            to = new_capacity,
            position = self.position,
            "growing read buffer"
        );

        let mut storage = vec![0; new_capacity];
        storage[..self.position].copy_from_slice(&self.storage[..self.position]);
        self.storage = storage;
    }

    /// Borrow `range` of the written bytes without copying.
    ///
    /// # Panics
    ///
    /// Panics if `range` reaches past the write position.
    pub fn view_no_copy(&self, range: Range<usize>) -> &[u8] {
        &self.storage[..self.position][range]
    }

    /// Mutable counterpart of [`view_no_copy`](Self::view_no_copy); writes
    /// land directly in the buffer.
    pub fn view_no_copy_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.storage[..self.position][range]
    }

    /// Copy `range` of the written bytes into a new, exactly sized vector.
    ///
    /// # Panics
    ///
    /// Panics if `range` reaches past the write position.
    pub fn copy_trimmed(&self, range: Range<usize>) -> Vec<u8> {
        self.view_no_copy(range).to_vec()
    }

    /// Consume the buffer, returning exactly the written bytes.
    ///
    /// An over-allocated buffer is copied down to size so the spare capacity
    /// is released; an exactly full one hands its storage over as is.
    pub fn into_bytes(self) -> Bytes {
        if self.position < self.capacity() {
            Bytes::from(self.copy_trimmed(0..self.position))
        } else {
            Bytes::from(self.storage)
        }
    }
}
