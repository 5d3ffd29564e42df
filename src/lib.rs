//! Collect a byte source into one contiguous buffer.
//!
//! Three source shapes are accepted, each behind its own adapter:
//!
//! - [`PushSource`]: a lockable push stream read through a reader
//! - [`AsyncIterSource`]: any [`futures::Stream`] of chunks
//! - [`IterSource`]: any synchronous iterator of chunks
//!
//! A [`StreamReader`] drains one of them, honoring an [`AbortSignal`] at
//! chunk boundaries and reporting throttled [`ProgressEvent`]s.
//!
//! ```rust
//! use stream_reader::{IterSource, ReadOptions, StreamReader};
//!
//! # futures::executor::block_on(async {
//! let mut reader = StreamReader::new();
//! let bytes = reader
//!     .read(IterSource::new([vec![1u8, 2], vec![3]]), ReadOptions::new())
//!     .await
//!     .unwrap();
//! assert_eq!(bytes.as_ref(), &[1, 2, 3]);
//! # });
//! ```

pub mod platform;
pub mod streams;

pub use streams::*;
