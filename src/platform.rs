//! Platform-specific type aliases and trait bounds
//!
//! This module provides conditional compilation for single-threaded (Rc-based)
//! vs multi-threaded (Arc-based) readers.
//!
//! - `send` feature (default): Uses Arc and requires Send bounds on sources,
//!   listeners and signals so a read can be driven by a work-stealing runtime
//! - `local` feature: Uses Rc and removes the Send requirements

use crate::streams::{progress::ProgressEvent, signal::AbortReason};

// ============================================================================
// MULTI-THREADED (send feature - default)
// ============================================================================
#[cfg(feature = "send")]
pub use std::sync::Arc as SharedPtr;

#[cfg(feature = "send")]
pub trait MaybeSend: Send {}
#[cfg(feature = "send")]
impl<T: Send> MaybeSend for T {}

// Boxed progress listener
#[cfg(feature = "send")]
pub type BoxedListener = Box<dyn FnMut(&ProgressEvent) + Send + 'static>;

// Boxed one-shot abort listener
#[cfg(feature = "send")]
pub type BoxedAbortListener = Box<dyn FnOnce(&AbortReason) + Send + 'static>;

// ============================================================================
// SINGLE-THREADED (local feature)
// ============================================================================
#[cfg(feature = "local")]
pub use std::rc::Rc as SharedPtr;

#[cfg(feature = "local")]
pub trait MaybeSend {}
#[cfg(feature = "local")]
impl<T> MaybeSend for T {}

#[cfg(feature = "local")]
pub type BoxedListener = Box<dyn FnMut(&ProgressEvent) + 'static>;

#[cfg(feature = "local")]
pub type BoxedAbortListener = Box<dyn FnOnce(&AbortReason) + 'static>;
