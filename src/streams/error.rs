use super::reader::ReadyState;
use std::{error::Error as StdError, sync::Arc};
use thiserror::Error;

pub type ReadResult<T> = Result<T, ReadError>;

/// Coarse classification of a [`ReadError`], used to pick the terminal
/// progress event of a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Type,
    Range,
    InvalidState,
    Abort,
    Timeout,
    Other,
}

#[derive(Error, Debug, Clone)]
pub enum ReadError {
    /// The named option had the wrong type or an unusable value.
    #[error("TypeError: {0}")]
    InvalidType(&'static str),

    #[error("RangeError: {0}")]
    OutOfRange(&'static str),

    /// The source produced a value that is not a byte chunk.
    #[error("TypeError: asyncSource")]
    InvalidChunk,

    #[error("InvalidStateError: {0}")]
    InvalidState(ReadyState),

    #[error("AbortError: {0}")]
    Aborted(String),

    #[error("TimeoutError: {0}")]
    Timeout(String),

    #[error("TypeError: stream is locked to a reader")]
    Locked,

    /// An error raised by the source itself, passed through unchanged.
    #[error(transparent)]
    Other(Arc<dyn StdError + Send + Sync>),
}

impl ReadError {
    /// Wrap any error type into `ReadError`
    pub fn other<E>(e: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        ReadError::Other(Arc::new(e))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReadError::InvalidType(_) | ReadError::InvalidChunk | ReadError::Locked => {
                ErrorKind::Type
            }
            ReadError::OutOfRange(_) => ErrorKind::Range,
            ReadError::InvalidState(_) => ErrorKind::InvalidState,
            ReadError::Aborted(_) => ErrorKind::Abort,
            ReadError::Timeout(_) => ErrorKind::Timeout,
            ReadError::Other(_) => ErrorKind::Other,
        }
    }

    /// Borrow the wrapped source error as `E`, if that is what it is.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            ReadError::Other(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A source failure known only by its message.
#[derive(Error, Debug)]
#[error("{0}")]
struct SourceMessage(String);

impl From<String> for ReadError {
    fn from(message: String) -> Self {
        ReadError::other(SourceMessage(message))
    }
}

impl From<&str> for ReadError {
    fn from(message: &str) -> Self {
        message.to_owned().into()
    }
}

// Sources backed by files or sockets fail with io errors
impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        ReadError::other(e)
    }
}

impl From<serde_json::Error> for ReadError {
    fn from(e: serde_json::Error) -> Self {
        ReadError::other(e)
    }
}

/// Macro for users to add direct `From` implementations for their error types,
/// so a fallible source can yield `Result<Chunk, TheirError>` items.
///
/// # Example
/// ```rust
/// use stream_reader::impl_read_error_from;
///
/// #[derive(Debug)]
/// struct UpstreamError;
/// impl std::fmt::Display for UpstreamError {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "upstream failed")
///     }
/// }
/// impl std::error::Error for UpstreamError {}
///
/// impl_read_error_from!(UpstreamError);
///
/// let err: stream_reader::ReadError = UpstreamError.into();
/// assert!(err.downcast_ref::<UpstreamError>().is_some());
/// ```
#[macro_export]
macro_rules! impl_read_error_from {
    ($($error_type:ty),* $(,)?) => {
        $(
            impl From<$error_type> for $crate::ReadError {
                fn from(e: $error_type) -> Self {
                    $crate::ReadError::other(e)
                }
            }
        )*
    };
}
