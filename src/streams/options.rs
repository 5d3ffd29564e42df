use super::{
    error::{ReadError, ReadResult},
    progress::DEFAULT_PROGRESS_INTERVAL,
    signal::AbortSignal,
};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const TOTAL_BYTE_LENGTH: &str = "options.totalByteLength";
const SIGNAL: &str = "options.signal";

/// A validated, non-negative byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteLength(u64);

impl ByteLength {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for ByteLength {
    fn from(n: u64) -> Self {
        ByteLength(n)
    }
}

impl From<u32> for ByteLength {
    fn from(n: u32) -> Self {
        ByteLength(n.into())
    }
}

impl From<usize> for ByteLength {
    fn from(n: usize) -> Self {
        ByteLength(n as u64)
    }
}

impl TryFrom<i64> for ByteLength {
    type Error = ReadError;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        u64::try_from(n)
            .map(ByteLength)
            .map_err(|_| ReadError::OutOfRange(TOTAL_BYTE_LENGTH))
    }
}

impl TryFrom<f64> for ByteLength {
    type Error = ReadError;

    fn try_from(n: f64) -> Result<Self, Self::Error> {
        if !n.is_finite() || n.fract() != 0.0 {
            return Err(ReadError::InvalidType(TOTAL_BYTE_LENGTH));
        }
        if n < 0.0 || n >= u64::MAX as f64 {
            return Err(ReadError::OutOfRange(TOTAL_BYTE_LENGTH));
        }
        Ok(ByteLength(n as u64))
    }
}

impl TryFrom<&Value> for ByteLength {
    type Error = ReadError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let Value::Number(number) = value else {
            return Err(ReadError::InvalidType(TOTAL_BYTE_LENGTH));
        };
        if let Some(n) = number.as_u64() {
            return Ok(ByteLength(n));
        }
        if let Some(n) = number.as_i64() {
            return ByteLength::try_from(n);
        }
        match number.as_f64() {
            Some(n) => ByteLength::try_from(n),
            None => Err(ReadError::InvalidType(TOTAL_BYTE_LENGTH)),
        }
    }
}

/// Options for a single [`read`](super::reader::StreamReader::read).
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Declared size of the source. Sizes the initial buffer and makes
    /// progress length-computable; never enforced as a limit.
    pub total_byte_length: Option<u64>,

    pub signal: Option<AbortSignal>,

    /// Deadline for the whole read, combined with `signal` when both are set.
    pub timeout: Option<Duration>,

    /// Minimum spacing between `progress` notifications.
    pub progress_interval: Duration,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            total_byte_length: None,
            signal: None,
            timeout: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total_byte_length(mut self, total: u64) -> Self {
        self.total_byte_length = Some(total);
        self
    }

    /// Set the declared size from a loosely typed number, rejecting
    /// negative, fractional and NaN values.
    pub fn try_with_total_byte_length<N>(mut self, total: N) -> ReadResult<Self>
    where
        N: TryInto<ByteLength, Error = ReadError>,
    {
        self.total_byte_length = Some(total.try_into()?.get());
        Ok(self)
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// The signal a read should observe: the caller's signal, the timeout,
    /// or both combined.
    pub(crate) fn effective_signal(&self) -> Option<AbortSignal> {
        match (&self.signal, self.timeout) {
            (None, None) => None,
            (Some(signal), None) => Some(signal.clone()),
            (None, Some(timeout)) => Some(AbortSignal::timeout(timeout)),
            (Some(signal), Some(timeout)) => Some(AbortSignal::any([
                signal.clone(),
                AbortSignal::timeout(timeout),
            ])),
        }
    }

    /// Build options from a JSON object such as
    /// `{"totalByteLength": 1024, "timeoutMs": 5000}`.
    pub fn from_json(value: &Value) -> ReadResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        if !value.is_object() {
            return Err(ReadError::InvalidType("options"));
        }
        ReadOptionsConfig::deserialize(value)?.try_into()
    }

    pub fn from_json_str(json: &str) -> ReadResult<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(&value)
    }
}

/// Serialized form of [`ReadOptions`]. Values are kept loosely typed so
/// validation can report which option was wrong.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOptionsConfig {
    #[serde(default)]
    pub total_byte_length: Option<Value>,
    /// Signals cannot be expressed in JSON; any non-null value is rejected.
    #[serde(default)]
    pub signal: Option<Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub progress_interval_ms: Option<u64>,
}

impl TryFrom<ReadOptionsConfig> for ReadOptions {
    type Error = ReadError;

    fn try_from(config: ReadOptionsConfig) -> Result<Self, Self::Error> {
        let mut options = ReadOptions::default();

        if let Some(total) = &config.total_byte_length {
            options.total_byte_length = Some(ByteLength::try_from(total)?.get());
        }
        if config.signal.is_some() {
            return Err(ReadError::InvalidType(SIGNAL));
        }
        options.timeout = config.timeout_ms.map(Duration::from_millis);
        if let Some(ms) = config.progress_interval_ms {
            options.progress_interval = Duration::from_millis(ms);
        }

        Ok(options)
    }
}
