//! Resource limits for workspace code execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied to every process the workspace gateway spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecLimits {
    /// Maximum captured output per stream, in bytes
    pub max_output_bytes: u64,
    /// Wall-clock timeout
    #[serde(with = "duration_ms", rename = "timeout_ms")]
    pub timeout: Duration,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            max_output_bytes: 1024 * 1024,     // 1 MB per stream
            timeout: Duration::from_secs(120), // 2 minute wall clock
        }
    }
}

impl ExecLimits {
    /// Return a copy with a different wall-clock timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }
}

/// Helper for serializing Duration as milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Buffer that limits how much data can be written
#[derive(Debug, Clone)]
pub struct LimitedBuffer {
    buffer: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl LimitedBuffer {
    /// Create a buffer that keeps at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append data, dropping whatever does not fit. Always reports the full
    /// length as consumed so producers are never blocked.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let remaining = self.limit.saturating_sub(self.buffer.len());
        if remaining == 0 {
            if !data.is_empty() {
                self.truncated = true;
            }
            return data.len();
        }

        let to_write = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_write]);

        if to_write < data.len() {
            self.truncated = true;
        }

        data.len()
    }

    /// Consume the buffer, appending a marker if anything was dropped.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.truncated {
            self.buffer
                .extend_from_slice(b"\n... [output truncated] ...\n");
        }
        self.buffer
    }

    /// Whether any data was dropped.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes kept so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
