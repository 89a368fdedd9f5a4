use thiserror::Error;

/// Errors arising from table frame encoding and decoding.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("missing start marker (expected \"<STK>\"{})", format_text_suffix(got))]
    MissingStart { got: Vec<u8> },

    #[error("missing end marker (expected \"<END>\")")]
    MissingEnd,

    #[error("wrong cell count: expected 64, got {got}")]
    CellCount { got: usize },

    #[error("invalid cell {index}: {text:?}")]
    InvalidCell { index: usize, text: String },

    #[error("cell ({row}, {col}) is not finite ({value})")]
    NonFinite { row: usize, col: usize, value: f32 },
}

impl FrameError {
    /// Create a `MissingStart` error, keeping the first few received bytes for context.
    pub(crate) fn missing_start(wire: &[u8]) -> Self {
        Self::MissingStart { got: wire.iter().take(8).copied().collect() }
    }
}

/// Errors from the bounded receive buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("receive buffer overflow ({len} bytes, capacity {capacity} incl. terminator)")]
    Overflow { len: usize, capacity: usize },
}

/// Errors from building an outbound command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("manual command is empty")]
    ManualEmpty,

    #[error("manual command too long ({len} bytes, maximum {max})")]
    ManualTooLong { len: usize, max: usize },
}

/// Format leading bytes as a suffix like ", got \"<ST\"" (empty if no bytes).
fn format_text_suffix(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    format!(", got {:?}", String::from_utf8_lossy(raw))
}

pub type Result<T> = std::result::Result<T, FrameError>;
