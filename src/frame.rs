//! Table frame encoding/decoding and inbound response splitting.
//!
//! Outbound table frame (ASCII):
//! ```text
//! <STK> {cell:.1}, x64 (row-major) <END>
//! ```
//!
//! No length prefix, no checksum, no escaping. Cell text can never contain
//! a marker, so none is needed.

use std::fmt::Write as _;

use crate::error::{FrameError, Result};
use crate::table::{CELLS, COLS, CalibrationTable, ROWS};

pub const TABLE_START: &str = "<STK>";
pub const TABLE_END: &str = "<END>";

/// Upper bound on an encoded frame: markers plus a generous per-cell width.
const FRAME_CAPACITY: usize = TABLE_START.len() + TABLE_END.len() + CELLS * 8;

/// Encode a table as a `<STK>...<END>` frame.
///
/// Every cell is written with one decimal place followed by a comma.
/// Non-finite cells are written as Rust formats them (`NaN`, `inf`); use
/// [`try_encode_table`] to reject those instead.
pub fn encode_table(table: &CalibrationTable) -> Vec<u8> {
    let mut out = String::with_capacity(FRAME_CAPACITY);
    out.push_str(TABLE_START);
    for (_, _, v) in table.iter() {
        // Writing to a String cannot fail.
        let _ = write!(out, "{v:.1},");
    }
    out.push_str(TABLE_END);
    out.into_bytes()
}

/// Encode a table, rejecting NaN and infinite cells.
pub fn try_encode_table(table: &CalibrationTable) -> Result<Vec<u8>> {
    if let Some((row, col, value)) = table.iter().find(|(_, _, v)| !v.is_finite()) {
        return Err(FrameError::NonFinite { row, col, value });
    }
    Ok(encode_table(table))
}

/// Parse a complete `<STK>...<END>` frame back into a table.
///
/// Leading/trailing ASCII whitespace around the frame is ignored.
pub fn decode_table(wire: &[u8]) -> Result<CalibrationTable> {
    let wire = wire.trim_ascii();
    let body = wire
        .strip_prefix(TABLE_START.as_bytes())
        .ok_or_else(|| FrameError::missing_start(wire))?;
    let body = body
        .strip_suffix(TABLE_END.as_bytes())
        .ok_or(FrameError::MissingEnd)?;

    // Every cell is comma-terminated, so the last split piece must be empty.
    let mut pieces: Vec<&[u8]> = body.split(|&b| b == b',').collect();
    match pieces.pop() {
        Some(tail) if tail.is_empty() => {}
        _ => {
            let tail = body.rsplit(|&b| b == b',').next().unwrap_or_default();
            return Err(FrameError::InvalidCell {
                index: pieces.len(),
                text: String::from_utf8_lossy(tail).into_owned(),
            });
        }
    }
    if pieces.len() != CELLS {
        return Err(FrameError::CellCount { got: pieces.len() });
    }

    let mut cells = [[0.0f32; COLS]; ROWS];
    for (index, piece) in pieces.iter().enumerate() {
        let text = String::from_utf8_lossy(piece);
        let value: f32 = text
            .trim()
            .parse()
            .map_err(|_| FrameError::InvalidCell { index, text: text.clone().into_owned() })?;
        cells[index / COLS][index % COLS] = value;
    }
    Ok(CalibrationTable::from_rows(cells))
}

/// Largest partial response the splitter will hold before giving up on it.
pub const SPLITTER_CAPACITY: usize = 4096;

/// Splits an inbound byte stream into `\n`-terminated responses. Buffers
/// partial data across calls, so a response split over two polls is
/// reassembled.
pub struct ResponseSplitter {
    buf: Vec<u8>,
    capacity: usize,
}

impl ResponseSplitter {
    pub fn new() -> Self {
        Self::with_capacity(SPLITTER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(256.min(capacity)),
            capacity,
        }
    }

    /// Feed new data and extract any complete responses.
    ///
    /// Each returned string has its terminator (and a trailing `\r`)
    /// stripped. Empty lines are skipped. If the buffered partial grows past
    /// capacity it is discarded.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut responses = Vec::new();

        while let Some(end) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                responses.push(String::from_utf8_lossy(&line).into_owned());
            }
        }

        if self.buf.len() > self.capacity {
            log::warn!(
                "dropping {} bytes of unterminated response (limit {})",
                self.buf.len(),
                self.capacity
            );
            self.buf.clear();
        }

        responses
    }

    /// Bytes held waiting for a terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for ResponseSplitter {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
