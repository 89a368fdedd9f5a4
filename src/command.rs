//! Outbound commands.
//!
//! Fixed commands and manual text go out raw, with no markers. Only
//! calibration tables are framed (see [`crate::frame`]).

use crate::error::{CommandError, FrameError};
use crate::frame;
use crate::table::CalibrationTable;

pub const CMD_REQUEST_DATA: &str = "<REQ>";
pub const CMD_START: &str = "<START>";
pub const CMD_STOP: &str = "<STOP>";

/// Longest manual command accepted, in bytes.
pub const MANUAL_MAX_LEN: usize = 127;

/// A message we send to the ECU.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask the ECU to report its live data.
    RequestData,
    Start,
    Stop,
    /// Free text typed by the operator, sent verbatim.
    Manual(String),
    /// A calibration table in a `<STK>...<END>` frame.
    Table(Box<CalibrationTable>),
}

impl Command {
    /// Build a manual command, checking it is non-blank and fits the limit.
    pub fn manual(text: impl Into<String>) -> Result<Self, CommandError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CommandError::ManualEmpty);
        }
        if text.len() > MANUAL_MAX_LEN {
            return Err(CommandError::ManualTooLong {
                len: text.len(),
                max: MANUAL_MAX_LEN,
            });
        }
        Ok(Command::Manual(text))
    }

    pub fn table(table: &CalibrationTable) -> Self {
        Command::Table(Box::new(*table))
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        Ok(match self {
            Command::RequestData => CMD_REQUEST_DATA.as_bytes().to_vec(),
            Command::Start => CMD_START.as_bytes().to_vec(),
            Command::Stop => CMD_STOP.as_bytes().to_vec(),
            Command::Manual(text) => text.as_bytes().to_vec(),
            Command::Table(table) => frame::try_encode_table(table)?,
        })
    }

    /// One-line summary for trace output, e.g. `"<START>" 7B` or `table 266B`.
    pub fn debug_text(&self) -> String {
        let wire = match self {
            Command::RequestData => CMD_REQUEST_DATA,
            Command::Start => CMD_START,
            Command::Stop => CMD_STOP,
            Command::Manual(text) => text.as_str(),
            Command::Table(table) => {
                return format!("table {}B", frame::encode_table(table).len());
            }
        };
        let limit = 32;
        let shown: String = wire.chars().take(limit).collect();
        let ellipsis = if wire.chars().count() > limit { "..." } else { "" };
        format!("{shown:?}{ellipsis} {}B", wire.len())
    }
}
