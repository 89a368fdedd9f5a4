pub mod buffer;
pub mod command;
pub mod conn;
pub mod error;
pub mod frame;
pub mod port;
pub mod session;
pub mod table;

pub use buffer::ReceiveBuffer;
pub use command::Command;
pub use conn::{ConnError, Connection, LinkState};
pub use error::{BufferError, CommandError, FrameError};
pub use frame::ResponseSplitter;
pub use port::{Connector, Port, PortConfig, SerialConnector};
pub use session::Session;
pub use table::{CalibrationTable, TableKind};
