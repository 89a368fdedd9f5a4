//! Serial connection to the ECU.
//!
//! Owns the port handle, the last-response buffer and the response
//! splitter. No application logic: callers drive polling and sequencing.

use std::collections::VecDeque;
use std::fmt;
use std::io;

use crate::buffer::ReceiveBuffer;
use crate::command::Command;
use crate::error::{BufferError, CommandError, FrameError};
use crate::frame::ResponseSplitter;
use crate::port::{Connector, Port, PortConfig, SerialConnector};
use crate::table::CalibrationTable;

/// Whether a port is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Connected => write!(f, "Connected"),
        }
    }
}

/// Errors from connection operations.
#[derive(Debug)]
pub enum ConnError {
    /// OS-level I/O error.
    Io(io::Error),
    /// Serial driver refused to open or configure the port.
    Serial(serialport::Error),
    /// `open` called while a port is already open.
    AlreadyConnected { port: String },
    /// The driver accepted fewer bytes than the payload.
    ShortWrite { written: usize, expected: usize },
    /// Table could not be framed.
    Frame(FrameError),
    /// Inbound data did not fit the receive buffer.
    Buffer(BufferError),
    /// Command rejected before sending.
    Command(CommandError),
}

impl fmt::Display for ConnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnError::Io(e) => write!(f, "I/O error: {e}"),
            ConnError::Serial(e) => write!(f, "serial port error: {e}"),
            ConnError::AlreadyConnected { port } => {
                write!(f, "already connected to {port}; disconnect first")
            }
            ConnError::ShortWrite { written, expected } => {
                write!(f, "short write: {written} of {expected} bytes sent")
            }
            ConnError::Frame(e) => write!(f, "frame error: {e}"),
            ConnError::Buffer(e) => write!(f, "buffer error: {e}"),
            ConnError::Command(e) => write!(f, "command error: {e}"),
        }
    }
}

impl std::error::Error for ConnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnError::Io(e) => Some(e),
            ConnError::Serial(e) => Some(e),
            ConnError::Frame(e) => Some(e),
            ConnError::Buffer(e) => Some(e),
            ConnError::Command(e) => Some(e),
            ConnError::AlreadyConnected { .. } | ConnError::ShortWrite { .. } => None,
        }
    }
}

impl From<io::Error> for ConnError {
    fn from(e: io::Error) -> Self {
        ConnError::Io(e)
    }
}

impl From<serialport::Error> for ConnError {
    fn from(e: serialport::Error) -> Self {
        ConnError::Serial(e)
    }
}

impl From<FrameError> for ConnError {
    fn from(e: FrameError) -> Self {
        ConnError::Frame(e)
    }
}

impl From<BufferError> for ConnError {
    fn from(e: BufferError) -> Self {
        ConnError::Buffer(e)
    }
}

impl From<CommandError> for ConnError {
    fn from(e: CommandError) -> Self {
        ConnError::Command(e)
    }
}

/// Serial connection to the ECU.
///
/// Synchronous, single-threaded. Two states only: a port is open or not.
/// Operations that need a port are silent no-ops while disconnected:
/// [`send`](Self::send) returns `Ok(None)` and
/// [`poll_receive`](Self::poll_receive) returns `Ok(0)`.
///
/// # Example
///
/// ```no_run
/// use ecutune::{Command, Connection, ConnError};
///
/// let mut conn = Connection::new();
/// conn.open("COM5")?;
/// conn.send_command(&Command::RequestData)?;
/// loop {
///     conn.poll_receive()?;
///     for line in conn.take_responses() {
///         println!("{line}");
///     }
/// }
/// # Ok::<(), ConnError>(())
/// ```
pub struct Connection<C: Connector = SerialConnector> {
    connector: C,
    config: PortConfig,
    port: Option<Box<dyn Port>>,
    read_buf: Vec<u8>,
    received: ReceiveBuffer,
    splitter: ResponseSplitter,
    /// Responses split from the stream but not yet taken.
    responses: VecDeque<String>,
    /// Called after every write with the bytes the driver accepted.
    on_send: Option<Box<dyn FnMut(&[u8])>>,
    /// Called after every non-empty read with the bytes read.
    on_recv: Option<Box<dyn FnMut(&[u8])>>,
}

impl Connection<SerialConnector> {
    /// A disconnected connection using real serial ports and the default config.
    pub fn new() -> Self {
        Self::with_connector(SerialConnector, PortConfig::default())
    }
}

impl Default for Connection<SerialConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Connection<C> {
    pub fn with_connector(connector: C, config: PortConfig) -> Self {
        let received = ReceiveBuffer::new();
        Self {
            connector,
            config,
            port: None,
            read_buf: vec![0u8; received.max_len()],
            received,
            splitter: ResponseSplitter::new(),
            responses: VecDeque::new(),
            on_send: None,
            on_recv: None,
        }
    }

    /// Register a callback invoked after every write.
    pub fn set_on_send(&mut self, f: impl FnMut(&[u8]) + 'static) {
        self.on_send = Some(Box::new(f));
    }

    /// Register a callback invoked after every non-empty read.
    pub fn set_on_recv(&mut self, f: impl FnMut(&[u8]) + 'static) {
        self.on_recv = Some(Box::new(f));
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn state(&self) -> LinkState {
        if self.port.is_some() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Name of the open port, if any.
    pub fn port_name(&self) -> Option<&str> {
        self.port.as_deref().map(|p| p.name())
    }

    /// Open and configure `name`.
    ///
    /// Fails with [`ConnError::AlreadyConnected`] if a port is already open;
    /// the open port is left untouched. On any other failure the connection
    /// stays disconnected.
    pub fn open(&mut self, name: &str) -> Result<(), ConnError> {
        if let Some(port) = self.port.as_deref() {
            return Err(ConnError::AlreadyConnected {
                port: port.name().to_string(),
            });
        }
        let port = self.connector.open(name, &self.config).inspect_err(|e| {
            log::warn!("failed to open {name}: {e}");
        })?;
        log::info!("opened {} at {} baud", name, self.config.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    /// Close the port. Returns `false` if nothing was open.
    pub fn close(&mut self) -> bool {
        match self.port.take() {
            Some(port) => {
                log::info!("closed {}", port.name());
                self.splitter.clear();
                true
            }
            None => false,
        }
    }

    /// Write `payload` in one call.
    ///
    /// Returns `Ok(None)` without doing anything when disconnected, and
    /// `Ok(Some(n))` with the byte count on success. Blocks up to the write
    /// timeout.
    pub fn send(&mut self, payload: &[u8]) -> Result<Option<usize>, ConnError> {
        let Some(port) = self.port.as_mut() else {
            log::debug!("send skipped ({} bytes): not connected", payload.len());
            return Ok(None);
        };
        let written = port.write(payload)?;
        if let Some(cb) = self.on_send.as_mut() {
            cb(&payload[..written]);
        }
        if written < payload.len() {
            log::warn!("short write: {written} of {} bytes", payload.len());
            return Err(ConnError::ShortWrite {
                written,
                expected: payload.len(),
            });
        }
        log::debug!("sent {written} bytes");
        Ok(Some(written))
    }

    /// Encode and send a command. No-op when disconnected.
    pub fn send_command(&mut self, cmd: &Command) -> Result<Option<usize>, ConnError> {
        if !self.is_connected() {
            return Ok(None);
        }
        let wire = cmd.encode()?;
        self.send(&wire)
    }

    /// Frame and send a calibration table. No-op when disconnected.
    pub fn send_table(&mut self, table: &CalibrationTable) -> Result<Option<usize>, ConnError> {
        if !self.is_connected() {
            return Ok(None);
        }
        self.send_command(&Command::table(table))
    }

    /// Read whatever has arrived, if anything.
    ///
    /// With nothing pending the last response is left as is. Otherwise one
    /// bounded read replaces it wholesale; a message split across two polls
    /// shows up as two separate responses here. The same bytes also feed the
    /// splitter, which does reassemble lines: see
    /// [`take_responses`](Self::take_responses).
    ///
    /// Returns the number of bytes read (0 when disconnected or idle).
    pub fn poll_receive(&mut self) -> Result<usize, ConnError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(0);
        };
        if port.bytes_to_read()? == 0 {
            return Ok(0);
        }

        let max = self.received.max_len();
        let n = port.read(&mut self.read_buf[..max])?;
        if n == 0 {
            return Ok(0);
        }

        let data = &self.read_buf[..n];
        self.received.overwrite(data)?;
        self.responses.extend(self.splitter.feed(data));
        if let Some(cb) = self.on_recv.as_mut() {
            cb(data);
        }
        log::debug!("received {n} bytes");
        Ok(n)
    }

    /// The most recent raw read (or the placeholder before the first one).
    pub fn last_response(&self) -> &ReceiveBuffer {
        &self.received
    }

    /// Drain complete `\n`-terminated responses in arrival order.
    pub fn take_responses(&mut self) -> Vec<String> {
        self.responses.drain(..).collect()
    }
}

impl<C: Connector> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port_name())
            .field("config", &self.config)
            .field("received", &self.received)
            .field("pending_responses", &self.responses.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::port::mock::{MockConnector, Shared};

    fn connection(devices: &[&str]) -> (Connection<MockConnector>, Shared) {
        let (connector, state) = MockConnector::new(devices);
        (Connection::with_connector(connector, PortConfig::default()), state)
    }

    fn connected() -> (Connection<MockConnector>, Shared) {
        let (mut conn, state) = connection(&["COM5"]);
        conn.open("COM5").unwrap();
        (conn, state)
    }

    #[test]
    fn starts_disconnected() {
        let (conn, _) = connection(&["COM5"]);
        assert_eq!(conn.state(), LinkState::Disconnected);
        assert_eq!(conn.port_name(), None);
        assert_eq!(conn.last_response().text(), "nothing");
    }

    #[test]
    fn open_nonexistent_fails_and_stays_disconnected() {
        let (mut conn, state) = connection(&["COM5"]);
        assert!(matches!(conn.open("COM9"), Err(ConnError::Io(_))));
        assert!(!conn.is_connected());
        assert_eq!(state.borrow().live, 0);
    }

    #[test]
    fn open_nonexistent_real_port_fails() {
        let mut conn = Connection::new();
        assert!(conn.open("/dev/ecutune-does-not-exist").is_err());
        assert_eq!(conn.state(), LinkState::Disconnected);
    }

    #[test]
    fn configure_failure_leaves_no_handle() {
        let (mut conn, state) = connection(&["COM5"]);
        state.borrow_mut().fail_configure = true;
        assert!(conn.open("COM5").is_err());
        assert!(!conn.is_connected());
        assert_eq!(state.borrow().live, 0);
    }

    #[test]
    fn open_then_close_twice() {
        let (mut conn, state) = connected();
        assert_eq!(conn.state(), LinkState::Connected);
        assert_eq!(conn.port_name(), Some("COM5"));
        assert!(conn.close());
        assert_eq!(conn.state(), LinkState::Disconnected);
        assert!(!conn.close());
        assert_eq!(state.borrow().live, 0);
    }

    #[test]
    fn reopen_after_close_does_not_leak() {
        let (mut conn, state) = connection(&["COM5"]);
        for _ in 0..2 {
            conn.close();
            conn.open("COM5").unwrap();
            assert_eq!(conn.state(), LinkState::Connected);
            assert_eq!(state.borrow().live, 1);
        }
        assert_eq!(state.borrow().opens, 2);
    }

    #[test]
    fn open_while_connected_is_rejected() {
        let (mut conn, state) = connected();
        assert!(matches!(
            conn.open("COM5"),
            Err(ConnError::AlreadyConnected { ref port }) if port == "COM5"
        ));
        assert!(conn.is_connected());
        assert_eq!(state.borrow().live, 1);
        assert_eq!(state.borrow().opens, 1);
    }

    #[test]
    fn send_while_disconnected_is_silent() {
        let (mut conn, state) = connection(&["COM5"]);
        assert_eq!(conn.send(b"<REQ>").unwrap(), None);
        assert_eq!(conn.send_command(&Command::Start).unwrap(), None);
        assert_eq!(conn.send_table(&CalibrationTable::new()).unwrap(), None);
        assert!(state.borrow().written.is_empty());
        assert_eq!(conn.state(), LinkState::Disconnected);
    }

    #[test]
    fn send_writes_payload() {
        let (mut conn, state) = connected();
        assert_eq!(conn.send(b"<REQ>").unwrap(), Some(5));
        assert_eq!(state.borrow().written, vec![b"<REQ>".to_vec()]);
    }

    #[test]
    fn short_write_is_reported() {
        let (mut conn, state) = connected();
        state.borrow_mut().write_limit = Some(2);
        assert!(matches!(
            conn.send(b"<STOP>"),
            Err(ConnError::ShortWrite { written: 2, expected: 6 })
        ));
        // Still connected; the error is not fatal.
        assert!(conn.is_connected());
    }

    #[test]
    fn send_table_frames_all_zero_table() {
        let (mut conn, state) = connected();
        conn.send_table(&CalibrationTable::new()).unwrap();
        let written = state.borrow().written[0].clone();
        let text = String::from_utf8(written).unwrap();
        assert!(text.starts_with("<STK>"));
        assert!(text.ends_with("<END>"));
        assert_eq!(text.matches("0.0,").count(), 64);
    }

    #[test]
    fn send_table_rejects_nan() {
        let (mut conn, state) = connected();
        let mut t = CalibrationTable::new();
        t.set(0, 0, f32::NAN);
        assert!(matches!(conn.send_table(&t), Err(ConnError::Frame(_))));
        assert!(state.borrow().written.is_empty());
    }

    #[test]
    fn poll_while_disconnected_is_silent() {
        let (mut conn, _) = connection(&["COM5"]);
        assert_eq!(conn.poll_receive().unwrap(), 0);
        assert_eq!(conn.last_response().text(), "nothing");
    }

    #[test]
    fn poll_with_nothing_pending_keeps_buffer() {
        let (mut conn, state) = connected();
        state.borrow_mut().push_inbound(b"RPM=900");
        assert_eq!(conn.poll_receive().unwrap(), 7);
        assert_eq!(conn.poll_receive().unwrap(), 0);
        assert_eq!(conn.last_response().text(), "RPM=900");
    }

    #[test]
    fn poll_overwrites_whole_buffer() {
        let (mut conn, state) = connected();
        state.borrow_mut().push_inbound(b"a long first reply");
        conn.poll_receive().unwrap();
        state.borrow_mut().push_inbound(b"OK");
        conn.poll_receive().unwrap();
        assert_eq!(conn.last_response().as_bytes(), b"OK");
    }

    #[test]
    fn poll_reads_at_most_capacity_minus_one() {
        let (mut conn, state) = connected();
        state.borrow_mut().push_inbound(&[b'x'; 1500]);
        assert_eq!(conn.poll_receive().unwrap(), 1023);
        assert_eq!(conn.last_response().len(), 1023);
        assert_eq!(conn.poll_receive().unwrap(), 1500 - 1023);
        assert_eq!(conn.last_response().len(), 1500 - 1023);
    }

    #[test]
    fn split_message_shows_as_two_raw_reads() {
        // Known limitation of the raw buffer: one read is one message.
        let (mut conn, state) = connected();
        state.borrow_mut().push_inbound(b"TEMP=");
        conn.poll_receive().unwrap();
        assert_eq!(conn.last_response().text(), "TEMP=");
        state.borrow_mut().push_inbound(b"88\n");
        conn.poll_receive().unwrap();
        assert_eq!(conn.last_response().text(), "88\n");
        // The splitter reassembles it.
        assert_eq!(conn.take_responses(), vec!["TEMP=88".to_string()]);
        assert!(conn.take_responses().is_empty());
    }

    #[test]
    fn read_error_is_reported_and_buffer_kept() {
        let (mut conn, state) = connected();
        state.borrow_mut().push_inbound(b"x");
        state.borrow_mut().read_error = Some(io::ErrorKind::BrokenPipe);
        assert!(matches!(conn.poll_receive(), Err(ConnError::Io(_))));
        assert_eq!(conn.last_response().text(), "nothing");
    }

    #[test]
    fn close_drops_partial_response() {
        let (mut conn, state) = connected();
        state.borrow_mut().push_inbound(b"half");
        conn.poll_receive().unwrap();
        conn.close();
        conn.open("COM5").unwrap();
        state.borrow_mut().push_inbound(b"whole\n");
        conn.poll_receive().unwrap();
        assert_eq!(conn.take_responses(), vec!["whole".to_string()]);
    }

    #[test]
    fn trace_hooks_see_wire_bytes() {
        let (mut conn, state) = connected();
        let seen: Rc<RefCell<Vec<String>>> = Rc::default();
        let tx = seen.clone();
        conn.set_on_send(move |b| {
            tx.borrow_mut().push(format!(">> {}", String::from_utf8_lossy(b)));
        });
        let rx = seen.clone();
        conn.set_on_recv(move |b| {
            rx.borrow_mut().push(format!("<< {}", String::from_utf8_lossy(b)));
        });

        conn.send_command(&Command::Stop).unwrap();
        state.borrow_mut().push_inbound(b"STOPPED\n");
        conn.poll_receive().unwrap();

        assert_eq!(*seen.borrow(), vec![">> <STOP>".to_string(), "<< STOPPED\n".to_string()]);
    }
}
