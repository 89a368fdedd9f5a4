//! Tuning session: the connection plus the two calibration tables.
//!
//! One `Session` is owned by the application root and handed to whatever
//! front-end drives it. Front-ends call [`Session::poll`] once per frame or
//! loop iteration and the send helpers from their input handlers.

use crate::buffer::ReceiveBuffer;
use crate::command::Command;
use crate::conn::{ConnError, Connection, LinkState};
use crate::port::{Connector, DEFAULT_PORT, PortConfig, SerialConnector};
use crate::table::{CalibrationTable, TableKind};

pub struct Session<C: Connector = SerialConnector> {
    conn: Connection<C>,
    port_name: String,
    fuel: CalibrationTable,
    throttle: CalibrationTable,
}

impl Session<SerialConnector> {
    /// Disconnected session on the default port with all-zero tables.
    pub fn new() -> Self {
        Self::with_connection(Connection::new())
    }
}

impl Default for Session<SerialConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Session<C> {
    pub fn with_connection(conn: Connection<C>) -> Self {
        Self {
            conn,
            port_name: DEFAULT_PORT.to_string(),
            fuel: CalibrationTable::new(),
            throttle: CalibrationTable::new(),
        }
    }

    pub fn with_connector(connector: C, config: PortConfig) -> Self {
        Self::with_connection(Connection::with_connector(connector, config))
    }

    pub fn connection(&self) -> &Connection<C> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection<C> {
        &mut self.conn
    }

    /// Port used by the next [`connect`](Self::connect).
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn set_port_name(&mut self, name: impl Into<String>) {
        self.port_name = name.into();
    }

    pub fn state(&self) -> LinkState {
        self.conn.state()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn connect(&mut self) -> Result<(), ConnError> {
        self.conn.open(&self.port_name)
    }

    /// Returns `false` if nothing was open.
    pub fn disconnect(&mut self) -> bool {
        self.conn.close()
    }

    /// Connect if disconnected, disconnect if connected.
    pub fn toggle_connection(&mut self) -> Result<LinkState, ConnError> {
        if self.conn.is_connected() {
            self.conn.close();
        } else {
            self.connect()?;
        }
        Ok(self.conn.state())
    }

    pub fn send_command(&mut self, cmd: &Command) -> Result<Option<usize>, ConnError> {
        self.conn.send_command(cmd)
    }

    /// Send the table of the given kind. No-op when disconnected.
    pub fn send_table(&mut self, kind: TableKind) -> Result<Option<usize>, ConnError> {
        let table = match kind {
            TableKind::Fuel => &self.fuel,
            TableKind::Throttle => &self.throttle,
        };
        log::debug!("sending {kind} table");
        self.conn.send_table(table)
    }

    /// Poll the port once and return newly completed responses.
    pub fn poll(&mut self) -> Result<Vec<String>, ConnError> {
        self.conn.poll_receive()?;
        Ok(self.conn.take_responses())
    }

    /// Like [`poll`](Self::poll), but falls back to the raw last response
    /// when bytes arrived without completing a line.
    ///
    /// Replies with no trailing newline would otherwise never be shown. A
    /// fragment that is later completed appears twice: raw now, whole later.
    pub fn poll_display(&mut self) -> Result<Vec<String>, ConnError> {
        let n = self.conn.poll_receive()?;
        let lines = self.conn.take_responses();
        if n > 0 && lines.is_empty() {
            return Ok(vec![self.conn.last_response().text().into_owned()]);
        }
        Ok(lines)
    }

    pub fn last_response(&self) -> &ReceiveBuffer {
        self.conn.last_response()
    }

    pub fn table(&self, kind: TableKind) -> &CalibrationTable {
        match kind {
            TableKind::Fuel => &self.fuel,
            TableKind::Throttle => &self.throttle,
        }
    }

    pub fn table_mut(&mut self, kind: TableKind) -> &mut CalibrationTable {
        match kind {
            TableKind::Fuel => &mut self.fuel,
            TableKind::Throttle => &mut self.throttle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode_table;
    use crate::port::mock::{MockConnector, Shared};

    fn session() -> (Session<MockConnector>, Shared) {
        let (connector, state) = MockConnector::new(&["COM5", "COM7"]);
        (Session::with_connector(connector, PortConfig::default()), state)
    }

    #[test]
    fn defaults() {
        let (s, _) = session();
        assert_eq!(s.port_name(), "COM5");
        assert_eq!(s.state(), LinkState::Disconnected);
        assert_eq!(*s.table(TableKind::Fuel), CalibrationTable::new());
        assert_eq!(s.last_response().text(), "nothing");
    }

    #[test]
    fn toggle_connects_and_disconnects() {
        let (mut s, state) = session();
        assert_eq!(s.toggle_connection().unwrap(), LinkState::Connected);
        assert_eq!(s.toggle_connection().unwrap(), LinkState::Disconnected);
        assert_eq!(state.borrow().live, 0);
    }

    #[test]
    fn toggle_on_missing_port_reports_error() {
        let (mut s, _) = session();
        s.set_port_name("COM1");
        assert!(s.toggle_connection().is_err());
        assert!(!s.is_connected());
    }

    #[test]
    fn connect_uses_selected_port() {
        let (mut s, _) = session();
        s.set_port_name("COM7");
        s.connect().unwrap();
        assert_eq!(s.connection().port_name(), Some("COM7"));
    }

    #[test]
    fn each_table_sends_its_own_data() {
        let (mut s, state) = session();
        s.connect().unwrap();
        s.table_mut(TableKind::Fuel).fill(14.7);
        s.table_mut(TableKind::Throttle).set(0, 0, 3.5);

        s.send_table(TableKind::Fuel).unwrap();
        s.send_table(TableKind::Throttle).unwrap();

        let written = state.borrow().written.clone();
        assert_eq!(written.len(), 2);
        assert_eq!(decode_table(&written[0]).unwrap(), CalibrationTable::filled(14.7));
        let throttle = decode_table(&written[1]).unwrap();
        assert_eq!(throttle.get(0, 0), Some(3.5));
        assert_eq!(throttle.get(7, 7), Some(0.0));
    }

    #[test]
    fn disconnected_session_is_inert() {
        let (mut s, state) = session();
        assert_eq!(s.send_command(&Command::RequestData).unwrap(), None);
        assert_eq!(s.send_table(TableKind::Throttle).unwrap(), None);
        assert!(s.poll().unwrap().is_empty());
        assert!(state.borrow().written.is_empty());
    }

    #[test]
    fn poll_returns_completed_lines() {
        let (mut s, state) = session();
        s.connect().unwrap();
        state.borrow_mut().push_inbound(b"RPM=3000\nMAP=");
        assert_eq!(s.poll().unwrap(), vec!["RPM=3000".to_string()]);
        state.borrow_mut().push_inbound(b"45\n");
        assert_eq!(s.poll().unwrap(), vec!["MAP=45".to_string()]);
        assert_eq!(s.last_response().text(), "45\n");
    }

    #[test]
    fn poll_display_shows_unterminated_reply() {
        let (mut s, state) = session();
        s.connect().unwrap();
        s.send_command(&Command::RequestData).unwrap();
        state.borrow_mut().push_inbound(b"RPM=900");
        assert_eq!(s.poll_display().unwrap(), vec!["RPM=900".to_string()]);
        assert!(s.poll().unwrap().is_empty());
    }

    #[test]
    fn poll_display_prefers_completed_lines() {
        let (mut s, state) = session();
        s.connect().unwrap();
        state.borrow_mut().push_inbound(b"OK\r\nRPM=");
        assert_eq!(s.poll_display().unwrap(), vec!["OK".to_string()]);
        assert!(s.poll_display().unwrap().is_empty());
        assert_eq!(s.last_response().text(), "OK\r\nRPM=");
    }
}
