//! Serial port abstraction and the `serialport`-backed implementation.
//!
//! [`Port`] is the byte-level seam the [`Connection`](crate::Connection)
//! drives; [`Connector`] opens one. Production code uses
//! [`SerialConnector`]; tests swap in an in-memory double.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::conn::ConnError;

/// Default port name.
pub const DEFAULT_PORT: &str = "COM5";

/// Default baud rate.
pub const DEFAULT_BAUD: u32 = 9600;

/// Read/write timeout parameters.
///
/// Total time allowed for an operation of `n` bytes is
/// `constant + per_byte * n`. The read interval bounds the gap between two
/// consecutive inbound bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read_interval: Duration,
    pub read_constant: Duration,
    pub read_per_byte: Duration,
    pub write_constant: Duration,
    pub write_per_byte: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_millis(50),
            read_constant: Duration::from_millis(50),
            read_per_byte: Duration::from_millis(10),
            write_constant: Duration::from_millis(50),
            write_per_byte: Duration::from_millis(10),
        }
    }
}

impl Timeouts {
    /// Worst-case blocking time for a read of `len` bytes.
    pub fn read_budget(&self, len: usize) -> Duration {
        self.read_constant
            .saturating_add(self.read_per_byte.saturating_mul(saturating_u32(len)))
    }

    /// Worst-case blocking time for a write of `len` bytes.
    pub fn write_budget(&self, len: usize) -> Duration {
        self.write_constant
            .saturating_add(self.write_per_byte.saturating_mul(saturating_u32(len)))
    }
}

fn saturating_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Fixed line parameters: 9600 baud, 8-N-1, no flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub timeouts: Timeouts,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeouts: Timeouts::default(),
        }
    }
}

impl PortConfig {
    /// The single timeout handed to the OS driver.
    ///
    /// `serialport` has one timeout for both directions, so the per-byte
    /// multipliers are not applied; the constant term bounds each call.
    pub fn io_timeout(&self) -> Duration {
        self.timeouts.read_constant.max(self.timeouts.write_constant)
    }
}

/// An open, configured byte link to the ECU.
pub trait Port {
    /// Write `data` in a single call. May write fewer bytes than given.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Read whatever is available into `buf`. A timeout reads zero bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bytes waiting in the driver's input queue.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Name the port was opened with.
    fn name(&self) -> &str;
}

/// Opens ports. Implementations must not hand back a partially configured
/// port: on any failure the handle is released before returning.
pub trait Connector {
    fn open(&mut self, name: &str, config: &PortConfig) -> Result<Box<dyn Port>, ConnError>;
}

/// Opens real serial devices through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&mut self, name: &str, config: &PortConfig) -> Result<Box<dyn Port>, ConnError> {
        let port = serialport::new(name, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.io_timeout())
            .open()?;

        log::debug!(
            "configured {} at {} baud, timeout {:?}",
            name,
            config.baud_rate,
            config.io_timeout()
        );

        Ok(Box::new(SerialLink {
            inner: port,
            name: name.to_string(),
        }))
    }
}

/// A `serialport` handle behind the [`Port`] trait.
pub struct SerialLink {
    inner: Box<dyn SerialPort>,
    name: String,
}

impl Port for SerialLink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.inner.write(data) {
            Ok(n) => {
                self.inner.flush()?;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.inner.bytes_to_read()? as usize)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Names of the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<String>, ConnError> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect())
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
