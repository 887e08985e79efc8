//! Line-oriented serial transport to the motion controller

use crate::error::{Result, RigError};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::time::Duration;

/// ASCII line transport
///
/// Lines are written with the controller's `\r\n` terminator already
/// appended by the caller.
pub trait LinePort: Send {
    /// Write one raw command line
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Read one line without its terminator
    ///
    /// Returns `None` when no complete line arrived within the port timeout.
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Drop anything received but not yet read
    fn clear_input(&mut self) -> Result<()>;

    fn describe(&self) -> String;
}

/// A serial port as seen by the port listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub kind: String,
}

/// List serial ports the motion controller could be attached to
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| {
            let kind = match &port.port_type {
                serialport::SerialPortType::UsbPort(info) => match &info.product {
                    Some(product) => format!("USB ({})", product),
                    None => format!("USB {:04x}:{:04x}", info.vid, info.pid),
                },
                serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                serialport::SerialPortType::PciPort => "PCI".to_string(),
                serialport::SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: port.port_name,
                kind,
            }
        })
        .collect())
}

/// Serial port opened for line I/O
pub struct SerialLinePort {
    name: String,
    writer: Box<dyn serialport::SerialPort>,
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    partial: String,
}

impl SerialLinePort {
    /// Open `name`, or the first listed port when `name` is empty
    pub fn open(name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let name = if name.is_empty() {
            available_ports()?
                .into_iter()
                .next()
                .map(|port| port.name)
                .ok_or_else(|| RigError::Transport("no serial ports found".into()))?
        } else {
            name.to_string()
        };

        let writer = serialport::new(&name, baud_rate)
            .timeout(timeout)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| RigError::Serial(e).with_context(format!("Failed to open {}", name)))?;
        let reader = BufReader::new(writer.try_clone()?);

        tracing::info!("Opened motion controller port {} at {} baud", name, baud_rate);
        Ok(Self {
            name,
            writer,
            reader,
            partial: String::new(),
        })
    }
}

impl LinePort for SerialLinePort {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        match self.reader.read_line(&mut self.partial) {
            Ok(0) => Ok(None),
            Ok(_) if self.partial.ends_with('\n') => {
                let line = self.partial.trim_end_matches(['\r', '\n']).to_string();
                self.partial.clear();
                Ok(Some(line))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.writer.clear(serialport::ClearBuffer::Input)?;
        let buffered = self.reader.buffer().len();
        self.reader.consume(buffered);
        self.partial.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
