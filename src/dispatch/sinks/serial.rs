//! Line-oriented serial device
//!
//! Each write is one `"<channel>=<value>\n"` line. The port is opened by
//! path on first use and kept open; a failed write drops the handle so the
//! next write reopens it.
//!
//! The port is opened as a plain file, so no baud rate, parity or stop bits
//! are set: the link runs at whatever the OS or board defaults to. USB CDC
//! boards ignore the baud rate and work as-is; boards behind a UART bridge
//! must already be configured (`stty -F /dev/ttyUSB0 115200`, `mode COM3`)
//! before plynk opens them.

use super::{DeviceSink, SinkCommand};
use crate::error::DispatchError;
use crate::types::DeviceType;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

type Writer = Box<dyn Write + Send>;

pub struct SerialSink {
    id: String,
    port: Option<PathBuf>,
    writer: Option<Writer>,
}

impl SerialSink {
    /// Sink writing to the device at `port`
    pub fn open(id: impl Into<String>, port: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            port: Some(port.into()),
            writer: None,
        }
    }

    /// Sink over an already-open writer
    pub fn with_writer(id: impl Into<String>, writer: Writer) -> Self {
        Self {
            id: id.into(),
            port: None,
            writer: Some(writer),
        }
    }

    fn writer(&mut self) -> Result<&mut Writer, DispatchError> {
        if self.writer.is_none() {
            let port = self
                .port
                .as_ref()
                .ok_or_else(|| DispatchError::Io(format!("serial device '{}' is closed", self.id)))?;
            let file = OpenOptions::new().write(true).open(port).map_err(|e| {
                DispatchError::Io(format!("Failed to open {}: {}", port.display(), e))
            })?;
            tracing::info!("Opened serial device '{}' at {}", self.id, port.display());
            self.writer = Some(Box::new(file));
        }
        self.writer
            .as_mut()
            .ok_or_else(|| DispatchError::Io(format!("serial device '{}' is closed", self.id)))
    }
}

impl DeviceSink for SerialSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Serial
    }

    fn write(&mut self, command: &SinkCommand) -> Result<(), DispatchError> {
        let SinkCommand::Channel { channel, value } = command else {
            return Err(DispatchError::Unsupported(
                "serial devices take channel writes only".to_string(),
            ));
        };
        let line = format!("{}={}\n", channel.as_profile(), value);

        let writer = self.writer()?;
        let result = writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush());
        if let Err(e) = result {
            self.writer = None;
            return Err(match e.kind() {
                std::io::ErrorKind::TimedOut => DispatchError::Timeout(e.to_string()),
                _ => DispatchError::Io(e.to_string()),
            });
        }
        Ok(())
    }
}
