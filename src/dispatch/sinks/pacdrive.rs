//! Ultimarc PacDrive output board
//!
//! The board drives 16 LED channels. Its whole state is sent on every write
//! as one 5-byte HID output report: report id, command `0xDD`, a zero byte
//! and the 16-bit channel state, high byte first.

use super::{DeviceSink, SinkCommand};
use crate::error::DispatchError;
use crate::types::{DeviceType, OutputValue};

pub const PACDRIVE_CHANNELS: u32 = 16;
pub const ULTIMARC_VENDOR_ID: u16 = 0xD209;
pub const PACDRIVE_PRODUCT_IDS: std::ops::RangeInclusive<u16> = 0x1500..=0x1508;

/// Writes raw HID output reports
pub trait HidReportWriter: Send {
    fn write_report(&mut self, report: &[u8]) -> Result<(), DispatchError>;
}

/// Report writer that only logs; used when HID support is compiled out
#[derive(Debug, Default)]
pub struct LoggingReportWriter {
    index: usize,
}

impl LoggingReportWriter {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl HidReportWriter for LoggingReportWriter {
    fn write_report(&mut self, report: &[u8]) -> Result<(), DispatchError> {
        tracing::debug!("PacDrive #{} report {:02X?}", self.index, report);
        Ok(())
    }
}

#[cfg(feature = "pacdrive-hid")]
mod hid {
    use super::*;
    use hidapi::{HidApi, HidDevice};

    /// PacDrive opened through `hidapi`; reopened after a failed write
    pub struct HidApiWriter {
        index: usize,
        device: Option<HidDevice>,
    }

    impl HidApiWriter {
        pub fn new(index: usize) -> Self {
            Self {
                index,
                device: None,
            }
        }

        fn open(&self) -> Result<HidDevice, DispatchError> {
            let api = HidApi::new()
                .map_err(|e| DispatchError::Io(format!("Failed to initialize HidApi: {}", e)))?;
            let info = api
                .device_list()
                .filter(|d| {
                    d.vendor_id() == ULTIMARC_VENDOR_ID
                        && PACDRIVE_PRODUCT_IDS.contains(&d.product_id())
                })
                .nth(self.index)
                .ok_or_else(|| {
                    DispatchError::DeviceNotFound(format!("PacDrive #{}", self.index))
                })?;
            info.open_device(&api)
                .map_err(|e| DispatchError::Io(format!("Failed to open PacDrive: {}", e)))
        }
    }

    impl HidReportWriter for HidApiWriter {
        fn write_report(&mut self, report: &[u8]) -> Result<(), DispatchError> {
            if self.device.is_none() {
                self.device = Some(self.open()?);
            }
            let Some(device) = self.device.as_ref() else {
                return Err(DispatchError::DeviceNotFound(format!("PacDrive #{}", self.index)));
            };
            if let Err(e) = device.write(report) {
                self.device = None;
                return Err(DispatchError::Io(format!("PacDrive write failed: {}", e)));
            }
            Ok(())
        }
    }
}

#[cfg(feature = "pacdrive-hid")]
pub use hid::HidApiWriter;

/// The report writer for the `index`-th attached board
pub fn open_writer(index: usize) -> Box<dyn HidReportWriter> {
    #[cfg(feature = "pacdrive-hid")]
    {
        Box::new(HidApiWriter::new(index))
    }
    #[cfg(not(feature = "pacdrive-hid"))]
    {
        tracing::warn!("Built without HID support; PacDrive #{} writes are logged only", index);
        Box::new(LoggingReportWriter::new(index))
    }
}

/// Build the output report for a channel state
pub fn state_report(state: u16) -> [u8; 5] {
    let [high, low] = state.to_be_bytes();
    [0x00, 0xDD, 0x00, high, low]
}

/// Interpret a value as on/off
pub fn as_switch(value: &OutputValue) -> bool {
    match value {
        OutputValue::Text(text) => match OutputValue::coerce_text(text) {
            OutputValue::Text(t) => {
                let t = t.trim();
                !(t.is_empty()
                    || t.eq_ignore_ascii_case("off")
                    || t.eq_ignore_ascii_case("false"))
            }
            number => as_switch(&number),
        },
        number => number.as_f64().is_some_and(|v| v != 0.0),
    }
}

pub struct PacDriveSink {
    id: String,
    state: u16,
    writer: Box<dyn HidReportWriter>,
}

impl PacDriveSink {
    pub fn new(id: impl Into<String>, writer: Box<dyn HidReportWriter>) -> Self {
        Self {
            id: id.into(),
            state: 0,
            writer,
        }
    }

    /// Current channel bits
    pub fn state(&self) -> u16 {
        self.state
    }

    /// Set one 0-based channel and push the full state
    pub fn set_channel(&mut self, channel: u32, on: bool) -> Result<(), DispatchError> {
        if channel >= PACDRIVE_CHANNELS {
            return Err(DispatchError::Unsupported(format!(
                "PacDrive channel {} out of range",
                channel + 1
            )));
        }
        let next = if on {
            self.state | (1 << channel)
        } else {
            self.state & !(1 << channel)
        };
        self.writer.write_report(&state_report(next))?;
        self.state = next;
        Ok(())
    }
}

impl DeviceSink for PacDriveSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::PacDrive
    }

    fn write(&mut self, command: &SinkCommand) -> Result<(), DispatchError> {
        match command {
            SinkCommand::Channel { channel, value } => {
                let index = channel.as_index().ok_or_else(|| {
                    DispatchError::Unsupported(format!("PacDrive channel {:?}", channel))
                })?;
                self.set_channel(index, as_switch(value))
            }
            SinkCommand::Wled { .. } => Err(DispatchError::Unsupported(
                "PacDrive cannot apply WLED effects".to_string(),
            )),
        }
    }
}
