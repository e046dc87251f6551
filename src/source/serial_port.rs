use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info};

use crate::{
    error::Error,
    source::{from_reader, FrameSource, DEFAULT_MAX_FRAME},
};

/// The baud rate used if none is set.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Builder for a serial port [`FrameSource`].
#[derive(Debug)]
pub struct SerialPortBuilder {
    path: String,
    baud: Option<u32>,
    max_frame: Option<usize>,
}

fn try_create_serial_port(path: &str, baud: u32) -> Result<SerialStream, Error> {
    tokio_serial::new(path, baud)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|source| Error::OpenDevice {
            device: path.to_owned(),
            baud,
            source,
        })
}

impl SerialPortBuilder {
    /// Start a new builder.
    /// The tty should likely be along the lines of `/dev/ttyUSBx` on unix, and `COMx` on Windows.
    pub fn new(tty: &str) -> Self {
        Self {
            path: tty.to_string(),
            baud: None,
            max_frame: None,
        }
    }

    /// Set the serial port builder's baud.
    /// Will use [`DEFAULT_BAUD`] if not set.
    pub fn set_baud(mut self, baud: u32) -> Self {
        self.baud = Some(baud);
        self
    }

    /// The largest frame a single read may produce.
    pub fn set_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = Some(max_frame);
        self
    }

    /// Open the port.
    ///
    /// Not being able to open it is an error,
    /// but once open any read problem just ends the frame source.
    pub fn build(self) -> Result<FrameSource, Error> {
        let baud = self.baud.unwrap_or(DEFAULT_BAUD);
        debug!(%self.path, %baud, "Opening port");

        let serial_stream = try_create_serial_port(&self.path, baud)?;

        info!(%self.path, %baud, "Serial port open");

        Ok(from_reader(
            serial_stream,
            self.max_frame.unwrap_or(DEFAULT_MAX_FRAME),
        ))
    }
}
