use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    hub::{HubConfig, OverflowPolicy},
    source::{serial_port::DEFAULT_BAUD, DEFAULT_MAX_FRAME},
};

/// The device used if none is configured.
#[cfg(windows)]
pub const DEFAULT_DEVICE: &str = "COM1";

/// The device used if none is configured.
#[cfg(not(windows))]
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// The log file used if none is configured.
pub const DEFAULT_LOG_FILE: &str = "ttysrv.log";

/// The TCP port used if none is configured.
pub const DEFAULT_PORT: u16 = 666;

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// A serial device.
    Serial {
        /// Likely "/dev/ttyUSBx" or "COMx".
        device: String,

        /// The baud rate.
        baud: u32,
    },

    /// The contents of a file, read as if it came from a device.
    File(PathBuf),
}

impl Default for Source {
    fn default() -> Self {
        Self::Serial {
            device: DEFAULT_DEVICE.into(),
            baud: DEFAULT_BAUD,
        }
    }
}

/// Where the raw stream is logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// The file the stream is written to.
    pub path: PathBuf,

    /// Keep what is in the file already instead of truncating it.
    pub append: bool,

    /// Also write the stream to stdout.
    pub echo: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_LOG_FILE.into(),
            append: false,
            echo: true,
        }
    }
}

/// The configuration used for running the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// See [`Source`].
    pub source: Source,

    /// The largest frame a single read from the source produces.
    pub max_frame: usize,

    /// See [`LogConfig`].
    pub log: LogConfig,

    /// The TCP port clients connect to.
    pub port: u16,

    /// How subscribers are buffered.
    pub hub: HubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: Source::default(),
            max_frame: DEFAULT_MAX_FRAME,
            log: LogConfig::default(),
            port: DEFAULT_PORT,
            hub: HubConfig::default(),
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            source: Source::Serial {
                device: "/dev/ttyACM0".into(),
                baud: 9600,
            },
            log: LogConfig {
                path: "/var/log/ttysrv/ttyACM0.log".into(),
                append: true,
                echo: false,
            },
            port: 6666,
            hub: HubConfig {
                capacity: 256,
                overflow: OverflowPolicy::Disconnect,
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path).map_err(|e| Error::ReadConfig(path.into(), e))?;

        Self::deserialize(&s)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.hub.capacity == 0 {
            return Err(Error::BadConfig(
                "The hub capacity is zero. Each subscriber needs room for at least one frame."
                    .into(),
            ));
        }

        if self.max_frame == 0 {
            return Err(Error::BadConfig(
                "The max frame size is zero. Reads from the source would never yield anything."
                    .into(),
            ));
        }

        match &self.source {
            Source::Serial { device, .. } if device.trim().is_empty() => Err(Error::BadConfig(
                "The serial device is empty. Please give a path like `/dev/ttyUSB0` or `COM1`."
                    .into(),
            )),
            Source::Serial { baud: 0, .. } => {
                Err(Error::BadConfig("The baud rate must be above zero.".into()))
            }
            _ => Ok(()),
        }
    }
}
