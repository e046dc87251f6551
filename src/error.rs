use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The serial device could not be opened.
    #[error("Could not open serial device `{device}` at {baud} baud")]
    OpenDevice {
        /// Path to the device.
        device: String,

        /// The requested baud rate.
        baud: u32,

        /// The underlying problem.
        #[source]
        source: tokio_serial::Error,
    },

    /// A file used as the frame source could not be opened.
    #[error("Could not open source file {0:?}")]
    OpenSource(PathBuf, #[source] io::Error),

    /// The log file could not be opened.
    #[error("Could not open log file {0:?}")]
    OpenLog(PathBuf, #[source] io::Error),

    /// Could not listen on the requested port.
    #[error("Could not listen on port {0}")]
    Bind(u16, #[source] io::Error),

    /// Writing to a consumer's output failed.
    #[error("Write to consumer output failed")]
    Write(#[source] io::Error),

    /// Writing to the log file failed.
    #[error("Write to log file {0:?} failed")]
    LogWrite(PathBuf, #[source] io::Error),

    /// The hub is no longer running, so no subscriptions can be made.
    #[error("The hub has stopped, the frame source has ended")]
    HubStopped,

    /// The configuration file could not be read.
    #[error("Could not read config file {0:?}")]
    ReadConfig(PathBuf, #[source] io::Error),

    /// The configuration is not valid.
    #[error("Bad configuration. Problem: `{0}`")]
    BadConfig(String),
}

impl Error {
    /// Get the problem description if this is a [`Error::BadConfig`].
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(problem) = self {
            Ok(problem)
        } else {
            Err(self)
        }
    }
}
