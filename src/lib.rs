#![deny(missing_docs)]

//! This crate captures the output of a serial port and shares it.
//!
//! Everything read from the port is put through a [`hub::HubHandle`].
//! The hub hands a copy of each chunk of bytes to every subscriber.
//!
//! Two kinds of subscribers exist:
//! - A log, which writes the stream to a file (and to stdout, if wanted).
//! - TCP clients. Each connected client gets the raw, unframed stream from the point it connected.
//!
//! Subscribers come and go as they please.
//! Each has its own buffer, so one being slow or broken does not affect anyone else.
//! See [`hub::OverflowPolicy`] for what happens when a buffer fills up.
//!
//! When the port closes the hub closes every subscription, and the server stops.

/// The command line interface.
pub mod cli;

/// Relates to config files.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// The unit of data moving through the system.
pub mod frame;

/// Fan-out of frames to subscribers.
pub mod hub;

/// Logging/tracing setup.
pub mod logging;

/// Code relating to setting up the server which accepts clients and spawns handlers for them.
pub mod server;

/// Consumers of subscriptions, writing frames somewhere.
pub mod sink;

/// Where frames come from.
pub mod source;
