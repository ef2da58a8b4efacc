//! firmata-core: Core traits, types, and error definitions.
//!
//! This crate defines the transport-agnostic abstractions shared by the
//! Firmata protocol engine, its transports, and consumers. Applications
//! depend on these types without pulling in a particular transport.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel to a board
//! - [`FirmataEvent`] -- notifications raised by the engine
//! - [`Pin`], [`PinMode`], [`Capability`] -- the pin capability model
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::FirmataEvent;
pub use transport::Transport;
pub use types::*;
