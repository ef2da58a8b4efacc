//! Firmata protocol engine.
//!
//! This crate implements the host side of the Firmata 2.x protocol used
//! by StandardFirmata and its variants. It provides:
//!
//! - **Frame codec** ([`codec`]) -- wire constants, 7-bit value helpers, and
//!   an incremental [`Decoder`] that turns a byte stream into [`Message`]s,
//!   buffering partial frames across reads.
//! - **Command encoders** ([`commands`]) -- build the byte sequences for every
//!   query and control message the host sends.
//! - **Pin capability model** ([`pins`]) -- the board's pins, their
//!   supported modes, and last known mode and value.
//! - **Session** ([`session`]) -- the synchronous protocol engine: discovery
//!   state machine, command validation, and event generation. No I/O.
//! - **FirmataClient** ([`client`]) -- async handle whose IO task owns a
//!   [`Transport`](firmata_core::Transport) and a session.
//! - **FirmataBuilder** ([`builder`]) -- fluent configuration of a client.
//!
//! # Example
//!
//! ```
//! use firmata_engine::{Session, Command};
//! use firmata_core::FirmataEvent;
//!
//! let mut session = Session::new();
//! session.connect();
//!
//! // Ask for capabilities and feed back the board's answer.
//! let query = session.prepare(&Command::CapabilityQuery).unwrap();
//! assert_eq!(query, vec![0xF0, 0x6B, 0xF7]);
//!
//! let events = session.receive(&[0xF0, 0x6C, 0x01, 0x01, 0x7F, 0x00, 0x01, 0x7F, 0xF7]);
//! assert_eq!(events, vec![FirmataEvent::CapabilitiesReady]);
//! assert_eq!(session.pins().len(), 2);
//! ```

pub mod builder;
pub mod client;
pub mod codec;
pub mod commands;
pub(crate) mod io;
pub mod pins;
pub mod session;

pub use builder::FirmataBuilder;
pub use client::FirmataClient;
pub use codec::{Decoder, Message};
pub use pins::PinTable;
pub use session::{Command, Session, SessionSnapshot};
