//! Asynchronous engine event types.
//!
//! Events are emitted by the protocol engine in the order the bytes that
//! caused them arrived. The async client delivers them through a
//! `tokio::sync::broadcast` channel so a UI can react to pin changes
//! without polling.

use crate::types::{FirmwareInfo, ProtocolVersion};

/// An event emitted by the engine when board or session state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmataEvent {
    /// The observable state (mode or value) of a pin changed.
    PinChanged {
        /// Index of the pin that changed.
        pin: u8,
    },

    /// The board reported its firmware name and version.
    FirmwareReported(FirmwareInfo),

    /// The board reported the Firmata protocol version it speaks.
    ProtocolVersion(ProtocolVersion),

    /// Capability discovery finished: every outstanding discovery query
    /// has been answered and the pin list is complete.
    CapabilitiesReady,

    /// The board sent a text message (`STRING_DATA`).
    StringData {
        text: String,
    },

    /// The board answered an I2C read request.
    I2cReply {
        /// 7-bit (or 10-bit) slave address.
        address: u16,
        /// Register the data was read from.
        register: u16,
        /// Bytes read, one value per 14-bit pair on the wire.
        data: Vec<u16>,
    },

    /// A SysEx message with a command this library does not interpret.
    UnknownSysex {
        opcode: u8,
        payload: Vec<u8>,
    },

    /// A discovery query went unanswered past the configured timeout.
    QueryTimedOut,

    /// A transport connection was established and the session reset.
    Connected,

    /// The transport connection was lost or closed.
    Disconnected,
}
