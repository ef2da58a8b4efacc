//! Firmata frame decoder and wire constants.
//!
//! Firmata is a MIDI-derived byte protocol. Every byte with the high bit set
//! is a command (status) byte; every data byte carries 7 bits. Multi-byte
//! integers are sent 7 bits per byte, least significant byte first.
//!
//! # Frame formats
//!
//! ```text
//! 0x90|port  <mask lsb> <mask msb>        digital port report
//! 0xE0|pin   <value lsb> <value msb>      analog input report
//! 0xF9       <major> <minor>              protocol version
//! 0xF0 <command> [<payload>...] 0xF7      SysEx (extended) message
//! ```
//!
//! The [`Decoder`] consumes a byte stream one byte at a time and yields a
//! [`Message`] whenever a frame completes. Frames may arrive split across
//! any number of reads; BLE notifications are typically 20 bytes or less.

use tracing::{debug, trace, warn};

use firmata_core::error::{Error, Result};
use firmata_core::types::{Capability, MAX_PIN, PinMode};

// ---------------------------------------------------------------
// Command bytes
// ---------------------------------------------------------------

/// Digital port message; the low nibble is the port number.
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Analog message; the low nibble is the analog pin number.
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Enable/disable analog input reporting; the low nibble is the channel.
pub const REPORT_ANALOG: u8 = 0xC0;
/// Enable/disable digital port reporting; the low nibble is the port.
pub const REPORT_DIGITAL: u8 = 0xD0;
/// Set a pin's mode.
pub const SET_PIN_MODE: u8 = 0xF4;
/// Set the value of a single digital pin.
pub const SET_DIGITAL_PIN_VALUE: u8 = 0xF5;
/// Protocol version report (and query).
pub const REPORT_VERSION: u8 = 0xF9;
/// Reset the firmware to its default state.
pub const SYSTEM_RESET: u8 = 0xFF;
/// Start of a SysEx message.
pub const START_SYSEX: u8 = 0xF0;
/// End of a SysEx message.
pub const END_SYSEX: u8 = 0xF7;

// ---------------------------------------------------------------
// SysEx commands
// ---------------------------------------------------------------

pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
pub const CAPABILITY_QUERY: u8 = 0x6B;
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
pub const PIN_STATE_QUERY: u8 = 0x6D;
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
/// Analog write (PWM, servo) to any pin, with values wider than 14 bits.
pub const EXTENDED_ANALOG: u8 = 0x6F;
/// Attach a servo and set its pulse range.
pub const SERVO_CONFIG: u8 = 0x70;
/// Text message, 14 bits per character.
pub const STRING_DATA: u8 = 0x71;
/// Shift register data.
pub const SHIFT_DATA: u8 = 0x75;
pub const I2C_REQUEST: u8 = 0x76;
pub const I2C_REPLY: u8 = 0x77;
pub const I2C_CONFIG: u8 = 0x78;
/// Firmware name and version (report and query).
pub const REPORT_FIRMWARE: u8 = 0x79;
pub const SAMPLING_INTERVAL: u8 = 0x7A;

/// Terminates one pin record in a capability response, and marks a pin
/// with no analog channel in an analog mapping response.
pub const SEPARATOR: u8 = 0x7F;

/// Largest SysEx body kept in memory before the frame is discarded.
pub const MAX_SYSEX_LEN: usize = 4096;

// ---------------------------------------------------------------
// 7-bit helpers
// ---------------------------------------------------------------

/// Split a 14-bit value into `[lsb, msb]` 7-bit bytes.
///
/// Bits above 14 are dropped; callers validate the range first.
///
/// ```
/// use firmata_engine::codec::split_14bit;
///
/// assert_eq!(split_14bit(511), [0x7F, 0x03]);
/// ```
pub fn split_14bit(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

/// Join 7-bit little-endian bytes into an integer.
///
/// At most the first four bytes (28 bits) are used.
///
/// ```
/// use firmata_engine::codec::join_7bit_le;
///
/// assert_eq!(join_7bit_le(&[0x7F, 0x03]), 511);
/// assert_eq!(join_7bit_le(&[0x01]), 1);
/// ```
pub fn join_7bit_le(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, &b)| acc | (((b & 0x7F) as u32) << (7 * i)))
}

/// Encode text as 14-bit packed characters (two 7-bit bytes per char,
/// low byte first).
///
/// Fails with [`Error::InvalidArgument`] for characters above U+3FFF.
pub fn pack_14bit_ascii(text: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len() * 2);
    for ch in text.chars() {
        let code = ch as u32;
        if code > 0x3FFF {
            return Err(Error::InvalidArgument(format!(
                "character {ch:?} does not fit in 14 bits"
            )));
        }
        out.extend_from_slice(&split_14bit(code as u16));
    }
    Ok(out)
}

/// Decode 14-bit packed characters. A trailing odd byte is ignored.
pub fn unpack_14bit_ascii(bytes: &[u8]) -> String {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let code = (pair[0] & 0x7F) as u32 | (((pair[1] & 0x7F) as u32) << 7);
            char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect()
}

// ---------------------------------------------------------------
// Messages
// ---------------------------------------------------------------

/// A decoded inbound Firmata message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Values of the 8 pins of a digital port. Bit `n` of `bitmask` is pin
    /// `port * 8 + n`.
    DigitalMessage { port: u8, bitmask: u8 },

    /// An analog input reading. `pin` is the analog pin number (A0 = 0),
    /// resolved to a board pin through the analog mapping.
    AnalogMessage { pin: u8, value: u16 },

    /// Firmata protocol version spoken by the firmware.
    ReportVersion { major: u8, minor: u8 },

    /// Firmware name and version.
    ReportFirmware { major: u8, minor: u8, name: String },

    /// Analog channel of each pin, indexed by pin; `None` for pins that
    /// are not analog-capable.
    AnalogMappingResponse { channels: Vec<Option<u8>> },

    /// Supported modes of each pin, indexed by pin.
    CapabilityResponse { pins: Vec<Vec<Capability>> },

    /// Current mode and value of one pin.
    PinStateResponse { pin: u8, mode: PinMode, value: u32 },

    /// Text sent by the firmware.
    StringData { text: String },

    /// Data read from an I2C device.
    I2cReply {
        address: u16,
        register: u16,
        data: Vec<u16>,
    },

    /// A SysEx message this decoder does not interpret, or a known command
    /// whose payload could not be parsed.
    Unknown { opcode: u8, payload: Vec<u8> },
}

impl Message {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::DigitalMessage { .. } => "digital",
            Message::AnalogMessage { .. } => "analog",
            Message::ReportVersion { .. } => "report-version",
            Message::ReportFirmware { .. } => "report-firmware",
            Message::AnalogMappingResponse { .. } => "analog-mapping",
            Message::CapabilityResponse { .. } => "capability",
            Message::PinStateResponse { .. } => "pin-state",
            Message::StringData { .. } => "string",
            Message::I2cReply { .. } => "i2c-reply",
            Message::Unknown { .. } => "unknown",
        }
    }
}

// ---------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum DecodeState {
    /// Between frames.
    #[default]
    Idle,
    /// Collecting the two data bytes of a fixed-length command.
    Command { command: u8, data: [u8; 2], len: usize },
    /// Inside a SysEx frame; the buffer holds everything after `0xF0`.
    Sysex(Vec<u8>),
}

/// Streaming Firmata decoder.
///
/// Holds the bytes of at most one in-flight frame. Bytes that arrive
/// outside any recognized frame start are discarded; Firmata has no
/// resynchronization marker beyond the next command byte.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    state: DecodeState,
}

impl Decoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.state = DecodeState::Idle;
    }

    /// Returns `true` if no frame is partially buffered.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Idle
    }

    /// Feed one received byte.
    ///
    /// Returns `Some(message)` when this byte completes a frame, `None`
    /// when more bytes are needed or the byte was discarded.
    pub fn feed(&mut self, byte: u8) -> Option<Message> {
        if byte == START_SYSEX {
            if !self.is_idle() {
                debug!("START_SYSEX inside an open frame, restarting");
            }
            self.state = DecodeState::Sysex(Vec::new());
            return None;
        }

        match std::mem::take(&mut self.state) {
            DecodeState::Idle => {
                self.start(byte);
                None
            }
            DecodeState::Command { command, mut data, len } => {
                if byte & 0x80 != 0 {
                    debug!(
                        command = format_args!("0x{command:02X}"),
                        next = format_args!("0x{byte:02X}"),
                        "incomplete command abandoned"
                    );
                    self.start(byte);
                    return None;
                }
                data[len] = byte;
                if len + 1 == data.len() {
                    Some(command_message(command, data))
                } else {
                    self.state = DecodeState::Command {
                        command,
                        data,
                        len: len + 1,
                    };
                    None
                }
            }
            DecodeState::Sysex(mut buf) => {
                if byte == END_SYSEX {
                    return parse_sysex(&buf);
                }
                if buf.len() >= MAX_SYSEX_LEN {
                    warn!(len = buf.len(), "SysEx frame too long, discarding");
                    return None;
                }
                buf.push(byte);
                self.state = DecodeState::Sysex(buf);
                None
            }
        }
    }

    /// Feed a batch of bytes and collect every completed message.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<Message> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }

    /// Begin a fixed-length command, or discard the byte.
    fn start(&mut self, byte: u8) {
        match byte {
            0x90..=0x9F | 0xE0..=0xEF | REPORT_VERSION => {
                self.state = DecodeState::Command {
                    command: byte,
                    data: [0; 2],
                    len: 0,
                };
            }
            _ => {
                trace!(byte = format_args!("0x{byte:02X}"), "discarding byte outside frame");
            }
        }
    }
}

fn command_message(command: u8, data: [u8; 2]) -> Message {
    match command & 0xF0 {
        DIGITAL_MESSAGE => Message::DigitalMessage {
            port: command & 0x0F,
            // 7 bits in the first byte, the 8th pin in the second.
            bitmask: (data[0] & 0x7F) | ((data[1] & 0x01) << 7),
        },
        ANALOG_MESSAGE => Message::AnalogMessage {
            pin: command & 0x0F,
            value: join_7bit_le(&data) as u16,
        },
        _ => Message::ReportVersion {
            major: data[0],
            minor: data[1],
        },
    }
}

/// Interpret a complete SysEx body (command byte plus payload).
fn parse_sysex(frame: &[u8]) -> Option<Message> {
    let Some((&opcode, payload)) = frame.split_first() else {
        debug!("empty SysEx frame");
        return None;
    };

    let parsed = match opcode {
        ANALOG_MAPPING_RESPONSE => Ok(parse_analog_mapping(payload)),
        CAPABILITY_RESPONSE => parse_capabilities(payload),
        PIN_STATE_RESPONSE => parse_pin_state(payload),
        REPORT_FIRMWARE => parse_firmware(payload),
        STRING_DATA => Ok(Message::StringData {
            text: unpack_14bit_ascii(payload),
        }),
        I2C_REPLY => parse_i2c_reply(payload),
        _ => Err(Error::MalformedFrame(format!(
            "unrecognized SysEx command 0x{opcode:02X}"
        ))),
    };

    Some(parsed.unwrap_or_else(|e| {
        debug!(opcode = format_args!("0x{opcode:02X}"), error = %e, "SysEx kept as unknown");
        Message::Unknown {
            opcode,
            payload: payload.to_vec(),
        }
    }))
}

fn parse_analog_mapping(payload: &[u8]) -> Message {
    let channels = payload
        .iter()
        .map(|&b| if b == SEPARATOR { None } else { Some(b) })
        .collect();
    Message::AnalogMappingResponse { channels }
}

fn parse_capabilities(payload: &[u8]) -> Result<Message> {
    let mut pins = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;
    while i < payload.len() {
        if payload[i] == SEPARATOR {
            pins.push(std::mem::take(&mut current));
            i += 1;
            continue;
        }
        let Some(&resolution) = payload.get(i + 1) else {
            return Err(Error::MalformedFrame(
                "capability record ends inside a mode/resolution pair".into(),
            ));
        };
        current.push(Capability {
            mode: PinMode::from_byte(payload[i]),
            resolution,
        });
        i += 2;
    }
    if !current.is_empty() {
        return Err(Error::MalformedFrame(
            "capability record missing its terminator".into(),
        ));
    }
    if pins.len() > MAX_PIN as usize + 1 {
        return Err(Error::MalformedFrame(format!(
            "capability response lists {} pins",
            pins.len()
        )));
    }
    Ok(Message::CapabilityResponse { pins })
}

fn parse_pin_state(payload: &[u8]) -> Result<Message> {
    match payload {
        [pin, mode, value @ ..] => Ok(Message::PinStateResponse {
            pin: *pin,
            mode: PinMode::from_byte(*mode),
            value: join_7bit_le(value),
        }),
        _ => Err(Error::MalformedFrame(format!(
            "pin state payload of {} bytes",
            payload.len()
        ))),
    }
}

fn parse_firmware(payload: &[u8]) -> Result<Message> {
    match payload {
        [major, minor, name @ ..] => Ok(Message::ReportFirmware {
            major: *major,
            minor: *minor,
            name: unpack_14bit_ascii(name),
        }),
        // A bare [0xF0, 0x79, 0xF7] is the query itself.
        _ => Err(Error::MalformedFrame("firmware report without version".into())),
    }
}

fn parse_i2c_reply(payload: &[u8]) -> Result<Message> {
    if payload.len() < 4 {
        return Err(Error::MalformedFrame(format!(
            "I2C reply payload of {} bytes",
            payload.len()
        )));
    }
    let data = payload[4..]
        .chunks(2)
        .map(|pair| join_7bit_le(pair) as u16)
        .collect();
    Ok(Message::I2cReply {
        address: join_7bit_le(&payload[0..2]) as u16,
        register: join_7bit_le(&payload[2..4]) as u16,
        data,
    })
}
