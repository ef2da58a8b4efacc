//! Core types shared by the codec, the pin model, and consumers.
//!
//! These types describe what a Firmata board reports about itself: pin
//! modes and resolutions, per-pin state, firmware identity, and the
//! engine's discovery state.

use std::fmt;
use std::str::FromStr;

/// Highest pin index addressable by Firmata (one 7-bit data byte).
pub const MAX_PIN: u8 = 127;

/// Pin mode as defined by the Firmata 2.x protocol.
///
/// Unrecognized mode bytes are kept as [`PinMode::Unknown`] so newer
/// firmware can report modes this library does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    /// Digital input.
    Input,
    /// Digital output.
    Output,
    /// Analog input.
    Analog,
    /// PWM output.
    Pwm,
    /// Servo output.
    Servo,
    /// Shift register output.
    Shift,
    /// I2C bus pin.
    I2c,
    /// OneWire bus pin.
    OneWire,
    /// Stepper motor driver pin.
    Stepper,
    /// Quadrature encoder input.
    Encoder,
    /// Hardware or software serial pin.
    Serial,
    /// Digital input with internal pull-up enabled.
    PullUp,
    /// Pin reserved by the firmware; do not touch.
    Ignore,
    /// Any mode byte not listed above.
    Unknown(u8),
}

impl PinMode {
    /// Decode a mode byte from the wire.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => PinMode::Input,
            0x01 => PinMode::Output,
            0x02 => PinMode::Analog,
            0x03 => PinMode::Pwm,
            0x04 => PinMode::Servo,
            0x05 => PinMode::Shift,
            0x06 => PinMode::I2c,
            0x07 => PinMode::OneWire,
            0x08 => PinMode::Stepper,
            0x09 => PinMode::Encoder,
            0x0A => PinMode::Serial,
            0x0B => PinMode::PullUp,
            0x7F => PinMode::Ignore,
            other => PinMode::Unknown(other),
        }
    }

    /// Encode this mode as its wire byte.
    pub fn to_byte(self) -> u8 {
        match self {
            PinMode::Input => 0x00,
            PinMode::Output => 0x01,
            PinMode::Analog => 0x02,
            PinMode::Pwm => 0x03,
            PinMode::Servo => 0x04,
            PinMode::Shift => 0x05,
            PinMode::I2c => 0x06,
            PinMode::OneWire => 0x07,
            PinMode::Stepper => 0x08,
            PinMode::Encoder => 0x09,
            PinMode::Serial => 0x0A,
            PinMode::PullUp => 0x0B,
            PinMode::Ignore => 0x7F,
            PinMode::Unknown(b) => b,
        }
    }

    /// Returns `true` for modes whose value is reported by the board
    /// through digital port messages.
    pub fn is_digital_input(self) -> bool {
        matches!(self, PinMode::Input | PinMode::PullUp)
    }
}

impl From<u8> for PinMode {
    fn from(byte: u8) -> Self {
        PinMode::from_byte(byte)
    }
}

impl From<PinMode> for u8 {
    fn from(mode: PinMode) -> Self {
        mode.to_byte()
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PinMode::Input => "INPUT",
            PinMode::Output => "OUTPUT",
            PinMode::Analog => "ANALOG",
            PinMode::Pwm => "PWM",
            PinMode::Servo => "SERVO",
            PinMode::Shift => "SHIFT",
            PinMode::I2c => "I2C",
            PinMode::OneWire => "ONEWIRE",
            PinMode::Stepper => "STEPPER",
            PinMode::Encoder => "ENCODER",
            PinMode::Serial => "SERIAL",
            PinMode::PullUp => "PULLUP",
            PinMode::Ignore => "IGNORE",
            PinMode::Unknown(b) => return write!(f, "UNKNOWN(0x{b:02X})"),
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`PinMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePinModeError(String);

impl fmt::Display for ParsePinModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown pin mode: {}", self.0)
    }
}

impl std::error::Error for ParsePinModeError {}

impl FromStr for PinMode {
    type Err = ParsePinModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INPUT" | "IN" => Ok(PinMode::Input),
            "OUTPUT" | "OUT" => Ok(PinMode::Output),
            "ANALOG" => Ok(PinMode::Analog),
            "PWM" => Ok(PinMode::Pwm),
            "SERVO" => Ok(PinMode::Servo),
            "SHIFT" => Ok(PinMode::Shift),
            "I2C" => Ok(PinMode::I2c),
            "ONEWIRE" => Ok(PinMode::OneWire),
            "STEPPER" => Ok(PinMode::Stepper),
            "ENCODER" => Ok(PinMode::Encoder),
            "SERIAL" => Ok(PinMode::Serial),
            "PULLUP" | "INPUT_PULLUP" => Ok(PinMode::PullUp),
            "IGNORE" => Ok(PinMode::Ignore),
            _ => Err(ParsePinModeError(s.to_string())),
        }
    }
}

/// One supported mode of a pin, as reported by a capability response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capability {
    /// The supported mode.
    pub mode: PinMode,
    /// Resolution in bits for this mode (e.g. 10 for a 10-bit ADC,
    /// 1 for digital I/O, 14 for servo).
    pub resolution: u8,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mode, self.resolution)
    }
}

/// State of a single board pin.
///
/// `supported_modes` is empty until a capability response arrives.
/// `current_mode` is `None` until the board reports it or the host sets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    /// Pin index (0..=127).
    pub index: u8,
    /// Modes this pin supports, in the order the board reported them.
    pub supported_modes: Vec<Capability>,
    /// The mode the pin is currently in, if known.
    pub current_mode: Option<PinMode>,
    /// Last known value: 0/1 for digital pins, the raw reading for analog
    /// inputs, the last written value for PWM/servo outputs.
    pub current_value: u32,
    /// Analog input channel, set only for analog-capable pins once the
    /// analog mapping has been received.
    pub analog_channel: Option<u8>,
}

impl Pin {
    /// Create a pin with no capability data.
    pub fn new(index: u8) -> Self {
        Pin {
            index,
            supported_modes: Vec::new(),
            current_mode: None,
            current_value: 0,
            analog_channel: None,
        }
    }

    /// Returns `true` if the board reported `mode` for this pin.
    pub fn supports(&self, mode: PinMode) -> bool {
        self.supported_modes.iter().any(|c| c.mode == mode)
    }

    /// Resolution in bits for `mode`, if supported.
    pub fn resolution(&self, mode: PinMode) -> Option<u8> {
        self.supported_modes
            .iter()
            .find(|c| c.mode == mode)
            .map(|c| c.resolution)
    }

    /// The port (group of 8 pins) this pin belongs to.
    pub fn port(&self) -> u8 {
        self.index / 8
    }
}

/// Firmware identity from a `REPORT_FIRMWARE` response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareInfo {
    /// Firmware name, typically the sketch file name.
    pub name: String,
    /// Firmware major version.
    pub major: u8,
    /// Firmware minor version.
    pub minor: u8,
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}", self.name, self.major, self.minor)
    }
}

/// Firmata protocol version from a `REPORT_VERSION` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Lifecycle state of a device session.
///
/// ```text
/// Disconnected -> Connected -> Discovering -> Ready
///                     ^             |
///                     +-- timeout --+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No transport connection.
    Disconnected,
    /// Connected, no discovery in flight and no capability data.
    Connected,
    /// At least one discovery query is outstanding.
    Discovering {
        /// A capability query has been sent and not yet answered.
        capabilities: bool,
        /// An analog mapping query has been sent and not yet answered.
        analog_mapping: bool,
    },
    /// Capability data is known and no discovery query is outstanding.
    Ready,
}

impl EngineState {
    /// Returns `true` if a transport connection exists.
    pub fn is_connected(&self) -> bool {
        !matches!(self, EngineState::Disconnected)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Disconnected => write!(f, "disconnected"),
            EngineState::Connected => write!(f, "connected"),
            EngineState::Discovering {
                capabilities,
                analog_mapping,
            } => match (capabilities, analog_mapping) {
                (true, true) => write!(f, "discovering (capabilities, analog mapping)"),
                (true, false) => write!(f, "discovering (capabilities)"),
                (false, true) => write!(f, "discovering (analog mapping)"),
                (false, false) => write!(f, "discovering"),
            },
            EngineState::Ready => write!(f, "ready"),
        }
    }
}
