//! Synchronous Firmata protocol engine.
//!
//! A [`Session`] is the state of one logical connection to a board: the
//! decoder with any partially received frame, the pin table, the firmware
//! identity, and the discovery state machine. It performs no I/O. Callers
//! ask it to [`encode`](Session::encode) a [`Command`] (getting back the
//! bytes to write), [`commit`](Session::commit) it once the write went
//! through, and hand it received bytes via [`receive`](Session::receive)
//! (getting back the events those bytes caused). The async [`FirmataClient`](crate::FirmataClient) drives a
//! session from its IO task.

use std::time::{Duration, Instant};

use firmata_core::{
    EngineState, Error, FirmataEvent, FirmwareInfo, Pin, PinMode, ProtocolVersion, Result,
};
use tracing::{debug, trace, warn};

use crate::codec::{Decoder, Message};
use crate::commands;
use crate::pins::PinTable;

/// An outbound request to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask which analog channel each pin reads.
    AnalogMappingQuery,
    /// Ask which modes each pin supports. Starts discovery.
    CapabilityQuery,
    /// Ask for one pin's current mode and value.
    PinStateQuery { pin: u8 },
    /// Ask for the firmware name and version.
    ReportFirmware,
    /// Ask for the protocol version.
    ReportVersion,
    /// Set the analog sampling interval from raw 7-bit halves.
    SamplingInterval { lsb: u8, msb: u8 },
    /// Attach a servo, pulse bounds as raw 7-bit halves.
    ServoConfig {
        pin: u8,
        min_lsb: u8,
        min_msb: u8,
        max_lsb: u8,
        max_msb: u8,
    },
    SetPinMode { pin: u8, mode: PinMode },
    DigitalWrite { pin: u8, high: bool },
    AnalogWrite { pin: u8, value: u32 },
    ReportAnalog { channel: u8, enable: bool },
    ReportDigital { port: u8, enable: bool },
    StringData { text: String },
    SystemReset,
    I2cConfig { delay_us: u16 },
    I2cRead { address: u8, register: u16, count: u16 },
    I2cWrite { address: u8, data: Vec<u8> },
}

impl Command {
    /// The pin this command addresses, for commands that require the
    /// board's capability data.
    fn target_pin(&self) -> Option<u8> {
        match self {
            Command::PinStateQuery { pin }
            | Command::ServoConfig { pin, .. }
            | Command::SetPinMode { pin, .. }
            | Command::DigitalWrite { pin, .. }
            | Command::AnalogWrite { pin, .. } => Some(*pin),
            _ => None,
        }
    }

    /// Pure encoding; validates argument ranges only.
    fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Command::AnalogMappingQuery => Ok(commands::analog_mapping_query()),
            Command::CapabilityQuery => Ok(commands::capability_query()),
            Command::PinStateQuery { pin } => commands::pin_state_query(*pin),
            Command::ReportFirmware => Ok(commands::report_firmware()),
            Command::ReportVersion => Ok(commands::report_version()),
            Command::SamplingInterval { lsb, msb } => commands::sampling_interval(*lsb, *msb),
            Command::ServoConfig {
                pin,
                min_lsb,
                min_msb,
                max_lsb,
                max_msb,
            } => commands::servo_config(*pin, *min_lsb, *min_msb, *max_lsb, *max_msb),
            Command::SetPinMode { pin, mode } => commands::set_pin_mode(*pin, *mode),
            // Port writes need the rest of the port; built in `prepare`.
            Command::DigitalWrite { pin, high } => commands::set_digital_pin_value(*pin, *high),
            Command::AnalogWrite { pin, value } => commands::analog_write(*pin, *value),
            Command::ReportAnalog { channel, enable } => commands::report_analog(*channel, *enable),
            Command::ReportDigital { port, enable } => commands::report_digital(*port, *enable),
            Command::StringData { text } => commands::string_data(text),
            Command::SystemReset => Ok(commands::system_reset()),
            Command::I2cConfig { delay_us } => commands::i2c_config(*delay_us),
            Command::I2cRead {
                address,
                register,
                count,
            } => commands::i2c_read_request(*address, *register, *count),
            Command::I2cWrite { address, data } => commands::i2c_write_request(*address, data),
        }
    }
}

/// A point-in-time copy of the observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: EngineState,
    pub firmware: Option<FirmwareInfo>,
    pub protocol_version: Option<ProtocolVersion>,
    pub pins: Vec<Pin>,
}

/// State of one logical connection to a Firmata board.
#[derive(Debug)]
pub struct Session {
    state: EngineState,
    decoder: Decoder,
    pins: PinTable,
    firmware: Option<FirmwareInfo>,
    protocol_version: Option<ProtocolVersion>,
    discovery_started: Option<Instant>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a disconnected session.
    pub fn new() -> Self {
        Self {
            state: EngineState::Disconnected,
            decoder: Decoder::new(),
            pins: PinTable::new(),
            firmware: None,
            protocol_version: None,
            discovery_started: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn pins(&self) -> &PinTable {
        &self.pins
    }

    pub fn pin(&self, index: u8) -> Option<&Pin> {
        self.pins.get(index)
    }

    pub fn firmware(&self) -> Option<&FirmwareInfo> {
        self.firmware.as_ref()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.protocol_version
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            firmware: self.firmware.clone(),
            protocol_version: self.protocol_version,
            pins: self.pins.snapshot(),
        }
    }

    /// Start a fresh session on a newly established connection.
    pub fn connect(&mut self) -> Vec<FirmataEvent> {
        self.reset();
        self.state = EngineState::Connected;
        debug!("session connected");
        vec![FirmataEvent::Connected]
    }

    /// Drop all session state after the connection went away.
    ///
    /// Returns [`FirmataEvent::Disconnected`] only if the session was
    /// connected.
    pub fn disconnect(&mut self) -> Vec<FirmataEvent> {
        let was_connected = self.state.is_connected();
        self.reset();
        if was_connected {
            debug!("session disconnected");
            vec![FirmataEvent::Disconnected]
        } else {
            Vec::new()
        }
    }

    fn reset(&mut self) {
        self.state = EngineState::Disconnected;
        self.decoder.reset();
        self.pins.clear();
        self.firmware = None;
        self.protocol_version = None;
        self.discovery_started = None;
    }

    // ---------------------------------------------------------------
    // Outbound
    // ---------------------------------------------------------------

    /// Validate `command` against the session state and return the bytes
    /// to write. Nothing is recorded; call [`commit`](Session::commit) once
    /// the bytes have reached the transport.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for out-of-range arguments, pins the
    ///   board did not report, or modes a pin does not support
    /// - [`Error::TransportUnavailable`] when not connected
    /// - [`Error::NotReady`] for pin commands before capability data
    ///   has been received
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>> {
        let mut bytes = command.encode()?;

        if !self.state.is_connected() {
            return Err(Error::TransportUnavailable);
        }

        let Some(index) = command.target_pin() else {
            trace!(?command, bytes = ?bytes, "encoded");
            return Ok(bytes);
        };
        if !self.pins.capabilities_known() {
            return Err(Error::NotReady(format!(
                "pin {index} capabilities not yet known"
            )));
        }
        let Some(pin) = self.pins.get(index) else {
            return Err(Error::InvalidArgument(format!(
                "pin {index} not reported by the board"
            )));
        };

        match command {
            Command::SetPinMode { mode, .. } if !pin.supports(*mode) => {
                return Err(Error::InvalidArgument(format!(
                    "pin {index} does not support mode {mode}"
                )));
            }
            Command::ServoConfig { .. } if !pin.supports(PinMode::Servo) => {
                return Err(Error::InvalidArgument(format!(
                    "pin {index} does not support mode {}",
                    PinMode::Servo
                )));
            }
            Command::DigitalWrite { high, .. } => {
                match pin.current_mode {
                    Some(PinMode::Output) => {}
                    None if pin.supports(PinMode::Output) => {}
                    Some(mode) => {
                        return Err(Error::InvalidArgument(format!(
                            "pin {index} is in mode {mode}, not OUTPUT"
                        )));
                    }
                    None => {
                        return Err(Error::InvalidArgument(format!(
                            "pin {index} does not support mode {}",
                            PinMode::Output
                        )));
                    }
                }
                let port = index / 8;
                let bit = 1u8 << (index % 8);
                let mut mask = self.pins.port_mask(port);
                if *high {
                    mask |= bit;
                } else {
                    mask &= !bit;
                }
                bytes = commands::digital_port_write(port, mask)?;
            }
            _ => {}
        }

        trace!(?command, bytes = ?bytes, "encoded");
        Ok(bytes)
    }

    /// Record the effects of a command whose bytes were written: discovery
    /// steps opened by queries, and the modes and values written to pins.
    pub fn commit(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::CapabilityQuery => self.open_discovery(true, false),
            Command::AnalogMappingQuery => self.open_discovery(false, true),
            Command::SetPinMode { pin, mode } => self.pins.set_mode(*pin, *mode)?,
            Command::DigitalWrite { pin, high } => {
                // Firmware starts digital pins as outputs.
                if self.pins.get(*pin).is_some_and(|p| p.current_mode.is_none()) {
                    self.pins.set_mode(*pin, PinMode::Output)?;
                }
                self.pins.set_value(*pin, *high as u32)?;
            }
            Command::AnalogWrite { pin, value } => self.pins.set_value(*pin, *value)?,
            Command::ServoConfig { pin, .. } => self.pins.set_mode(*pin, PinMode::Servo)?,
            _ => {}
        }
        Ok(())
    }

    /// [`encode`](Session::encode) and [`commit`](Session::commit) in one
    /// step, for callers whose write cannot fail.
    pub fn prepare(&mut self, command: &Command) -> Result<Vec<u8>> {
        let bytes = self.encode(command)?;
        self.commit(command)?;
        Ok(bytes)
    }

    fn open_discovery(&mut self, capabilities: bool, analog_mapping: bool) {
        let (pending_caps, pending_mapping) = match self.state {
            EngineState::Discovering {
                capabilities,
                analog_mapping,
            } => (capabilities, analog_mapping),
            _ => {
                self.discovery_started = Some(Instant::now());
                (false, false)
            }
        };
        self.state = EngineState::Discovering {
            capabilities: pending_caps || capabilities,
            analog_mapping: pending_mapping || analog_mapping,
        };
        debug!(state = %self.state, "discovery step opened");
    }

    /// Encode an analog mapping query and open that discovery step.
    pub fn analog_mapping_query(&mut self) -> Result<Vec<u8>> {
        self.prepare(&Command::AnalogMappingQuery)
    }

    /// Encode a capability query and open that discovery step.
    ///
    /// Analog reports stay unattributed until an analog mapping query is
    /// answered as well.
    pub fn capability_query(&mut self) -> Result<Vec<u8>> {
        self.prepare(&Command::CapabilityQuery)
    }

    pub fn pin_state_query(&mut self, pin: u8) -> Result<Vec<u8>> {
        self.prepare(&Command::PinStateQuery { pin })
    }

    pub fn report_firmware(&mut self) -> Result<Vec<u8>> {
        self.prepare(&Command::ReportFirmware)
    }

    pub fn sampling_interval(&mut self, lsb: u8, msb: u8) -> Result<Vec<u8>> {
        self.prepare(&Command::SamplingInterval { lsb, msb })
    }

    pub fn servo_config(
        &mut self,
        pin: u8,
        min_lsb: u8,
        min_msb: u8,
        max_lsb: u8,
        max_msb: u8,
    ) -> Result<Vec<u8>> {
        self.prepare(&Command::ServoConfig {
            pin,
            min_lsb,
            min_msb,
            max_lsb,
            max_msb,
        })
    }

    // ---------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------

    /// Feed received bytes through the decoder and apply every completed
    /// message. Events are returned in the order their bytes arrived.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<FirmataEvent> {
        if !self.state.is_connected() {
            trace!(len = bytes.len(), "bytes received while disconnected, dropped");
            return Vec::new();
        }
        let mut events = Vec::new();
        for &byte in bytes {
            if let Some(message) = self.decoder.feed(byte) {
                self.handle_message(message, &mut events);
            }
        }
        events
    }

    fn handle_message(&mut self, message: Message, events: &mut Vec<FirmataEvent>) {
        debug!(kind = message.kind(), "message received");
        let changed = self.pins.apply(&message);
        events.extend(changed.into_iter().map(|pin| FirmataEvent::PinChanged { pin }));

        match message {
            Message::CapabilityResponse { .. } => self.complete_step(true, false, events),
            Message::AnalogMappingResponse { .. } => self.complete_step(false, true, events),
            Message::ReportVersion { major, minor } => {
                let version = ProtocolVersion { major, minor };
                self.protocol_version = Some(version);
                events.push(FirmataEvent::ProtocolVersion(version));
            }
            Message::ReportFirmware { major, minor, name } => {
                let info = FirmwareInfo { name, major, minor };
                self.firmware = Some(info.clone());
                events.push(FirmataEvent::FirmwareReported(info));
            }
            Message::StringData { text } => events.push(FirmataEvent::StringData { text }),
            Message::I2cReply {
                address,
                register,
                data,
            } => events.push(FirmataEvent::I2cReply {
                address,
                register,
                data,
            }),
            Message::Unknown { opcode, payload } => {
                events.push(FirmataEvent::UnknownSysex { opcode, payload })
            }
            Message::DigitalMessage { .. }
            | Message::AnalogMessage { .. }
            | Message::PinStateResponse { .. } => {}
        }
    }

    /// Mark discovery steps answered and finish discovery when none remain.
    fn complete_step(&mut self, capabilities: bool, analog_mapping: bool, events: &mut Vec<FirmataEvent>) {
        match self.state {
            EngineState::Discovering {
                capabilities: pending_caps,
                analog_mapping: pending_mapping,
            } => {
                let pending_caps = pending_caps && !capabilities;
                let pending_mapping = pending_mapping && !analog_mapping;
                if pending_caps || pending_mapping {
                    self.state = EngineState::Discovering {
                        capabilities: pending_caps,
                        analog_mapping: pending_mapping,
                    };
                    return;
                }
                self.discovery_started = None;
                if self.pins.capabilities_known() {
                    self.state = EngineState::Ready;
                    debug!(pins = self.pins.len(), "discovery complete");
                    events.push(FirmataEvent::CapabilitiesReady);
                } else {
                    self.state = EngineState::Connected;
                }
            }
            EngineState::Connected if capabilities => {
                debug!("unsolicited capability response");
                self.state = EngineState::Ready;
                events.push(FirmataEvent::CapabilitiesReady);
            }
            _ => {}
        }
    }

    /// When discovery has been outstanding for longer than `timeout`,
    /// abandon it and report [`FirmataEvent::QueryTimedOut`].
    ///
    /// The session returns to `Ready` if capability data arrived before
    /// the timeout, otherwise to `Connected`.
    pub fn check_discovery_timeout(&mut self, now: Instant, timeout: Duration) -> Vec<FirmataEvent> {
        let Some(started) = self.discovery_started else {
            return Vec::new();
        };
        if now.saturating_duration_since(started) < timeout {
            return Vec::new();
        }
        self.discovery_started = None;
        self.state = if self.pins.capabilities_known() {
            EngineState::Ready
        } else {
            EngineState::Connected
        };
        warn!(timeout = ?timeout, state = %self.state, "discovery timed out");
        vec![FirmataEvent::QueryTimedOut]
    }

    /// Returns `true` while a discovery query is outstanding.
    pub fn is_discovering(&self) -> bool {
        matches!(self.state, EngineState::Discovering { .. })
    }
}
