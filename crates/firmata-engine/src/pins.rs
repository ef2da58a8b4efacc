//! Pin capability model.
//!
//! [`PinTable`] holds what the board has told us about its pins: which
//! modes each pin supports, which analog channel it reads, and its last
//! known mode and value. It is filled from decoded messages via
//! [`PinTable::apply`] and from host-side writes via [`PinTable::set_mode`]
//! and [`PinTable::set_value`], since Firmata does not echo writes.

use std::collections::BTreeMap;

use firmata_core::{Capability, Error, MAX_PIN, Pin, PinMode, Result};
use tracing::{debug, warn};

use crate::codec::Message;

/// All known pins of one device session, ordered by index.
#[derive(Debug, Clone, Default)]
pub struct PinTable {
    pins: BTreeMap<u8, Pin>,
    capabilities_known: bool,
    // Set once the "no analog mapping" warning has been logged.
    unmapped_warned: bool,
}

impl PinTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every pin.
    pub fn clear(&mut self) {
        self.pins.clear();
        self.capabilities_known = false;
        self.unmapped_warned = false;
    }

    /// Returns `true` once a capability response has been applied.
    pub fn capabilities_known(&self) -> bool {
        self.capabilities_known
    }

    /// Number of known pins.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Returns `true` if no pin is known.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Look up one pin.
    pub fn get(&self, index: u8) -> Option<&Pin> {
        self.pins.get(&index)
    }

    /// Iterate pins in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    /// Clone every pin, in ascending index order.
    pub fn snapshot(&self) -> Vec<Pin> {
        self.pins.values().cloned().collect()
    }

    /// The pin that reads analog channel `channel`, if the mapping is known.
    pub fn pin_for_channel(&self, channel: u8) -> Option<u8> {
        self.pins
            .values()
            .find(|p| p.analog_channel == Some(channel))
            .map(|p| p.index)
    }

    /// Bitmask of the last known values of the 8 pins in `port`, as sent
    /// in a digital port write. Pins not in output mode contribute 0.
    pub fn port_mask(&self, port: u8) -> u8 {
        let base = port as u16 * 8;
        (0..8u16).fold(0u8, |mask, bit| {
            let Ok(index) = u8::try_from(base + bit) else {
                return mask;
            };
            match self.pins.get(&index) {
                Some(pin) if pin.current_mode == Some(PinMode::Output) && pin.current_value != 0 => {
                    mask | (1 << bit)
                }
                _ => mask,
            }
        })
    }

    /// Apply a decoded message and return the indices of pins whose mode
    /// or value changed.
    ///
    /// Capability and analog mapping responses reshape the table but
    /// return no indices.
    pub fn apply(&mut self, message: &Message) -> Vec<u8> {
        match message {
            Message::CapabilityResponse { pins } => {
                self.apply_capabilities(pins);
                Vec::new()
            }
            Message::AnalogMappingResponse { channels } => {
                self.apply_analog_mapping(channels);
                Vec::new()
            }
            Message::PinStateResponse { pin, mode, value } => {
                self.apply_pin_state(*pin, *mode, *value).into_iter().collect()
            }
            Message::DigitalMessage { port, bitmask } => self.apply_digital(*port, *bitmask),
            Message::AnalogMessage { pin, value } => {
                self.apply_analog(*pin, *value).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn apply_capabilities(&mut self, reported: &[Vec<Capability>]) {
        let mut old = std::mem::take(&mut self.pins);
        for (index, modes) in reported.iter().enumerate().take(MAX_PIN as usize + 1) {
            let index = index as u8;
            let mut pin = old.remove(&index).unwrap_or_else(|| Pin::new(index));
            pin.supported_modes = modes.clone();
            self.pins.insert(index, pin);
        }
        if !old.is_empty() {
            debug!(dropped = old.len(), "pins not in capability response removed");
        }
        self.capabilities_known = true;
        debug!(pins = self.pins.len(), "capabilities applied");
    }

    fn apply_analog_mapping(&mut self, channels: &[Option<u8>]) {
        self.unmapped_warned = false;
        for (index, channel) in channels.iter().enumerate().take(MAX_PIN as usize + 1) {
            let index = index as u8;
            match channel {
                Some(ch) => {
                    self.pins
                        .entry(index)
                        .or_insert_with(|| Pin::new(index))
                        .analog_channel = Some(*ch);
                }
                None => {
                    if let Some(pin) = self.pins.get_mut(&index) {
                        pin.analog_channel = None;
                    }
                }
            }
        }
    }

    fn apply_pin_state(&mut self, index: u8, mode: PinMode, value: u32) -> Option<u8> {
        if index > MAX_PIN {
            return None;
        }
        let capabilities_known = self.capabilities_known;
        if capabilities_known && !self.pins.contains_key(&index) {
            warn!(pin = index, "pin state for a pin the board did not report");
            return None;
        }
        let pin = self.pins.entry(index).or_insert_with(|| Pin::new(index));

        if capabilities_known && !pin.supports(mode) {
            warn!(pin = index, %mode, "board reports a mode the pin does not support");
        }

        let changed = pin.current_mode != Some(mode) || pin.current_value != value;
        pin.current_mode = Some(mode);
        pin.current_value = value;
        changed.then_some(index)
    }

    fn apply_digital(&mut self, port: u8, bitmask: u8) -> Vec<u8> {
        let mut changed = Vec::new();
        for bit in 0..8u8 {
            let Some(index) = port.checked_mul(8).and_then(|b| b.checked_add(bit)) else {
                break;
            };
            let Some(pin) = self.pins.get_mut(&index) else {
                continue;
            };
            let takes_input = pin.current_mode.is_none_or(PinMode::is_digital_input);
            if !takes_input {
                continue;
            }
            let value = ((bitmask >> bit) & 1) as u32;
            if pin.current_value != value {
                pin.current_value = value;
                changed.push(index);
            }
        }
        changed
    }

    fn apply_analog(&mut self, channel: u8, value: u16) -> Option<u8> {
        let Some(index) = self.pin_for_channel(channel) else {
            let any_mapped = self.pins.values().any(|p| p.analog_channel.is_some());
            if !any_mapped && !self.unmapped_warned {
                self.unmapped_warned = true;
                warn!(
                    channel,
                    "no analog mapping known; analog readings are dropped until an analog mapping query is answered"
                );
            } else {
                debug!(channel, "analog reading for an unmapped channel dropped");
            }
            return None;
        };
        let pin = self.pins.get_mut(&index)?;
        let value = value as u32;
        if pin.current_value == value {
            return None;
        }
        pin.current_value = value;
        Some(index)
    }

    /// Record a mode set by the host.
    pub fn set_mode(&mut self, index: u8, mode: PinMode) -> Result<()> {
        let pin = self.pin_mut(index)?;
        pin.current_mode = Some(mode);
        Ok(())
    }

    /// Record a value written by the host.
    pub fn set_value(&mut self, index: u8, value: u32) -> Result<()> {
        let pin = self.pin_mut(index)?;
        pin.current_value = value;
        Ok(())
    }

    fn pin_mut(&mut self, index: u8) -> Result<&mut Pin> {
        self.pins
            .get_mut(&index)
            .ok_or_else(|| Error::InvalidArgument(format!("pin {index} not reported by the board")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(mode: PinMode, resolution: u8) -> Capability {
        Capability { mode, resolution }
    }

    /// Pins 0..=2 digital, pin 3 digital + analog (A0), pin 4 PWM.
    fn board() -> PinTable {
        let digital = vec![cap(PinMode::Input, 1), cap(PinMode::Output, 1), cap(PinMode::PullUp, 1)];
        let mut analog = digital.clone();
        analog.push(cap(PinMode::Analog, 10));
        let mut pwm = digital.clone();
        pwm.push(cap(PinMode::Pwm, 8));

        let mut table = PinTable::new();
        table.apply(&Message::CapabilityResponse {
            pins: vec![digital.clone(), digital.clone(), digital, analog, pwm],
        });
        table.apply(&Message::AnalogMappingResponse {
            channels: vec![None, None, None, Some(0), None],
        });
        table
    }

    // ---------------------------------------------------------------
    // Capabilities and mapping
    // ---------------------------------------------------------------

    #[test]
    fn capability_response_creates_reported_pins_only() {
        let mut table = PinTable::new();
        assert!(!table.capabilities_known());
        table.apply(&Message::CapabilityResponse {
            pins: vec![vec![cap(PinMode::Output, 1)], vec![cap(PinMode::Input, 1)]],
        });
        assert!(table.capabilities_known());
        assert_eq!(table.len(), 2);
        assert!(table.get(0).unwrap().supports(PinMode::Output));
        assert!(table.get(1).unwrap().supports(PinMode::Input));
        assert!(table.get(2).is_none());
    }

    #[test]
    fn capability_response_replaces_pin_set_and_keeps_channels() {
        let mut table = board();
        table.apply(&Message::CapabilityResponse {
            pins: vec![vec![], vec![], vec![], vec![cap(PinMode::Analog, 12)]],
        });
        assert_eq!(table.len(), 4);
        assert!(table.get(4).is_none());
        let a0 = table.get(3).unwrap();
        assert_eq!(a0.analog_channel, Some(0));
        assert_eq!(a0.resolution(PinMode::Analog), Some(12));
    }

    #[test]
    fn analog_mapping_sets_and_clears_channels() {
        let mut table = board();
        assert_eq!(table.pin_for_channel(0), Some(3));
        table.apply(&Message::AnalogMappingResponse {
            channels: vec![None, None, None, None, Some(1)],
        });
        assert_eq!(table.get(3).unwrap().analog_channel, None);
        assert_eq!(table.pin_for_channel(0), None);
        assert_eq!(table.pin_for_channel(1), Some(4));
    }

    #[test]
    fn analog_mapping_before_capabilities_creates_pins() {
        let mut table = PinTable::new();
        table.apply(&Message::AnalogMappingResponse {
            channels: vec![None, Some(0)],
        });
        assert_eq!(table.len(), 1);
        assert_eq!(table.pin_for_channel(0), Some(1));
        assert!(!table.capabilities_known());
    }

    // ---------------------------------------------------------------
    // Pin state
    // ---------------------------------------------------------------

    #[test]
    fn pin_state_updates_mode_and_value() {
        let mut table = board();
        let changed = table.apply(&Message::PinStateResponse {
            pin: 4,
            mode: PinMode::Pwm,
            value: 128,
        });
        assert_eq!(changed, vec![4]);
        let pin = table.get(4).unwrap();
        assert_eq!(pin.current_mode, Some(PinMode::Pwm));
        assert_eq!(pin.current_value, 128);

        // Same state again is not a change.
        let changed = table.apply(&Message::PinStateResponse {
            pin: 4,
            mode: PinMode::Pwm,
            value: 128,
        });
        assert!(changed.is_empty());
    }

    #[test]
    fn pin_state_with_unsupported_mode_is_stored() {
        let mut table = board();
        let changed = table.apply(&Message::PinStateResponse {
            pin: 0,
            mode: PinMode::Servo,
            value: 90,
        });
        assert_eq!(changed, vec![0]);
        assert_eq!(table.get(0).unwrap().current_mode, Some(PinMode::Servo));
    }

    #[test]
    fn pin_state_for_unreported_pin_is_ignored() {
        let mut table = board();
        let changed = table.apply(&Message::PinStateResponse {
            pin: 40,
            mode: PinMode::Output,
            value: 1,
        });
        assert!(changed.is_empty());
        assert!(table.get(40).is_none());
    }

    #[test]
    fn pin_state_before_capabilities_creates_pin() {
        let mut table = PinTable::new();
        let changed = table.apply(&Message::PinStateResponse {
            pin: 13,
            mode: PinMode::Output,
            value: 1,
        });
        assert_eq!(changed, vec![13]);
        assert_eq!(table.get(13).unwrap().current_value, 1);
    }

    // ---------------------------------------------------------------
    // Digital and analog reports
    // ---------------------------------------------------------------

    #[test]
    fn digital_message_updates_input_pins_only() {
        let mut table = board();
        table.set_mode(0, PinMode::Input).unwrap();
        table.set_mode(1, PinMode::Output).unwrap();
        table.set_mode(2, PinMode::PullUp).unwrap();
        // Pin 3 mode unknown; pin 4 unknown.

        let changed = table.apply(&Message::DigitalMessage { port: 0, bitmask: 0b0001_1111 });
        assert_eq!(changed, vec![0, 2, 3, 4]);
        assert_eq!(table.get(0).unwrap().current_value, 1);
        assert_eq!(table.get(1).unwrap().current_value, 0);
        assert_eq!(table.get(2).unwrap().current_value, 1);
    }

    #[test]
    fn digital_message_reports_only_changes() {
        let mut table = board();
        table.apply(&Message::DigitalMessage { port: 0, bitmask: 0b0000_0001 });
        let changed = table.apply(&Message::DigitalMessage { port: 0, bitmask: 0b0000_0011 });
        assert_eq!(changed, vec![1]);
    }

    #[test]
    fn digital_message_for_unknown_port_is_harmless() {
        let mut table = board();
        assert!(table.apply(&Message::DigitalMessage { port: 15, bitmask: 0xFF }).is_empty());
    }

    #[test]
    fn analog_message_uses_channel_mapping() {
        let mut table = board();
        let changed = table.apply(&Message::AnalogMessage { pin: 0, value: 511 });
        assert_eq!(changed, vec![3]);
        assert_eq!(table.get(3).unwrap().current_value, 511);
        assert_eq!(table.get(0).unwrap().current_value, 0);
    }

    #[test]
    fn analog_message_for_unmapped_channel_is_dropped() {
        let mut table = board();
        assert!(table.apply(&Message::AnalogMessage { pin: 5, value: 100 }).is_empty());
        assert!(table.iter().all(|p| p.current_value == 0));
    }

    #[test]
    fn analog_messages_without_mapping_are_dropped_with_one_warning() {
        let mut table = PinTable::new();
        table.apply(&Message::CapabilityResponse {
            pins: vec![vec![cap(PinMode::Analog, 10)], vec![cap(PinMode::Analog, 10)]],
        });
        assert!(!table.unmapped_warned);

        assert!(table.apply(&Message::AnalogMessage { pin: 0, value: 512 }).is_empty());
        assert!(table.unmapped_warned);
        assert!(table.apply(&Message::AnalogMessage { pin: 1, value: 7 }).is_empty());
        assert!(table.iter().all(|p| p.current_value == 0));

        // A mapping arms the warning again and lets readings through.
        table.apply(&Message::AnalogMappingResponse {
            channels: vec![Some(0), None],
        });
        assert!(!table.unmapped_warned);
        assert_eq!(table.apply(&Message::AnalogMessage { pin: 0, value: 512 }), vec![0]);
        assert_eq!(table.get(0).unwrap().current_value, 512);
    }

    #[test]
    fn unmapped_channel_on_mapped_board_does_not_warn() {
        let mut table = board();
        table.apply(&Message::AnalogMessage { pin: 5, value: 100 });
        assert!(!table.unmapped_warned);
    }

    #[test]
    fn other_messages_change_nothing() {
        let mut table = board();
        assert!(table.apply(&Message::ReportVersion { major: 2, minor: 5 }).is_empty());
        assert!(table.apply(&Message::StringData { text: "x".into() }).is_empty());
    }

    // ---------------------------------------------------------------
    // Host-side bookkeeping
    // ---------------------------------------------------------------

    #[test]
    fn set_mode_and_value_require_known_pin() {
        let mut table = board();
        assert!(matches!(table.set_mode(99, PinMode::Output), Err(Error::InvalidArgument(_))));
        assert!(matches!(table.set_value(99, 1), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn port_mask_from_output_values() {
        let mut table = board();
        table.set_mode(0, PinMode::Output).unwrap();
        table.set_value(0, 1).unwrap();
        table.set_mode(2, PinMode::Output).unwrap();
        table.set_value(2, 1).unwrap();
        // Input pin with a high reading does not leak into the mask.
        table.set_mode(1, PinMode::Input).unwrap();
        table.set_value(1, 1).unwrap();
        assert_eq!(table.port_mask(0), 0b0000_0101);
        assert_eq!(table.port_mask(1), 0);
    }

    #[test]
    fn snapshot_is_ordered() {
        let table = board();
        let indices: Vec<u8> = table.snapshot().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn clear_forgets_everything() {
        let mut table = board();
        table.clear();
        assert!(table.is_empty());
        assert!(!table.capabilities_known());
    }
}
