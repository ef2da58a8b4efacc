//! A simulated Firmata board.
//!
//! [`SimulatedBoard`] implements [`Transport`] and answers like a small
//! Arduino Uno-class board running StandardFirmata: 20 pins, PWM on
//! 3/5/6/9/10/11, analog inputs A0..A5 on pins 14..19. It answers
//! discovery, firmware, version and pin state queries, remembers pin modes
//! and written values, and streams analog and digital reports for the
//! channels and ports the host enables.
//!
//! Readings are deterministic: each analog channel ramps up and down, and
//! input pins toggle every few samples.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use firmata_core::error::{Error, Result};
use firmata_core::transport::Transport;
use firmata_core::types::PinMode;

const PIN_COUNT: u8 = 20;
const FIRST_ANALOG_PIN: u8 = 14;
const PWM_PINS: [u8; 6] = [3, 5, 6, 9, 10, 11];
const FIRMWARE_NAME: &str = "SimulatedFirmata";
const FIRMWARE_VERSION: (u8, u8) = (2, 5);
const PROTOCOL_VERSION: (u8, u8) = (2, 5);
/// StandardFirmata's default sampling interval.
const DEFAULT_SAMPLING_MS: u64 = 19;

#[derive(Debug, Clone, Copy)]
struct SimPin {
    mode: PinMode,
    value: u32,
}

/// A [`Transport`] that behaves like a Firmata board.
#[derive(Debug)]
pub struct SimulatedBoard {
    connected: bool,
    pins: Vec<SimPin>,
    /// Bytes written by the host that do not yet form a complete frame.
    rx: Vec<u8>,
    /// Bytes queued for the host.
    tx: VecDeque<u8>,
    analog_reporting: [bool; 16],
    digital_reporting: [bool; 16],
    last_digital: [u8; 16],
    sampling: Duration,
    next_sample: Instant,
    tick: u32,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        let pins = (0..PIN_COUNT)
            .map(|i| SimPin {
                mode: if i >= FIRST_ANALOG_PIN {
                    PinMode::Analog
                } else {
                    PinMode::Output
                },
                value: 0,
            })
            .collect();
        Self {
            connected: true,
            pins,
            rx: Vec::new(),
            tx: VecDeque::new(),
            analog_reporting: [false; 16],
            digital_reporting: [false; 16],
            last_digital: [0; 16],
            sampling: Duration::from_millis(DEFAULT_SAMPLING_MS),
            next_sample: Instant::now(),
            tick: 0,
        }
    }

    fn supported_modes(pin: u8) -> Vec<(PinMode, u8)> {
        let mut modes = vec![(PinMode::Input, 1), (PinMode::Output, 1), (PinMode::PullUp, 1)];
        if PWM_PINS.contains(&pin) {
            modes.push((PinMode::Pwm, 8));
        }
        if (2..FIRST_ANALOG_PIN).contains(&pin) {
            modes.push((PinMode::Servo, 14));
        }
        if pin >= FIRST_ANALOG_PIN {
            modes.push((PinMode::Analog, 10));
        }
        if pin == 18 || pin == 19 {
            modes.push((PinMode::I2c, 1));
        }
        modes
    }

    fn queue(&mut self, bytes: &[u8]) {
        self.tx.extend(bytes.iter().copied());
    }

    fn queue_sysex(&mut self, command: u8, payload: &[u8]) {
        self.tx.push_back(0xF0);
        self.tx.push_back(command);
        self.tx.extend(payload.iter().copied());
        self.tx.push_back(0xF7);
    }

    /// Consume complete frames from `rx`, leaving a trailing partial frame.
    fn process_rx(&mut self) {
        loop {
            let Some(len) = frame_len(&self.rx) else {
                return;
            };
            let frame: Vec<u8> = self.rx.drain(..len).collect();
            self.handle_frame(&frame);
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        debug!(frame = ?frame, "simulated board received");
        match frame {
            [0xF0, rest @ ..] => {
                let body = &rest[..rest.len().saturating_sub(1)];
                if let Some((&command, payload)) = body.split_first() {
                    self.handle_sysex(command, payload);
                }
            }
            [0xF9] => self.queue(&[0xF9, PROTOCOL_VERSION.0, PROTOCOL_VERSION.1]),
            [0xFF] => *self = Self::new(),
            [0xF4, pin, mode] => {
                if let Some(p) = self.pins.get_mut(*pin as usize) {
                    p.mode = PinMode::from_byte(*mode);
                }
            }
            [0xF5, pin, value] => {
                if let Some(p) = self.pins.get_mut(*pin as usize) {
                    p.value = *value as u32;
                }
            }
            [command, lsb, msb] if command & 0xF0 == 0x90 => {
                let port = command & 0x0F;
                let mask = (lsb & 0x7F) | (msb << 7);
                for bit in 0..8 {
                    if let Some(p) = self.pins.get_mut((port * 8 + bit) as usize) {
                        if p.mode == PinMode::Output {
                            p.value = ((mask >> bit) & 1) as u32;
                        }
                    }
                }
            }
            [command, lsb, msb] if command & 0xF0 == 0xE0 => {
                if let Some(p) = self.pins.get_mut((command & 0x0F) as usize) {
                    p.value = *lsb as u32 | ((*msb as u32) << 7);
                }
            }
            [command, enable] if command & 0xF0 == 0xC0 => {
                self.analog_reporting[(command & 0x0F) as usize] = *enable != 0;
            }
            [command, enable] if command & 0xF0 == 0xD0 => {
                self.digital_reporting[(command & 0x0F) as usize] = *enable != 0;
            }
            _ => {}
        }
    }

    fn handle_sysex(&mut self, command: u8, payload: &[u8]) {
        match command {
            0x6B => {
                let mut body = Vec::new();
                for pin in 0..PIN_COUNT {
                    for (mode, res) in Self::supported_modes(pin) {
                        body.push(mode.to_byte());
                        body.push(res);
                    }
                    body.push(0x7F);
                }
                self.queue_sysex(0x6C, &body);
            }
            0x69 => {
                let body: Vec<u8> = (0..PIN_COUNT)
                    .map(|pin| pin.checked_sub(FIRST_ANALOG_PIN).unwrap_or(0x7F))
                    .collect();
                self.queue_sysex(0x6A, &body);
            }
            0x6D => {
                let Some(&pin) = payload.first() else { return };
                let Some(p) = self.pins.get(pin as usize).copied() else {
                    return;
                };
                let mut body = vec![pin, p.mode.to_byte()];
                let mut value = p.value;
                loop {
                    body.push((value & 0x7F) as u8);
                    value >>= 7;
                    if value == 0 {
                        break;
                    }
                }
                self.queue_sysex(0x6E, &body);
            }
            0x79 => {
                let mut body = vec![FIRMWARE_VERSION.0, FIRMWARE_VERSION.1];
                for ch in FIRMWARE_NAME.chars() {
                    let code = ch as u32;
                    body.push((code & 0x7F) as u8);
                    body.push(((code >> 7) & 0x7F) as u8);
                }
                self.queue_sysex(0x79, &body);
            }
            0x7A => {
                if let [lsb, msb, ..] = payload {
                    let ms = *lsb as u64 | ((*msb as u64) << 7);
                    self.sampling = Duration::from_millis(ms.max(1));
                }
            }
            0x6F => {
                if let [pin, value @ ..] = payload {
                    let v = value
                        .iter()
                        .take(4)
                        .enumerate()
                        .fold(0u32, |acc, (i, b)| acc | ((*b as u32) << (7 * i)));
                    if let Some(p) = self.pins.get_mut(*pin as usize) {
                        p.value = v;
                    }
                }
            }
            0x70 => {
                if let Some(p) = payload.first().and_then(|pin| self.pins.get_mut(*pin as usize)) {
                    p.mode = PinMode::Servo;
                }
            }
            0x71 => {
                // Echo text back, as a sketch printing to Firmata would.
                let body = payload.to_vec();
                self.queue_sysex(0x71, &body);
            }
            _ => {}
        }
    }

    /// Produce one round of reports for enabled channels and ports.
    fn sample(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        for channel in 0..(PIN_COUNT - FIRST_ANALOG_PIN) {
            if !self.analog_reporting[channel as usize] {
                continue;
            }
            // Triangle wave over 0..=1023, offset per channel.
            let phase = (self.tick.wrapping_mul(16) + channel as u32 * 128) % 2046;
            let value = if phase > 1023 { 2046 - phase } else { phase };
            self.pins[(FIRST_ANALOG_PIN + channel) as usize].value = value;
            self.queue(&[0xE0 | channel, (value & 0x7F) as u8, (value >> 7) as u8]);
        }

        for port in 0..PIN_COUNT.div_ceil(8) {
            if !self.digital_reporting[port as usize] {
                continue;
            }
            let mut mask = 0u8;
            for bit in 0..8 {
                let index = port * 8 + bit;
                let Some(p) = self.pins.get_mut(index as usize) else {
                    break;
                };
                if p.mode.is_digital_input() {
                    // Each input toggles at its own rate.
                    p.value = (self.tick / (index as u32 + 2)) % 2;
                }
                if p.value != 0 {
                    mask |= 1 << bit;
                }
            }
            if mask != self.last_digital[port as usize] {
                self.last_digital[port as usize] = mask;
                self.queue(&[0x90 | port, mask & 0x7F, mask >> 7]);
            }
        }
    }

    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = self.tx.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Length of the first complete frame in `buf`, discarding nothing.
/// Returns `None` if the frame is incomplete. Unknown bytes count as
/// one-byte frames.
fn frame_len(buf: &[u8]) -> Option<usize> {
    let first = *buf.first()?;
    let len = match first {
        0xF0 => buf.iter().position(|&b| b == 0xF7)? + 1,
        0xF4 | 0xF5 => 3,
        0xF9 | 0xFF => 1,
        b if b & 0xF0 == 0x90 || b & 0xF0 == 0xE0 => 3,
        b if b & 0xF0 == 0xC0 || b & 0xF0 == 0xD0 => 2,
        _ => 1,
    };
    (buf.len() >= len).then_some(len)
}

#[async_trait]
impl Transport for SimulatedBoard {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::TransportUnavailable);
        }
        self.rx.extend_from_slice(data);
        self.process_rx();
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::TransportUnavailable);
        }
        if !self.tx.is_empty() {
            return Ok(self.drain_into(buf));
        }

        let reporting = self.analog_reporting.iter().chain(&self.digital_reporting).any(|&on| on);
        if !reporting {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }

        let now = Instant::now();
        if self.next_sample > now + timeout {
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout);
        }
        tokio::time::sleep_until(self.next_sample).await;
        self.next_sample = Instant::now() + self.sampling;
        self.sample();
        if self.tx.is_empty() {
            return Err(Error::Timeout);
        }
        Ok(self.drain_into(buf))
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.tx.clear();
        self.rx.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(board: &mut SimulatedBoard) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        while let Ok(n) = board.receive(&mut buf, Duration::from_millis(5)).await {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[tokio::test]
    async fn answers_report_version() {
        let mut board = SimulatedBoard::new();
        board.send(&[0xF9]).await.unwrap();
        assert_eq!(read_all(&mut board).await, vec![0xF9, 0x02, 0x05]);
    }

    #[tokio::test]
    async fn answers_capability_query() {
        let mut board = SimulatedBoard::new();
        board.send(&[0xF0, 0x6B, 0xF7]).await.unwrap();
        let reply = read_all(&mut board).await;
        assert_eq!(&reply[..2], &[0xF0, 0x6C]);
        assert_eq!(reply.last(), Some(&0xF7));
        let records = reply.iter().filter(|&&b| b == 0x7F).count();
        assert_eq!(records, PIN_COUNT as usize);
    }

    #[tokio::test]
    async fn answers_analog_mapping_query() {
        let mut board = SimulatedBoard::new();
        board.send(&[0xF0, 0x69, 0xF7]).await.unwrap();
        let reply = read_all(&mut board).await;
        assert_eq!(reply.len(), PIN_COUNT as usize + 3);
        assert_eq!(reply[2 + 13], 0x7F);
        assert_eq!(reply[2 + 14], 0x00);
        assert_eq!(reply[2 + 19], 0x05);
    }

    #[tokio::test]
    async fn handles_frames_split_across_sends() {
        let mut board = SimulatedBoard::new();
        board.send(&[0xF0, 0x6D]).await.unwrap();
        board.send(&[0x0D, 0xF7]).await.unwrap();
        assert_eq!(
            read_all(&mut board).await,
            vec![0xF0, 0x6E, 0x0D, 0x01, 0x00, 0xF7]
        );
    }

    #[tokio::test]
    async fn remembers_mode_and_value() {
        let mut board = SimulatedBoard::new();
        board.send(&[0xF4, 0x03, 0x03]).await.unwrap();
        board.send(&[0xE3, 0x7F, 0x01]).await.unwrap();
        board.send(&[0xF0, 0x6D, 0x03, 0xF7]).await.unwrap();
        assert_eq!(
            read_all(&mut board).await,
            vec![0xF0, 0x6E, 0x03, 0x03, 0x7F, 0x01, 0xF7]
        );
    }

    #[tokio::test]
    async fn streams_enabled_analog_channel() {
        let mut board = SimulatedBoard::new();
        board.send(&[0xC0, 0x01]).await.unwrap();
        let mut buf = [0u8; 64];
        let n = board.receive(&mut buf, Duration::from_millis(100)).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf[0], 0xE0);
    }

    #[tokio::test]
    async fn silent_without_reporting() {
        let mut board = SimulatedBoard::new();
        let mut buf = [0u8; 8];
        let result = board.receive(&mut buf, Duration::from_millis(5)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn closed_board_is_unavailable() {
        let mut board = SimulatedBoard::new();
        board.close().await.unwrap();
        assert!(matches!(board.send(&[0xF9]).await, Err(Error::TransportUnavailable)));
    }
}
