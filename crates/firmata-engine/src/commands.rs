//! Firmata command encoders.
//!
//! Every function here is pure: it validates its arguments and returns the
//! bytes of one outbound frame. Nothing is written to a transport.
//!
//! Data bytes on the wire carry 7 bits. Arguments that must fit in a data
//! byte are checked, and an out-of-range value returns
//! [`Error::InvalidArgument`] rather than being masked.

use bytes::{BufMut, BytesMut};
use firmata_core::{Error, MAX_PIN, PinMode, Result};

use crate::codec::{
    ANALOG_MAPPING_QUERY, ANALOG_MESSAGE, CAPABILITY_QUERY, DIGITAL_MESSAGE, END_SYSEX,
    EXTENDED_ANALOG, I2C_CONFIG, I2C_REQUEST, PIN_STATE_QUERY, REPORT_ANALOG, REPORT_DIGITAL,
    REPORT_FIRMWARE, REPORT_VERSION, SAMPLING_INTERVAL, SERVO_CONFIG, SET_DIGITAL_PIN_VALUE,
    SET_PIN_MODE, START_SYSEX, STRING_DATA, SYSTEM_RESET, pack_14bit_ascii, split_14bit,
};

/// I2C request mode bits: write.
const I2C_MODE_WRITE: u8 = 0x00;
/// I2C request mode bits: read once.
const I2C_MODE_READ_ONCE: u8 = 0x08;

/// Largest value that fits in 14 bits (two data bytes).
pub const MAX_14BIT: u16 = 0x3FFF;

// ---------------------------------------------------------------
// Validation
// ---------------------------------------------------------------

fn check_7bit(name: &str, value: u8) -> Result<u8> {
    if value > 0x7F {
        return Err(Error::InvalidArgument(format!(
            "{name} 0x{value:02X} does not fit in 7 bits"
        )));
    }
    Ok(value)
}

fn check_pin(pin: u8) -> Result<u8> {
    if pin > MAX_PIN {
        return Err(Error::InvalidArgument(format!(
            "pin {pin} out of range 0..={MAX_PIN}"
        )));
    }
    Ok(pin)
}

fn check_nibble(name: &str, value: u8) -> Result<u8> {
    if value > 0x0F {
        return Err(Error::InvalidArgument(format!(
            "{name} {value} out of range 0..=15"
        )));
    }
    Ok(value)
}

pub(crate) fn check_14bit(name: &str, value: u16) -> Result<u16> {
    if value > MAX_14BIT {
        return Err(Error::InvalidArgument(format!(
            "{name} {value} does not fit in 14 bits"
        )));
    }
    Ok(value)
}

/// Wrap a SysEx command and payload in `START_SYSEX` / `END_SYSEX`.
fn encode_sysex(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(payload.len() + 3);
    buf.put_u8(START_SYSEX);
    buf.put_u8(command);
    buf.put_slice(payload);
    buf.put_u8(END_SYSEX);
    buf.to_vec()
}

// ---------------------------------------------------------------
// Queries
// ---------------------------------------------------------------

/// Ask for the analog channel of every pin.
pub fn analog_mapping_query() -> Vec<u8> {
    encode_sysex(ANALOG_MAPPING_QUERY, &[])
}

/// Ask for the supported modes of every pin.
pub fn capability_query() -> Vec<u8> {
    encode_sysex(CAPABILITY_QUERY, &[])
}

/// Ask for the current mode and value of one pin.
///
/// ```
/// use firmata_engine::commands::pin_state_query;
///
/// assert_eq!(pin_state_query(13).unwrap(), vec![0xF0, 0x6D, 13, 0xF7]);
/// assert!(pin_state_query(128).is_err());
/// ```
pub fn pin_state_query(pin: u8) -> Result<Vec<u8>> {
    Ok(encode_sysex(PIN_STATE_QUERY, &[check_pin(pin)?]))
}

/// Ask for the firmware name and version.
pub fn report_firmware() -> Vec<u8> {
    encode_sysex(REPORT_FIRMWARE, &[])
}

/// Ask for the protocol version.
pub fn report_version() -> Vec<u8> {
    vec![REPORT_VERSION]
}

// ---------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------

/// Set the analog sampling interval from its raw 7-bit halves.
pub fn sampling_interval(lsb: u8, msb: u8) -> Result<Vec<u8>> {
    let payload = [check_7bit("interval lsb", lsb)?, check_7bit("interval msb", msb)?];
    Ok(encode_sysex(SAMPLING_INTERVAL, &payload))
}

/// Set the analog sampling interval in milliseconds.
pub fn sampling_interval_ms(ms: u16) -> Result<Vec<u8>> {
    let [lsb, msb] = split_14bit(check_14bit("sampling interval", ms)?);
    sampling_interval(lsb, msb)
}

/// Attach a servo to `pin` with the given pulse range, each bound given as
/// raw 7-bit halves.
pub fn servo_config(pin: u8, min_lsb: u8, min_msb: u8, max_lsb: u8, max_msb: u8) -> Result<Vec<u8>> {
    let payload = [
        check_pin(pin)?,
        check_7bit("min pulse lsb", min_lsb)?,
        check_7bit("min pulse msb", min_msb)?,
        check_7bit("max pulse lsb", max_lsb)?,
        check_7bit("max pulse msb", max_msb)?,
    ];
    Ok(encode_sysex(SERVO_CONFIG, &payload))
}

/// Attach a servo with pulse bounds in microseconds.
pub fn servo_config_us(pin: u8, min_pulse: u16, max_pulse: u16) -> Result<Vec<u8>> {
    let [min_lsb, min_msb] = split_14bit(check_14bit("min pulse", min_pulse)?);
    let [max_lsb, max_msb] = split_14bit(check_14bit("max pulse", max_pulse)?);
    servo_config(pin, min_lsb, min_msb, max_lsb, max_msb)
}

/// Reset the firmware to its power-on state.
pub fn system_reset() -> Vec<u8> {
    vec![SYSTEM_RESET]
}

/// Set the mode of one pin.
pub fn set_pin_mode(pin: u8, mode: PinMode) -> Result<Vec<u8>> {
    let mode = check_7bit("pin mode", mode.to_byte())?;
    Ok(vec![SET_PIN_MODE, check_pin(pin)?, mode])
}

/// Enable or disable reporting of one analog channel.
pub fn report_analog(channel: u8, enable: bool) -> Result<Vec<u8>> {
    Ok(vec![
        REPORT_ANALOG | check_nibble("analog channel", channel)?,
        enable as u8,
    ])
}

/// Enable or disable reporting of one digital port.
pub fn report_digital(port: u8, enable: bool) -> Result<Vec<u8>> {
    Ok(vec![REPORT_DIGITAL | check_nibble("port", port)?, enable as u8])
}

// ---------------------------------------------------------------
// Writes
// ---------------------------------------------------------------

/// Write all 8 pins of a digital port. Bit `n` of `mask` is pin
/// `port * 8 + n`.
pub fn digital_port_write(port: u8, mask: u8) -> Result<Vec<u8>> {
    Ok(vec![
        DIGITAL_MESSAGE | check_nibble("port", port)?,
        mask & 0x7F,
        mask >> 7,
    ])
}

/// Set one digital pin high or low.
pub fn set_digital_pin_value(pin: u8, high: bool) -> Result<Vec<u8>> {
    Ok(vec![SET_DIGITAL_PIN_VALUE, check_pin(pin)?, high as u8])
}

/// Write an analog (PWM or servo) value.
///
/// Uses the compact `ANALOG_MESSAGE` form for pins 0..=15 with 14-bit
/// values and falls back to [`extended_analog_write`] otherwise.
pub fn analog_write(pin: u8, value: u32) -> Result<Vec<u8>> {
    if pin <= 0x0F && value <= MAX_14BIT as u32 {
        let [lsb, msb] = split_14bit(value as u16);
        return Ok(vec![ANALOG_MESSAGE | pin, lsb, msb]);
    }
    extended_analog_write(pin, value)
}

/// Write an analog value of any width to any pin.
pub fn extended_analog_write(pin: u8, value: u32) -> Result<Vec<u8>> {
    let mut payload = vec![check_pin(pin)?];
    let mut rest = value;
    loop {
        payload.push((rest & 0x7F) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    Ok(encode_sysex(EXTENDED_ANALOG, &payload))
}

/// Send a text message to the firmware.
pub fn string_data(text: &str) -> Result<Vec<u8>> {
    Ok(encode_sysex(STRING_DATA, &pack_14bit_ascii(text)?))
}

// ---------------------------------------------------------------
// I2C
// ---------------------------------------------------------------

/// Configure the I2C bus with the delay (microseconds) the firmware waits
/// between writing a register and reading it.
pub fn i2c_config(delay_us: u16) -> Result<Vec<u8>> {
    let delay = split_14bit(check_14bit("I2C delay", delay_us)?);
    Ok(encode_sysex(I2C_CONFIG, &delay))
}

/// Read `count` bytes from `register` of the device at `address`, once.
/// The result arrives as an `I2cReply`.
pub fn i2c_read_request(address: u8, register: u16, count: u16) -> Result<Vec<u8>> {
    let [reg_lsb, reg_msb] = split_14bit(check_14bit("register", register)?);
    let [count_lsb, count_msb] = split_14bit(check_14bit("byte count", count)?);
    let payload = [
        check_7bit("I2C address", address)?,
        I2C_MODE_READ_ONCE,
        reg_lsb,
        reg_msb,
        count_lsb,
        count_msb,
    ];
    Ok(encode_sysex(I2C_REQUEST, &payload))
}

/// Write `data` to the device at `address`.
pub fn i2c_write_request(address: u8, data: &[u8]) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(2 + data.len() * 2);
    payload.push(check_7bit("I2C address", address)?);
    payload.push(I2C_MODE_WRITE);
    for &b in data {
        payload.extend_from_slice(&split_14bit(b as u16));
    }
    Ok(encode_sysex(I2C_REQUEST, &payload))
}
