//! FirmataClient -- async handle to a Firmata board.
//!
//! The client is a thin front for the IO task in [`crate::io`]: every
//! method sends a request over the task's channel and waits for the
//! answer. Cloning state out of the task (pins, firmware, engine state)
//! goes through the same channel, so what a caller sees is always
//! consistent with the order in which bytes arrived.
//!
//! Notifications are delivered through [`subscribe`](FirmataClient::subscribe).

use std::time::Duration;

use tokio::sync::broadcast;

use firmata_core::error::Result;
use firmata_core::events::FirmataEvent;
use firmata_core::transport::Transport;
use firmata_core::types::{EngineState, FirmwareInfo, Pin, PinMode};

use crate::codec::split_14bit;
use crate::commands::check_14bit;
use crate::io::FirmataIo;
use crate::session::{Command, SessionSnapshot};

/// Async handle to one board connection.
///
/// Built by [`FirmataBuilder`](crate::builder::FirmataBuilder). Dropping
/// the client stops its IO task.
pub struct FirmataClient {
    io: FirmataIo,
    event_tx: broadcast::Sender<FirmataEvent>,
    discovery_timeout: Duration,
}

impl FirmataClient {
    pub(crate) fn new(
        io: FirmataIo,
        event_tx: broadcast::Sender<FirmataEvent>,
        discovery_timeout: Duration,
    ) -> Self {
        FirmataClient {
            io,
            event_tx,
            discovery_timeout,
        }
    }

    /// Subscribe to engine events.
    ///
    /// Events are delivered in the order the bytes that caused them
    /// arrived. A receiver that falls behind by more than the configured
    /// capacity sees `RecvError::Lagged`.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<FirmataEvent>> {
        Ok(self.event_tx.subscribe())
    }

    /// Validate, encode and write any [`Command`].
    ///
    /// The typed methods below are shorthands for this.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.io.command(command).await
    }

    /// Run capability discovery: send the capability and analog mapping
    /// queries and wait until both are answered.
    ///
    /// # Errors
    ///
    /// [`Error::QueryTimedOut`](firmata_core::Error::QueryTimedOut) when
    /// the board does not answer within the discovery timeout; the engine
    /// is back in `Connected` and discovery can be retried.
    pub async fn discover(&self) -> Result<()> {
        self.io.discover(self.discovery_timeout).await
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// Ask which analog channel each pin reads.
    pub async fn analog_mapping_query(&self) -> Result<()> {
        self.send(Command::AnalogMappingQuery).await
    }

    /// Ask which modes each pin supports. The answer completes
    /// discovery and fires [`FirmataEvent::CapabilitiesReady`].
    ///
    /// Analog reports name a channel, not a pin. Until an
    /// [`analog_mapping_query`](Self::analog_mapping_query) has been
    /// answered they cannot be attributed and are dropped;
    /// [`discover`](Self::discover) sends both queries.
    pub async fn capability_query(&self) -> Result<()> {
        self.send(Command::CapabilityQuery).await
    }

    /// Ask for one pin's mode and value. The answer arrives as
    /// [`FirmataEvent::PinChanged`] if anything changed.
    pub async fn pin_state_query(&self, pin: u8) -> Result<()> {
        self.send(Command::PinStateQuery { pin }).await
    }

    pub async fn report_firmware(&self) -> Result<()> {
        self.send(Command::ReportFirmware).await
    }

    pub async fn report_version(&self) -> Result<()> {
        self.send(Command::ReportVersion).await
    }

    // ---------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------

    /// Set the analog sampling interval from raw 7-bit halves.
    pub async fn sampling_interval(&self, lsb: u8, msb: u8) -> Result<()> {
        self.send(Command::SamplingInterval { lsb, msb }).await
    }

    /// Set the analog sampling interval in milliseconds (at most 16383).
    pub async fn set_sampling_interval_ms(&self, ms: u16) -> Result<()> {
        let [lsb, msb] = split_14bit(check_14bit("sampling interval", ms)?);
        self.sampling_interval(lsb, msb).await
    }

    /// Attach a servo with pulse bounds given as raw 7-bit halves.
    pub async fn servo_config(
        &self,
        pin: u8,
        min_lsb: u8,
        min_msb: u8,
        max_lsb: u8,
        max_msb: u8,
    ) -> Result<()> {
        self.send(Command::ServoConfig {
            pin,
            min_lsb,
            min_msb,
            max_lsb,
            max_msb,
        })
        .await
    }

    /// Attach a servo with pulse bounds in microseconds.
    pub async fn attach_servo(&self, pin: u8, min_pulse_us: u16, max_pulse_us: u16) -> Result<()> {
        let [min_lsb, min_msb] = split_14bit(check_14bit("min pulse", min_pulse_us)?);
        let [max_lsb, max_msb] = split_14bit(check_14bit("max pulse", max_pulse_us)?);
        self.servo_config(pin, min_lsb, min_msb, max_lsb, max_msb).await
    }

    pub async fn i2c_config(&self, delay_us: u16) -> Result<()> {
        self.send(Command::I2cConfig { delay_us }).await
    }

    pub async fn system_reset(&self) -> Result<()> {
        self.send(Command::SystemReset).await
    }

    // ---------------------------------------------------------------
    // Pin I/O
    // ---------------------------------------------------------------

    /// Set a pin's mode. Fails with `InvalidArgument` if the board did not
    /// list `mode` for that pin.
    pub async fn set_pin_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        self.send(Command::SetPinMode { pin, mode }).await
    }

    /// Drive an output pin high or low.
    pub async fn digital_write(&self, pin: u8, high: bool) -> Result<()> {
        self.send(Command::DigitalWrite { pin, high }).await
    }

    /// Write a PWM duty cycle or servo position.
    pub async fn analog_write(&self, pin: u8, value: u32) -> Result<()> {
        self.send(Command::AnalogWrite { pin, value }).await
    }

    /// Enable or disable streaming of one analog channel.
    pub async fn report_analog(&self, channel: u8, enable: bool) -> Result<()> {
        self.send(Command::ReportAnalog { channel, enable }).await
    }

    /// Enable or disable change reports for one 8-pin port.
    pub async fn report_digital(&self, port: u8, enable: bool) -> Result<()> {
        self.send(Command::ReportDigital { port, enable }).await
    }

    pub async fn send_string(&self, text: &str) -> Result<()> {
        self.send(Command::StringData {
            text: text.to_string(),
        })
        .await
    }

    /// Read `count` bytes from `register` of an I2C device. The data
    /// arrives as [`FirmataEvent::I2cReply`].
    pub async fn i2c_read(&self, address: u8, register: u16, count: u16) -> Result<()> {
        self.send(Command::I2cRead {
            address,
            register,
            count,
        })
        .await
    }

    pub async fn i2c_write(&self, address: u8, data: &[u8]) -> Result<()> {
        self.send(Command::I2cWrite {
            address,
            data: data.to_vec(),
        })
        .await
    }

    // ---------------------------------------------------------------
    // State
    // ---------------------------------------------------------------

    /// Copy of the whole observable session state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.io.snapshot().await
    }

    /// Every known pin, in ascending index order.
    pub async fn pins(&self) -> Result<Vec<Pin>> {
        Ok(self.snapshot().await?.pins)
    }

    pub async fn pin(&self, index: u8) -> Result<Option<Pin>> {
        Ok(self.pins().await?.into_iter().find(|p| p.index == index))
    }

    pub async fn firmware(&self) -> Result<Option<FirmwareInfo>> {
        Ok(self.snapshot().await?.firmware)
    }

    pub async fn state(&self) -> Result<EngineState> {
        Ok(self.snapshot().await?.state)
    }

    /// Stop the IO task and hand back the transport.
    ///
    /// The transport is not closed; call [`Transport::close`] on it when
    /// the connection itself should go away.
    pub async fn close(mut self) -> Result<Box<dyn Transport>> {
        self.io.shutdown().await
    }
}

impl Drop for FirmataClient {
    fn drop(&mut self) {
        self.io.cancel.cancel();
        self.io.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FirmataBuilder;
    use firmata_core::Error;
    use firmata_test_harness::{MockHandle, MockTransport};

    const CAPABILITY_QUERY: [u8; 3] = [0xF0, 0x6B, 0xF7];
    const ANALOG_MAPPING_QUERY: [u8; 3] = [0xF0, 0x69, 0xF7];
    /// Pin 0: output. Pin 1: input.
    const CAPABILITY_FRAME: [u8; 9] = [0xF0, 0x6C, 0x01, 0x01, 0x7F, 0x00, 0x01, 0x7F, 0xF7];
    /// Pin 1 reads analog channel 0.
    const MAPPING_FRAME: [u8; 5] = [0xF0, 0x6A, 0x7F, 0x00, 0xF7];

    async fn client_with(mock: MockTransport) -> FirmataClient {
        FirmataBuilder::new()
            .discovery_timeout(Duration::from_millis(300))
            .poll_interval(Duration::from_millis(10))
            .build_with_transport(Box::new(mock))
            .await
            .unwrap()
    }

    /// A client that has completed discovery against a two-pin board.
    async fn ready_client() -> (FirmataClient, MockHandle) {
        let mut mock = MockTransport::new();
        mock.expect(&CAPABILITY_QUERY, &CAPABILITY_FRAME);
        mock.expect(&ANALOG_MAPPING_QUERY, &MAPPING_FRAME);
        let handle = mock.handle();
        let client = client_with(mock).await;
        client.discover().await.unwrap();
        (client, handle)
    }

    /// Wait for the first event matching `pred`, skipping others.
    async fn wait_for(
        rx: &mut broadcast::Receiver<FirmataEvent>,
        pred: impl Fn(&FirmataEvent) -> bool,
    ) -> FirmataEvent {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not received")
    }

    // ---------------------------------------------------------------
    // Discovery
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn discovery_completes_and_fires_capabilities_ready() {
        let mut mock = MockTransport::new();
        mock.expect(&CAPABILITY_QUERY, &CAPABILITY_FRAME);
        mock.expect(&ANALOG_MAPPING_QUERY, &MAPPING_FRAME);
        let handle = mock.handle();
        let client = client_with(mock).await;
        let mut rx = client.subscribe().unwrap();

        client.discover().await.unwrap();
        wait_for(&mut rx, |e| *e == FirmataEvent::CapabilitiesReady).await;

        assert_eq!(client.state().await.unwrap(), EngineState::Ready);
        let pins = client.pins().await.unwrap();
        assert_eq!(pins.len(), 2);
        assert!(pins[0].supports(PinMode::Output));
        assert_eq!(pins[1].analog_channel, Some(0));
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn discovery_timeout_reverts_to_connected() {
        let mut mock = MockTransport::new();
        mock.expect_write(&CAPABILITY_QUERY);
        mock.expect_write(&ANALOG_MAPPING_QUERY);
        let client = client_with(mock).await;
        let mut rx = client.subscribe().unwrap();

        let result = client.discover().await;
        assert!(matches!(result, Err(Error::QueryTimedOut)), "got {result:?}");
        wait_for(&mut rx, |e| *e == FirmataEvent::QueryTimedOut).await;
        assert_eq!(client.state().await.unwrap(), EngineState::Connected);
    }

    // ---------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn pin_query_before_discovery_is_not_ready() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let client = client_with(mock).await;

        let result = client.pin_state_query(0).await;
        assert!(matches!(result, Err(Error::NotReady(_))), "got {result:?}");
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn queries_are_written_verbatim() {
        let mut mock = MockTransport::new();
        mock.expect_write(&[0xF0, 0x79, 0xF7]);
        mock.expect_write(&[0xF0, 0x7A, 0x13, 0x00, 0xF7]);
        mock.expect_write(&[0xF0, 0x7A, 0x64, 0x00, 0xF7]);
        let handle = mock.handle();
        let client = client_with(mock).await;

        client.report_firmware().await.unwrap();
        client.sampling_interval(0x13, 0x00).await.unwrap();
        client.set_sampling_interval_ms(100).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn out_of_range_argument_writes_nothing() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let client = client_with(mock).await;

        let result = client.sampling_interval(0x80, 0x00).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        let result = client.set_sampling_interval_ms(0x4000).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(handle.sent_data().is_empty());
    }

    #[tokio::test]
    async fn pin_state_query_after_discovery() {
        let (client, handle) = ready_client().await;
        handle.expect(&[0xF0, 0x6D, 0x01, 0xF7], &[0xF0, 0x6E, 0x01, 0x00, 0x01, 0xF7]);
        let mut rx = client.subscribe().unwrap();

        client.pin_state_query(1).await.unwrap();
        wait_for(&mut rx, |e| *e == FirmataEvent::PinChanged { pin: 1 }).await;

        let pin = client.pin(1).await.unwrap().unwrap();
        assert_eq!(pin.current_mode, Some(PinMode::Input));
        assert_eq!(pin.current_value, 1);
    }

    #[tokio::test]
    async fn unreported_pin_is_invalid_argument() {
        let (client, handle) = ready_client().await;
        let sent_before = handle.sent_data().len();

        let result = client.pin_state_query(40).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))), "got {result:?}");
        assert_eq!(handle.sent_data().len(), sent_before);
    }

    #[tokio::test]
    async fn set_pin_mode_rejects_unsupported_mode() {
        let (client, _handle) = ready_client().await;
        let result = client.set_pin_mode(1, PinMode::Output).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn digital_write_sends_port_mask() {
        let (client, handle) = ready_client().await;
        handle.expect(&[0xF4, 0x00, 0x01], &[]);
        handle.expect(&[0x90, 0x01, 0x00], &[]);

        client.set_pin_mode(0, PinMode::Output).await.unwrap();
        client.digital_write(0, true).await.unwrap();

        assert_eq!(handle.remaining_expectations(), 0);
        let pin = client.pin(0).await.unwrap().unwrap();
        assert_eq!(pin.current_mode, Some(PinMode::Output));
        assert_eq!(pin.current_value, 1);
    }

    #[tokio::test]
    async fn failed_write_records_no_pin_state() {
        // No expectations left: every further send is rejected.
        let (client, _handle) = ready_client().await;

        let result = client.set_pin_mode(0, PinMode::Output).await;
        assert!(matches!(result, Err(Error::Transport(_))), "got {result:?}");
        assert_eq!(client.pin(0).await.unwrap().unwrap().current_mode, None);

        let result = client.digital_write(0, true).await;
        assert!(matches!(result, Err(Error::Transport(_))), "got {result:?}");
        let pin = client.pin(0).await.unwrap().unwrap();
        assert_eq!(pin.current_mode, None);
        assert_eq!(pin.current_value, 0);
    }

    #[tokio::test]
    async fn failed_discovery_write_stays_connected() {
        let client = client_with(MockTransport::new()).await;
        let mut rx = client.subscribe().unwrap();

        let result = client.discover().await;
        assert!(matches!(result, Err(Error::Transport(_))), "got {result:?}");
        assert_eq!(client.state().await.unwrap(), EngineState::Connected);

        // Nothing is outstanding, so the discovery deadline never fires.
        tokio::time::sleep(Duration::from_millis(400)).await;
        while let Ok(event) = rx.try_recv() {
            assert_ne!(event, FirmataEvent::QueryTimedOut);
        }
    }

    // ---------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn analog_report_updates_mapped_pin() {
        let (client, handle) = ready_client().await;
        let mut rx = client.subscribe().unwrap();

        handle.push_inbound(&[0xE0, 0x7F, 0x03]);
        wait_for(&mut rx, |e| *e == FirmataEvent::PinChanged { pin: 1 }).await;

        let pin = client.pin(1).await.unwrap().unwrap();
        assert_eq!(pin.current_value, 511);
    }

    #[tokio::test]
    async fn firmware_report_is_published() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let client = client_with(mock).await;
        let mut rx = client.subscribe().unwrap();

        handle.push_inbound(&[0xF0, 0x79, 0x02, 0x05, b'U', 0x00, b'n', 0x00, b'o', 0x00, 0xF7]);
        let event = wait_for(&mut rx, |e| matches!(e, FirmataEvent::FirmwareReported(_))).await;

        let expected = FirmwareInfo {
            name: "Uno".to_string(),
            major: 2,
            minor: 5,
        };
        assert_eq!(event, FirmataEvent::FirmwareReported(expected.clone()));
        assert_eq!(client.firmware().await.unwrap(), Some(expected));
    }

    // ---------------------------------------------------------------
    // Connection lifecycle
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn transport_loss_disconnects_and_clears_pins() {
        let (client, handle) = ready_client().await;
        let mut rx = client.subscribe().unwrap();

        handle.set_connected(false);
        wait_for(&mut rx, |e| *e == FirmataEvent::Disconnected).await;

        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.state, EngineState::Disconnected);
        assert!(snapshot.pins.is_empty());

        let result = client.report_firmware().await;
        assert!(matches!(result, Err(Error::TransportUnavailable)), "got {result:?}");

        handle.set_connected(true);
        wait_for(&mut rx, |e| *e == FirmataEvent::Connected).await;
        assert_eq!(client.state().await.unwrap(), EngineState::Connected);
    }

    #[tokio::test]
    async fn close_returns_transport() {
        let (client, handle) = ready_client().await;
        let transport = client.close().await.unwrap();
        assert!(transport.is_connected());
        assert!(handle.is_connected());
    }
}
