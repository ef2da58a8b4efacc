//! FirmataBuilder -- fluent builder for constructing [`FirmataClient`] instances.
//!
//! Separates configuration from construction so that callers can pick a
//! serial port or TCP endpoint, adjust timeouts, and choose whether to run
//! capability discovery before the client is handed out.
//!
//! # Example
//!
//! ```no_run
//! use firmata_engine::builder::FirmataBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> firmata_core::Result<()> {
//! let client = FirmataBuilder::new()
//!     .serial_port("/dev/ttyACM0")
//!     .discovery_timeout(Duration::from_secs(3))
//!     .discover_on_connect(true)
//!     .sampling_interval_ms(100)
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::broadcast;

use firmata_core::error::{Error, Result};
use firmata_core::transport::Transport;
use firmata_transport::{DEFAULT_BAUD_RATE, SerialTransport, TcpTransport};

use crate::client::FirmataClient;
use crate::io::{IoConfig, spawn_io_task};

const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`FirmataClient`].
///
/// Exactly one of [`serial_port`](Self::serial_port) and
/// [`tcp_host`](Self::tcp_host) must be set for [`build`](Self::build).
/// Tests and callers that manage their own transport use
/// [`build_with_transport`](Self::build_with_transport) instead.
#[derive(Debug, Clone)]
pub struct FirmataBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    tcp_host: Option<String>,
    discovery_timeout: Duration,
    poll_interval: Duration,
    event_capacity: usize,
    discover_on_connect: bool,
    sampling_interval_ms: Option<u16>,
}

impl Default for FirmataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FirmataBuilder {
    pub fn new() -> Self {
        FirmataBuilder {
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            tcp_host: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            discover_on_connect: false,
            sampling_interval_ms: None,
        }
    }

    /// Serial device path (e.g. `/dev/ttyACM0`, `COM3`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Serial baud rate. Defaults to 57600.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// `host` or `host:port` of a network board. The port defaults to 3030.
    pub fn tcp_host(mut self, host: &str) -> Self {
        self.tcp_host = Some(host.to_string());
        self
    }

    /// How long discovery may wait for the board's answers.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Read timeout of one transport poll in the IO task.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Capacity of the event broadcast channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Run discovery before the client is returned; a board that does not
    /// answer fails the build with `QueryTimedOut`.
    pub fn discover_on_connect(mut self, enabled: bool) -> Self {
        self.discover_on_connect = enabled;
        self
    }

    /// Analog sampling interval to set once the client is built (after
    /// discovery, if enabled).
    pub fn sampling_interval_ms(mut self, ms: u16) -> Self {
        self.sampling_interval_ms = Some(ms);
        self
    }

    /// Build a [`FirmataClient`] with a caller-provided transport.
    ///
    /// This is the primary entry point for testing (pass a
    /// `MockTransport` from `firmata-test-harness`).
    pub async fn build_with_transport(self, transport: Box<dyn Transport>) -> Result<FirmataClient> {
        if self.event_capacity == 0 {
            return Err(Error::InvalidArgument("event_capacity must be non-zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidArgument("poll_interval must be non-zero".into()));
        }

        let (event_tx, _) = broadcast::channel(self.event_capacity);
        let config = IoConfig {
            discovery_timeout: self.discovery_timeout,
            poll_interval: self.poll_interval,
        };
        let io = spawn_io_task(transport, config, event_tx.clone());
        let client = FirmataClient::new(io, event_tx, self.discovery_timeout);

        if self.discover_on_connect {
            client.discover().await?;
        }
        if let Some(ms) = self.sampling_interval_ms {
            client.set_sampling_interval_ms(ms).await?;
        }

        Ok(client)
    }

    /// Build a [`FirmataClient`] over a serial port or TCP connection.
    pub async fn build(self) -> Result<FirmataClient> {
        let transport: Box<dyn Transport> = match (&self.serial_port, &self.tcp_host) {
            (Some(port), None) => Box::new(SerialTransport::open(port, self.baud_rate).await?),
            (None, Some(host)) => Box::new(TcpTransport::connect(host).await?),
            (Some(_), Some(_)) => {
                return Err(Error::InvalidArgument(
                    "serial_port and tcp_host are mutually exclusive".into(),
                ));
            }
            (None, None) => {
                return Err(Error::InvalidArgument(
                    "serial_port or tcp_host is required for build()".into(),
                ));
            }
        };
        self.build_with_transport(transport).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firmata_core::EngineState;
    use firmata_test_harness::{MockTcpServer, MockTransport};

    #[test]
    fn builder_defaults() {
        let builder = FirmataBuilder::new();
        assert_eq!(builder.baud_rate, 57600);
        assert_eq!(builder.discovery_timeout, Duration::from_secs(5));
        assert_eq!(builder.poll_interval, Duration::from_millis(50));
        assert_eq!(builder.event_capacity, 256);
        assert!(!builder.discover_on_connect);
        assert!(builder.sampling_interval_ms.is_none());
    }

    #[tokio::test]
    async fn build_with_mock_transport() {
        let client = FirmataBuilder::new()
            .build_with_transport(Box::new(MockTransport::new()))
            .await
            .unwrap();
        assert_eq!(client.state().await.unwrap(), EngineState::Connected);
    }

    #[tokio::test]
    async fn discover_on_connect_then_sampling_interval() {
        let mut mock = MockTransport::new();
        mock.expect(&[0xF0, 0x6B, 0xF7], &[0xF0, 0x6C, 0x00, 0x01, 0x7F, 0xF7]);
        mock.expect(&[0xF0, 0x69, 0xF7], &[0xF0, 0x6A, 0x7F, 0xF7]);
        mock.expect_write(&[0xF0, 0x7A, 0x13, 0x00, 0xF7]);
        let handle = mock.handle();

        let client = FirmataBuilder::new()
            .discover_on_connect(true)
            .sampling_interval_ms(19)
            .build_with_transport(Box::new(mock))
            .await
            .unwrap();

        assert_eq!(client.state().await.unwrap(), EngineState::Ready);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn discover_on_connect_fails_on_silent_board() {
        let mut mock = MockTransport::new();
        mock.expect_write(&[0xF0, 0x6B, 0xF7]);
        mock.expect_write(&[0xF0, 0x69, 0xF7]);

        let result = FirmataBuilder::new()
            .discovery_timeout(Duration::from_millis(100))
            .poll_interval(Duration::from_millis(10))
            .discover_on_connect(true)
            .build_with_transport(Box::new(mock))
            .await;
        assert!(matches!(result, Err(Error::QueryTimedOut)));
    }

    #[tokio::test]
    async fn zero_event_capacity_is_rejected() {
        let result = FirmataBuilder::new()
            .event_capacity(0)
            .build_with_transport(Box::new(MockTransport::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn build_requires_an_endpoint() {
        let result = FirmataBuilder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        let result = FirmataBuilder::new()
            .serial_port("/dev/ttyACM0")
            .tcp_host("10.0.0.7")
            .build()
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn build_over_tcp() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(&[0xF0, 0x79, 0xF7], &[]);
        server.start();

        let client = FirmataBuilder::new()
            .tcp_host(server.addr())
            .build()
            .await
            .unwrap();
        client.report_firmware().await.unwrap();
        server.wait().await.unwrap();
    }
}
