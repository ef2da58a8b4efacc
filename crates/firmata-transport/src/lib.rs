//! Transport implementations for Firmata boards.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](firmata_core::Transport) trait:
//!
//! - [`SerialTransport`]: USB virtual COM ports (StandardFirmata runs at
//!   57600 baud)
//! - [`TcpTransport`]: Firmata over TCP, e.g. StandardFirmataWiFi or
//!   StandardFirmataEthernet, which listen on port 3030
//!
//! # Example
//!
//! ```no_run
//! use firmata_transport::SerialTransport;
//! use firmata_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> firmata_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyACM0", 57600).await?;
//!
//! // REPORT_VERSION query
//! transport.send(&[0xF9]).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod tcp;

pub use serial::{DEFAULT_BAUD_RATE, FlowControl, SerialConfig, SerialTransport};
pub use tcp::{DEFAULT_PORT, TcpTransport};
