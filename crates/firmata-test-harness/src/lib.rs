//! firmata-test-harness: Test utilities and mock transports for the
//! Firmata engine.
//!
//! - [`MockTransport`] replays scripted request/response exchanges and
//!   lets tests inject unsolicited board traffic.
//! - [`MockTcpServer`] is a scripted TCP peer for transport tests.
//! - [`SimulatedBoard`] answers Firmata queries like a small Arduino-class
//!   board, for demos and end-to-end tests without hardware.

pub mod mock_tcp;
pub mod mock_transport;
pub mod simulated;

pub use mock_tcp::MockTcpServer;
pub use mock_transport::{MockHandle, MockTransport};
pub use simulated::SimulatedBoard;
