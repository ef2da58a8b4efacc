//! Transport trait for board communication.
//!
//! The [`Transport`] trait abstracts over the byte link to a Firmata board.
//! Implementations exist for serial ports and TCP sockets in
//! `firmata-transport`, and a scripted mock in `firmata-test-harness`.
//! A BLE characteristic pair fits the same shape: writes go to the TX
//! characteristic and notifications are surfaced through `receive`.
//!
//! The protocol engine in `firmata-engine` operates on a `Transport` rather
//! than on a concrete device, so the same engine drives real hardware and
//! deterministic unit tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a board.
///
/// The link must be reliable and ordered. Chunking, MTU limits and
/// reconnection are the implementation's concern; the engine only sees
/// whole writes going out and arbitrary slices coming in.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the board.
    ///
    /// Implementations should return once all bytes have been handed to the
    /// underlying link.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the board into the provided buffer.
    ///
    /// Returns the number of bytes actually read. Waits up to `timeout` for
    /// data; returns [`Error::Timeout`](crate::error::Error::Timeout) if
    /// nothing arrived before the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the connection.
    ///
    /// After `close()`, `send()` and `receive()` should return
    /// [`Error::TransportUnavailable`](crate::error::Error::TransportUnavailable).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}
