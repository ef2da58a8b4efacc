//! Mock transport for deterministic testing of the Firmata engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. A response is queued as inbound data as soon as
//! its request is sent. Tests can also queue unsolicited inbound data
//! (digital and analog reports) at any time through a [`MockHandle`], which
//! stays usable after the transport has been moved into an IO task.
//!
//! # Example
//!
//! ```
//! use firmata_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! // When the engine sends REPORT_VERSION, answer with protocol 2.5.
//! mock.expect(&[0xF9], &[0xF9, 0x02, 0x05]);
//! let handle = mock.handle();
//! // Later, from the test: an analog report for A0.
//! handle.push_inbound(&[0xE0, 0x7F, 0x03]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use firmata_core::error::{Error, Result};
use firmata_core::transport::Transport;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes queued for reading when the request arrives (may be empty).
    response: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    expectations: VecDeque<Expectation>,
    /// Queued reads; each chunk is returned by its own `receive()` call
    /// (split further if the caller's buffer is smaller).
    inbound: VecDeque<Vec<u8>>,
    connected: bool,
    sent_log: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<MockState>,
    data_ready: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push_inbound(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.lock().inbound.push_back(data.to_vec());
        self.data_ready.notify_one();
    }
}

/// A mock [`Transport`] for testing the engine without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; on a match
/// the expectation's response becomes readable. A mismatch, or a send with
/// no expectations left, returns [`Error::Transport`].
///
/// `receive()` waits up to its timeout for inbound data and returns
/// [`Error::Timeout`] if none arrives.
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Test-side view of a [`MockTransport`] that has been handed to the engine.
#[derive(Debug, Clone)]
pub struct MockHandle {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState {
                    expectations: VecDeque::new(),
                    inbound: VecDeque::new(),
                    connected: true,
                    sent_log: Vec::new(),
                }),
                data_ready: Notify::new(),
            }),
        }
    }

    /// Add an expected request and the bytes the board answers with.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Add an expected request that the board does not answer.
    pub fn expect_write(&mut self, request: &[u8]) {
        self.expect(request, &[]);
    }

    /// Queue unsolicited inbound data.
    pub fn push_inbound(&mut self, data: &[u8]) {
        self.shared.push_inbound(data);
    }

    /// A handle for inspecting and driving this transport after it has
    /// been moved elsewhere.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// All data sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// Number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    /// Set the connected state. While disconnected, `send()` and
    /// `receive()` return [`Error::TransportUnavailable`].
    pub fn set_connected(&mut self, connected: bool) {
        self.handle().set_connected(connected);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    /// Queue unsolicited inbound data.
    pub fn push_inbound(&self, data: &[u8]) {
        self.shared.push_inbound(data);
    }

    /// Add an expected request and its response.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.shared.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// All data sent through the transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.shared.lock().sent_log.clone()
    }

    /// Number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.shared.lock().expectations.len()
    }

    /// Simulate the link dropping or coming back.
    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().connected = connected;
        // Wake a blocked receive so it observes the change.
        self.shared.data_ready.notify_one();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

impl MockTransport {
    /// Take up to `buf.len()` bytes of the oldest queued chunk.
    fn try_read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        let mut state = self.shared.lock();
        if !state.connected {
            return Err(Error::TransportUnavailable);
        }
        let Some(chunk) = state.inbound.front_mut() else {
            return Ok(None);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            state.inbound.pop_front();
        }
        Ok(Some(n))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let response = {
            let mut state = self.shared.lock();
            if !state.connected {
                return Err(Error::TransportUnavailable);
            }

            // Record what was sent.
            state.sent_log.push(data.to_vec());

            let Some(expectation) = state.expectations.pop_front() else {
                return Err(Error::Transport(format!(
                    "no more expectations in mock transport, got {data:02X?}"
                )));
            };
            if data != expectation.request.as_slice() {
                return Err(Error::Transport(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
            expectation.response
        };
        self.shared.push_inbound(&response);
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if let Some(n) = self.try_read(buf)? {
            return Ok(n);
        }
        let _ = tokio::time::timeout(timeout, self.shared.data_ready.notified()).await;
        self.try_read(buf)?.ok_or(Error::Timeout)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.shared.lock();
        state.connected = false;
        state.inbound.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_basic_send_receive() {
        let mut mock = MockTransport::new();
        let request = &[0xF0, 0x79, 0xF7];
        let response = &[0xF0, 0x79, 0x02, 0x05, b'S', 0x00, 0xF7];

        mock.expect(request, response);
        mock.send(request).await.unwrap();

        let mut buf = [0u8; 64];
        let n = mock
            .receive(&mut buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(n, response.len());
        assert_eq!(&buf[..n], response);
    }

    #[tokio::test]
    async fn mock_transport_tracks_sent_data() {
        let mut mock = MockTransport::new();
        mock.expect_write(&[0xF4, 0x0D, 0x01]);
        mock.expect_write(&[0x90, 0x00, 0x01]);

        mock.send(&[0xF4, 0x0D, 0x01]).await.unwrap();
        mock.send(&[0x90, 0x00, 0x01]).await.unwrap();

        let sent = mock.sent_data();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], vec![0xF4, 0x0D, 0x01]);
        assert_eq!(sent[1], vec![0x90, 0x00, 0x01]);
    }

    #[tokio::test]
    async fn mock_transport_wrong_data_errors() {
        let mut mock = MockTransport::new();
        mock.expect(&[0x01], &[0xFF]);

        let result = mock.send(&[0x99]).await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test]
    async fn mock_transport_no_expectations_errors() {
        let mut mock = MockTransport::new();
        let result = mock.send(&[0x01]).await;
        assert!(matches!(result.unwrap_err(), Error::Transport(_)));
    }

    #[tokio::test]
    async fn mock_transport_write_only_expectation_queues_nothing() {
        let mut mock = MockTransport::new();
        mock.expect_write(&[0xFF]);
        mock.send(&[0xFF]).await.unwrap();

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test]
    async fn mock_transport_receive_without_data_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 64];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }

    #[tokio::test]
    async fn mock_transport_inbound_chunks_stay_separate() {
        let mut mock = MockTransport::new();
        mock.push_inbound(&[0xF0, 0x6C]);
        mock.push_inbound(&[0x7F, 0xF7]);

        let mut buf = [0u8; 64];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xF0, 0x6C]);
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0x7F, 0xF7]);
    }

    #[tokio::test]
    async fn mock_transport_partial_receive() {
        let mut mock = MockTransport::new();
        mock.push_inbound(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let mut buf = [0u8; 2];
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0xBB]);
        let n = mock.receive(&mut buf, Duration::from_millis(10)).await.unwrap();
        assert_eq!(&buf[..n], &[0xCC, 0xDD]);
    }

    #[tokio::test]
    async fn mock_transport_handle_wakes_blocked_receive() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();

        let pusher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.push_inbound(&[0xE0, 0x01, 0x00]);
        });

        let mut buf = [0u8; 8];
        let n = mock.receive(&mut buf, Duration::from_secs(5)).await.unwrap();
        assert_eq!(&buf[..n], &[0xE0, 0x01, 0x00]);
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn mock_transport_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.close().await.unwrap();
        assert!(!mock.is_connected());

        let result = mock.send(&[0x01]).await;
        assert!(matches!(result.unwrap_err(), Error::TransportUnavailable));
    }

    #[tokio::test]
    async fn mock_transport_set_connected() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        handle.set_connected(false);
        assert!(!mock.is_connected());

        let mut buf = [0u8; 8];
        let result = mock.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result.unwrap_err(), Error::TransportUnavailable));

        mock.set_connected(true);
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_remaining_expectations() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(&[0x01], &[0xFF]);
        handle.expect(&[0x02], &[0xFE]);
        assert_eq!(handle.remaining_expectations(), 2);

        mock.send(&[0x01]).await.unwrap();
        assert_eq!(mock.remaining_expectations(), 1);
        mock.send(&[0x02]).await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
        assert_eq!(handle.sent_data().len(), 2);
    }
}
