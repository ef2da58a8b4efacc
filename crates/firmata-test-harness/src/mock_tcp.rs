//! Mock TCP peer for transport-level testing.
//!
//! [`MockTcpServer`] listens on a random localhost port and plays the part
//! of a network-attached board (e.g. StandardFirmataWiFi): it accepts one
//! connection and works through scripted request/response pairs.
//!
//! # Example
//!
//! ```
//! use firmata_test_harness::MockTcpServer;
//!
//! # async fn example() -> firmata_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//!
//! // When the client sends REPORT_VERSION, answer with protocol 2.5.
//! server.expect(&[0xF9], &[0xF9, 0x02, 0x05]);
//! server.start();
//!
//! // Connect a TcpTransport to server.addr() ...
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use firmata_core::error::{Error, Result};

/// A pre-loaded request/response pair for the mock TCP server.
#[derive(Debug, Clone)]
struct TcpExpectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

/// A scripted TCP peer.
///
/// Once [`start`](MockTcpServer::start) is called, the server accepts a
/// single connection and processes expectations in order: it reads exactly
/// the expected request, checks it, and writes back the response. After the
/// last expectation it closes the connection.
pub struct MockTcpServer {
    addr: String,
    listener: Option<TcpListener>,
    expectations: VecDeque<TcpExpectation>,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Bind a new mock server to a random localhost port.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCP server: {e}")))?;
        let addr = listener.local_addr()?.to_string();
        Ok(Self {
            addr,
            listener: Some(listener),
            expectations: VecDeque::new(),
            server_handle: None,
        })
    }

    /// Add an expected request/response pair. An empty response means the
    /// request is only checked.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(TcpExpectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// The `host:port` the server listens on.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The port the server listens on.
    pub fn port(&self) -> u16 {
        self.addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// Start serving in a background task. Connections made before this
    /// call wait in the listen backlog.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let expectations: Vec<TcpExpectation> = self.expectations.drain(..).collect();

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {e}"))?;

            for (i, expectation) in expectations.iter().enumerate() {
                let mut buf = vec![0u8; expectation.request.len()];
                stream
                    .read_exact(&mut buf)
                    .await
                    .map_err(|e| format!("expectation {i}: read error: {e}"))?;

                if buf != expectation.request {
                    return Err(format!(
                        "expectation {i}: request mismatch: expected {:02X?}, got {buf:02X?}",
                        expectation.request
                    ));
                }

                if !expectation.response.is_empty() {
                    stream
                        .write_all(&expectation.response)
                        .await
                        .map_err(|e| format!("expectation {i}: write error: {e}"))?;
                    stream
                        .flush()
                        .await
                        .map_err(|e| format!("expectation {i}: flush error: {e}"))?;
                }
            }

            Ok(())
        });

        self.server_handle = Some(handle);
    }

    /// Wait for the server task to finish and return any mismatch.
    pub async fn wait(self) -> std::result::Result<(), String> {
        match self.server_handle {
            Some(handle) => handle
                .await
                .map_err(|e| format!("server task panicked: {e}"))?,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn serves_scripted_exchange() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(&[0xF9], &[0xF9, 0x02, 0x05]);
        server.start();

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        stream.write_all(&[0xF9]).await.unwrap();
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xF9, 0x02, 0x05]);

        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn reports_request_mismatch() {
        let mut server = MockTcpServer::new().await.unwrap();
        server.expect(&[0xF9], &[]);
        server.start();

        let mut stream = TcpStream::connect(server.addr()).await.unwrap();
        stream.write_all(&[0xFF]).await.unwrap();

        let err = server.wait().await.unwrap_err();
        assert!(err.contains("mismatch"));
    }

    #[tokio::test]
    async fn port_matches_addr() {
        let server = MockTcpServer::new().await.unwrap();
        assert!(server.port() > 0);
        assert!(server.addr().ends_with(&server.port().to_string()));
    }
}
