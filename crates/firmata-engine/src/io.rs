//! IO task that owns the transport and the session.
//!
//! Every client call becomes a [`Request`] on an mpsc channel and is
//! answered through a oneshot. The task is the only code that touches the
//! transport or the [`Session`], so requests and received bytes are
//! applied strictly one at a time and events go out in arrival order.
//!
//! The loop prioritizes, in order: cancellation, client requests, and
//! reading from the transport. After every iteration it checks whether an
//! outstanding discovery has timed out.

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use firmata_core::error::{Error, Result};
use firmata_core::events::FirmataEvent;
use firmata_core::transport::Transport;

use crate::session::{Command, Session, SessionSnapshot};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the IO task.
#[derive(Debug, Clone)]
pub(crate) struct IoConfig {
    /// How long discovery may stay outstanding before `QueryTimedOut`.
    pub discovery_timeout: Duration,
    /// Read timeout for one transport poll; also the back-off after a
    /// transport error.
    pub poll_interval: Duration,
}

/// A request sent from the client to the IO task.
pub(crate) enum Request {
    /// Encode a command and write it.
    Command {
        command: Command,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send the capability and analog mapping queries; reply when
    /// discovery completes or times out.
    Discover { reply: oneshot::Sender<Result<()>> },
    /// Copy the current session state.
    Snapshot { reply: oneshot::Sender<SessionSnapshot> },
    /// Graceful shutdown; returns the transport.
    Shutdown {
        reply: oneshot::Sender<Box<dyn Transport>>,
    },
}

/// Handle to the IO task. Stored inside `FirmataClient`.
pub(crate) struct FirmataIo {
    pub cmd_tx: mpsc::Sender<Request>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl FirmataIo {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<oneshot::Receiver<T>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::TransportUnavailable)?;
        Ok(reply_rx)
    }

    /// Encode and write a command.
    pub async fn command(&self, command: Command) -> Result<()> {
        let reply_rx = self
            .request(|reply| Request::Command { command, reply })
            .await?;
        reply_rx.await.map_err(|_| Error::TransportUnavailable)?
    }

    /// Run discovery and wait for it to finish.
    pub async fn discover(&self, timeout: Duration) -> Result<()> {
        let reply_rx = self.request(|reply| Request::Discover { reply }).await?;

        // Safety net over the IO task's own discovery deadline, which is
        // only checked once per poll.
        match tokio::time::timeout(timeout + Duration::from_millis(500), reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::TransportUnavailable),
            Err(_) => Err(Error::QueryTimedOut),
        }
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let reply_rx = self.request(|reply| Request::Snapshot { reply }).await?;
        reply_rx.await.map_err(|_| Error::TransportUnavailable)
    }

    /// Shut down the IO task and recover the transport.
    pub async fn shutdown(&mut self) -> Result<Box<dyn Transport>> {
        let reply_rx = self.request(|reply| Request::Shutdown { reply }).await?;
        let transport = reply_rx.await.map_err(|_| Error::TransportUnavailable)?;
        let _ = (&mut self.task).await;
        Ok(transport)
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Spawn the IO task. Returns the handle for sending requests.
pub(crate) fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<FirmataEvent>,
) -> FirmataIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(32);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let task = tokio::spawn(io_loop(transport, config, event_tx, cmd_rx, cancel_clone));

    FirmataIo {
        cmd_tx,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// Event dispatch
// ---------------------------------------------------------------------------

/// Publishes session events and resolves pending `discover()` calls.
struct EventSink {
    event_tx: broadcast::Sender<FirmataEvent>,
    discovery_waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl EventSink {
    fn dispatch(&mut self, events: Vec<FirmataEvent>) {
        for event in events {
            let outcome = match &event {
                FirmataEvent::CapabilitiesReady => Some(Ok(())),
                FirmataEvent::QueryTimedOut => Some(Err(Error::QueryTimedOut)),
                FirmataEvent::Disconnected => Some(Err(Error::ConnectionLost)),
                _ => None,
            };
            if let Some(outcome) = outcome {
                self.resolve_discovery(outcome);
            }
            // No subscribers is not an error.
            let _ = self.event_tx.send(event);
        }
    }

    fn resolve_discovery(&mut self, outcome: Result<()>) {
        for waiter in self.discovery_waiters.drain(..) {
            let reply = match &outcome {
                Ok(()) => Ok(()),
                Err(Error::QueryTimedOut) => Err(Error::QueryTimedOut),
                Err(_) => Err(Error::ConnectionLost),
            };
            let _ = waiter.send(reply);
        }
    }
}

// ---------------------------------------------------------------------------
// IO Loop
// ---------------------------------------------------------------------------

/// Size of one transport read.
const READ_BUF_LEN: usize = 256;

/// The main IO loop. Runs as a spawned Tokio task.
async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<FirmataEvent>,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut session = Session::new();
    let mut sink = EventSink {
        event_tx,
        discovery_waiters: Vec::new(),
    };
    let mut buf = [0u8; READ_BUF_LEN];

    loop {
        if !session.state().is_connected() && transport.is_connected() {
            info!("transport connected, starting session");
            sink.dispatch(session.connect());
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            req = cmd_rx.recv() => {
                match req {
                    Some(Request::Command { command, reply }) => {
                        let result = execute_command(&mut *transport, &mut session, &mut sink, &command).await;
                        let _ = reply.send(result);
                    }
                    Some(Request::Discover { reply }) => {
                        match start_discovery(&mut *transport, &mut session, &mut sink).await {
                            Ok(()) => sink.discovery_waiters.push(reply),
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    Some(Request::Snapshot { reply }) => {
                        let _ = reply.send(session.snapshot());
                    }
                    Some(Request::Shutdown { reply }) => {
                        debug!("IO task shutdown requested");
                        sink.dispatch(session.disconnect());
                        let _ = reply.send(transport);
                        return;
                    }
                    None => {
                        debug!("all request senders dropped, exiting IO task");
                        break;
                    }
                }
            }

            result = transport.receive(&mut buf, config.poll_interval) => {
                match result {
                    Ok(n) if n > 0 => {
                        trace!(len = n, bytes = ?&buf[..n], "received");
                        sink.dispatch(session.receive(&buf[..n]));
                    }
                    Ok(_) | Err(Error::Timeout) => {}
                    Err(Error::TransportUnavailable | Error::ConnectionLost) => {
                        if session.state().is_connected() {
                            warn!("transport lost");
                            sink.dispatch(session.disconnect());
                        }
                        tokio::time::sleep(config.poll_interval).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "transport receive failed");
                        tokio::time::sleep(config.poll_interval).await;
                    }
                }
            }
        }

        sink.dispatch(session.check_discovery_timeout(Instant::now(), config.discovery_timeout));
    }
}

/// Validate, encode and write one command. Its effects are recorded
/// only after the write succeeded.
async fn execute_command(
    transport: &mut dyn Transport,
    session: &mut Session,
    sink: &mut EventSink,
    command: &Command,
) -> Result<()> {
    let bytes = session.encode(command)?;
    write(transport, session, sink, &bytes).await?;
    session.commit(command)
}

/// Send both discovery queries.
async fn start_discovery(
    transport: &mut dyn Transport,
    session: &mut Session,
    sink: &mut EventSink,
) -> Result<()> {
    debug!("starting discovery");
    execute_command(transport, session, sink, &Command::CapabilityQuery).await?;
    execute_command(transport, session, sink, &Command::AnalogMappingQuery).await
}

async fn write(
    transport: &mut dyn Transport,
    session: &mut Session,
    sink: &mut EventSink,
    bytes: &[u8],
) -> Result<()> {
    trace!(bytes = ?bytes, "sending");
    match transport.send(bytes).await {
        Ok(()) => Ok(()),
        Err(e @ (Error::TransportUnavailable | Error::ConnectionLost)) => {
            warn!(error = %e, "send failed, transport lost");
            sink.dispatch(session.disconnect());
            Err(Error::TransportUnavailable)
        }
        Err(e) => Err(e),
    }
}
