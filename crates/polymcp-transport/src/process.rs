//! Child-process transport: newline-delimited JSON over piped stdio.
//!
//! The connect attempt resolves exactly once on whichever of {pipes
//! acquired, exited-before-ready, spawn error} happens first. After a
//! successful connect a monitor task watches for premature exit; an exit
//! observed later flips the transport to `Failed` and is logged, but never
//! re-resolves the original attempt.

use std::collections::HashMap;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, trace, warn};

use async_trait::async_trait;

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::traits::{Transport, TransportState, TransportType};

// Boxed async I/O so child stdio and raw test streams share one pipeline
type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + Sync + 'static>>;
type BoxedAsyncWrite = Pin<Box<dyn AsyncWrite + Send + Sync + 'static>>;
type LineReader = FramedRead<BufReader<BoxedAsyncRead>, LinesCodec>;
type LineWriter = FramedWrite<BoxedAsyncWrite, LinesCodec>;

/// How long disconnect waits for a killed child to be reaped.
const KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// How often the exit monitor polls the child.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where the transport's streams come from.
enum StreamSource {
    /// Spawn a child process and use its piped stdio
    Spawn {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Use raw streams (already boxed); consumed on first connect
    Raw {
        reader: Option<BoxedAsyncRead>,
        writer: Option<BoxedAsyncWrite>,
    },
}

/// Transport over a locally spawned server process.
pub struct ProcessTransport {
    /// Stream source (tokio mutex - taken during connect)
    source: Arc<TokioMutex<StreamSource>>,

    /// Lifecycle state (std mutex - short-lived locks, never crosses await)
    state: Arc<StdMutex<TransportState>>,

    /// The spawned child, if any (absent for raw-stream transports)
    child: Arc<TokioMutex<Option<Child>>>,

    /// Line writer over the child's stdin (crosses await points)
    writer: Arc<TokioMutex<Option<LineWriter>>>,

    /// Inbound message channel fed by the reader task
    receive_channel: Arc<TokioMutex<Option<mpsc::Receiver<TransportMessage>>>>,

    /// Background reader task handle
    reader_task: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,

    /// Background exit-monitor task handle
    exit_task: Arc<TokioMutex<Option<tokio::task::JoinHandle<()>>>>,

    /// Diagnostic endpoint string
    endpoint: String,
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .finish()
    }
}

impl ProcessTransport {
    /// Create a transport that will spawn `command` with `args` and `env`
    /// on connect, speaking NDJSON over its piped stdin/stdout.
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        let command = command.into();
        let endpoint = if args.is_empty() {
            command.clone()
        } else {
            format!("{} {}", command, args.join(" "))
        };

        Self {
            source: Arc::new(TokioMutex::new(StreamSource::Spawn { command, args, env })),
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            child: Arc::new(TokioMutex::new(None)),
            writer: Arc::new(TokioMutex::new(None)),
            receive_channel: Arc::new(TokioMutex::new(None)),
            reader_task: Arc::new(TokioMutex::new(None)),
            exit_task: Arc::new(TokioMutex::new(None)),
            endpoint,
        }
    }

    /// Create a transport from raw async read/write streams.
    ///
    /// `reader` is what we read server messages from (the peer's stdout);
    /// `writer` is what we write requests to (the peer's stdin). Useful for
    /// embedding and for duplex-stream tests.
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
        W: AsyncWrite + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(TokioMutex::new(StreamSource::Raw {
                reader: Some(Box::pin(reader)),
                writer: Some(Box::pin(writer)),
            })),
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            child: Arc::new(TokioMutex::new(None)),
            writer: Arc::new(TokioMutex::new(None)),
            receive_channel: Arc::new(TokioMutex::new(None)),
            reader_task: Arc::new(TokioMutex::new(None)),
            exit_task: Arc::new(TokioMutex::new(None)),
            endpoint: "raw://".to_string(),
        }
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != new_state {
            trace!("process transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    /// Flip a live transport to `Failed`. Events arriving after teardown
    /// or after an earlier failure are logged only - the first resolution
    /// wins.
    fn mark_failed(state: &Arc<StdMutex<TransportState>>, reason: String) {
        let mut state = state.lock().expect("state mutex poisoned");
        if matches!(*state, TransportState::Connected) {
            warn!("process transport failed: {reason}");
            *state = TransportState::Failed { reason };
        } else {
            debug!("late process transport event ignored ({}): {reason}", *state);
        }
    }

    async fn open_channel(&self) -> TransportResult<()> {
        let mut source = self.source.lock().await;

        let (reader, writer): (BoxedAsyncRead, BoxedAsyncWrite) = match &mut *source {
            StreamSource::Spawn { command, args, env } => {
                let mut child = Command::new(&*command)
                    .args(args.iter())
                    .envs(env.iter())
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|e| {
                        TransportError::ConnectionFailed(format!(
                            "failed to spawn {command}: {e}"
                        ))
                    })?;

                let stdin = child.stdin.take().ok_or_else(|| {
                    TransportError::ConfigurationError(
                        "child process stdin was not piped".to_string(),
                    )
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    TransportError::ConfigurationError(
                        "child process stdout was not piped".to_string(),
                    )
                })?;

                // Exited-before-ready loses the race against readiness
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(TransportError::ConnectionFailed(format!(
                        "process exited before ready: {status}"
                    )));
                }

                *self.child.lock().await = Some(child);
                (Box::pin(stdout), Box::pin(stdin))
            }
            StreamSource::Raw { reader, writer } => {
                let reader = reader.take().ok_or_else(|| {
                    TransportError::ConfigurationError(
                        "raw reader stream already consumed".to_string(),
                    )
                })?;
                let writer = writer.take().ok_or_else(|| {
                    TransportError::ConfigurationError(
                        "raw writer stream already consumed".to_string(),
                    )
                })?;
                (reader, writer)
            }
        };
        drop(source);

        *self.writer.lock().await = Some(FramedWrite::new(writer, LinesCodec::new()));

        let (tx, rx) = mpsc::channel(1024);
        *self.receive_channel.lock().await = Some(rx);

        let mut line_reader: LineReader = FramedRead::new(BufReader::new(reader), LinesCodec::new());
        let state = Arc::clone(&self.state);
        let reader_task = tokio::spawn(async move {
            loop {
                match line_reader.next().await {
                    Some(Ok(line)) => {
                        trace!("process transport received line: {line}");
                        match TransportMessage::from_json_text(&line) {
                            Ok(message) => {
                                if tx.send(message).await.is_err() {
                                    debug!("receive channel closed, stopping reader task");
                                    break;
                                }
                            }
                            Err(e) => error!("failed to parse inbound line: {e}"),
                        }
                    }
                    Some(Err(e)) => {
                        Self::mark_failed(&state, format!("stdout read error: {e}"));
                        break;
                    }
                    None => {
                        Self::mark_failed(&state, "process stdout closed".to_string());
                        break;
                    }
                }
            }
            debug!("process transport reader task completed");
        });
        *self.reader_task.lock().await = Some(reader_task);

        // Exit monitor: a child dying after connect flips state to Failed.
        if self.child.lock().await.is_some() {
            let child_slot = Arc::clone(&self.child);
            let state = Arc::clone(&self.state);
            let exit_task = tokio::spawn(async move {
                loop {
                    {
                        let mut guard = child_slot.lock().await;
                        let Some(child) = guard.as_mut() else { break };
                        match child.try_wait() {
                            Ok(Some(status)) => {
                                Self::mark_failed(&state, format!("process exited: {status}"));
                                *guard = None;
                                break;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!("failed to poll child process: {e}");
                                break;
                            }
                        }
                    }
                    tokio::time::sleep(EXIT_POLL_INTERVAL).await;
                }
            });
            *self.exit_task.lock().await = Some(exit_task);
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Process
    }

    async fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Connected) {
            return Ok(());
        }

        self.set_state(TransportState::Connecting);

        match self.open_channel().await {
            Ok(()) => {
                self.set_state(TransportState::Connected);
                debug!("process transport connected: {}", self.endpoint);
                Ok(())
            }
            Err(e) => {
                self.set_state(TransportState::Failed {
                    reason: e.to_string(),
                });
                error!("failed to connect process transport: {e}");
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state().await, TransportState::Disconnected) {
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);

        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.exit_task.lock().await.take() {
            task.abort();
        }

        // Dropping the writer closes the child's stdin
        *self.writer.lock().await = None;
        *self.receive_channel.lock().await = None;

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                debug!("child already gone on disconnect: {e}");
            }
            match tokio::time::timeout(KILL_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!("child process reaped: {status}"),
                Ok(Err(e)) => warn!("failed to reap child process: {e}"),
                Err(_) => warn!("timed out waiting for child process to exit"),
            }
        }

        self.set_state(TransportState::Disconnected);
        debug!("process transport disconnected");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "Transport not connected: {state}"
            )));
        }

        let line = message.to_json_text()?;
        let size = line.len();

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(TransportError::SendFailed(
                "stdin writer not available".to_string(),
            ));
        };

        if let Err(e) = writer.send(line).await {
            Self::mark_failed(&self.state, format!("stdin write error: {e}"));
            return Err(TransportError::SendFailed(e.to_string()));
        }

        trace!("process transport sent {size} bytes");
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let state = self.state().await;
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "Transport not connected: {state}"
            )));
        }

        let mut receive_channel = self.receive_channel.lock().await;
        let Some(receiver) = receive_channel.as_mut() else {
            return Err(TransportError::ReceiveFailed(
                "receive channel not available".to_string(),
            ));
        };

        match receiver.recv().await {
            Some(message) => {
                trace!("process transport received {} bytes", message.size());
                Ok(Some(message))
            }
            None => {
                Self::mark_failed(&self.state, "receive channel disconnected".to_string());
                Err(TransportError::ReceiveFailed(
                    "channel disconnected".to_string(),
                ))
            }
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use polymcp_protocol::MessageId;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};

    async fn wait_for_state<F>(transport: &ProcessTransport, predicate: F)
    where
        F: Fn(&TransportState) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if predicate(&transport.state().await) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "state never matched, last: {}",
                transport.state().await
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    #[tokio::test]
    async fn from_raw_echo_round_trip() {
        let (peer_writer, transport_reader) = tokio::io::duplex(4096);
        let (transport_writer, peer_reader) = tokio::io::duplex(4096);

        // Echo peer: reads lines the transport writes, sends them back
        tokio::spawn(async move {
            let mut lines = TokioBufReader::new(peer_reader).lines();
            let mut writer = peer_writer;
            while let Ok(Some(line)) = lines.next_line().await {
                writer.write_all(line.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
        });

        let transport = ProcessTransport::from_raw(transport_reader, transport_writer);
        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);

        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        transport
            .send(TransportMessage::new(1i64, Bytes::from(raw)))
            .await
            .unwrap();

        let echoed = transport.receive().await.unwrap().unwrap();
        assert_eq!(echoed.id, MessageId::Number(1));
        assert_eq!(echoed.payload, Bytes::from(raw));

        transport.disconnect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }

    #[tokio::test]
    async fn spawn_failure_resolves_once_with_error() {
        let transport = ProcessTransport::new(
            "definitely-not-a-real-binary-xyz",
            Vec::new(),
            HashMap::new(),
        );
        let result = transport.connect().await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(matches!(
            transport.state().await,
            TransportState::Failed { .. }
        ));

        // Teardown after a failed connect is a safe no-op
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }

    #[tokio::test]
    async fn cat_round_trip() {
        let transport = ProcessTransport::new("cat", Vec::new(), HashMap::new());
        transport.connect().await.unwrap();

        let raw = r#"{"jsonrpc":"2.0","id":"req-1","method":"ping"}"#;
        transport
            .send(TransportMessage::new("req-1", Bytes::from(raw)))
            .await
            .unwrap();

        let echoed = transport.receive().await.unwrap().unwrap();
        assert_eq!(echoed.id, MessageId::from("req-1"));

        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn premature_exit_flips_state_to_failed() {
        let transport = ProcessTransport::new(
            "sh",
            vec!["-c".to_string(), "exit 0".to_string()],
            HashMap::new(),
        );

        // The child may lose the race before or after connect resolves;
        // either way exactly one failure is recorded.
        match transport.connect().await {
            Err(TransportError::ConnectionFailed(reason)) => {
                assert!(reason.contains("exited"));
            }
            Ok(()) => {
                wait_for_state(&transport, |s| matches!(s, TransportState::Failed { .. })).await;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }

        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn double_disconnect_is_a_noop() {
        let transport = ProcessTransport::new("cat", Vec::new(), HashMap::new());
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let transport = ProcessTransport::new("cat", Vec::new(), HashMap::new());
        let result = transport
            .send(TransportMessage::new(1i64, Bytes::from("{}")))
            .await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }
}
