//! JSON-RPC request/response correlation over a transport.
//!
//! Exactly one background route task consumes `Transport::receive` per
//! channel; callers register a oneshot reply slot keyed by request id
//! BEFORE sending, and the route task delivers each inbound response to its
//! slot. Responses with unknown ids (and server notifications) are logged
//! and dropped. Channel shutdown fails every pending slot, so no caller
//! waits on a dead connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use polymcp_protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageId};
use polymcp_transport::{Transport, TransportMessage};
use tokio::sync::{Mutex as TokioMutex, oneshot};
use tracing::{debug, trace, warn};

use crate::error::{ClientError, ClientResult};

/// Default deadline for a single request round trip.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<DashMap<String, oneshot::Sender<JsonRpcResponse>>>;

/// Correlates JSON-RPC requests with their responses over one transport.
pub(crate) struct RpcChannel {
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    route_task: TokioMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RpcChannel {
    pub(crate) fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            transport,
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            request_timeout,
            route_task: TokioMutex::new(None),
        }
    }

    /// Start the background route task. Idempotent: a live task is left
    /// alone (its pending requests stay valid); a finished one is replaced.
    pub(crate) async fn start(&self) {
        let mut slot = self.route_task.lock().await;
        if let Some(task) = slot.as_ref() {
            if !task.is_finished() {
                return;
            }
        }

        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        *slot = Some(tokio::spawn(async move {
            loop {
                match transport.receive().await {
                    Ok(Some(message)) => Self::route(&pending, &message),
                    Ok(None) => {
                        debug!("transport receive stream ended");
                        break;
                    }
                    Err(e) => {
                        debug!("rpc route task stopping: {e}");
                        break;
                    }
                }
            }
            // Dropping the reply slots fails every pending request
            pending.clear();
        }));
    }

    /// Stop routing and fail all pending requests.
    pub(crate) async fn stop(&self) {
        if let Some(task) = self.route_task.lock().await.take() {
            task.abort();
        }
        self.pending.clear();
    }

    fn route(pending: &PendingMap, message: &TransportMessage) {
        let text = match std::str::from_utf8(&message.payload) {
            Ok(text) => text,
            Err(e) => {
                warn!("dropping non-UTF-8 frame: {e}");
                return;
            }
        };

        match serde_json::from_str::<JsonRpcResponse>(text) {
            Ok(response) => {
                let key = response.id.to_string();
                if let Some((_, reply)) = pending.remove(&key) {
                    if reply.send(response).is_err() {
                        trace!("caller for request {key} went away before the response");
                    }
                } else {
                    debug!("dropping response with unknown id {key}");
                }
            }
            // Not a response: a server notification or request, out of
            // scope for this runtime
            Err(_) => trace!("ignoring non-response frame: {text}"),
        }
    }

    /// Send a request and await its typed response.
    pub(crate) async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> ClientResult<R> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request_id = MessageId::from(id.to_string());
        let key = request_id.to_string();

        let request = JsonRpcRequest::new(request_id.clone(), method, params);
        let payload = serde_json::to_vec(&request)?;

        // Register the reply slot before the request can hit the wire
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(key.clone(), reply_tx);

        if let Err(e) = self
            .transport
            .send(TransportMessage::new(request_id, Bytes::from(payload)))
            .await
        {
            self.pending.remove(&key);
            return Err(e.into());
        }

        let response = match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ClientError::Connection(
                    "connection closed before response".to_string(),
                ));
            }
            Err(_) => {
                self.pending.remove(&key);
                return Err(ClientError::Timeout(format!(
                    "{method} timed out after {:?}",
                    self.request_timeout
                )));
            }
        };

        if let Some(error) = response.error() {
            return Err(ClientError::Protocol(format!(
                "{method} failed: {} (code {})",
                error.message, error.code
            )));
        }

        let result = response
            .result()
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
        serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("malformed {method} result: {e}")))
    }

    /// Send a fire-and-forget notification.
    pub(crate) async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> ClientResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        let payload = serde_json::to_vec(&notification)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.transport
            .send(TransportMessage::new(
                MessageId::from(format!("notify-{id}")),
                Bytes::from(payload),
            ))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("endpoint", &self.transport.endpoint())
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymcp_protocol::EmptyResult;
    use polymcp_transport::ProcessTransport;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Spawn a scripted peer over duplex streams and return a started
    /// channel talking to it. The peer calls `respond` for every request
    /// line and writes whatever lines it returns.
    async fn scripted_channel<F>(respond: F) -> RpcChannel
    where
        F: Fn(serde_json::Value) -> Vec<String> + Send + 'static,
    {
        let (peer_writer, transport_reader) = tokio::io::duplex(4096);
        let (transport_writer, peer_reader) = tokio::io::duplex(4096);

        tokio::spawn(async move {
            let mut lines = BufReader::new(peer_reader).lines();
            let mut writer = peer_writer;
            while let Ok(Some(line)) = lines.next_line().await {
                let request: serde_json::Value = serde_json::from_str(&line).unwrap();
                for out in respond(request) {
                    writer.write_all(out.as_bytes()).await.unwrap();
                    writer.write_all(b"\n").await.unwrap();
                }
            }
        });

        let transport = ProcessTransport::from_raw(transport_reader, transport_writer);
        transport.connect().await.unwrap();

        let channel = RpcChannel::new(Arc::new(transport), Duration::from_millis(500));
        channel.start().await;
        channel
    }

    #[tokio::test]
    async fn request_resolves_with_matching_response() {
        let channel = scripted_channel(|request| {
            let id = request["id"].clone();
            vec![format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{}}}}"#)]
        })
        .await;

        let result: EmptyResult = channel.request("ping", None).await.unwrap();
        let _ = result;
    }

    #[tokio::test]
    async fn unknown_id_responses_are_dropped() {
        let channel = scripted_channel(|request| {
            let id = request["id"].clone();
            vec![
                r#"{"jsonrpc":"2.0","id":"bogus","result":{"who":"nobody"}}"#.to_string(),
                format!(r#"{{"jsonrpc":"2.0","id":{id},"result":{{}}}}"#),
            ]
        })
        .await;

        // The stray response must not disturb the real one
        let result: ClientResult<EmptyResult> = channel.request("ping", None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn remote_error_surfaces_as_protocol_error() {
        let channel = scripted_channel(|request| {
            let id = request["id"].clone();
            vec![format!(
                r#"{{"jsonrpc":"2.0","id":{id},"error":{{"code":-32601,"message":"no such method"}}}}"#
            )]
        })
        .await;

        let result: ClientResult<EmptyResult> = channel.request("nope", None).await;
        match result {
            Err(ClientError::Protocol(message)) => assert!(message.contains("no such method")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let channel = scripted_channel(|_| Vec::new()).await;

        let result: ClientResult<EmptyResult> = channel.request("ping", None).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert_eq!(channel.pending.len(), 0, "timed-out slot must be removed");
    }

    #[tokio::test]
    async fn stop_fails_pending_requests() {
        let channel = Arc::new(scripted_channel(|_| Vec::new()).await);

        let pending = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel.request::<EmptyResult>("ping", None).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        channel.stop().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}
