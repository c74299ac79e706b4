//! WebSocket client for the collaborative editing service.
//!
//! Architecture:
//! ```text
//! edit capture ──► offer_patch ──► CoalescingQueue
//!                                       │ flush
//!                                       ▼
//!                              RemotePatchManager
//!                                       │ ApplyPatch / await ack
//!                                       ▼
//!                 writer task ◄── mpsc ─┘        reader task
//!                      │                              │
//!                      └────────── WebSocket ─────────┘
//!                                                     │
//!                          RequestManager ◄── acks ───┤
//!                          SessionStore   ◄── updates ┘
//! ```
//!
//! There is no ambient global state: everything a component needs comes
//! through an explicit [`ClientContext`] constructed once per client.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::patch::{FileKey, Patch};
use crate::protocol::{MessageType, ProtocolError, WireMessage};
use crate::queue::{
    ApplyError, CoalescingQueue, FlushEvent, PatchManager, QueueConfig, QueueError,
};
use crate::request::RequestManager;
use crate::session::SessionStore;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Editing service URL
    pub server_url: String,
    /// Deadline for a single apply request round trip
    pub request_timeout: Duration,
    /// Session change-stream capacity per subscriber
    pub session_channel_capacity: usize,
    /// Coalescing queue configuration
    pub queue: QueueConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:9090".to_string(),
            request_timeout: Duration::from_secs(5),
            session_channel_capacity: 64,
            queue: QueueConfig::default(),
        }
    }
}

/// Shared collaborators, passed explicitly to every component that
/// needs them.
#[derive(Clone)]
pub struct ClientContext {
    pub session: Arc<SessionStore>,
    pub requests: Arc<RequestManager>,
}

impl ClientContext {
    pub fn new(session_channel_capacity: usize) -> Self {
        Self {
            session: Arc::new(SessionStore::new(session_channel_capacity)),
            requests: Arc::new(RequestManager::new()),
        }
    }
}

/// Slot for the writer-task channel; empty while disconnected.
type OutgoingSlot = Arc<RwLock<Option<mpsc::Sender<Vec<u8>>>>>;

/// Patch manager backed by the editing service: sends an apply request
/// over the connection and awaits its acknowledgement.
///
/// When disconnected, applies fail with [`ApplyError::ConnectionLost`]
/// and the queue's failure policy decides what happens to the batch.
pub struct RemotePatchManager {
    client_id: Uuid,
    requests: Arc<RequestManager>,
    outgoing: OutgoingSlot,
    request_timeout: Duration,
}

impl PatchManager for RemotePatchManager {
    fn apply_patch(&self, key: FileKey, batch: Vec<Patch>) -> BoxFuture<'_, Result<(), ApplyError>> {
        Box::pin(async move {
            let tx = self
                .outgoing
                .read()
                .await
                .clone()
                .ok_or(ApplyError::ConnectionLost)?;

            let request_id = self.requests.next_request_id();
            let rx = self.requests.register(request_id).await;

            let encoded = WireMessage::apply_patch(self.client_id, request_id, key, &batch)
                .and_then(|msg| msg.encode())
                .map_err(|e| ApplyError::Rejected(e.to_string()))?;

            if tx.send(encoded).await.is_err() {
                self.requests.forget(request_id).await;
                return Err(ApplyError::ConnectionLost);
            }

            match RequestManager::wait(rx, self.request_timeout).await {
                Ok(response) => match response.msg_type {
                    MessageType::ApplyAck => Ok(()),
                    MessageType::ApplyError => {
                        let reason = response
                            .error_reason()
                            .unwrap_or_else(|_| "unrecognized rejection".to_string());
                        Err(ApplyError::Rejected(reason))
                    }
                    other => Err(ApplyError::Rejected(format!(
                        "unexpected response type {other:?}"
                    ))),
                },
                Err(ProtocolError::Timeout) => {
                    self.requests.forget(request_id).await;
                    Err(ApplyError::ConnectionLost)
                }
                Err(_) => Err(ApplyError::ConnectionLost),
            }
        })
    }
}

/// The sync client: connection lifecycle plus the inbound patch API.
pub struct SyncClient {
    client_id: Uuid,
    config: ClientConfig,
    context: ClientContext,
    state: Arc<RwLock<ConnectionState>>,
    outgoing: OutgoingSlot,
    queue: CoalescingQueue,
}

impl SyncClient {
    /// Create a client. The queue and patch manager are wired up front;
    /// applies simply fail until [`connect`](Self::connect) succeeds.
    pub fn new(config: ClientConfig) -> Result<Self, QueueError> {
        let client_id = Uuid::new_v4();
        let context = ClientContext::new(config.session_channel_capacity);
        let outgoing: OutgoingSlot = Arc::new(RwLock::new(None));

        let manager = Arc::new(RemotePatchManager {
            client_id,
            requests: context.requests.clone(),
            outgoing: outgoing.clone(),
            request_timeout: config.request_timeout,
        });
        let queue = CoalescingQueue::new(config.queue.clone(), manager)?;

        Ok(Self {
            client_id,
            config,
            context,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing,
            queue,
        })
    }

    /// Connect to the service and spawn the writer and reader tasks.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.config.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("connect to {} failed: {e}", self.config.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        *self.outgoing.write().await = Some(out_tx);

        // Writer task: forward the outgoing channel to the socket.
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
        });

        *self.state.write().await = ConnectionState::Connected;
        log::info!("connected to {}", self.config.server_url);

        // Reader task: route responses and notifications.
        let context = self.context.clone();
        let state = self.state.clone();
        let outgoing = self.outgoing.clone();
        let client_id = self.client_id;
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match WireMessage::decode(&bytes) {
                            Ok(wire) => {
                                Self::route_incoming(&context, &outgoing, client_id, wire).await;
                            }
                            Err(e) => log::debug!("undecodable frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            *outgoing.write().await = None;
            context.requests.fail_all().await;
            log::warn!("connection closed");
        });

        Ok(())
    }

    async fn route_incoming(
        context: &ClientContext,
        outgoing: &OutgoingSlot,
        client_id: Uuid,
        wire: WireMessage,
    ) {
        match wire.msg_type {
            MessageType::ApplyAck | MessageType::ApplyError => {
                let request_id = wire.request_id;
                context.requests.complete(request_id, wire).await;
            }
            MessageType::SessionUpdate => {
                if let Ok(update) = wire.session_field() {
                    context.session.set(update.field, update.value).await;
                }
            }
            MessageType::Ping => {
                if let Ok(encoded) = WireMessage::pong(client_id).encode() {
                    let tx = outgoing.read().await.clone();
                    if let Some(tx) = tx {
                        let _ = tx.send(encoded).await;
                    }
                }
            }
            _ => {}
        }
    }

    /// Offer a single locally captured patch. Fire-and-forget.
    pub async fn offer_patch(&self, patch: Patch, key: impl Into<FileKey>) {
        self.queue.offer(key, patch).await;
    }

    /// Offer an ordered batch of patches atomically. Fire-and-forget.
    pub async fn offer_patches(&self, patches: Vec<Patch>, key: impl Into<FileKey>) {
        self.queue.offer_all(key, patches).await;
    }

    /// Take the flush-event receiver (can only be called once).
    pub fn take_flush_events(&mut self) -> Option<mpsc::Receiver<FlushEvent>> {
        self.queue.take_event_rx()
    }

    /// Send a heartbeat ping.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        let tx = self
            .outgoing
            .read()
            .await
            .clone()
            .ok_or(ProtocolError::ConnectionClosed)?;
        let encoded = WireMessage::ping(self.client_id).encode()?;
        tx.send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Shared collaborators for this client.
    pub fn context(&self) -> &ClientContext {
        &self.context
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    /// The coalescing queue (diagnostics).
    pub fn queue(&self) -> &CoalescingQueue {
        &self.queue
    }

    /// Drop the connection; pending requests fail immediately.
    pub async fn disconnect(&self) {
        *self.outgoing.write().await = None;
        *self.state.write().await = ConnectionState::Disconnected;
        self.context.requests.fail_all().await;
    }

    /// Force-flush buffered patches, then drop the connection.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.disconnect().await;
    }
}
