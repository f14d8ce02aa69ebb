//! Authenticated command channel to the broker.
//!
//! A [`Connection`] owns one [`Transport`]. After the handshake a
//! dispatcher task reads broker frames: replies complete the matching
//! pending request, pushes go to the registered [`PushHandler`].

mod heartbeat;
mod state;
mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use skiff_proto::{BrokerFrame, ClientFrame, Command, Push, RequestId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{LocationError, Result};
use crate::keys::KeyPair;

pub use heartbeat::{start_heartbeat_task, HeartbeatHandle, DEFAULT_HEARTBEAT_INTERVAL};
pub use state::ConnectionState;
use state::StateCell;
pub use transport::{BrokerSide, Transport};

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

type ReplySender = oneshot::Sender<std::result::Result<Value, String>>;

/// Receives pushes from the broker, in arrival order.
pub trait PushHandler: Send + Sync {
    /// Handle one push.
    fn handle(&self, push: Push);
}

#[derive(Default)]
struct HandlerSlot {
    handler: Option<Arc<dyn PushHandler>>,
    early: Vec<Push>,
}

struct Inner {
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientFrame>>>,
    pending: Mutex<HashMap<RequestId, ReplySender>>,
    next_id: AtomicU64,
    state: StateCell,
    slot: Mutex<HandlerSlot>,
    session: String,
}

/// A live, authenticated broker connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.inner.session)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Dial `url` and authenticate as the owner of `keys`.
    pub async fn connect(
        url: &str,
        location: &str,
        keys: &KeyPair,
        timeout: Duration,
    ) -> Result<Self> {
        let transport = tokio::time::timeout(timeout, Transport::websocket(url))
            .await
            .map_err(|_| LocationError::Connection(format!("timed out connecting to {url}")))??;
        Self::establish(transport, location, keys, timeout).await
    }

    /// Run the handshake over an open transport and start dispatching.
    pub async fn establish(
        mut transport: Transport,
        location: &str,
        keys: &KeyPair,
        timeout: Duration,
    ) -> Result<Self> {
        let session = tokio::time::timeout(timeout, handshake(&mut transport, location, keys))
            .await
            .map_err(|_| {
                LocationError::Connection(format!("handshake timed out after {timeout:?}"))
            })??;
        info!(location, session = %session, "broker session established");

        let Transport { outgoing, incoming } = transport;
        let inner = Arc::new(Inner {
            outgoing: Mutex::new(Some(outgoing)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            state: StateCell::ready(),
            slot: Mutex::new(HandlerSlot::default()),
            session,
        });
        tokio::spawn(dispatch(Arc::clone(&inner), incoming));
        Ok(Self { inner })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    /// Session identifier assigned by the broker.
    #[must_use]
    pub fn session(&self) -> &str {
        &self.inner.session
    }

    /// Route pushes to `handler`. Pushes received before registration are
    /// replayed first.
    pub fn register_commands(&self, handler: Arc<dyn PushHandler>) {
        let mut slot = self.inner.slot.lock();
        for push in std::mem::take(&mut slot.early) {
            handler.handle(push);
        }
        slot.handler = Some(handler);
    }

    /// Send a command without waiting for a reply.
    pub fn send_cmd(&self, command: Command) -> Result<()> {
        debug!(command = command.name(), "send");
        self.send_frame(ClientFrame::command(command))
    }

    /// Send a command and wait for its reply, decoded as `R`.
    ///
    /// A reply without a result decodes from `null`.
    pub async fn send_blocking_cmd<R: DeserializeOwned>(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<R> {
        let name = command.name();
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id, tx);

        debug!(command = name, id, "send blocking");
        if let Err(e) = self.send_frame(ClientFrame::request(id, command)) {
            self.inner.pending.lock().remove(&id);
            return Err(e);
        }

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(LocationError::ConnectionClosed),
            Err(_) => {
                self.inner.pending.lock().remove(&id);
                return Err(LocationError::Timeout {
                    command: name,
                    timeout,
                });
            }
        };
        let value = outcome.map_err(|message| LocationError::Broker {
            command: name,
            message,
        })?;
        serde_json::from_value(value)
            .map_err(|e| LocationError::Protocol(format!("bad reply to {name}: {e}")))
    }

    /// Send a command and wait for an acknowledgement, ignoring its payload.
    pub async fn send_acked(&self, command: Command, timeout: Duration) -> Result<()> {
        let _: IgnoredAny = self.send_blocking_cmd(command, timeout).await?;
        Ok(())
    }

    /// Number of blocking commands still waiting for a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Close the connection. Pending requests fail with
    /// [`LocationError::ConnectionClosed`].
    pub fn disconnect(&self) {
        self.inner.close(ConnectionState::Disconnected);
    }

    fn send_frame(&self, frame: ClientFrame) -> Result<()> {
        let tx = self
            .inner
            .outgoing
            .lock()
            .clone()
            .ok_or(LocationError::ConnectionClosed)?;
        tx.send(frame).map_err(|_| LocationError::ConnectionClosed)
    }
}

impl Inner {
    fn close(&self, end: ConnectionState) {
        if self.state.finish(end) {
            debug!(state = ?end, "connection ended");
        }
        self.outgoing.lock().take();
        self.pending.lock().clear();
    }

    fn deliver(&self, push: Push) {
        let mut slot = self.slot.lock();
        match slot.handler.clone() {
            Some(handler) => handler.handle(push),
            None => slot.early.push(push),
        }
    }
}

async fn handshake(transport: &mut Transport, location: &str, keys: &KeyPair) -> Result<String> {
    transport
        .outgoing
        .send(ClientFrame::Hello {
            location: location.to_string(),
            public_key: keys.public_base64(),
        })
        .map_err(|_| LocationError::ConnectionClosed)?;

    let nonce = match transport.incoming.recv().await {
        Some(BrokerFrame::Challenge { nonce }) => nonce,
        Some(BrokerFrame::Rejected { reason }) => return Err(LocationError::Rejected(reason)),
        Some(other) => {
            return Err(LocationError::Protocol(format!(
                "expected challenge, got {other:?}"
            )));
        }
        None => return Err(LocationError::ConnectionClosed),
    };
    let nonce = B64
        .decode(&nonce)
        .map_err(|e| LocationError::Protocol(format!("challenge nonce: {e}")))?;
    let signature = B64.encode(keys.sign(&nonce).to_bytes());
    transport
        .outgoing
        .send(ClientFrame::Proof { signature })
        .map_err(|_| LocationError::ConnectionClosed)?;

    match transport.incoming.recv().await {
        Some(BrokerFrame::Welcome { session }) => Ok(session),
        Some(BrokerFrame::Rejected { reason }) => Err(LocationError::Rejected(reason)),
        Some(other) => Err(LocationError::Protocol(format!(
            "expected welcome, got {other:?}"
        ))),
        None => Err(LocationError::ConnectionClosed),
    }
}

async fn dispatch(inner: Arc<Inner>, mut incoming: mpsc::UnboundedReceiver<BrokerFrame>) {
    while let Some(frame) = incoming.recv().await {
        match frame {
            BrokerFrame::Reply { id, result, error } => {
                let Some(tx) = inner.pending.lock().remove(&id) else {
                    debug!(id, "reply for a request nobody waits on");
                    continue;
                };
                let outcome = match error {
                    Some(message) => Err(message),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            }
            BrokerFrame::Push { event } => inner.deliver(event),
            other => warn!(frame = ?other, "unexpected frame after handshake"),
        }
    }
    info!("broker connection closed");
    inner.close(ConnectionState::Lost);
}
