//! Correlated JSON-RPC channel over one duplex connection.
//!
//! The channel owns the handler table and the outbound queue of the current
//! connection. Requests carry an `id`; responses echoing that id are routed to
//! the handler registered under it. Ids below [`FIRST_DYNAMIC_ID`] belong to
//! fixed methods (heartbeat probe, status query, G-code, emergency stop) and
//! cannot be registered by callers.
//!
//! Closing the channel abandons every correlation: one-shot receivers observe
//! cancellation and the table is emptied. A reconnecting caller re-registers
//! on the next connection.

use crate::error::{ClientError, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

/// `server.info` liveness probe.
pub const PROBE_ID: u64 = 100;
/// `printer.objects.query` detailed status.
pub const QUERY_ID: u64 = 101;
/// `printer.gcode.script` for motion and machine commands.
pub const GCODE_ID: u64 = 200;
/// `printer.gcode.script` for the camera power pin.
pub const CAMERA_PIN_ID: u64 = 220;
/// `printer.emergency_stop`.
pub const EMERGENCY_STOP_ID: u64 = 999;

/// Ids owned by fixed methods.
pub const RESERVED_IDS: [u64; 5] = [PROBE_ID, QUERY_ID, GCODE_ID, CAMERA_PIN_ID, EMERGENCY_STOP_ID];

/// First id handed out by [`RpcChannel::next_id`].
pub const FIRST_DYNAMIC_ID: u64 = 1000;

/// Callback invoked for every response carrying its id.
pub type PersistentHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Response handler registered under an id.
pub enum Handler {
    /// Invoked for every matching response until unregistered.
    Persistent(PersistentHandler),
    /// Receives the first matching response, then is removed.
    Once(oneshot::Sender<Value>),
}

impl Handler {
    /// Wrap a closure as a persistent handler.
    pub fn persistent(f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        Handler::Persistent(Arc::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Persistent(_) => f.write_str("Handler::Persistent"),
            Handler::Once(_) => f.write_str("Handler::Once"),
        }
    }
}

/// Whether `id` belongs to a fixed method.
#[must_use]
pub fn is_reserved(id: u64) -> bool {
    RESERVED_IDS.contains(&id)
}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    id: u64,
}

struct Inner {
    handlers: Mutex<HashMap<u64, Handler>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

/// Multiplexed request/response channel. Cheap to clone.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<Inner>,
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("open", &self.is_open())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Default for RpcChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcChannel {
    /// Closed channel with an empty handler table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(HashMap::new()),
                outbound: Mutex::new(None),
                next_id: AtomicU64::new(FIRST_DYNAMIC_ID),
            }),
        }
    }

    /// Attach a fresh connection. The returned receiver yields serialized
    /// requests for the transport to write.
    pub fn open(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.outbound.lock().replace(tx).is_some() {
            debug!("Replacing open connection");
        }
        info!("RPC channel open");
        rx
    }

    /// Whether a connection is attached and its writer is alive.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Detach the connection and abandon every pending correlation.
    pub fn close(&self) {
        let had_connection = self.inner.outbound.lock().take().is_some();
        let abandoned: Vec<Handler> = self.inner.handlers.lock().drain().map(|(_, h)| h).collect();
        if had_connection || !abandoned.is_empty() {
            info!(abandoned = abandoned.len(), "RPC channel closed");
        }
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.handlers.lock().len()
    }

    /// Fresh dynamic id, never a reserved one.
    pub fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `handler` under a dynamic `id`, returning the handler it
    /// replaces.
    pub fn register_handler(&self, id: u64, handler: Handler) -> Result<Option<Handler>> {
        if is_reserved(id) {
            return Err(ClientError::ReservedId(id));
        }
        Ok(self.insert(id, handler))
    }

    /// Register under a reserved id. Only fixed-method owners do this.
    pub(crate) fn install_reserved(&self, id: u64, handler: Handler) -> Option<Handler> {
        debug_assert!(is_reserved(id));
        self.insert(id, handler)
    }

    fn insert(&self, id: u64, handler: Handler) -> Option<Handler> {
        let previous = self.inner.handlers.lock().insert(id, handler);
        if previous.is_some() {
            debug!(id, "Replaced handler");
        }
        previous
    }

    /// Remove and return the handler under `id`.
    pub fn unregister_handler(&self, id: u64) -> Option<Handler> {
        self.inner.handlers.lock().remove(&id)
    }

    /// Send under a fresh dynamic id and return it.
    pub fn send(&self, method: &str, params: Option<Value>) -> Result<u64> {
        let id = self.next_id();
        self.send_with_id(id, method, params)?;
        Ok(id)
    }

    /// Send under a caller-chosen id. Never blocks.
    pub fn send_with_id(&self, id: u64, method: &str, params: Option<Value>) -> Result<()> {
        let text = serde_json::to_string(&Request {
            jsonrpc: "2.0",
            method,
            params: params.as_ref(),
            id,
        })?;
        let guard = self.inner.outbound.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| ClientError::NotConnected(format!("cannot send {method}")))?;
        tx.send(text)
            .map_err(|_| ClientError::NotConnected(format!("connection closed before {method}")))?;
        debug!(id, method, "Sent request");
        Ok(())
    }

    /// Send under a fresh id and receive the first matching response.
    ///
    /// The receiver errors if the channel closes before a response arrives.
    pub fn call(&self, method: &str, params: Option<Value>) -> Result<oneshot::Receiver<Value>> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.insert(id, Handler::Once(tx));
        if let Err(err) = self.send_with_id(id, method, params) {
            self.unregister_handler(id);
            return Err(err);
        }
        Ok(rx)
    }

    /// Route one inbound payload.
    ///
    /// Malformed payloads and payloads without an id are logged and dropped;
    /// ids without a handler are dropped silently.
    pub fn on_message(&self, raw: &str) {
        let payload: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "Dropping malformed payload");
                return;
            }
        };

        let Some(id) = payload.get("id").and_then(Value::as_u64) else {
            match payload.get("method").and_then(Value::as_str) {
                Some(method) => trace!(method, "Ignoring notification"),
                None => warn!("Dropping payload without id"),
            }
            return;
        };

        let handler = {
            let mut handlers = self.inner.handlers.lock();
            match handlers.remove(&id) {
                Some(Handler::Persistent(f)) => {
                    handlers.insert(id, Handler::Persistent(Arc::clone(&f)));
                    f
                }
                Some(Handler::Once(tx)) => {
                    drop(handlers);
                    if tx.send(payload).is_err() {
                        trace!(id, "Caller stopped waiting");
                    }
                    return;
                }
                None => {
                    trace!(id, "No handler, dropping");
                    return;
                }
            }
        };

        // Outside the lock so handlers may touch the channel.
        trace!(id, "Dispatching");
        handler(&payload);
    }
}

/// WebSocket to the firmware.
pub type RpcSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why [`run_transport`] returned.
#[derive(Debug)]
pub enum PumpExit {
    /// Cancel was signalled.
    Cancelled,
    /// The peer closed the socket or the stream ended.
    Closed,
    /// The socket failed.
    Failed(ClientError),
}

/// Open the WebSocket.
pub async fn connect(url: &Url) -> Result<RpcSocket> {
    let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
    info!(%url, "Connected to firmware");
    Ok(socket)
}

/// Connect to `url` and serve one connection on `channel`.
///
/// `on_open` runs once the channel is open and before any inbound frame is
/// routed, which is where per-connection handlers belong.
pub async fn run_transport(
    url: &Url,
    channel: &RpcChannel,
    cancel: &mut oneshot::Receiver<()>,
    on_open: impl FnOnce(),
) -> PumpExit {
    let socket = tokio::select! {
        biased;
        _ = &mut *cancel => return PumpExit::Cancelled,
        result = connect(url) => match result {
            Ok(socket) => socket,
            Err(err) => return PumpExit::Failed(err),
        },
    };
    let mut outbound = channel.open();
    on_open();
    let exit = pump_frames(socket, channel, &mut outbound, cancel).await;
    channel.close();
    exit
}

async fn pump_frames(
    socket: RpcSocket,
    channel: &RpcChannel,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    cancel: &mut oneshot::Receiver<()>,
) -> PumpExit {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            biased;
            _ = &mut *cancel => {
                let _ = sink.send(Message::Close(None)).await;
                return PumpExit::Cancelled;
            }
            text = outbound.recv() => match text {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        return PumpExit::Failed(err.into());
                    }
                }
                None => return PumpExit::Closed,
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => channel.on_message(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => channel.on_message(text),
                    Err(_) => warn!(len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong; flushing writes it.
                    if let Err(err) = sink.flush().await {
                        return PumpExit::Failed(err.into());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Firmware closed the socket");
                    return PumpExit::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return PumpExit::Failed(err.into()),
                None => return PumpExit::Closed,
            },
        }
    }
}
