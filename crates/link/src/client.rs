//! Ephys Link client over Socket.IO long-polling.

use async_trait::async_trait;
use jackhammer_core::{JackhammerParameters, ManipulatorId, Position};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::engineio::{self, Handshake, Packet, ProtocolError, SocketPacket};
use crate::gateway::{Gateway, GatewayError, JackhammerResponse, Result};

/// Request body of the `jackhammer` event.
#[derive(Debug, Serialize)]
struct JackhammerRequest<'a> {
    manipulator_id: &'a str,
    #[serde(flatten)]
    params: &'a JackhammerParameters,
}

/// Reply to `jackhammer` and `get_position`.
#[derive(Debug, Default, Deserialize)]
struct PositionReply {
    #[serde(rename = "Position", default)]
    position: Option<Position>,
    #[serde(rename = "Error", default)]
    error: String,
}

/// Parse a reply that Ephys Link sends as a JSON-encoded string.
fn parse_reply<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T> {
    match value {
        Value::String(text) => Ok(serde_json::from_str(&text)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

/// Turn a position reply into a position or a typed error.
fn position_from_reply(id: &ManipulatorId, reply: PositionReply) -> Result<Position> {
    if !reply.error.is_empty() {
        return Err(GatewayError::from_remote(id, reply.error));
    }
    reply.position.ok_or_else(|| {
        ProtocolError::Unexpected {
            expected: "a position",
            got: "reply without Position".to_string(),
        }
        .into()
    })
}

/// Turn a `stop` reply into success or a typed error.
///
/// Ephys Link answers with an empty string, or an error message either as
/// plain text or wrapped in `{"Error": ...}`.
fn stop_from_reply(id: &ManipulatorId, value: Value) -> Result<()> {
    let message = match value {
        Value::Null => String::new(),
        Value::String(text) => match serde_json::from_str::<PositionReply>(&text) {
            Ok(reply) => reply.error,
            Err(_) => text,
        },
        other => serde_json::from_value::<PositionReply>(other)
            .map(|r| r.error)
            .unwrap_or_default(),
    };

    if message.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::from_remote(id, message))
    }
}

fn connection_error(context: &str, err: reqwest::Error) -> GatewayError {
    GatewayError::Connection(format!("{}: {}", context, err))
}

struct Inner {
    http: Client,
    url: String,
    config: LinkConfig,
    poll_timeout: Duration,
    next_ack: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    connected: AtomicBool,
}

impl Inner {
    async fn post(&self, body: String) -> Result<()> {
        debug!("-> {}", body);
        self.http
            .post(&self.url)
            .header("Content-Type", "text/plain;charset=UTF-8")
            .timeout(self.config.call_timeout)
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.config.call_timeout)
                } else {
                    connection_error("send failed", e)
                }
            })?;
        Ok(())
    }

    async fn poll(&self) -> Result<Vec<Packet>> {
        let body = self
            .http
            .get(&self.url)
            .timeout(self.poll_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| connection_error("poll failed", e))?
            .text()
            .await
            .map_err(|e| connection_error("poll failed", e))?;
        debug!("<- {}", body);

        let packets = engineio::split_payload(&body)
            .filter_map(|raw| match engineio::decode_packet(raw) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    debug!("Skipping packet: {}", e);
                    None
                }
            })
            .collect();
        Ok(packets)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the connection dead and wake every waiting call.
    fn shut_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the senders resolves the waiters with an error.
        self.pending().clear();
    }

    async fn call(&self, event: &str, args: &[Value]) -> Result<Value> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(GatewayError::Connection("not connected to server".to_string()));
        }

        let ack_id = self.next_ack.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(ack_id, tx);
        let _slot = AckSlot { inner: self, ack_id };

        let exchange = async {
            self.post(engineio::encode_event(ack_id, event, args)).await?;
            rx.await.map_err(|_| {
                GatewayError::Connection("connection closed while waiting for reply".to_string())
            })
        };

        let result = match tokio::time::timeout(self.config.call_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.config.call_timeout)),
        };
        if let Err(GatewayError::Timeout(limit)) = &result {
            warn!("{} call timed out after {:?}", event, limit);
        }
        result.map(engineio::first_arg)
    }
}

/// Frees a call's ack slot when the call ends, including when its future
/// is dropped before the reply arrives.
struct AckSlot<'a> {
    inner: &'a Inner,
    ack_id: u64,
}

impl Drop for AckSlot<'_> {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.ack_id);
    }
}

/// Reads packets until the session ends, answering pings and routing acks.
async fn poll_loop(inner: Arc<Inner>) {
    while inner.connected.load(Ordering::SeqCst) {
        let packets = match inner.poll().await {
            Ok(packets) => packets,
            Err(e) => {
                warn!("Ephys Link connection lost: {}", e);
                break;
            }
        };

        for packet in packets {
            match packet {
                Packet::Ping => {
                    if let Err(e) = inner.post(engineio::PONG.to_string()).await {
                        warn!("Failed to answer ping: {}", e);
                    }
                }
                Packet::Message(SocketPacket::Ack { ack_id, data }) => {
                    let waiter = inner.pending().remove(&ack_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(data);
                        }
                        None => debug!("Dropping late ack {}", ack_id),
                    }
                }
                Packet::Close | Packet::Message(SocketPacket::Disconnect) => {
                    info!("Ephys Link closed the session");
                    inner.shut_down();
                    return;
                }
                other => debug!("Ignoring packet {:?}", other),
            }
        }
    }
    inner.shut_down();
}

/// Connected Ephys Link client.
///
/// One background task per connection long-polls the server, so several
/// calls can be outstanding at once (a `stop` while a `jackhammer` call is
/// still running, for instance).
pub struct EphysLinkClient {
    inner: Arc<Inner>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl EphysLinkClient {
    /// Connect to an Ephys Link server.
    pub async fn connect(config: &LinkConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        info!("Connecting to {}", endpoint);

        let http = ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| connection_error("could not build HTTP client", e))?;

        let handshake = tokio::time::timeout(config.connect_timeout, Self::handshake(&http, &endpoint))
            .await
            .map_err(|_| GatewayError::Connection(format!("could not connect to {}: handshake timed out", endpoint)))??;

        let inner = Arc::new(Inner {
            http,
            url: format!("{}?EIO=4&transport=polling&sid={}", endpoint, handshake.sid),
            config: config.clone(),
            poll_timeout: Duration::from_millis(handshake.ping_interval + handshake.ping_timeout),
            next_ack: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
        });

        tokio::time::timeout(config.connect_timeout, Self::join_namespace(&inner))
            .await
            .map_err(|_| GatewayError::Connection(format!("could not connect to {}: namespace connect timed out", endpoint)))??;

        inner.connected.store(true, Ordering::SeqCst);
        let poller = tokio::spawn(poll_loop(Arc::clone(&inner)));
        info!("Connected to Ephys Link (sid {})", handshake.sid);

        Ok(Self {
            inner,
            poller: Mutex::new(Some(poller)),
        })
    }

    async fn handshake(http: &Client, endpoint: &str) -> Result<Handshake> {
        let body = http
            .get(format!("{}?EIO=4&transport=polling", endpoint))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| connection_error(&format!("could not connect to {}", endpoint), e))?
            .text()
            .await
            .map_err(|e| connection_error("handshake failed", e))?;

        match engineio::decode_payload(&body)?.into_iter().next() {
            Some(Packet::Open(handshake)) => Ok(handshake),
            other => Err(ProtocolError::Unexpected {
                expected: "open packet",
                got: format!("{:?}", other),
            }
            .into()),
        }
    }

    async fn join_namespace(inner: &Inner) -> Result<()> {
        inner.post(engineio::CONNECT.to_string()).await?;
        loop {
            for packet in inner.poll().await? {
                match packet {
                    Packet::Message(SocketPacket::Connect(_)) => return Ok(()),
                    Packet::Message(SocketPacket::ConnectError(data)) => {
                        return Err(GatewayError::Connection(format!("namespace refused: {}", data)));
                    }
                    Packet::Ping => inner.post(engineio::PONG.to_string()).await?,
                    Packet::Close => {
                        return Err(GatewayError::Connection("server closed the session".to_string()));
                    }
                    _ => {}
                }
            }
        }
    }

    /// Whether the session is still alive.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Close the session. Safe to call more than once.
    pub async fn disconnect(&self) {
        let was_connected = self.inner.connected.swap(false, Ordering::SeqCst);
        let poller = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(poller) = poller {
            poller.abort();
        }
        self.inner.shut_down();

        if was_connected {
            if let Err(e) = self.inner.post(engineio::CLOSE.to_string()).await {
                debug!("Close packet not delivered: {}", e);
            }
            info!("Disconnected from Ephys Link");
        }
    }
}

impl Drop for EphysLinkClient {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take() {
            poller.abort();
        }
    }
}

#[async_trait]
impl Gateway for EphysLinkClient {
    async fn run_jackhammer(
        &self,
        id: &ManipulatorId,
        params: &JackhammerParameters,
    ) -> Result<JackhammerResponse> {
        let request = serde_json::to_string(&JackhammerRequest {
            manipulator_id: id.as_str(),
            params,
        })?;

        let started = Instant::now();
        let reply = self.inner.call("jackhammer", &[Value::String(request)]).await?;
        let elapsed = started.elapsed();

        let position = position_from_reply(id, parse_reply(reply)?)?;
        debug!("Jackhammer on {} finished in {:?} at {}", id, elapsed, position);
        Ok(JackhammerResponse { position, elapsed })
    }

    async fn get_position(&self, id: &ManipulatorId) -> Result<Position> {
        let reply = self
            .inner
            .call("get_position", &[Value::String(id.to_string())])
            .await?;
        position_from_reply(id, parse_reply(reply)?)
    }

    async fn stop(&self, id: &ManipulatorId) -> Result<()> {
        let reply = self.inner.call("stop", &[Value::String(id.to_string())]).await?;
        stop_from_reply(id, reply)
    }
}
