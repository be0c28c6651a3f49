//! Socket.IO (v5) over Engine.IO (v4) HTTP long-polling.
//!
//! Only what a receive-mostly client needs: the handshake, namespace connect,
//! event packets and ping/pong. Binary packets are not supported.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::debug::Scope;
use crate::debug_log;
use crate::errors::StorefrontError;
use crate::structs::reconciler::{PushConnection, PushEvent, PushTransport};

/// Separator between packets in one polling payload.
const RECORD_SEPARATOR: char = '\u{1e}';

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO packet carried in an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Value),
    Disconnect,
    Event { name: String, data: Value },
    Ack,
    ConnectError(Value),
}

/// Body of the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

fn malformed(what: &str, raw: &str) -> StorefrontError {
    StorefrontError::Network(format!("malformed {} packet: {:?}", what, raw))
}

/// Split a polling payload into packets.
pub fn decode_payload(payload: &str) -> Result<Vec<Packet>, StorefrontError> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|raw| !raw.is_empty())
        .map(decode_packet)
        .collect()
}

pub fn decode_packet(raw: &str) -> Result<Packet, StorefrontError> {
    let mut chars = raw.chars();
    let kind = chars.next().ok_or_else(|| malformed("empty", raw))?;
    let rest = chars.as_str();

    Ok(match kind {
        '0' => Packet::Open(serde_json::from_str(rest).map_err(|_| malformed("open", raw))?),
        '1' => Packet::Close,
        '2' => Packet::Ping,
        '3' => Packet::Pong,
        '4' => Packet::Message(decode_socket_packet(rest)?),
        '5' => Packet::Upgrade,
        '6' => Packet::Noop,
        _ => return Err(malformed("engine.io", raw)),
    })
}

fn decode_socket_packet(raw: &str) -> Result<SocketPacket, StorefrontError> {
    let mut chars = raw.chars();
    let kind = chars.next().ok_or_else(|| malformed("socket.io", raw))?;
    let mut rest = chars.as_str();

    // Optional namespace: "/admin,"
    if rest.starts_with('/') {
        rest = rest.split_once(',').map(|(_, tail)| tail).unwrap_or("");
    }
    // Optional ack id.
    rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());

    let data = if rest.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(rest).map_err(|_| malformed("socket.io", raw))?
    };

    Ok(match kind {
        '0' => SocketPacket::Connect(data),
        '1' => SocketPacket::Disconnect,
        '2' => match data {
            Value::Array(mut items) if !items.is_empty() => {
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(malformed("event", raw)),
                };
                SocketPacket::Event {
                    name,
                    data: items.into_iter().next().unwrap_or(Value::Null),
                }
            }
            _ => return Err(malformed("event", raw)),
        },
        '3' => SocketPacket::Ack,
        '4' => SocketPacket::ConnectError(data),
        _ => return Err(malformed("socket.io", raw)),
    })
}

/// Encode a packet for sending. Only the client-side packets are needed.
pub fn encode_packet(packet: &Packet) -> String {
    match packet {
        Packet::Close => "1".to_string(),
        Packet::Ping => "2".to_string(),
        Packet::Pong => "3".to_string(),
        Packet::Upgrade => "5".to_string(),
        Packet::Noop => "6".to_string(),
        Packet::Open(_) => "0".to_string(),
        Packet::Message(SocketPacket::Connect(auth)) if auth.is_null() => "40".to_string(),
        Packet::Message(SocketPacket::Connect(auth)) => format!("40{}", auth),
        Packet::Message(SocketPacket::Disconnect) => "41".to_string(),
        Packet::Message(SocketPacket::Event { name, data }) => format!("42{}", json!([name, data])),
        Packet::Message(SocketPacket::Ack) => "43[]".to_string(),
        Packet::Message(SocketPacket::ConnectError(data)) => format!("44{}", data),
    }
}

/// Push transport speaking Socket.IO over HTTP long-polling.
#[derive(Debug, Clone)]
pub struct PollingTransport {
    http: reqwest::Client,
    endpoint: String,
    debug: bool,
}

impl PollingTransport {
    /// `socket_url` is the server origin, e.g. `http://localhost:5000`.
    pub fn new(http: reqwest::Client, socket_url: &str, debug: bool) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/socket.io/?EIO=4&transport=polling",
                socket_url.trim_end_matches('/')
            ),
            debug,
        }
    }
}

#[async_trait]
impl PushTransport for PollingTransport {
    async fn connect(&self, token: &str) -> Result<Box<dyn PushConnection>, StorefrontError> {
        let body = self
            .http
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let mut packets: VecDeque<Packet> = decode_payload(&body)?.into();
        let handshake = match packets.pop_front() {
            Some(Packet::Open(handshake)) => handshake,
            _ => return Err(malformed("handshake", &body)),
        };

        debug_log!(self.debug, Scope::Live, "Engine.IO session {} opened.", handshake.sid);

        let mut connection = PollingConnection {
            http: self.http.clone(),
            url: format!("{}&sid={}", self.endpoint, handshake.sid),
            poll_timeout: Duration::from_millis(handshake.ping_interval + handshake.ping_timeout)
                .max(Duration::from_secs(30)),
            queue: packets,
            debug: self.debug,
        };
        connection
            .post(&Packet::Message(SocketPacket::Connect(json!({ "token": token }))))
            .await?;

        Ok(Box::new(connection))
    }
}

struct PollingConnection {
    http: reqwest::Client,
    url: String,
    poll_timeout: Duration,
    queue: VecDeque<Packet>,
    debug: bool,
}

impl PollingConnection {
    async fn post(&self, packet: &Packet) -> Result<(), StorefrontError> {
        self.http
            .post(&self.url)
            .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(encode_packet(packet))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn poll(&mut self) -> Result<(), StorefrontError> {
        let body = self
            .http
            .get(&self.url)
            .timeout(self.poll_timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.queue.extend(decode_payload(&body)?);
        Ok(())
    }
}

#[async_trait]
impl PushConnection for PollingConnection {
    async fn next_event(&mut self) -> Result<PushEvent, StorefrontError> {
        loop {
            let packet = match self.queue.pop_front() {
                Some(packet) => packet,
                None => {
                    self.poll().await?;
                    continue;
                }
            };

            match packet {
                Packet::Ping => self.post(&Packet::Pong).await?,
                Packet::Message(SocketPacket::Event { name, data }) => {
                    return Ok(PushEvent::from_wire(&name, data))
                }
                Packet::Message(SocketPacket::ConnectError(data)) => {
                    return Err(StorefrontError::Network(format!("connect_error: {}", data)))
                }
                Packet::Close | Packet::Message(SocketPacket::Disconnect) => {
                    return Err(StorefrontError::Network("server closed the channel".to_string()))
                }
                Packet::Message(SocketPacket::Connect(_)) => {
                    debug_log!(self.debug, Scope::Live, "Namespace connected.");
                }
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.post(&Packet::Close).await;
    }
}
