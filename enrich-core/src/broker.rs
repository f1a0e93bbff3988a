//! Network bridge onto the local bus.
//!
//! Producers in other processes connect to the broker address and write one
//! JSON frame per line: `{"topic": "...", "payload": {...}}`. Each frame is
//! republished on the local bus.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    bus::{Envelope, EventPublisher, LocalBus},
    error::BusError,
};

/// Longest accepted frame, excluding the newline.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub payload: Value,
}

pub struct BrokerServer {
    listener: TcpListener,
    bus: LocalBus,
}

impl BrokerServer {
    pub async fn bind(address: &str, bus: LocalBus) -> Result<Self, BusError> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!(address, "broker listening");
        Ok(Self { listener, bus })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BusError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to `true`.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = self.listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "broker connection accepted");
                            let bus = self.bus.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(handle_connection(stream, peer, bus, shutdown));
                        }
                        Err(err) => tracing::error!(error = %err, "failed to accept broker connection"),
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("broker shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    bus: LocalBus,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        // Partial reads survive a cancelled select, so the budget counts them.
        let budget = (MAX_FRAME_BYTES + 1).saturating_sub(buf.len()) as u64;
        let mut limited = (&mut reader).take(budget);

        tokio::select! {
            read = limited.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(%peer, "broker connection closed");
                    break;
                }
                Ok(_) => {
                    if !buf.ends_with(b"\n") && buf.len() > MAX_FRAME_BYTES {
                        tracing::warn!(
                            %peer,
                            limit = MAX_FRAME_BYTES,
                            "frame too large, closing connection"
                        );
                        break;
                    }
                    handle_line(&buf, peer, &bus);
                    buf.clear();
                }
                Err(err) => {
                    tracing::warn!(%peer, error = %err, "broker connection read failed");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn handle_line(raw: &[u8], peer: SocketAddr, bus: &LocalBus) {
    let line = raw.trim_ascii();
    if line.is_empty() {
        return;
    }
    match serde_json::from_slice::<Frame>(line) {
        Ok(frame) => {
            tracing::debug!(%peer, topic = %frame.topic, "frame received");
            bus.publish_envelope(Envelope::new(frame.topic, frame.payload));
        }
        Err(err) => tracing::warn!(%peer, error = %err, "skipping malformed frame"),
    }
}

/// Publishes frames to a remote [`BrokerServer`].
#[derive(Debug, Clone)]
pub struct BrokerClient {
    address: String,
}

impl BrokerClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl EventPublisher for BrokerClient {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let frame = Frame {
            topic: topic.to_string(),
            payload,
        };
        let mut line = serde_json::to_vec(&frame).map_err(|source| BusError::Serialization {
            topic: topic.to_string(),
            source,
        })?;
        line.push(b'\n');

        let mut stream = TcpStream::connect(&self.address).await?;
        stream.write_all(&line).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
