//! Transport gateway - line-framed TCP listener for game servers.
//!
//! Each connected game server speaks newline-delimited frames in the
//! configured wire format: inbound lines decode to [`MessageIn`] and feed
//! the ingress channel; outbound frames fan out to every live peer. Socket
//! configuration beyond the listen address is out of scope here.

use crate::message::{MessageIn, WireFormat};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
}

/// Where the egress worker writes encoded frames.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn deliver(&self, frame: String) -> Result<(), TransportError>;
}

/// Per-peer writer channel depth before a peer is considered stalled.
const PEER_WRITE_DEPTH: usize = 256;

/// The gateway accepts game-server connections and bridges both directions.
pub struct Gateway {
    listener: TcpListener,
    peers: Arc<DashMap<SocketAddr, mpsc::Sender<String>>>,
    ingress: mpsc::Sender<MessageIn>,
    format: WireFormat,
}

/// Cloneable fanout side of the gateway; implements [`OutboundSink`] by
/// writing the frame to every live peer.
#[derive(Clone)]
pub struct GatewayFanout {
    peers: Arc<DashMap<SocketAddr, mpsc::Sender<String>>>,
}

#[async_trait]
impl OutboundSink for GatewayFanout {
    async fn deliver(&self, frame: String) -> Result<(), TransportError> {
        let targets: Vec<(SocketAddr, mpsc::Sender<String>)> = self
            .peers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (addr, tx) in targets {
            if tx.send(frame.clone()).await.is_err() {
                debug!(peer = %addr, "Peer writer gone; removing");
                self.peers.remove(&addr);
            }
        }
        Ok(())
    }
}

impl Gateway {
    /// Bind the gateway listener.
    pub async fn bind(
        addr: SocketAddr,
        format: WireFormat,
        ingress: mpsc::Sender<MessageIn>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "Gateway listener bound");
        Ok(Self {
            listener,
            peers: Arc::new(DashMap::new()),
            ingress,
            format,
        })
    }

    /// Fanout handle for the egress worker.
    pub fn fanout(&self) -> GatewayFanout {
        GatewayFanout {
            peers: Arc::clone(&self.peers),
        }
    }

    /// Accept connections forever.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "Game server connected");
                    let peers = Arc::clone(&self.peers);
                    let ingress = self.ingress.clone();
                    let format = self.format;
                    tokio::spawn(async move {
                        handle_peer(stream, addr, peers, ingress, format).await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                }
            }
        }
    }
}

async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    peers: Arc<DashMap<SocketAddr, mpsc::Sender<String>>>,
    ingress: mpsc::Sender<MessageIn>,
    format: WireFormat,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (write_tx, mut write_rx) = mpsc::channel::<String>(PEER_WRITE_DEPTH);
    peers.insert(addr, write_tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = write_rx.recv().await {
            let mut line = frame.into_bytes();
            line.push(b'\n');
            if let Err(e) = write_half.write_all(&line).await {
                debug!(peer = %addr, error = %e, "Peer write failed");
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                match MessageIn::decode(&line, format) {
                    Ok(message) => {
                        if ingress.send(message).await.is_err() {
                            debug!(peer = %addr, "Ingress channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(peer = %addr, error = %e, "Undecodable inbound frame dropped");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(peer = %addr, error = %e, "Peer read failed");
                break;
            }
        }
    }

    peers.remove(&addr);
    writer.abort();
    info!(peer = %addr, "Game server disconnected");
}
