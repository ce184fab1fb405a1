//! UDP binding responder
//!
//! Answers every Binding request with the transport address it was received
//! from and records the request in the [`CorrelationStore`].

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::protocol::{is_stun_message, Message, MessageType};
use crate::error::{NatError, NatResult, StunError};
use crate::storage::{CorrelationKey, CorrelationStore};

/// SOFTWARE value sent in every response
pub const SOFTWARE: &str = concat!("stun-trace/", env!("CARGO_PKG_VERSION"));

/// Receive buffer size; larger datagrams are truncated by the kernel and fail to decode
pub const RECV_BUFFER_SIZE: usize = 2048;

/// What happened to a single datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Not STUN traffic
    NotStun,
    /// STUN, but not a Binding request
    Ignored(MessageType),
    /// Encoded Binding success response for the peer
    Respond(Bytes),
}

/// Responder counters
#[derive(Debug, Default)]
pub struct ServerStats {
    pub received: AtomicU64,
    pub not_stun: AtomicU64,
    pub malformed: AtomicU64,
    pub ignored: AtomicU64,
    pub answered: AtomicU64,
    pub send_errors: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatsSnapshot {
    pub received: u64,
    pub not_stun: u64,
    pub malformed: u64,
    pub ignored: u64,
    pub answered: u64,
    pub send_errors: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            not_stun: self.not_stun.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// STUN Binding responder bound to one UDP socket
pub struct BindingServer {
    socket: Arc<UdpSocket>,
    store: Arc<CorrelationStore>,
    software: String,
    stats: ServerStats,
}

impl BindingServer {
    /// Bind a new UDP socket on `addr`
    pub async fn bind(addr: SocketAddr, store: Arc<CorrelationStore>) -> NatResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket, store))
    }

    /// Serve an already bound socket
    pub fn from_socket(socket: UdpSocket, store: Arc<CorrelationStore>) -> Self {
        Self {
            socket: Arc::new(socket),
            store,
            software: SOFTWARE.to_string(),
            stats: ServerStats::default(),
        }
    }

    /// Override the SOFTWARE attribute value
    pub fn with_software(mut self, software: impl Into<String>) -> Self {
        self.software = software.into();
        self
    }

    pub fn local_addr(&self) -> NatResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn store(&self) -> &Arc<CorrelationStore> {
        &self.store
    }

    /// Decode one datagram, record it, and build the response without touching the socket
    pub fn process_datagram(&self, peer: SocketAddr, data: &[u8]) -> Result<DatagramOutcome, StunError> {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if !is_stun_message(data) {
            self.stats.not_stun.fetch_add(1, Ordering::Relaxed);
            debug!("packet from {} is not STUN message", peer);
            return Ok(DatagramOutcome::NotStun);
        }

        let request = Message::decode(data).map_err(|e| {
            self.stats.malformed.fetch_add(1, Ordering::Relaxed);
            e
        })?;

        if request.message_type() != MessageType::BINDING_REQUEST {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            debug!("stun: skipping {} from {}", request.message_type(), peer);
            return Ok(DatagramOutcome::Ignored(request.message_type()));
        }

        debug!("stun: got {} from {}", request, peer);

        let mapped = unmap(peer);
        let mut response = Message::new(MessageType::BINDING_SUCCESS, *request.transaction_id());
        response.add_xor_mapped_address(mapped)?;
        response.add_software(&self.software)?;

        self.store.add(CorrelationKey::from_socket_addr(mapped), &request);
        self.stats.answered.fetch_add(1, Ordering::Relaxed);

        Ok(DatagramOutcome::Respond(response.encode()))
    }

    /// Process one datagram and send the response, if any, back to `peer`
    pub async fn handle_datagram(&self, peer: SocketAddr, data: &[u8]) -> NatResult<()> {
        if let DatagramOutcome::Respond(response) = self.process_datagram(peer, data)? {
            if let Err(e) = self.socket.send_to(&response, peer).await {
                self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Receive loop; returns when `token` is cancelled or the socket fails
    pub async fn run(&self, token: CancellationToken) -> NatResult<()> {
        let local_addr = self.local_addr()?;
        info!("Started STUN server on {}", local_addr);

        let mut buffer = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            let (size, peer) = tokio::select! {
                _ = token.cancelled() => {
                    info!("STUN server on {} stopped", local_addr);
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        error!("udp: read on {} failed: {}", local_addr, e);
                        return Err(NatError::SocketFatal { addr: local_addr, source: e });
                    }
                },
            };

            debug!("udp: got packet len({}) from {}", size, peer);

            if let Err(e) = self.handle_datagram(peer, &buffer[..size]).await {
                warn!("failed to process UDP packet from {}: {}", peer, e);
            }
        }
    }
}

/// Peers seen through a dual-stack socket arrive as IPv4-mapped IPv6
fn unmap(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), addr.port()),
            None => addr,
        },
        IpAddr::V4(_) => addr,
    }
}
