//! Client Connections
//!
//! A `Connection` is the server's end of one client: an outbound queue the
//! transport drains and an inbound queue the transport fills. Game code only
//! sends typed messages and reads the next client message; dropping the
//! `Connection` closes the client.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::network::protocol::{Pdu, PduKind};

/// Buffered messages per direction.
pub const CHANNEL_CAPACITY: usize = 64;

/// Connection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The client went away.
    #[error("connection closed")]
    Closed,
    /// The client's outbound queue is full.
    #[error("outbound queue full")]
    Full,
}

/// Cloneable send half of a connection.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Pdu>,
}

impl Outbound {
    /// Queue a message for the client.
    pub async fn send(&self, kind: PduKind, payload: impl Into<String>) -> Result<(), ConnectionError> {
        self.tx
            .send(Pdu::new(kind, payload))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    /// Queue a message without waiting. Fails with `Full` when the client
    /// is not draining its queue.
    pub fn try_send(&self, kind: PduKind, payload: impl Into<String>) -> Result<(), ConnectionError> {
        self.tx
            .try_send(Pdu::new(kind, payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ConnectionError::Full,
                mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
            })
    }
}

/// Server end of one client.
#[derive(Debug)]
pub struct Connection {
    peer: Option<SocketAddr>,
    outbound: Outbound,
    inbound: mpsc::Receiver<Pdu>,
}

impl Connection {
    /// Create a connection and the matching client end.
    pub fn pair(peer: Option<SocketAddr>) -> (Connection, ClientEnd) {
        let (to_client, from_server) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_server, inbound) = mpsc::channel(CHANNEL_CAPACITY);

        let conn = Connection {
            peer,
            outbound: Outbound { tx: to_client },
            inbound,
        };
        let client = ClientEnd { to_server, from_server };
        (conn, client)
    }

    /// Remote address, when known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Send a typed message.
    pub async fn send(&self, kind: PduKind, payload: impl Into<String>) -> Result<(), ConnectionError> {
        self.outbound.send(kind, payload).await
    }

    /// Wait for the next client message.
    pub async fn recv(&mut self) -> Result<Pdu, ConnectionError> {
        self.inbound.recv().await.ok_or(ConnectionError::Closed)
    }

    /// Clone of the send half.
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// Drop anything the client typed out of turn.
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.inbound.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Client end of a connection. The transport owns one per socket; tests
/// drive sessions through it directly.
#[derive(Debug)]
pub struct ClientEnd {
    to_server: mpsc::Sender<Pdu>,
    from_server: mpsc::Receiver<Pdu>,
}

impl ClientEnd {
    /// Deliver a client message to the server.
    pub async fn send(&self, pdu: Pdu) -> Result<(), ConnectionError> {
        self.to_server.send(pdu).await.map_err(|_| ConnectionError::Closed)
    }

    /// Deliver an `input` reply.
    pub async fn reply(&self, text: &str) -> Result<(), ConnectionError> {
        self.send(Pdu::input(text)).await
    }

    /// Next message from the server. `None` once the server dropped the
    /// connection and the queue is drained.
    pub async fn next(&mut self) -> Option<Pdu> {
        self.from_server.recv().await
    }

    /// Read messages until one of `kind` arrives.
    pub async fn next_of(&mut self, kind: PduKind) -> Option<Pdu> {
        while let Some(pdu) = self.next().await {
            if pdu.kind == kind {
                return Some(pdu);
            }
        }
        None
    }

    /// Split into the inbound sender and outbound receiver.
    pub fn into_parts(self) -> (mpsc::Sender<Pdu>, mpsc::Receiver<Pdu>) {
        (self.to_server, self.from_server)
    }
}
