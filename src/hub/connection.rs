//! Live connection handles

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DeliveryError;

use super::message::Frame;

/// Identifier of a registered connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something a hub can push frames to
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identifier
    fn id(&self) -> ConnectionId;

    /// Deliver one frame; any error drops the connection from its hub
    async fn send(&self, frame: Frame) -> Result<(), DeliveryError>;
}

/// Connection backed by a bounded outbound buffer.
///
/// The transport task owns the receiving half and writes frames to the peer
/// in order. Dropping the receiver closes the connection.
#[derive(Debug)]
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    send_timeout: Duration,
}

impl ChannelConnection {
    /// Create a connection and the receiver its transport task drains
    pub fn pair(buffer: usize, send_timeout: Duration) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: ConnectionId::new(),
                tx,
                send_timeout,
            },
            rx,
        )
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.send_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DeliveryError::Closed),
            Err(_) => Err(DeliveryError::Timeout(self.send_timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_in_order() {
        let (conn, mut rx) = ChannelConnection::pair(4, Duration::from_millis(50));
        conn.send(Frame::from("a")).await.unwrap();
        conn.send(Frame::from("b")).await.unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "a");
        assert_eq!(&*rx.recv().await.unwrap(), "b");
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (conn, rx) = ChannelConnection::pair(4, Duration::from_millis(50));
        drop(rx);
        assert_eq!(conn.send(Frame::from("a")).await, Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_full_buffer_times_out() {
        let (conn, _rx) = ChannelConnection::pair(1, Duration::from_millis(20));
        conn.send(Frame::from("a")).await.unwrap();
        assert_eq!(
            conn.send(Frame::from("b")).await,
            Err(DeliveryError::Timeout(20))
        );
    }
}
