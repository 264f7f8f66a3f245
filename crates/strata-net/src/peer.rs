//! The bridge between I/O tasks and the simulation thread.
//!
//! [`NetEvent`] is the single inbound queue's element type; [`PeerSender`]
//! is the per-connection outbound handle. Sending is fire-and-forget from
//! the simulation's perspective: the writer task owns retries and ordering,
//! and the simulation never blocks on delivery.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use strata_protocol::{DeliveryGuarantee, Message, serialize_message};
use strata_world::ClientId;

/// Capacity of each connection's outbound frame queue.
pub const OUTBOUND_QUEUE_FRAMES: usize = 512;

/// An event produced by the I/O side and consumed by the simulation's
/// per-tick queue drain. This queue is the only concurrency seam between
/// the two sides.
#[derive(Debug)]
pub enum NetEvent {
    /// A client connected; the simulation takes ownership of its sender.
    Connected {
        /// Assigned client id.
        id: ClientId,
        /// Outbound handle for this connection.
        sender: PeerSender,
        /// Remote address, for logging.
        addr: SocketAddr,
    },
    /// A decoded inbound message.
    Message {
        /// The sending client.
        id: ClientId,
        /// The message.
        msg: Message,
    },
    /// The connection closed (EOF, error, or shutdown).
    Disconnected {
        /// The client that disconnected.
        id: ClientId,
    },
}

/// Errors surfaced to the simulation when sending.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Message could not be serialized.
    #[error("serialization failed: {0}")]
    Encode(#[from] postcard::Error),
    /// The connection's writer task is gone.
    #[error("connection closed")]
    Closed,
    /// A reliable message could not be queued because the outbound queue is
    /// full. The connection is unrecoverable: dropping a reliable message
    /// would desynchronize the client permanently.
    #[error("outbound queue full on reliable send")]
    Backpressure,
}

/// Per-connection outbound handle held by the simulation.
///
/// Reliable-ordered messages ride the bounded writer queue in order; if the
/// queue is full the connection is reported as failed rather than dropping
/// or reordering. Unreliable messages are silently discarded when the queue
/// is congested — the next update supersedes them.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl PeerSender {
    /// Creates the sender half plus the receiver consumed by a writer task.
    pub fn channel() -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_FRAMES);
        (Self { tx }, rx)
    }

    /// Serializes and queues a message using its declared delivery
    /// guarantee.
    pub fn send(&self, msg: &Message) -> Result<(), SendError> {
        let bytes = serialize_message(msg)?;
        match self.tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(SendError::Closed),
            Err(TrySendError::Full(_)) => match msg.delivery() {
                DeliveryGuarantee::Unreliable => {
                    // Congested: drop. Stale motion is superseded anyway.
                    tracing::trace!("outbound queue full, dropping unreliable message");
                    Ok(())
                }
                DeliveryGuarantee::ReliableOrdered => Err(SendError::Backpressure),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strata_protocol::messages::{ClockSync, Ping};

    fn reliable_msg() -> Message {
        Message::ResyncTerminator
    }

    fn unreliable_msg() -> Message {
        Message::Ping(Ping { nonce: 1 })
    }

    #[tokio::test]
    async fn test_send_queues_serialized_frame() {
        let (sender, mut rx) = PeerSender::channel();
        sender.send(&reliable_msg()).unwrap();
        let bytes = rx.recv().await.unwrap();
        assert_eq!(
            strata_protocol::deserialize_message(&bytes).unwrap(),
            reliable_msg()
        );
    }

    #[tokio::test]
    async fn test_unreliable_dropped_when_congested() {
        let (sender, rx) = PeerSender::channel();
        for _ in 0..OUTBOUND_QUEUE_FRAMES {
            sender
                .send(&Message::ClockSync(ClockSync {
                    server_tick: 0,
                    world_time_ms: 0,
                }))
                .unwrap();
        }
        // Queue is full: unreliable send succeeds by dropping.
        sender.send(&unreliable_msg()).unwrap();
        // Reliable send must fail loudly instead.
        assert!(matches!(
            sender.send(&reliable_msg()),
            Err(SendError::Backpressure)
        ));
        drop(rx);
    }

    #[tokio::test]
    async fn test_send_after_close_reports_closed() {
        let (sender, rx) = PeerSender::channel();
        drop(rx);
        assert!(matches!(sender.send(&reliable_msg()), Err(SendError::Closed)));
    }
}
