//! Delivery guarantees and the per-message guarantee mapping.
//!
//! The transport offers two guarantees. Block and spawn/despawn state must
//! never arrive out of order or be dropped — a client that misses one
//! diverges permanently. Motion updates carry the current authoritative
//! value in full, so a lost packet is superseded by the next one; they must
//! never stall behind a retransmission.

use crate::messages::Message;

/// How a message must be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryGuarantee {
    /// Delivered exactly once, in send order.
    ReliableOrdered,
    /// Best effort: may be dropped, never blocks on retransmission.
    Unreliable,
}

impl Message {
    /// The delivery guarantee this message is sent with. Centralized here so
    /// call sites cannot disagree about a message's contract.
    pub fn delivery(&self) -> DeliveryGuarantee {
        match self {
            // Continuous values, superseded by the next update.
            Message::EntityPositionDelta(_)
            | Message::EntityPositionAbsolute(_)
            | Message::EntityVelocity(_)
            | Message::PlayerMove(_)
            | Message::Ping(_)
            | Message::Pong(_)
            | Message::PingUpdate(_)
            | Message::ClockSync(_) => DeliveryGuarantee::Unreliable,

            // Everything else mutates client state cumulatively.
            _ => DeliveryGuarantee::ReliableOrdered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::*;
    use strata_world::{BlockPos, BlockState, EntityId};

    #[test]
    fn test_block_state_is_reliable() {
        let msg = Message::BlockChange(BlockChange {
            pos: BlockPos::new(0, 0, 0),
            block: BlockState::AIR,
        });
        assert_eq!(msg.delivery(), DeliveryGuarantee::ReliableOrdered);
        assert_eq!(
            Message::ResyncTerminator.delivery(),
            DeliveryGuarantee::ReliableOrdered
        );
    }

    #[test]
    fn test_motion_is_unreliable() {
        let msg = Message::EntityVelocity(EntityVelocity {
            id: EntityId(1),
            vel: [0, 0, 0],
        });
        assert_eq!(msg.delivery(), DeliveryGuarantee::Unreliable);
    }
}
