//! Wire protocol for the strata server.
//!
//! All messages are serialized with [`postcard`] behind a protocol-version
//! byte. The wire format itself is the transport's concern; this crate only
//! defines message semantics and each message's delivery guarantee.

pub mod delivery;
pub mod messages;

pub use delivery::DeliveryGuarantee;
pub use messages::{
    ClientAction, ItemStack, Message, MessageError, PROTOCOL_VERSION, deserialize_message,
    serialize_message,
};
