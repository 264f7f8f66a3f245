//! Transport layer: length-prefixed TCP framing, the accept loop, and the
//! bridge between network I/O tasks and the simulation thread.
//!
//! I/O tasks never touch simulation state. They decode inbound frames into
//! [`NetEvent`]s and push them onto a single queue the simulation drains
//! once per tick; outbound messages travel the other way through each
//! connection's [`PeerSender`].

pub mod framing;
pub mod peer;
pub mod server;

pub use framing::{FrameConfig, FrameError, read_frame, write_frame};
pub use peer::{NetEvent, PeerSender, SendError};
pub use server::{NetConfig, NetServer};
