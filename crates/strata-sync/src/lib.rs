//! The authoritative state-synchronization core: per-client sessions, chunk
//! and entity interest tracking, and the optimistic-action reconciler.
//!
//! Everything in this crate is owned and mutated by the single simulation
//! thread. The transport reaches it only through the inbound event queue,
//! and leaves it only through each session's packet sink.

pub mod chunk_interest;
pub mod entity_interest;
pub mod reconciler;
pub mod session;

pub use chunk_interest::{ChunkInterestTracker, ESCALATION_THRESHOLD};
pub use entity_interest::{EntityInterestTracker, VIEWER_RECOMPUTE_TICKS};
pub use reconciler::{ActionOutcome, ActionViolation, TransactionReconciler};
pub use session::{BufferSink, PacketSink, Session, SessionState, SessionTable, SinkError};
