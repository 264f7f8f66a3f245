//! Per-connection session state.
//!
//! A [`Session`] is created when the transport hands a connection to the
//! simulation and lives until disconnect. It carries everything the sync
//! core knows about one client: lifecycle state, the acknowledged loaded
//! chunk set, the out-of-sync action gate, break progress, the open
//! inventory window, and the outbound packet sink.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use strata_protocol::{ItemStack, Message};
use strata_world::{BLOCK_SIZE_MM, BlockPos, CHUNK_SIZE, ChunkCoord, ClientId, EntityId};

// ---------------------------------------------------------------------------
// PacketSink
// ---------------------------------------------------------------------------

/// Error surfaced when an outbound send fails. Always isolated to one
/// connection: the caller tears that connection down and continues.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The transport rejected or lost the connection.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Outbound seam between the simulation and the transport. The production
/// implementation wraps a connection's writer queue; tests record messages.
pub trait PacketSink: Send {
    /// Queues a message for delivery under its declared guarantee.
    fn send(&mut self, msg: &Message) -> Result<(), SinkError>;
}

/// A sink that records everything sent through it. Clones share the same
/// buffer, so a test can keep one handle and box another into the session.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    sent: Arc<Mutex<Vec<Message>>>,
}

impl BufferSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages sent so far, in order.
    pub fn sent(&self) -> Vec<Message> {
        self.lock().clone()
    }

    /// Drains and returns the recorded messages.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.sent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl PacketSink for BufferSink {
    fn send(&mut self, msg: &Message) -> Result<(), SinkError> {
        self.lock().push(msg.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle of a connection within the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, waiting for a valid login.
    Authenticating,
    /// Logged in and active in the world.
    Playing,
}

/// In-progress block break for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakProgress {
    /// The block being broken.
    pub pos: BlockPos,
    /// Tick the break started on.
    pub started_tick: u64,
}

/// The session's open inventory window.
#[derive(Debug, Clone)]
pub struct Window {
    /// Window identifier; 0 is the player inventory.
    pub id: u8,
    /// Slot contents.
    pub slots: Vec<Option<ItemStack>>,
    /// The item held on the cursor.
    pub cursor: Option<ItemStack>,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            id: 0,
            slots: vec![None; 36],
            cursor: None,
        }
    }
}

/// A ping awaiting its pong, for RTT measurement.
#[derive(Debug, Clone, Copy)]
pub struct PendingPing {
    /// Nonce the pong must echo.
    pub nonce: u32,
    /// Tick the ping was sent on.
    pub sent_tick: u64,
}

/// All simulation-side state for one connected client.
pub struct Session {
    /// Transport-assigned client id.
    pub client_id: ClientId,
    /// Lifecycle state.
    pub state: SessionState,
    /// Player display name (empty until login).
    pub player_name: String,
    /// The player's own entity, once spawned.
    pub entity_id: Option<EntityId>,
    /// Authoritative player position in millimetres.
    pub pos: [i64; 3],
    /// Yaw in milliradians.
    pub yaw_mrad: i32,
    /// Pitch in milliradians.
    pub pitch_mrad: i32,
    /// Render distance in chunks.
    pub render_distance: i32,
    /// Chunks this client has received and not been told to unload.
    /// Authoritative for unload decisions; kept in lock-step with the chunk
    /// tracker's subscriber sets.
    pub loaded_chunks: HashSet<ChunkCoord>,
    /// While `true`, all further submitted actions are discarded until the
    /// client acknowledges the forced resync.
    pub out_of_sync: bool,
    /// In-progress block break, if any.
    pub breaking: Option<BreakProgress>,
    /// The open inventory window.
    pub window: Window,
    /// Last measured round-trip time in milliseconds.
    pub rtt_ms: Option<u32>,
    /// Outstanding ping, if any.
    pub pending_ping: Option<PendingPing>,
    sink: Box<dyn PacketSink>,
}

impl Session {
    /// Creates a fresh session in the authenticating state.
    pub fn new(client_id: ClientId, render_distance: i32, sink: Box<dyn PacketSink>) -> Self {
        Self {
            client_id,
            state: SessionState::Authenticating,
            player_name: String::new(),
            entity_id: None,
            pos: [0, 0, 0],
            yaw_mrad: 0,
            pitch_mrad: 0,
            render_distance,
            loaded_chunks: HashSet::new(),
            out_of_sync: false,
            breaking: None,
            window: Window::default(),
            rtt_ms: None,
            pending_ping: None,
            sink,
        }
    }

    /// Queues a message to this client.
    pub fn send(&mut self, msg: &Message) -> Result<(), SinkError> {
        self.sink.send(msg)
    }

    /// Returns `true` once the client is logged in.
    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    /// The entity interest radius implied by this client's render distance,
    /// in millimetres.
    pub fn interest_radius_mm(&self) -> i64 {
        i64::from(self.render_distance) * i64::from(CHUNK_SIZE) * BLOCK_SIZE_MM
    }

}

// ---------------------------------------------------------------------------
// SessionTable
// ---------------------------------------------------------------------------

/// All live sessions, keyed by client id. Owned by the simulation thread.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<ClientId, Session>,
}

impl SessionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session.
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.client_id, session);
    }

    /// Removes a session, returning it for cleanup.
    pub fn remove(&mut self, id: ClientId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Borrows a session.
    pub fn get(&self, id: ClientId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Mutably borrows a session.
    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Iterates over all sessions.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Mutably iterates over all sessions.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no sessions exist.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of all client ids. Callers that mutate the table while
    /// walking clients iterate over this copy, never the live map.
    pub fn ids(&self) -> Vec<ClientId> {
        self.sessions.keys().copied().collect()
    }

    /// Sends to one client. A missing client (already torn down) is not an
    /// error.
    pub fn send_to(&mut self, id: ClientId, msg: &Message) -> Result<(), SinkError> {
        match self.sessions.get_mut(&id) {
            Some(session) => session.send(msg),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
