//! Network message types and serialization.
//!
//! All messages are serialized with [`postcard`] and prefixed with a protocol
//! version byte. Use [`serialize_message`] and [`deserialize_message`] for
//! encoding/decoding.

use serde::{Deserialize, Serialize};

use strata_world::{BlockPos, BlockState, ChunkCoord, ClientId, EntityId, EntityKind, LocalPos};

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Milliradians in a full turn, for coarse angle quantization.
const FULL_TURN_MRAD: i32 = 6283;

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Top-level network message. The enum discriminant is the type tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Message {
    // --- Auth / session ---
    /// Client requests login with a player name.
    Login(Login),
    /// Server accepts the login.
    LoginOk(LoginOk),
    /// Server rejects the login.
    LoginRejected(LoginRejected),
    /// Either side announces a disconnect.
    Disconnect(Disconnect),

    // --- Chunk view ---
    /// Full chunk snapshot sent when a chunk enters the client's view.
    ChunkData(ChunkPayload),
    /// A chunk left the client's view; drop it.
    ChunkUnload(ChunkUnload),

    // --- Block sync ---
    /// A single block changed.
    BlockChange(BlockChange),
    /// A batch of block changes inside one chunk.
    MultiBlockChange(MultiBlockChange),
    /// Full authoritative chunk resend after a large edit burst.
    ChunkResend(ChunkPayload),

    // --- Entity sync ---
    /// An entity became visible: full spawn data.
    EntitySpawn(EntitySpawn),
    /// An entity left visibility or was destroyed.
    EntityDespawn(EntityDespawn),
    /// Full serialized entity state, paired with a spawn.
    EntityStateSnapshot(EntityStateSnapshot),
    /// Compact relative motion update.
    EntityPositionDelta(EntityPositionDelta),
    /// Absolute motion update when the delta does not fit.
    EntityPositionAbsolute(EntityPositionAbsolute),
    /// Velocity update for kinds that animate from velocity.
    EntityVelocity(EntityVelocity),

    // --- Player input ---
    /// Client reports its avatar position and look direction.
    PlayerMove(PlayerMove),

    // --- Transactions ---
    /// Client submits an optimistically-applied action.
    ActionSubmit(ActionSubmit),
    /// Server verdict on a submitted action.
    ActionAck(ActionAck),
    /// Authoritative value for one slot after a rejection.
    SlotCorrection(SlotCorrection),
    /// All corrections for a rejection have been sent.
    ResyncTerminator,
    /// Client acknowledges a forced resync, lifting the action gate.
    ResyncAck,

    // --- Periodic ---
    /// Server heartbeat; client answers with [`Message::Pong`].
    Ping(Ping),
    /// Client response to a ping.
    Pong(Pong),
    /// Broadcast of per-player round-trip times.
    PingUpdate(PingUpdate),
    /// Server tick / world time broadcast for client clock alignment.
    ClockSync(ClockSync),
}

// ---------------------------------------------------------------------------
// Auth payloads
// ---------------------------------------------------------------------------

/// Client login request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Login {
    /// Desired player name.
    pub player_name: String,
    /// Protocol version the client speaks.
    pub protocol_version: u8,
}

/// Server login acceptance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginOk {
    /// Assigned client identifier.
    pub client_id: ClientId,
    /// The player's own entity id.
    pub entity_id: EntityId,
    /// Current server tick.
    pub server_tick: u64,
}

/// Server login rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginRejected {
    /// Human-readable reason.
    pub reason: String,
}

/// Disconnect notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Disconnect {
    /// Human-readable reason.
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Chunk payloads
// ---------------------------------------------------------------------------

/// A full chunk snapshot: LZ4-compressed flat block data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPayload {
    /// Which chunk this data belongs to.
    pub coord: ChunkCoord,
    /// LZ4-compressed block data.
    pub compressed: Vec<u8>,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u32,
}

/// Unload notice for a chunk that left the client's view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkUnload {
    /// The chunk to drop.
    pub coord: ChunkCoord,
}

/// A single block change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockChange {
    /// Absolute block position.
    pub pos: BlockPos,
    /// The new authoritative block state.
    pub block: BlockState,
}

/// A batch of block changes inside one chunk, as parallel arrays so the
/// per-message framing overhead is paid once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiBlockChange {
    /// The chunk all positions are local to.
    pub chunk: ChunkCoord,
    /// Changed positions, parallel with `blocks`.
    pub positions: Vec<LocalPos>,
    /// New block states, parallel with `positions`.
    pub blocks: Vec<BlockState>,
}

// ---------------------------------------------------------------------------
// Entity payloads
// ---------------------------------------------------------------------------

/// Full spawn data for an entity entering a client's view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpawn {
    /// Entity identifier.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Position in millimetres.
    pub pos: [i64; 3],
    /// Yaw in milliradians.
    pub yaw_mrad: i32,
    /// Pitch in milliradians.
    pub pitch_mrad: i32,
    /// Velocity in mm/tick.
    pub vel: [i32; 3],
    /// Kind-specific opaque extra data.
    pub extra: Vec<u8>,
}

/// Despawn notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDespawn {
    /// Entity identifier.
    pub id: EntityId,
}

/// Full serialized entity state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityStateSnapshot {
    /// Entity identifier.
    pub id: EntityId,
    /// Opaque serialized state.
    pub data: Vec<u8>,
}

/// Relative motion update. Deltas are millimetres from the last transmitted
/// position and must fit in `i16` (one chunk extent); angles are quantized
/// to 256 steps per turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityPositionDelta {
    /// Entity identifier.
    pub id: EntityId,
    /// X delta in millimetres.
    pub dx: i16,
    /// Y delta in millimetres.
    pub dy: i16,
    /// Z delta in millimetres.
    pub dz: i16,
    /// Quantized yaw.
    pub yaw_q: u8,
    /// Quantized pitch.
    pub pitch_q: u8,
}

/// Absolute motion update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityPositionAbsolute {
    /// Entity identifier.
    pub id: EntityId,
    /// Position in millimetres.
    pub pos: [i64; 3],
    /// Yaw in milliradians.
    pub yaw_mrad: i32,
    /// Pitch in milliradians.
    pub pitch_mrad: i32,
}

/// Velocity update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityVelocity {
    /// Entity identifier.
    pub id: EntityId,
    /// Velocity in mm/tick.
    pub vel: [i32; 3],
}

// ---------------------------------------------------------------------------
// Player input
// ---------------------------------------------------------------------------

/// Client-reported avatar position and look direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerMove {
    /// Position in millimetres.
    pub pos: [i64; 3],
    /// Yaw in milliradians.
    pub yaw_mrad: i32,
    /// Pitch in milliradians.
    pub pitch_mrad: i32,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// An inventory item stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    /// Item type identifier.
    pub item: u16,
    /// Stack size.
    pub count: u8,
}

/// A state-mutating action the client has already applied locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientAction {
    /// Click a slot in the open window; the authoritative rule swaps the
    /// slot with the cursor. `expected` is the slot value the client
    /// predicts after the click.
    ClickSlot {
        /// Window the click targets.
        window_id: u8,
        /// Slot index within the window.
        slot: u16,
        /// Client-predicted post-click slot value.
        expected: Option<ItemStack>,
    },
    /// Begin breaking a block.
    StartBreak {
        /// Target block.
        pos: BlockPos,
    },
    /// Abort the in-progress break.
    CancelBreak,
    /// Complete the in-progress break.
    FinishBreak {
        /// Target block; must match the in-progress break.
        pos: BlockPos,
    },
    /// Place a block.
    PlaceBlock {
        /// Target position.
        pos: BlockPos,
        /// Block to place.
        block: BlockState,
    },
}

/// Client-submitted action envelope. `action_id` is client-assigned and
/// echoed in the verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSubmit {
    /// Client-assigned action identifier.
    pub action_id: u32,
    /// The action body.
    pub action: ClientAction,
}

/// Server verdict on a submitted action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionAck {
    /// Echoed action identifier.
    pub action_id: u32,
    /// `true` if the server applied the action as predicted.
    pub accepted: bool,
}

/// Authoritative value for one slot, sent after a rejection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotCorrection {
    /// Window the slot belongs to.
    pub window_id: u8,
    /// Slot index; `None` addresses the cursor.
    pub slot: Option<u16>,
    /// Authoritative contents.
    pub item: Option<ItemStack>,
}

// ---------------------------------------------------------------------------
// Periodic payloads
// ---------------------------------------------------------------------------

/// Server heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ping {
    /// Nonce echoed by the pong.
    pub nonce: u32,
}

/// Client response to a [`Ping`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pong {
    /// Echoed nonce.
    pub nonce: u32,
}

/// Broadcast of per-player round-trip times in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PingUpdate {
    /// (client, RTT ms) pairs.
    pub pings: Vec<(ClientId, u32)>,
}

/// Server clock broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockSync {
    /// Current server tick.
    pub server_tick: u64,
    /// In-game time in milliseconds.
    pub world_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Angle quantization
// ---------------------------------------------------------------------------

/// Quantizes a milliradian angle to 256 steps per turn, rounding to the
/// nearest step. Angles just under a full turn round up and wrap to step 0.
pub fn quantize_angle(mrad: i32) -> u8 {
    let wrapped = mrad.rem_euclid(FULL_TURN_MRAD);
    (((wrapped * 256 + FULL_TURN_MRAD / 2) / FULL_TURN_MRAD) % 256) as u8
}

/// Expands a quantized angle back to milliradians. This is the value the
/// receiver reconstructs, so senders must use it as their delta baseline;
/// re-quantizing it always yields the same step.
pub fn dequantize_angle(q: u8) -> i32 {
    (i32::from(q) * FULL_TURN_MRAD + 128) / 256
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during message deserialization.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload — no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard deserialization failed.
    #[error("deserialization error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Message`] into a versioned binary payload.
///
/// Wire format: `[version: u8] [postcard-encoded Message]`
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, postcard::Error> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Deserialize a versioned binary payload into a [`Message`].
///
/// Returns an error if the version is unsupported or the payload is
/// malformed.
pub fn deserialize_message(data: &[u8]) -> Result<Message, MessageError> {
    if data.is_empty() {
        return Err(MessageError::EmptyPayload);
    }

    let version = data[0];
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }

    let msg = postcard::from_bytes(&data[1..])?;
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
