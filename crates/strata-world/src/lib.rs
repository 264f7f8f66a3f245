//! Core domain types for the strata server: block and chunk coordinates,
//! voxel storage, the authoritative world, and entities with their per-kind
//! behaviour table.
//!
//! Positions are integer millimetres (`i64`), rotations integer
//! milliradians (`i32`), velocities mm/tick (`i32`). One block is 1000 mm.

pub mod block;
pub mod chunk;
pub mod entity;
pub mod world;

pub use block::{BLOCK_SIZE_MM, BlockPos, BlockState, LocalPos, dist_sq_mm};
pub use chunk::{CHUNK_HEIGHT, CHUNK_SIZE, Chunk, ChunkCoord};
pub use entity::{Entity, EntityId, EntityKind, EntityRegistry, EntityStateData, KindBehavior, KindTable};
pub use world::{ServerWorld, WorldError};

use serde::{Deserialize, Serialize};

/// Identifier assigned to a connected client for its whole session.
/// Allocated by the transport layer from a monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);
