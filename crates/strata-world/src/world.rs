//! The authoritative server world: loaded chunks plus the simulation clock.

use std::collections::HashMap;

use crate::block::{BlockPos, BlockState};
use crate::chunk::{CHUNK_HEIGHT, Chunk, ChunkCoord};

/// Errors from authoritative world mutations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorldError {
    /// The target chunk is not loaded.
    #[error("chunk ({0}, {1}) is not loaded", .coord.x, .coord.z)]
    ChunkNotLoaded {
        /// The missing chunk.
        coord: ChunkCoord,
    },
    /// The Y coordinate is outside the world column.
    #[error("y = {y} is outside 0..{CHUNK_HEIGHT}")]
    OutOfColumn {
        /// The offending Y.
        y: i32,
    },
}

/// Server-authoritative world state. Owned and mutated exclusively by the
/// simulation thread; the I/O side never touches it.
#[derive(Debug, Default)]
pub struct ServerWorld {
    chunks: HashMap<ChunkCoord, Chunk>,
    tick: u64,
    world_time_ms: u64,
}

impl ServerWorld {
    /// Creates an empty world at tick 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulation tick.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// In-game time in milliseconds of simulated time.
    pub fn world_time_ms(&self) -> u64 {
        self.world_time_ms
    }

    /// Advances world logic by exactly one tick of `dt_ms` simulated
    /// milliseconds.
    pub fn step(&mut self, dt_ms: u64) {
        self.tick = self.tick.saturating_add(1);
        self.world_time_ms = self.world_time_ms.saturating_add(dt_ms);
    }

    /// Inserts (or replaces) a chunk.
    pub fn load_chunk(&mut self, coord: ChunkCoord, chunk: Chunk) {
        self.chunks.insert(coord, chunk);
    }

    /// Removes a chunk, returning it if it was loaded.
    pub fn unload_chunk(&mut self, coord: ChunkCoord) -> Option<Chunk> {
        self.chunks.remove(&coord)
    }

    /// Returns `true` if the chunk is loaded.
    pub fn has_chunk(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    /// Borrows a loaded chunk.
    pub fn chunk_at(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    /// Coordinates of all loaded chunks.
    pub fn loaded_coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.chunks.keys().copied()
    }

    /// Reads the block at an absolute position. `None` if the chunk is not
    /// loaded or the position is outside the column.
    pub fn block_at(&self, pos: BlockPos) -> Option<BlockState> {
        if pos.y < 0 || pos.y >= CHUNK_HEIGHT {
            return None;
        }
        self.chunks.get(&pos.chunk()).map(|c| c.get(pos.local()))
    }

    /// Writes the block at an absolute position, returning the previous
    /// state.
    pub fn set_block(&mut self, pos: BlockPos, block: BlockState) -> Result<BlockState, WorldError> {
        if pos.y < 0 || pos.y >= CHUNK_HEIGHT {
            return Err(WorldError::OutOfColumn { y: pos.y });
        }
        let coord = pos.chunk();
        let chunk = self
            .chunks
            .get_mut(&coord)
            .ok_or(WorldError::ChunkNotLoaded { coord })?;
        Ok(chunk.set(pos.local(), block))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_block_requires_loaded_chunk() {
        let mut world = ServerWorld::new();
        let pos = BlockPos::new(3, 10, 3);
        let err = world.set_block(pos, BlockState::STONE).unwrap_err();
        assert_eq!(
            err,
            WorldError::ChunkNotLoaded {
                coord: ChunkCoord::new(0, 0)
            }
        );

        world.load_chunk(ChunkCoord::new(0, 0), Chunk::filled(BlockState::AIR));
        assert_eq!(world.set_block(pos, BlockState::STONE), Ok(BlockState::AIR));
        assert_eq!(world.block_at(pos), Some(BlockState::STONE));
    }

    #[test]
    fn test_out_of_column_rejected() {
        let mut world = ServerWorld::new();
        world.load_chunk(ChunkCoord::new(0, 0), Chunk::filled(BlockState::AIR));
        let err = world
            .set_block(BlockPos::new(0, CHUNK_HEIGHT, 0), BlockState::STONE)
            .unwrap_err();
        assert_eq!(err, WorldError::OutOfColumn { y: CHUNK_HEIGHT });
        assert_eq!(world.block_at(BlockPos::new(0, -1, 0)), None);
    }

    #[test]
    fn test_step_advances_tick_and_time() {
        let mut world = ServerWorld::new();
        world.step(16);
        world.step(16);
        assert_eq!(world.tick(), 2);
        assert_eq!(world.world_time_ms(), 32);
    }

    #[test]
    fn test_unload_returns_chunk() {
        let mut world = ServerWorld::new();
        let coord = ChunkCoord::new(-2, 4);
        world.load_chunk(coord, Chunk::filled(BlockState::DIRT));
        assert!(world.has_chunk(coord));
        assert!(world.unload_chunk(coord).is_some());
        assert!(!world.has_chunk(coord));
        assert!(world.unload_chunk(coord).is_none());
    }
}
