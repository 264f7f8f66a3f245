//! Chunk coordinates and per-chunk voxel storage.

use serde::{Deserialize, Serialize};

use crate::block::{BlockState, LocalPos};

/// Blocks per chunk along X and Z.
pub const CHUNK_SIZE: i32 = 16;

/// Blocks per chunk along Y.
pub const CHUNK_HEIGHT: i32 = 128;

/// Total number of blocks in one chunk.
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_HEIGHT * CHUNK_SIZE) as usize;

/// Bytes per block in the flat chunk encoding (id as u16 LE + meta byte).
const BYTES_PER_BLOCK: usize = 3;

// ---------------------------------------------------------------------------
// ChunkCoord
// ---------------------------------------------------------------------------

/// Identifier of a chunk column on the (x, z) grid. Stable and hashable;
/// used as a key throughout the sync layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// Grid X.
    pub x: i32,
    /// Grid Z.
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a chunk coordinate.
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chebyshev distance to another chunk, in chunks. Used for square
    /// render-distance view checks.
    pub fn chebyshev(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Error decoding a chunk from its flat byte encoding.
#[derive(Debug, thiserror::Error)]
pub enum ChunkDecodeError {
    /// The byte length does not match one chunk volume.
    #[error("chunk payload is {got} bytes, expected {expected}")]
    WrongLength {
        /// Actual length.
        got: usize,
        /// Expected length.
        expected: usize,
    },
}

/// Voxel storage for one chunk: a flat array of [`BlockState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    blocks: Vec<BlockState>,
}

impl Chunk {
    /// Creates a chunk filled with the given block.
    pub fn filled(fill: BlockState) -> Self {
        Self {
            blocks: vec![fill; CHUNK_VOLUME],
        }
    }

    fn index(local: LocalPos) -> usize {
        (usize::from(local.y) * CHUNK_SIZE as usize + usize::from(local.x)) * CHUNK_SIZE as usize
            + usize::from(local.z)
    }

    /// Returns the block at a local position.
    pub fn get(&self, local: LocalPos) -> BlockState {
        self.blocks[Self::index(local)]
    }

    /// Sets the block at a local position, returning the previous value.
    pub fn set(&mut self, local: LocalPos, block: BlockState) -> BlockState {
        let slot = &mut self.blocks[Self::index(local)];
        std::mem::replace(slot, block)
    }

    /// Encodes the chunk as a flat byte array (3 bytes per block), the
    /// payload format for full-chunk messages and snapshots. Callers
    /// compress the result before it goes on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CHUNK_VOLUME * BYTES_PER_BLOCK);
        for block in &self.blocks {
            out.extend_from_slice(&block.id.to_le_bytes());
            out.push(block.meta);
        }
        out
    }

    /// Decodes a chunk from its flat byte encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ChunkDecodeError> {
        let expected = CHUNK_VOLUME * BYTES_PER_BLOCK;
        if bytes.len() != expected {
            return Err(ChunkDecodeError::WrongLength {
                got: bytes.len(),
                expected,
            });
        }
        let blocks = bytes
            .chunks_exact(BYTES_PER_BLOCK)
            .map(|b| BlockState {
                id: u16::from_le_bytes([b[0], b[1]]),
                meta: b[2],
            })
            .collect();
        Ok(Self { blocks })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_returns_previous_block() {
        let mut chunk = Chunk::filled(BlockState::AIR);
        let pos = LocalPos::new(3, 70, 12);
        assert_eq!(chunk.set(pos, BlockState::STONE), BlockState::AIR);
        assert_eq!(chunk.set(pos, BlockState::DIRT), BlockState::STONE);
        assert_eq!(chunk.get(pos), BlockState::DIRT);
    }

    #[test]
    fn test_distinct_positions_have_distinct_slots() {
        let mut chunk = Chunk::filled(BlockState::AIR);
        chunk.set(LocalPos::new(0, 0, 1), BlockState::STONE);
        assert_eq!(chunk.get(LocalPos::new(0, 0, 0)), BlockState::AIR);
        assert_eq!(chunk.get(LocalPos::new(1, 0, 0)), BlockState::AIR);
        assert_eq!(chunk.get(LocalPos::new(0, 1, 0)), BlockState::AIR);
        assert_eq!(chunk.get(LocalPos::new(0, 0, 1)), BlockState::STONE);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut chunk = Chunk::filled(BlockState::AIR);
        chunk.set(LocalPos::new(5, 40, 9), BlockState { id: 300, meta: 7 });
        let bytes = chunk.to_bytes();
        let decoded = Chunk::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_truncated_bytes_rejected() {
        let err = Chunk::from_bytes(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, ChunkDecodeError::WrongLength { got: 17, .. }));
    }

    #[test]
    fn test_chebyshev_distance() {
        let a = ChunkCoord::new(0, 0);
        assert_eq!(a.chebyshev(ChunkCoord::new(3, -2)), 3);
        assert_eq!(a.chebyshev(ChunkCoord::new(-1, -5)), 5);
    }
}
