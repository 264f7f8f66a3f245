//! Block-level coordinates and block state.

use serde::{Deserialize, Serialize};

use crate::chunk::{CHUNK_SIZE, ChunkCoord};

/// Edge length of one block in millimetres.
pub const BLOCK_SIZE_MM: i64 = 1000;

// ---------------------------------------------------------------------------
// BlockState
// ---------------------------------------------------------------------------

/// The state of a single voxel: a block type id plus a metadata nibble-ish
/// byte (orientation, growth stage, and so on — opaque to the sync core).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockState {
    /// Block type identifier. 0 is air.
    pub id: u16,
    /// Block metadata byte.
    pub meta: u8,
}

impl BlockState {
    /// Air / empty space.
    pub const AIR: Self = Self { id: 0, meta: 0 };
    /// Stone (for tests/demos).
    pub const STONE: Self = Self { id: 1, meta: 0 };
    /// Dirt (for tests/demos).
    pub const DIRT: Self = Self { id: 2, meta: 0 };

    /// Returns `true` if this block is air.
    pub fn is_air(self) -> bool {
        self.id == 0
    }
}

// ---------------------------------------------------------------------------
// LocalPos
// ---------------------------------------------------------------------------

/// A block position local to one chunk: `x`/`z` in `0..CHUNK_SIZE`, `y` in
/// `0..CHUNK_HEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPos {
    /// Local X.
    pub x: u8,
    /// Local Y.
    pub y: u8,
    /// Local Z.
    pub z: u8,
}

impl LocalPos {
    /// Creates a local position.
    pub fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }
}

// ---------------------------------------------------------------------------
// BlockPos
// ---------------------------------------------------------------------------

/// An absolute block position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    /// World-space block X.
    pub x: i32,
    /// World-space block Y (0-based, bounded by chunk height).
    pub y: i32,
    /// World-space block Z.
    pub z: i32,
}

impl BlockPos {
    /// Creates a block position.
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk this block falls in. Uses euclidean division so negative
    /// coordinates map to the correct chunk.
    pub fn chunk(self) -> ChunkCoord {
        ChunkCoord {
            x: self.x.div_euclid(CHUNK_SIZE),
            z: self.z.div_euclid(CHUNK_SIZE),
        }
    }

    /// This block's position local to its chunk.
    pub fn local(self) -> LocalPos {
        LocalPos {
            x: self.x.rem_euclid(CHUNK_SIZE) as u8,
            y: self.y as u8,
            z: self.z.rem_euclid(CHUNK_SIZE) as u8,
        }
    }

    /// Rebuilds an absolute position from a chunk coordinate and a local
    /// position.
    pub fn from_parts(chunk: ChunkCoord, local: LocalPos) -> Self {
        Self {
            x: chunk.x * CHUNK_SIZE + i32::from(local.x),
            y: i32::from(local.y),
            z: chunk.z * CHUNK_SIZE + i32::from(local.z),
        }
    }

    /// The centre of this block in millimetres, used for reach checks.
    pub fn center_mm(self) -> [i64; 3] {
        [
            i64::from(self.x) * BLOCK_SIZE_MM + BLOCK_SIZE_MM / 2,
            i64::from(self.y) * BLOCK_SIZE_MM + BLOCK_SIZE_MM / 2,
            i64::from(self.z) * BLOCK_SIZE_MM + BLOCK_SIZE_MM / 2,
        ]
    }
}

/// Squared euclidean distance between two millimetre positions. Saturates
/// at `i64::MAX` instead of overflowing, so extreme coordinates always read
/// as far apart.
pub fn dist_sq_mm(a: [i64; 3], b: [i64; 3]) -> i64 {
    let dx = a[0].saturating_sub(b[0]);
    let dy = a[1].saturating_sub(b[1]);
    let dz = a[2].saturating_sub(b[2]);
    dx.saturating_mul(dx)
        .saturating_add(dy.saturating_mul(dy))
        .saturating_add(dz.saturating_mul(dz))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
