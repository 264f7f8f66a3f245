//! World snapshots: periodic persistence of authoritative state for crash
//! recovery and orderly restarts.
//!
//! A snapshot captures every loaded chunk (LZ4-compressed) and every live
//! entity at a single tick, encoded with postcard. Files are named by
//! snapshot id; old files beyond the retention limit are pruned after each
//! write.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};

use strata_world::{
    Chunk, ChunkCoord, EntityId, EntityKind, EntityRegistry, EntityStateData, ServerWorld,
};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Errors from snapshot persistence.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failure.
    #[error("snapshot codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// Compressed chunk data did not decompress.
    #[error("snapshot chunk data corrupt: {0}")]
    Corrupt(#[from] lz4_flex::block::DecompressError),

    /// A stored chunk had the wrong length after decompression.
    #[error(transparent)]
    ChunkDecode(#[from] strata_world::chunk::ChunkDecodeError),
}

/// Snapshot metadata header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Format version for forward compatibility.
    pub version: u32,
    /// Monotonically increasing snapshot identifier.
    pub snapshot_id: u64,
    /// Server tick at which the snapshot was taken.
    pub server_tick: u64,
    /// Wall-clock Unix milliseconds.
    pub timestamp_ms: u64,
}

/// A single chunk within a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    /// Which chunk this data belongs to.
    pub coord: ChunkCoord,
    /// LZ4-compressed block data.
    pub data: Vec<u8>,
}

/// A single entity within a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Network identifier.
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
    /// Kind-independent state.
    pub state: EntityStateData,
}

/// Complete recoverable world state captured at a single server tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Snapshot metadata.
    pub header: SnapshotHeader,
    /// All loaded chunks.
    pub chunks: Vec<ChunkSnapshot>,
    /// All live entities.
    pub entities: Vec<EntitySnapshot>,
    /// In-game world time in milliseconds.
    pub world_time_ms: u64,
}

impl WorldSnapshot {
    /// Captures the current world and entity state.
    pub fn capture(
        world: &ServerWorld,
        registry: &EntityRegistry,
        snapshot_id: u64,
    ) -> Self {
        let chunks = world
            .loaded_coords()
            .into_iter()
            .filter_map(|coord| {
                world.chunk_at(coord).map(|chunk| ChunkSnapshot {
                    coord,
                    data: compress_prepend_size(&chunk.to_bytes()),
                })
            })
            .collect();
        let entities = registry
            .iter()
            .map(|e| EntitySnapshot {
                id: e.id,
                kind: e.kind,
                pos: e.pos,
                yaw_mrad: e.yaw_mrad,
                pitch_mrad: e.pitch_mrad,
                vel: e.vel,
                state: e.state,
            })
            .collect();
        Self {
            header: SnapshotHeader {
                version: SNAPSHOT_VERSION,
                snapshot_id,
                server_tick: world.tick(),
                timestamp_ms: unix_millis(),
            },
            chunks,
            entities,
            world_time_ms: world.world_time_ms(),
        }
    }

    /// Decodes one stored chunk back into block data.
    pub fn decode_chunk(chunk: &ChunkSnapshot) -> Result<Chunk, SnapshotError> {
        let raw = decompress_size_prepended(&chunk.data)?;
        Ok(Chunk::from_bytes(&raw)?)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Writes a snapshot to `dir`, returning the file path.
pub fn save_snapshot(dir: &Path, snapshot: &WorldSnapshot) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("snapshot_{:08}.bin", snapshot.header.snapshot_id));
    let bytes = postcard::to_allocvec(snapshot)?;
    std::fs::write(&path, &bytes)?;
    tracing::info!(
        id = snapshot.header.snapshot_id,
        tick = snapshot.header.server_tick,
        chunks = snapshot.chunks.len(),
        entities = snapshot.entities.len(),
        bytes = bytes.len(),
        "snapshot written"
    );
    Ok(path)
}

/// Reads a snapshot from a file.
pub fn load_snapshot(path: &Path) -> Result<WorldSnapshot, SnapshotError> {
    let bytes = std::fs::read(path)?;
    Ok(postcard::from_bytes(&bytes)?)
}

/// Deletes the oldest snapshot files so at most `max_retained` remain.
/// Relies on the zero-padded id in the file name sorting chronologically.
pub fn prune_snapshots(dir: &Path, max_retained: usize) -> Result<(), SnapshotError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("snapshot_") && n.ends_with(".bin"))
        })
        .collect();
    files.sort();

    if files.len() > max_retained {
        let excess = files.len() - max_retained;
        for path in files.into_iter().take(excess) {
            tracing::debug!(path = %path.display(), "pruning old snapshot");
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_world::{BlockPos, BlockState};

    fn test_world() -> (ServerWorld, EntityRegistry) {
        let mut world = ServerWorld::new();
        world.load_chunk(ChunkCoord::new(0, 0), Chunk::filled(BlockState::STONE));
        world.load_chunk(ChunkCoord::new(1, 0), Chunk::filled(BlockState::AIR));
        world
            .set_block(BlockPos { x: 1, y: 2, z: 3 }, BlockState::DIRT)
            .unwrap();
        let mut registry = EntityRegistry::new();
        registry.spawn(EntityKind::Mob, None, [1_000, 64_000, 1_000]);
        (world, registry)
    }

    #[test]
    fn test_capture_includes_all_chunks_and_entities() {
        let (world, registry) = test_world();
        let snapshot = WorldSnapshot::capture(&world, &registry, 1);
        assert_eq!(snapshot.header.version, SNAPSHOT_VERSION);
        assert_eq!(snapshot.chunks.len(), 2);
        assert_eq!(snapshot.entities.len(), 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (world, registry) = test_world();
        let snapshot = WorldSnapshot::capture(&world, &registry, 7);

        let path = save_snapshot(dir.path(), &snapshot).unwrap();
        let loaded = load_snapshot(&path).unwrap();
        assert_eq!(loaded.header.snapshot_id, 7);
        assert_eq!(loaded.chunks.len(), 2);

        // The edited block survives the compress/encode cycle.
        let stored = loaded
            .chunks
            .iter()
            .find(|c| c.coord == ChunkCoord::new(0, 0))
            .unwrap();
        let chunk = WorldSnapshot::decode_chunk(stored).unwrap();
        assert_eq!(
            chunk.get(BlockPos { x: 1, y: 2, z: 3 }.local()),
            BlockState::DIRT
        );
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let (world, registry) = test_world();
        for id in 1..=5 {
            let snapshot = WorldSnapshot::capture(&world, &registry, id);
            save_snapshot(dir.path(), &snapshot).unwrap();
        }

        prune_snapshots(dir.path(), 2).unwrap();
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["snapshot_00000004.bin", "snapshot_00000005.bin"]);
    }
}
