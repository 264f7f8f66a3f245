//! Chunk subscriptions and batched block-change broadcast.
//!
//! Every loaded chunk carries a subscriber set and a dirty accumulator.
//! Edits made between flushes are deduplicated per chunk; once the count
//! crosses [`ESCALATION_THRESHOLD`] the accumulator collapses to a bounding
//! box and the whole chunk is resent. Escalation is one-way within a flush
//! interval: bounds never shrink back to a per-block list.

use std::collections::{HashMap, HashSet};

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use strata_protocol::Message;
use strata_protocol::messages::{BlockChange, ChunkPayload, MultiBlockChange};
use strata_world::{BlockPos, Chunk, ChunkCoord, ClientId, LocalPos, ServerWorld};

use crate::session::{Session, SessionTable};

/// Dirty-block count at which a chunk stops tracking individual edits and
/// falls back to a full resend.
pub const ESCALATION_THRESHOLD: usize = 16;

/// Accumulated edits for one chunk since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DirtyState {
    /// Individual edited positions, deduplicated.
    Blocks(Vec<LocalPos>),
    /// Too many edits; only the affected bounding box is kept.
    Bounds { min: BlockPos, max: BlockPos },
}

#[derive(Debug, Default)]
struct ChunkInterestState {
    subscribers: HashSet<ClientId>,
    dirty: Option<DirtyState>,
}

/// Tracks which clients observe which chunks and batches block changes.
#[derive(Debug, Default)]
pub struct ChunkInterestTracker {
    states: HashMap<ChunkCoord, ChunkInterestState>,
}

/// Builds the compressed wire payload for a full chunk.
pub fn chunk_payload(coord: ChunkCoord, chunk: &Chunk) -> ChunkPayload {
    let raw = chunk.to_bytes();
    ChunkPayload {
        coord,
        uncompressed_size: raw.len() as u32,
        compressed: compress_prepend_size(&raw),
    }
}

/// Inverse of [`chunk_payload`]'s compression step.
pub fn decompress_chunk(payload: &ChunkPayload) -> Result<Vec<u8>, lz4_flex::block::DecompressError> {
    decompress_size_prepended(&payload.compressed)
}

impl ChunkInterestTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` as an observer of `coord`. Updates the session's
    /// loaded-chunk set in the same step so the two views never diverge.
    pub fn subscribe(&mut self, session: &mut Session, coord: ChunkCoord) {
        self.states
            .entry(coord)
            .or_default()
            .subscribers
            .insert(session.client_id);
        session.loaded_chunks.insert(coord);
    }

    /// Removes `session` as an observer of `coord`, mirroring the removal
    /// into the session's loaded-chunk set.
    pub fn unsubscribe(&mut self, session: &mut Session, coord: ChunkCoord) {
        if let Some(state) = self.states.get_mut(&coord) {
            state.subscribers.remove(&session.client_id);
        }
        session.loaded_chunks.remove(&coord);
    }

    /// Drops every subscription held by `session`. Used on disconnect.
    pub fn unsubscribe_all(&mut self, session: &mut Session) {
        let coords: Vec<ChunkCoord> = session.loaded_chunks.iter().copied().collect();
        for coord in coords {
            self.unsubscribe(session, coord);
        }
    }

    /// Number of clients observing `coord`.
    pub fn subscriber_count(&self, coord: ChunkCoord) -> usize {
        self.states
            .get(&coord)
            .map_or(0, |state| state.subscribers.len())
    }

    /// Whether `client` observes `coord`.
    pub fn is_subscribed(&self, client: ClientId, coord: ChunkCoord) -> bool {
        self.states
            .get(&coord)
            .is_some_and(|state| state.subscribers.contains(&client))
    }

    /// Records an edit at `local` within `coord`. Edits to chunks nobody
    /// observes are discarded immediately.
    pub fn mark_dirty(&mut self, coord: ChunkCoord, local: LocalPos) {
        let Some(state) = self.states.get_mut(&coord) else {
            return;
        };
        if state.subscribers.is_empty() {
            return;
        }

        let world = BlockPos::from_parts(coord, local);
        match &mut state.dirty {
            None => state.dirty = Some(DirtyState::Blocks(vec![local])),
            Some(DirtyState::Blocks(positions)) => {
                if positions.contains(&local) {
                    return;
                }
                positions.push(local);
                if positions.len() >= ESCALATION_THRESHOLD {
                    let mut min = BlockPos::from_parts(coord, positions[0]);
                    let mut max = min;
                    for &p in positions.iter() {
                        let w = BlockPos::from_parts(coord, p);
                        min.x = min.x.min(w.x);
                        min.y = min.y.min(w.y);
                        min.z = min.z.min(w.z);
                        max.x = max.x.max(w.x);
                        max.y = max.y.max(w.y);
                        max.z = max.z.max(w.z);
                    }
                    state.dirty = Some(DirtyState::Bounds { min, max });
                }
            }
            Some(DirtyState::Bounds { min, max }) => {
                min.x = min.x.min(world.x);
                min.y = min.y.min(world.y);
                min.z = min.z.min(world.z);
                max.x = max.x.max(world.x);
                max.y = max.y.max(world.y);
                max.z = max.z.max(world.z);
            }
        }
    }

    /// Broadcasts every accumulated edit, reading current block values from
    /// `world`, then clears all dirty state. Returns the clients whose sink
    /// failed; the caller tears those connections down.
    pub fn flush_all(&mut self, world: &ServerWorld, sessions: &mut SessionTable) -> Vec<ClientId> {
        let mut failed = Vec::new();

        for (coord, state) in self.states.iter_mut() {
            let Some(dirty) = state.dirty.take() else {
                continue;
            };

            let msg = match dirty {
                DirtyState::Blocks(positions) if positions.len() == 1 => {
                    let pos = BlockPos::from_parts(*coord, positions[0]);
                    let Some(block) = world.block_at(pos) else {
                        tracing::warn!(?coord, "dirty chunk no longer loaded, skipping flush");
                        continue;
                    };
                    Message::BlockChange(BlockChange { pos, block })
                }
                DirtyState::Blocks(positions) => {
                    let Some(chunk) = world.chunk_at(*coord) else {
                        tracing::warn!(?coord, "dirty chunk no longer loaded, skipping flush");
                        continue;
                    };
                    let blocks = positions.iter().map(|&p| chunk.get(p)).collect();
                    Message::MultiBlockChange(MultiBlockChange {
                        chunk: *coord,
                        positions,
                        blocks,
                    })
                }
                DirtyState::Bounds { .. } => {
                    let Some(chunk) = world.chunk_at(*coord) else {
                        tracing::warn!(?coord, "dirty chunk no longer loaded, skipping flush");
                        continue;
                    };
                    Message::ChunkResend(chunk_payload(*coord, chunk))
                }
            };

            for &client in state.subscribers.iter() {
                if sessions.send_to(client, &msg).is_err() {
                    failed.push(client);
                }
            }
        }

        // Drop entries that have neither subscribers nor pending edits.
        self.states
            .retain(|_, state| !state.subscribers.is_empty() || state.dirty.is_some());

        failed
    }

    /// Number of individually tracked dirty blocks in `coord`, if the chunk
    /// is still below the escalation threshold.
    #[cfg(test)]
    fn dirty_len(&self, coord: ChunkCoord) -> usize {
        match self.states.get(&coord).and_then(|s| s.dirty.as_ref()) {
            Some(DirtyState::Blocks(positions)) => positions.len(),
            _ => 0,
        }
    }

    #[cfg(test)]
    fn in_bounds_mode(&self, coord: ChunkCoord) -> bool {
        matches!(
            self.states.get(&coord).and_then(|s| s.dirty.as_ref()),
            Some(DirtyState::Bounds { .. })
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
