//! Per-entity viewer sets and threshold-gated motion broadcast.
//!
//! Viewer membership is recomputed on a fixed cadence against each client's
//! interest radius; in between, only motion is evaluated. Motion updates go
//! out as compact deltas against the last *transmitted* values, falling back
//! to absolute coordinates when a delta cannot represent the move. The
//! per-kind policy (velocity messages, range-despawn exemption, spawn
//! extras) is resolved once when an entity is registered, never per tick.

use std::collections::{HashMap, HashSet};

use strata_protocol::Message;
use strata_protocol::messages::{
    EntityDespawn, EntityPositionAbsolute, EntityPositionDelta, EntitySpawn, EntityStateSnapshot,
    EntityVelocity, dequantize_angle, quantize_angle,
};
use strata_world::{ClientId, Entity, EntityId, EntityRegistry, KindBehavior, KindTable, dist_sq_mm};

use crate::session::SessionTable;

/// Minimum movement (millimetres) before a position update is sent. The
/// comparison is strict: moving exactly this far sends nothing.
pub const POSITION_EPSILON_MM: i64 = 10;

/// Minimum rotation (milliradians) before a rotation-only update is sent.
pub const ROTATION_EPSILON_MRAD: i32 = 20;

/// Largest per-axis displacement a delta update can carry, one chunk extent.
/// Anything larger falls back to an absolute update.
pub const DELTA_MAX_MM: i64 = 16_000;

/// Viewer sets are recomputed every this many ticks.
pub const VIEWER_RECOMPUTE_TICKS: u64 = 60;

struct EntityInterestState {
    /// Position baseline: the exact millimetre values viewers last received.
    last_sent_pos: [i64; 3],
    /// Angle baselines, already round-tripped through quantization when the
    /// last update was a delta.
    last_sent_yaw: i32,
    last_sent_pitch: i32,
    viewers: HashSet<ClientId>,
    /// Scratch set reused by the recompute pass to avoid reallocating.
    scratch: HashSet<ClientId>,
    behavior: KindBehavior,
}

/// Tracks which clients see which entities and emits motion updates.
#[derive(Default)]
pub struct EntityInterestTracker {
    states: HashMap<EntityId, EntityInterestState>,
}

impl EntityInterestTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity for replication. Its kind policy is resolved
    /// here, once. The motion baseline starts at the entity's live state so
    /// the first update after a spawn only fires on real movement.
    pub fn track(&mut self, entity: &Entity, kinds: &KindTable) {
        self.states.insert(
            entity.id,
            EntityInterestState {
                last_sent_pos: entity.pos,
                last_sent_yaw: entity.yaw_mrad,
                last_sent_pitch: entity.pitch_mrad,
                viewers: HashSet::new(),
                scratch: HashSet::new(),
                behavior: kinds.behavior(entity.kind),
            },
        );
    }

    /// Stops replicating an entity. Every current viewer gets a despawn —
    /// destruction is not range exit, so the exemption does not apply.
    /// Returns clients whose sink failed.
    pub fn untrack(&mut self, id: EntityId, sessions: &mut SessionTable) -> Vec<ClientId> {
        let mut failed = Vec::new();
        if let Some(state) = self.states.remove(&id) {
            let msg = Message::EntityDespawn(EntityDespawn { id });
            for client in state.viewers {
                if sessions.send_to(client, &msg).is_err() {
                    failed.push(client);
                }
            }
        }
        failed
    }

    /// Whether an entity is currently tracked.
    pub fn is_tracked(&self, id: EntityId) -> bool {
        self.states.contains_key(&id)
    }

    /// Current viewers of an entity.
    pub fn viewers(&self, id: EntityId) -> Option<&HashSet<ClientId>> {
        self.states.get(&id).map(|state| &state.viewers)
    }

    /// Drops a disconnected client from every viewer set.
    pub fn remove_viewer(&mut self, client: ClientId) {
        for state in self.states.values_mut() {
            state.viewers.remove(&client);
        }
    }

    /// Runs one replication step: viewer recompute on its cadence, then the
    /// motion pass. Returns clients whose sink failed.
    pub fn tick(
        &mut self,
        tick: u64,
        registry: &EntityRegistry,
        sessions: &mut SessionTable,
    ) -> Vec<ClientId> {
        let mut failed = Vec::new();

        if tick % VIEWER_RECOMPUTE_TICKS == 0 {
            self.recompute_viewers(registry, sessions, &mut failed);
        }
        self.motion_pass(registry, sessions, &mut failed);

        failed
    }

    fn recompute_viewers(
        &mut self,
        registry: &EntityRegistry,
        sessions: &mut SessionTable,
        failed: &mut Vec<ClientId>,
    ) {
        // Session positions are fixed for the duration of the pass, so
        // snapshot them once instead of re-walking the table per entity.
        let candidates: Vec<(ClientId, [i64; 3], i64)> = sessions
            .iter()
            .filter(|s| s.is_playing())
            .map(|s| {
                let r = s.interest_radius_mm();
                (s.client_id, s.pos, r * r)
            })
            .collect();

        for (&id, state) in self.states.iter_mut() {
            let Some(entity) = registry.get(id) else {
                tracing::warn!(?id, "tracked entity missing from registry");
                continue;
            };

            state.scratch.clear();
            for &(client, pos, radius_sq) in &candidates {
                if entity.controller == Some(client) {
                    continue;
                }
                if dist_sq_mm(entity.pos, pos) <= radius_sq {
                    state.scratch.insert(client);
                }
            }

            for &client in state.scratch.iter() {
                if state.viewers.contains(&client) {
                    continue;
                }
                let spawn = Message::EntitySpawn(EntitySpawn {
                    id,
                    kind: entity.kind,
                    pos: entity.pos,
                    yaw_mrad: entity.yaw_mrad,
                    pitch_mrad: entity.pitch_mrad,
                    vel: entity.vel,
                    extra: (state.behavior.spawn_extra)(entity),
                });
                let snapshot = Message::EntityStateSnapshot(EntityStateSnapshot {
                    id,
                    data: entity.state_bytes(),
                });
                if sessions.send_to(client, &spawn).is_err()
                    || sessions.send_to(client, &snapshot).is_err()
                {
                    failed.push(client);
                }
            }

            if !state.behavior.despawn_exempt {
                let msg = Message::EntityDespawn(EntityDespawn { id });
                for &client in state.viewers.difference(&state.scratch) {
                    if sessions.send_to(client, &msg).is_err() {
                        failed.push(client);
                    }
                }
            }

            std::mem::swap(&mut state.viewers, &mut state.scratch);
        }
    }

    fn motion_pass(
        &mut self,
        registry: &EntityRegistry,
        sessions: &mut SessionTable,
        failed: &mut Vec<ClientId>,
    ) {
        for (&id, state) in self.states.iter_mut() {
            if state.viewers.is_empty() {
                continue;
            }
            let Some(entity) = registry.get(id) else {
                continue;
            };

            let moved =
                dist_sq_mm(entity.pos, state.last_sent_pos) > POSITION_EPSILON_MM * POSITION_EPSILON_MM;
            let rotated = (entity.yaw_mrad - state.last_sent_yaw).abs() > ROTATION_EPSILON_MRAD
                || (entity.pitch_mrad - state.last_sent_pitch).abs() > ROTATION_EPSILON_MRAD;
            if !moved && !rotated {
                continue;
            }
            // A rotation that quantizes to the baseline's step would put
            // identical values on the wire every tick, so it is not a change.
            if !moved
                && quantize_angle(entity.yaw_mrad) == quantize_angle(state.last_sent_yaw)
                && quantize_angle(entity.pitch_mrad) == quantize_angle(state.last_sent_pitch)
            {
                continue;
            }

            let dx = entity.pos[0].saturating_sub(state.last_sent_pos[0]);
            let dy = entity.pos[1].saturating_sub(state.last_sent_pos[1]);
            let dz = entity.pos[2].saturating_sub(state.last_sent_pos[2]);

            let msg = if dx.abs() <= DELTA_MAX_MM && dy.abs() <= DELTA_MAX_MM && dz.abs() <= DELTA_MAX_MM
            {
                let yaw_q = quantize_angle(entity.yaw_mrad);
                let pitch_q = quantize_angle(entity.pitch_mrad);
                // Deltas carry exact millimetres; angles lose precision to
                // quantization, so the baseline is what the wire carried.
                state.last_sent_pos = entity.pos;
                state.last_sent_yaw = dequantize_angle(yaw_q);
                state.last_sent_pitch = dequantize_angle(pitch_q);
                Message::EntityPositionDelta(EntityPositionDelta {
                    id,
                    dx: dx as i16,
                    dy: dy as i16,
                    dz: dz as i16,
                    yaw_q,
                    pitch_q,
                })
            } else {
                state.last_sent_pos = entity.pos;
                state.last_sent_yaw = entity.yaw_mrad;
                state.last_sent_pitch = entity.pitch_mrad;
                Message::EntityPositionAbsolute(EntityPositionAbsolute {
                    id,
                    pos: entity.pos,
                    yaw_mrad: entity.yaw_mrad,
                    pitch_mrad: entity.pitch_mrad,
                })
            };

            let velocity = state.behavior.sends_velocity.then(|| {
                Message::EntityVelocity(EntityVelocity {
                    id,
                    vel: entity.vel,
                })
            });

            for &client in state.viewers.iter() {
                if sessions.send_to(client, &msg).is_err() {
                    failed.push(client);
                    continue;
                }
                if let Some(vel_msg) = &velocity
                    && sessions.send_to(client, vel_msg).is_err()
                {
                    failed.push(client);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
