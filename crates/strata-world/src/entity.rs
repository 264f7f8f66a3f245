//! Entities, the entity registry, and the per-kind behaviour table.
//!
//! Behaviour that varies by entity kind — whether motion updates include
//! velocity, whether leaving a viewer's range despawns the entity, and how
//! kind-specific spawn extras are serialized — is resolved **once** when an
//! entity is registered for tracking, via [`KindTable`]. Nothing in the hot
//! path inspects kinds per message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ClientId;

// ---------------------------------------------------------------------------
// Ids and kinds
// ---------------------------------------------------------------------------

/// Unique network identifier for an entity, allocated by the server from a
/// monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// The coarse classification of an entity, driving per-kind sync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A player avatar, controlled by a connection.
    Player,
    /// A server-driven mobile entity.
    Mob,
    /// A dropped item stack.
    Item,
    /// A fast-moving projectile animated client-side from velocity.
    Projectile,
    /// A static decorative entity.
    Decoration,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Kind-independent serializable entity state, shipped as a full snapshot
/// when an entity becomes visible to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStateData {
    /// Current health.
    pub health: u16,
    /// Kind-interpreted status flags.
    pub flags: u8,
}

impl Default for EntityStateData {
    fn default() -> Self {
        Self {
            health: 20,
            flags: 0,
        }
    }
}

/// A live entity in the authoritative world.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Network identifier.
    pub id: EntityId,
    /// Kind, fixed at spawn.
    pub kind: EntityKind,
    /// The connection controlling this entity, if any (players).
    pub controller: Option<ClientId>,
    /// Position in millimetres.
    pub pos: [i64; 3],
    /// Yaw in milliradians.
    pub yaw_mrad: i32,
    /// Pitch in milliradians.
    pub pitch_mrad: i32,
    /// Velocity in mm/tick.
    pub vel: [i32; 3],
    /// Serializable kind-independent state.
    pub state: EntityStateData,
}

impl Entity {
    /// Serializes the entity's state snapshot for the wire.
    pub fn state_bytes(&self) -> Vec<u8> {
        // EntityStateData is a fixed-size POD; postcard cannot fail on it.
        postcard::to_allocvec(&self.state).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// KindTable
// ---------------------------------------------------------------------------

/// Serializer hook producing the kind-specific opaque blob carried by a
/// spawn message.
pub type SpawnExtraFn = fn(&Entity) -> Vec<u8>;

/// Per-kind sync policy, looked up once at tracking time.
#[derive(Clone, Copy)]
pub struct KindBehavior {
    /// Whether motion updates for this kind are followed by a velocity
    /// message (kinds that clients animate from velocity between updates).
    pub sends_velocity: bool,
    /// Whether leaving a viewer's interest radius is exempt from the
    /// despawn notice. Actual destruction always despawns.
    pub despawn_exempt: bool,
    /// Kind-specific spawn-extra serializer.
    pub spawn_extra: SpawnExtraFn,
}

fn no_extra(_: &Entity) -> Vec<u8> {
    Vec::new()
}

fn controller_extra(entity: &Entity) -> Vec<u8> {
    postcard::to_allocvec(&entity.controller).unwrap_or_default()
}

/// Registry of [`KindBehavior`] per [`EntityKind`], supplied by the game
/// layer. The default table covers the built-in kinds.
pub struct KindTable {
    behaviors: HashMap<EntityKind, KindBehavior>,
}

impl Default for KindTable {
    fn default() -> Self {
        let mut table = Self {
            behaviors: HashMap::new(),
        };
        // Players never range-despawn (the surrounding game keeps remote
        // players visible) and their motion comes from inputs, not velocity.
        table.register(
            EntityKind::Player,
            KindBehavior {
                sends_velocity: false,
                despawn_exempt: true,
                spawn_extra: controller_extra,
            },
        );
        table.register(
            EntityKind::Mob,
            KindBehavior {
                sends_velocity: false,
                despawn_exempt: false,
                spawn_extra: no_extra,
            },
        );
        table.register(
            EntityKind::Item,
            KindBehavior {
                sends_velocity: true,
                despawn_exempt: false,
                spawn_extra: no_extra,
            },
        );
        table.register(
            EntityKind::Projectile,
            KindBehavior {
                sends_velocity: true,
                despawn_exempt: false,
                spawn_extra: no_extra,
            },
        );
        table.register(
            EntityKind::Decoration,
            KindBehavior {
                sends_velocity: false,
                despawn_exempt: false,
                spawn_extra: no_extra,
            },
        );
        table
    }
}

impl KindTable {
    /// Registers (or overrides) the behaviour for a kind.
    pub fn register(&mut self, kind: EntityKind, behavior: KindBehavior) {
        self.behaviors.insert(kind, behavior);
    }

    /// Looks up the behaviour for a kind. Unregistered kinds fall back to
    /// the most conservative policy.
    pub fn behavior(&self, kind: EntityKind) -> KindBehavior {
        self.behaviors.get(&kind).copied().unwrap_or(KindBehavior {
            sends_velocity: false,
            despawn_exempt: false,
            spawn_extra: no_extra,
        })
    }
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// All live entities, keyed by [`EntityId`]. Owned by the simulation thread.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, Entity>,
    next_id: u64,
}

impl EntityRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns an entity at a position, returning its id.
    pub fn spawn(
        &mut self,
        kind: EntityKind,
        controller: Option<ClientId>,
        pos: [i64; 3],
    ) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        self.entities.insert(
            id,
            Entity {
                id,
                kind,
                controller,
                pos,
                yaw_mrad: 0,
                pitch_mrad: 0,
                vel: [0, 0, 0],
                state: EntityStateData::default(),
            },
        );
        id
    }

    /// Removes an entity, returning it if it existed.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Borrows an entity.
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutably borrows an entity.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Iterates over all live entities.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Mutably iterates over all live entities.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entities are live.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
