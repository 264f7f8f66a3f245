//! The fixed-rate simulation loop.
//!
//! One thread owns all mutable simulation state. Transport tasks reach it
//! only through the inbound event queue; replies leave through per-session
//! sinks. Each step advances the virtual clock by exactly one tick interval
//! regardless of wall time — if the loop falls behind it re-anchors its
//! deadline instead of replaying missed ticks, trading slowdown for burst
//! catch-up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use strata_net::NetEvent;
use strata_sync::{
    ChunkInterestTracker, EntityInterestTracker, SessionTable, TransactionReconciler,
};
use strata_world::{
    BlockState, CHUNK_HEIGHT, CHUNK_SIZE, Chunk, ChunkCoord, ClientId, EntityRegistry, KindTable,
    LocalPos, ServerWorld,
};

use crate::config::{ServerConfig, SimulationConfig, SnapshotConfig};
use crate::handlers;
use crate::jobs::{
    AUDIT_INTERVAL_TICKS, CLOCK_SYNC_INTERVAL_TICKS, PING_INTERVAL_TICKS, PeriodicJob, run_audit,
    run_autosave, run_clock_sync, run_ping,
};

/// Terrain surface height of the generated flat world, in blocks.
pub const SURFACE_Y: i32 = 64;

/// All state the simulation thread owns. Handlers receive this explicitly;
/// nothing reaches it through globals.
pub struct SimState {
    /// Simulation settings.
    pub config: SimulationConfig,
    /// The authoritative voxel world.
    pub world: ServerWorld,
    /// All live entities.
    pub registry: EntityRegistry,
    /// Per-kind sync policy.
    pub kinds: KindTable,
    /// Chunk subscriptions and dirty batching.
    pub chunks: ChunkInterestTracker,
    /// Entity viewer sets and motion broadcast.
    pub entities: EntityInterestTracker,
    /// All connected clients.
    pub sessions: SessionTable,
    /// Action validation.
    pub reconciler: TransactionReconciler,
}

impl SimState {
    /// Creates empty simulation state from settings.
    pub fn new(config: SimulationConfig) -> Self {
        let reconciler = TransactionReconciler::new(config.reach_mm);
        Self {
            config,
            world: ServerWorld::new(),
            registry: EntityRegistry::new(),
            kinds: KindTable::default(),
            chunks: ChunkInterestTracker::new(),
            entities: EntityInterestTracker::new(),
            sessions: SessionTable::new(),
            reconciler,
        }
    }

    /// Loads the startup world: a flat-terrain square of chunks around the
    /// origin, sized by the configured radius.
    pub fn bootstrap_world(&mut self) {
        let r = self.config.world_radius_chunks;
        let template = flat_chunk();
        for x in -r..=r {
            for z in -r..=r {
                self.world.load_chunk(ChunkCoord::new(x, z), template.clone());
            }
        }
        tracing::info!(
            chunks = (2 * r + 1) * (2 * r + 1),
            "world bootstrapped"
        );
    }
}

/// A flat terrain chunk: stone up to four blocks below the surface, dirt to
/// the surface, air above.
pub fn flat_chunk() -> Chunk {
    let mut chunk = Chunk::filled(BlockState::AIR);
    for y in 0..SURFACE_Y.min(CHUNK_HEIGHT) {
        let block = if y < SURFACE_Y - 4 {
            BlockState::STONE
        } else {
            BlockState::DIRT
        };
        for x in 0..CHUNK_SIZE {
            for z in 0..CHUNK_SIZE {
                chunk.set(
                    LocalPos {
                        x: x as u8,
                        y: y as u8,
                        z: z as u8,
                    },
                    block,
                );
            }
        }
    }
    chunk
}

/// The fixed-rate scheduler driving [`SimState`].
pub struct TickLoop {
    /// Simulation state, owned by this loop.
    pub state: SimState,
    events: mpsc::Receiver<NetEvent>,
    snapshot_config: SnapshotConfig,
    ping_job: PeriodicJob,
    clock_job: PeriodicJob,
    autosave_job: PeriodicJob,
    audit_job: PeriodicJob,
    next_nonce: u32,
    next_snapshot_id: u64,
    stop: Arc<AtomicBool>,
}

impl TickLoop {
    /// Builds the loop around an inbound event queue and a stop flag.
    pub fn new(
        config: &ServerConfig,
        events: mpsc::Receiver<NetEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let mut state = SimState::new(config.simulation.clone());
        state.bootstrap_world();
        Self {
            state,
            events,
            snapshot_config: config.snapshot.clone(),
            ping_job: PeriodicJob::new(PING_INTERVAL_TICKS),
            clock_job: PeriodicJob::new(CLOCK_SYNC_INTERVAL_TICKS),
            autosave_job: PeriodicJob::new(config.snapshot.interval_ticks),
            audit_job: PeriodicJob::new(AUDIT_INTERVAL_TICKS),
            next_nonce: 0,
            next_snapshot_id: 1,
            stop,
        }
    }

    /// Runs one simulation step: inbound events, world step, entity
    /// replication, chunk flush, then whichever periodic jobs are due.
    pub fn step(&mut self) {
        // 1. Drain the inbound queue completely before simulating, so every
        //    input received before this tick is reflected in it.
        loop {
            match self.events.try_recv() {
                Ok(event) => handlers::handle_event(&mut self.state, event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.stop.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        // 2. Advance the virtual clock by exactly one interval.
        let dt_ms = 1000 / u64::from(self.state.config.tick_rate.max(1));
        self.state.world.step(dt_ms);
        let tick = self.state.world.tick();

        // 3. Entity simulation and replication.
        for entity in self.state.registry.iter_mut() {
            // Player positions come from inputs, not integration.
            if entity.controller.is_some() {
                continue;
            }
            entity.pos[0] += i64::from(entity.vel[0]);
            entity.pos[1] += i64::from(entity.vel[1]);
            entity.pos[2] += i64::from(entity.vel[2]);
        }
        let failed = self
            .state
            .entities
            .tick(tick, &self.state.registry, &mut self.state.sessions);
        self.teardown(failed);

        // 4. Flush accumulated block changes.
        let failed = self
            .state
            .chunks
            .flush_all(&self.state.world, &mut self.state.sessions);
        self.teardown(failed);

        // 5. Periodic jobs, each on its own cadence.
        if self.ping_job.due() {
            let failed = run_ping(&mut self.state, &mut self.next_nonce);
            self.teardown(failed);
        }
        if self.clock_job.due() {
            let failed = run_clock_sync(&mut self.state);
            self.teardown(failed);
        }
        if self.snapshot_config.enabled && self.autosave_job.due() {
            run_autosave(&self.state, &self.snapshot_config, &mut self.next_snapshot_id);
        }
        if self.audit_job.due() {
            let failed = run_audit(&mut self.state);
            self.teardown(failed);
        }
    }

    fn teardown(&mut self, failed: Vec<ClientId>) {
        for id in failed {
            tracing::warn!(?id, "outbound queue failed, dropping client");
            handlers::disconnect_client(&mut self.state, id);
        }
    }

    /// Runs until the stop flag is set, stepping at the configured rate.
    pub fn run(mut self) {
        let tick_rate = u64::from(self.state.config.tick_rate.max(1));
        let interval = Duration::from_nanos(1_000_000_000 / tick_rate);
        let mut next = Instant::now() + interval;

        tracing::info!(tick_rate, "simulation running");
        while !self.stop.load(Ordering::Relaxed) {
            self.step();

            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
                next += interval;
            } else {
                // Fell behind: re-anchor the deadline instead of replaying
                // the missed ticks.
                next = now + interval;
            }
        }
        tracing::info!("simulation stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_world::BlockPos;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.simulation.world_radius_chunks = 1;
        config.snapshot.enabled = false;
        config
    }

    fn test_loop() -> TickLoop {
        let (_tx, rx) = mpsc::channel(8);
        TickLoop::new(&test_config(), rx, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_bootstrap_loads_square_of_chunks() {
        let tick_loop = test_loop();
        assert!(tick_loop.state.world.has_chunk(ChunkCoord::new(0, 0)));
        assert!(tick_loop.state.world.has_chunk(ChunkCoord::new(-1, 1)));
        assert!(!tick_loop.state.world.has_chunk(ChunkCoord::new(2, 0)));
    }

    #[test]
    fn test_flat_terrain_profile() {
        let tick_loop = test_loop();
        let world = &tick_loop.state.world;
        assert_eq!(
            world.block_at(BlockPos { x: 0, y: 0, z: 0 }),
            Some(BlockState::STONE)
        );
        assert_eq!(
            world.block_at(BlockPos { x: 0, y: SURFACE_Y - 1, z: 0 }),
            Some(BlockState::DIRT)
        );
        assert_eq!(
            world.block_at(BlockPos { x: 0, y: SURFACE_Y, z: 0 }),
            Some(BlockState::AIR)
        );
    }

    #[test]
    fn test_step_advances_exactly_one_tick() {
        let mut tick_loop = test_loop();
        let before = tick_loop.state.world.tick();
        tick_loop.step();
        tick_loop.step();
        assert_eq!(tick_loop.state.world.tick(), before + 2);
    }

    #[test]
    fn test_uncontrolled_entities_integrate_velocity() {
        let mut tick_loop = test_loop();
        let id = tick_loop.state.registry.spawn(
            strata_world::EntityKind::Projectile,
            None,
            [0, 70_000, 0],
        );
        tick_loop.state.registry.get_mut(id).unwrap().vel = [100, 0, -50];

        tick_loop.step();
        let entity = tick_loop.state.registry.get(id).unwrap();
        assert_eq!(entity.pos, [100, 70_000, -50]);
    }
}
