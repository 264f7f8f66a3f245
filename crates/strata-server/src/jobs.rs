//! Periodic maintenance that runs on tick cadences: heartbeats, clock
//! broadcasts, autosave, and the client-view consistency audit.
//!
//! Each job keeps its own elapsed counter, so intervals are independent and
//! a missed deadline fires on the next step instead of being skipped.

use strata_protocol::Message;
use strata_protocol::messages::{ChunkUnload, ClockSync, Ping, PingUpdate};
use strata_sync::session::PendingPing;
use strata_world::{ChunkCoord, ClientId};

use crate::config::SnapshotConfig;
use crate::snapshot::{WorldSnapshot, prune_snapshots, save_snapshot};
use crate::tick::SimState;

/// Ticks between heartbeat pings (2 s at 60 Hz).
pub const PING_INTERVAL_TICKS: u64 = 120;

/// Ticks between clock broadcasts (10 s at 60 Hz).
pub const CLOCK_SYNC_INTERVAL_TICKS: u64 = 600;

/// Ticks between consistency audits (20 s at 60 Hz).
pub const AUDIT_INTERVAL_TICKS: u64 = 1_200;

/// Counter for one fixed-cadence job.
#[derive(Debug)]
pub struct PeriodicJob {
    interval: u64,
    elapsed: u64,
}

impl PeriodicJob {
    /// Creates a job that first fires `interval` ticks from now.
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            elapsed: 0,
        }
    }

    /// Advances the counter by one tick; `true` when the job should run.
    pub fn due(&mut self) -> bool {
        self.elapsed += 1;
        if self.elapsed >= self.interval {
            self.elapsed = 0;
            true
        } else {
            false
        }
    }
}

/// Sends a heartbeat ping to every playing client and broadcasts the RTTs
/// measured in the previous round. Returns clients whose sink failed.
pub fn run_ping(state: &mut SimState, next_nonce: &mut u32) -> Vec<ClientId> {
    let tick = state.world.tick();
    let mut failed = Vec::new();

    let pings: Vec<(ClientId, u32)> = state
        .sessions
        .iter()
        .filter(|s| s.is_playing())
        .filter_map(|s| s.rtt_ms.map(|rtt| (s.client_id, rtt)))
        .collect();
    let update = (!pings.is_empty()).then(|| Message::PingUpdate(PingUpdate { pings }));

    for id in state.sessions.ids() {
        let Some(session) = state.sessions.get_mut(id) else {
            continue;
        };
        if !session.is_playing() {
            continue;
        }
        *next_nonce = next_nonce.wrapping_add(1);
        let nonce = *next_nonce;
        if session.send(&Message::Ping(Ping { nonce })).is_err() {
            failed.push(id);
            continue;
        }
        session.pending_ping = Some(PendingPing {
            nonce,
            sent_tick: tick,
        });
        if let Some(update) = &update
            && session.send(update).is_err()
        {
            failed.push(id);
        }
    }
    failed
}

/// Broadcasts the server tick and world time so clients can align their
/// clocks. Returns clients whose sink failed.
pub fn run_clock_sync(state: &mut SimState) -> Vec<ClientId> {
    let msg = Message::ClockSync(ClockSync {
        server_tick: state.world.tick(),
        world_time_ms: state.world.world_time_ms(),
    });
    let mut failed = Vec::new();
    for id in state.sessions.ids() {
        let Some(session) = state.sessions.get_mut(id) else {
            continue;
        };
        if !session.is_playing() {
            continue;
        }
        if session.send(&msg).is_err() {
            failed.push(id);
        }
    }
    failed
}

/// Takes a world snapshot and prunes old files. Failures are logged, never
/// fatal: a missed autosave must not take the server down.
pub fn run_autosave(state: &SimState, config: &SnapshotConfig, next_id: &mut u64) {
    let snapshot = WorldSnapshot::capture(&state.world, &state.registry, *next_id);
    match save_snapshot(&config.dir, &snapshot) {
        Ok(_) => {
            *next_id += 1;
            if let Err(e) = prune_snapshots(&config.dir, config.max_retained) {
                tracing::warn!(error = %e, "snapshot pruning failed");
            }
        }
        Err(e) => tracing::error!(error = %e, "autosave failed"),
    }
}

/// Cross-checks every client's view against the world and the subscription
/// state, repairing drift. Both directions are checked: chunks the client
/// holds that no longer exist, and held chunks the tracker forgot.
pub fn run_audit(state: &mut SimState) -> Vec<ClientId> {
    let mut failed = Vec::new();
    for id in state.sessions.ids() {
        let Some(session) = state.sessions.get_mut(id) else {
            continue;
        };

        let vanished: Vec<ChunkCoord> = session
            .loaded_chunks
            .iter()
            .copied()
            .filter(|&coord| !state.world.has_chunk(coord))
            .collect();
        for coord in vanished {
            tracing::warn!(?id, ?coord, "client holds an unloaded chunk, correcting");
            state.chunks.unsubscribe(session, coord);
            if session
                .send(&Message::ChunkUnload(ChunkUnload { coord }))
                .is_err()
            {
                failed.push(id);
                break;
            }
        }

        let untracked: Vec<ChunkCoord> = session
            .loaded_chunks
            .iter()
            .copied()
            .filter(|&coord| !state.chunks.is_subscribed(id, coord))
            .collect();
        for coord in untracked {
            tracing::warn!(?id, ?coord, "subscription missing for held chunk, repairing");
            state.chunks.subscribe(session, coord);
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_sync::session::{BufferSink, Session, SessionState};
    use strata_world::{BlockState, Chunk};

    use crate::config::SimulationConfig;
    use crate::tick::SimState;

    #[test]
    fn test_audit_repairs_client_view_drift() {
        let mut state = SimState::new(SimulationConfig::default());
        state
            .world
            .load_chunk(ChunkCoord::new(0, 0), Chunk::filled(BlockState::STONE));

        let sink = BufferSink::new();
        let mut session = Session::new(ClientId(1), 8, Box::new(sink.clone()));
        session.state = SessionState::Playing;
        // One held chunk the world no longer has, one the tracker forgot.
        session.loaded_chunks.insert(ChunkCoord::new(9, 9));
        session.loaded_chunks.insert(ChunkCoord::new(0, 0));
        state.sessions.insert(session);

        let failed = run_audit(&mut state);
        assert!(failed.is_empty());

        let session = state.sessions.get(ClientId(1)).unwrap();
        assert!(!session.loaded_chunks.contains(&ChunkCoord::new(9, 9)));
        assert!(session.loaded_chunks.contains(&ChunkCoord::new(0, 0)));
        assert!(state.chunks.is_subscribed(ClientId(1), ChunkCoord::new(0, 0)));
        assert_eq!(
            sink.take(),
            vec![Message::ChunkUnload(ChunkUnload {
                coord: ChunkCoord::new(9, 9)
            })]
        );
    }

    #[test]
    fn test_periodic_job_fires_on_interval() {
        let mut job = PeriodicJob::new(3);
        assert!(!job.due());
        assert!(!job.due());
        assert!(job.due());
        assert!(!job.due());
        assert!(!job.due());
        assert!(job.due());
    }

    #[test]
    fn test_zero_interval_clamps_to_every_tick() {
        let mut job = PeriodicJob::new(0);
        assert!(job.due());
        assert!(job.due());
    }
}
