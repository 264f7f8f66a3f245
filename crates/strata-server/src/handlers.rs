//! Inbound event dispatch: the bridge from transport events to simulation
//! state. Everything here runs on the simulation thread with exclusive
//! access to [`SimState`]; any send failure tears down exactly the failing
//! connection.

use strata_net::{NetEvent, PeerSender};
use strata_protocol::messages::{
    ChunkUnload, Login, LoginOk, LoginRejected, PlayerMove, Pong,
};
use strata_protocol::{Message, PROTOCOL_VERSION};
use strata_sync::chunk_interest::chunk_payload;
use strata_sync::{PacketSink, Session, SessionState, SinkError};
use strata_world::{BLOCK_SIZE_MM, CHUNK_SIZE, ChunkCoord, ClientId, EntityKind};

use crate::tick::SimState;

/// [`PacketSink`] over a live connection's writer queue.
pub struct NetSink {
    sender: PeerSender,
}

impl NetSink {
    /// Wraps a transport sender.
    pub fn new(sender: PeerSender) -> Self {
        Self { sender }
    }
}

impl PacketSink for NetSink {
    fn send(&mut self, msg: &Message) -> Result<(), SinkError> {
        self.sender
            .send(msg)
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

/// Hard bound on client-supplied coordinates, one million kilometres per
/// axis. Keeps every chunk coordinate derived from a position inside `i32`.
const POS_LIMIT_MM: i64 = 1_000_000_000_000;

fn clamp_pos(pos: [i64; 3]) -> [i64; 3] {
    pos.map(|axis| axis.clamp(-POS_LIMIT_MM, POS_LIMIT_MM))
}

/// The chunk a millimetre position falls in.
pub fn chunk_of_mm(pos: [i64; 3]) -> ChunkCoord {
    let span = i64::from(CHUNK_SIZE) * BLOCK_SIZE_MM;
    ChunkCoord::new(
        pos[0].div_euclid(span) as i32,
        pos[2].div_euclid(span) as i32,
    )
}

/// Applies one transport event to the simulation.
pub fn handle_event(state: &mut SimState, event: NetEvent) {
    match event {
        NetEvent::Connected { id, sender, addr } => {
            tracing::info!(?id, %addr, "session created");
            state.sessions.insert(Session::new(
                id,
                state.config.render_distance,
                Box::new(NetSink::new(sender)),
            ));
        }
        NetEvent::Message { id, msg } => {
            if let Err(e) = handle_message(state, id, msg) {
                tracing::warn!(?id, error = %e, "send failed, dropping client");
                disconnect_client(state, id);
            }
        }
        NetEvent::Disconnected { id } => disconnect_client(state, id),
    }
}

fn handle_message(state: &mut SimState, id: ClientId, msg: Message) -> Result<(), SinkError> {
    match msg {
        Message::Login(login) => handle_login(state, id, login),
        Message::PlayerMove(mv) => handle_move(state, id, mv),
        Message::ActionSubmit(submit) => {
            let tick = state.world.tick();
            let Some(session) = state.sessions.get_mut(id) else {
                return Ok(());
            };
            if !session.is_playing() {
                return Ok(());
            }
            let outcome = state.reconciler.handle_submit(
                session,
                &mut state.world,
                &mut state.chunks,
                &submit,
                tick,
            )?;
            tracing::trace!(?id, action = submit.action_id, ?outcome, "action handled");
            Ok(())
        }
        Message::ResyncAck => {
            if let Some(session) = state.sessions.get_mut(id) {
                state.reconciler.handle_resync_ack(session);
            }
            Ok(())
        }
        Message::Pong(pong) => handle_pong(state, id, pong),
        Message::Disconnect(notice) => {
            tracing::info!(?id, reason = %notice.reason, "client requested disconnect");
            disconnect_client(state, id);
            Ok(())
        }
        other => {
            tracing::warn!(?id, msg = ?other, "unexpected message from client");
            Ok(())
        }
    }
}

fn handle_login(state: &mut SimState, id: ClientId, login: Login) -> Result<(), SinkError> {
    let server_tick = state.world.tick();
    let spawn_pos = state.config.spawn_pos_mm;
    let Some(session) = state.sessions.get_mut(id) else {
        return Ok(());
    };

    if session.state != SessionState::Authenticating {
        tracing::warn!(?id, "duplicate login ignored");
        return Ok(());
    }
    if login.protocol_version != PROTOCOL_VERSION {
        session.send(&Message::LoginRejected(LoginRejected {
            reason: format!(
                "protocol version {} not supported (server speaks {})",
                login.protocol_version, PROTOCOL_VERSION
            ),
        }))?;
        disconnect_client(state, id);
        return Ok(());
    }
    let trimmed = login.player_name.trim();
    if trimmed.is_empty() || trimmed.len() > 32 {
        session.send(&Message::LoginRejected(LoginRejected {
            reason: "player name must be 1-32 characters".to_string(),
        }))?;
        disconnect_client(state, id);
        return Ok(());
    }

    let name = login.player_name.clone();
    session.player_name = login.player_name;
    session.state = SessionState::Playing;
    session.pos = spawn_pos;

    let entity_id = state
        .registry
        .spawn(EntityKind::Player, Some(id), spawn_pos);
    session.entity_id = Some(entity_id);
    session.send(&Message::LoginOk(LoginOk {
        client_id: id,
        entity_id,
        server_tick,
    }))?;
    if let Some(entity) = state.registry.get(entity_id) {
        state.entities.track(entity, &state.kinds);
    }

    tracing::info!(?id, name = %name, "player logged in");
    update_chunk_view(state, id)
}

fn handle_move(state: &mut SimState, id: ClientId, mv: PlayerMove) -> Result<(), SinkError> {
    let Some(session) = state.sessions.get_mut(id) else {
        return Ok(());
    };
    if !session.is_playing() {
        return Ok(());
    }
    let pos = clamp_pos(mv.pos);
    session.pos = pos;
    session.yaw_mrad = mv.yaw_mrad;
    session.pitch_mrad = mv.pitch_mrad;

    if let Some(entity_id) = session.entity_id
        && let Some(entity) = state.registry.get_mut(entity_id)
    {
        entity.pos = pos;
        entity.yaw_mrad = mv.yaw_mrad;
        entity.pitch_mrad = mv.pitch_mrad;
    }

    update_chunk_view(state, id)
}

fn handle_pong(state: &mut SimState, id: ClientId, pong: Pong) -> Result<(), SinkError> {
    let tick = state.world.tick();
    let tick_rate = u64::from(state.config.tick_rate.max(1));
    if let Some(session) = state.sessions.get_mut(id)
        && let Some(pending) = session.pending_ping
    {
        if pending.nonce == pong.nonce {
            let elapsed_ticks = tick.saturating_sub(pending.sent_tick);
            session.rtt_ms = Some((elapsed_ticks * 1000 / tick_rate) as u32);
            session.pending_ping = None;
        } else {
            tracing::debug!(?id, "stale pong nonce ignored");
        }
    }
    Ok(())
}

/// Streams the chunk view: sends full data for chunks entering the client's
/// render distance and unload notices for chunks leaving it, keeping the
/// subscription state in lock-step with what the client holds.
pub fn update_chunk_view(state: &mut SimState, id: ClientId) -> Result<(), SinkError> {
    let Some(session) = state.sessions.get_mut(id) else {
        return Ok(());
    };
    let center = chunk_of_mm(session.pos);
    let rd = session.render_distance;

    let stale: Vec<ChunkCoord> = session
        .loaded_chunks
        .iter()
        .copied()
        .filter(|coord| coord.chebyshev(center) > rd)
        .collect();
    for coord in stale {
        state.chunks.unsubscribe(session, coord);
        session.send(&Message::ChunkUnload(ChunkUnload { coord }))?;
    }

    for x in (center.x - rd)..=(center.x + rd) {
        for z in (center.z - rd)..=(center.z + rd) {
            let coord = ChunkCoord::new(x, z);
            if session.loaded_chunks.contains(&coord) {
                continue;
            }
            // Chunks outside the generated world simply never stream.
            let Some(chunk) = state.world.chunk_at(coord) else {
                continue;
            };
            session.send(&Message::ChunkData(chunk_payload(coord, chunk)))?;
            state.chunks.subscribe(session, coord);
        }
    }
    Ok(())
}

/// Removes every trace of a client: session, chunk subscriptions, viewer
/// memberships, and its player entity (which despawns for everyone else).
pub fn disconnect_client(state: &mut SimState, id: ClientId) {
    let Some(mut session) = state.sessions.remove(id) else {
        return;
    };
    state.chunks.unsubscribe_all(&mut session);
    state.entities.remove_viewer(id);

    if let Some(entity_id) = session.entity_id {
        let failed = state.entities.untrack(entity_id, &mut state.sessions);
        state.registry.despawn(entity_id);
        for client in failed {
            disconnect_client(state, client);
        }
    }
    tracing::info!(?id, name = %session.player_name, "session removed");
}
