//! End-to-end simulation scenarios: transport events in, decoded wire
//! messages out, with no sockets involved.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::mpsc;

use strata_net::{NetEvent, PeerSender};
use strata_protocol::messages::{ActionSubmit, Login, PlayerMove};
use strata_protocol::{ClientAction, ItemStack, Message, PROTOCOL_VERSION, deserialize_message};
use strata_server::{ServerConfig, TickLoop};
use strata_sync::chunk_interest::decompress_chunk;
use strata_world::{BlockPos, BlockState, Chunk, ClientId, EntityKind};

struct Harness {
    tick_loop: TickLoop,
    events: mpsc::Sender<NetEvent>,
}

struct Client {
    id: ClientId,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl Harness {
    fn new() -> Self {
        let mut config = ServerConfig::default();
        config.simulation.world_radius_chunks = 1;
        config.snapshot.enabled = false;
        let (events, rx) = mpsc::channel(512);
        Self {
            tick_loop: TickLoop::new(&config, rx, Arc::new(AtomicBool::new(false))),
            events,
        }
    }

    fn connect_and_login(&mut self, id: u64, name: &str) -> Client {
        let id = ClientId(id);
        let (sender, rx) = PeerSender::channel();
        self.events
            .try_send(NetEvent::Connected {
                id,
                sender,
                addr: "127.0.0.1:40000".parse().unwrap(),
            })
            .unwrap();
        self.send(
            id,
            Message::Login(Login {
                player_name: name.to_string(),
                protocol_version: PROTOCOL_VERSION,
            }),
        );
        self.tick_loop.step();
        Client { id, rx }
    }

    fn send(&self, id: ClientId, msg: Message) {
        self.events.try_send(NetEvent::Message { id, msg }).unwrap();
    }

    fn submit(&self, client: &Client, action_id: u32, action: ClientAction) {
        self.send(
            client.id,
            Message::ActionSubmit(ActionSubmit { action_id, action }),
        );
    }

    fn move_to(&self, client: &Client, pos: [i64; 3]) {
        self.send(
            client.id,
            Message::PlayerMove(PlayerMove {
                pos,
                yaw_mrad: 0,
                pitch_mrad: 0,
            }),
        );
    }
}

impl Client {
    fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(bytes) = self.rx.try_recv() {
            out.push(deserialize_message(&bytes).unwrap());
        }
        out
    }
}

fn acks(messages: &[Message]) -> Vec<(u32, bool)> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::ActionAck(a) => Some((a.action_id, a.accepted)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_login_streams_world_view() {
    let mut harness = Harness::new();
    let mut client = harness.connect_and_login(1, "Alice");

    let messages = client.drain();
    assert!(matches!(messages[0], Message::LoginOk(_)));
    let chunk_count = messages
        .iter()
        .filter(|m| matches!(m, Message::ChunkData(_)))
        .count();
    // The whole 3x3 bootstrap world fits inside the render distance.
    assert_eq!(chunk_count, 9);
}

#[test]
fn test_blank_name_is_rejected() {
    let mut harness = Harness::new();
    let mut client = harness.connect_and_login(1, "   ");

    let messages = client.drain();
    assert!(matches!(messages[0], Message::LoginRejected(_)));
    assert!(harness.tick_loop.state.sessions.get(client.id).is_none());
}

#[test]
fn test_break_beyond_reach_is_rejected_and_reverted() {
    let mut harness = Harness::new();
    let mut client = harness.connect_and_login(1, "Alice");
    let _ = client.drain();

    // Start the break close to the target block, then walk out to 8.2 m
    // before finishing; the reach limit is 7.5 m.
    let target = BlockPos { x: 2, y: 63, z: 0 };
    harness.submit(&client, 1, ClientAction::StartBreak { pos: target });
    harness.tick_loop.step();
    assert_eq!(acks(&client.drain()), vec![(1, true)]);

    harness.move_to(&client, [2_500 + 8_200, 63_500, 500]);
    harness.submit(&client, 2, ClientAction::FinishBreak { pos: target });
    harness.tick_loop.step();

    let messages = client.drain();
    assert_eq!(acks(&messages), vec![(2, false)]);
    assert!(messages.iter().any(|m| matches!(
        m,
        Message::BlockChange(c) if c.pos == target && c.block == BlockState::DIRT
    )));
    assert_eq!(
        harness.tick_loop.state.world.block_at(target),
        Some(BlockState::DIRT)
    );
}

#[test]
fn test_edit_burst_collapses_to_one_resend() {
    let mut harness = Harness::new();
    let mut editor = harness.connect_and_login(1, "Alice");
    let mut observer = harness.connect_and_login(2, "Bob");
    let _ = editor.drain();
    let _ = observer.drain();

    // 20 placements into air above the surface, all in chunk (0, 0) and all
    // within reach of the spawn point.
    let mut action_id = 0;
    for x in 0..5 {
        for z in 0..4 {
            action_id += 1;
            harness.submit(
                &editor,
                action_id,
                ClientAction::PlaceBlock {
                    pos: BlockPos { x, y: 64, z },
                    block: BlockState::STONE,
                },
            );
        }
    }
    harness.tick_loop.step();

    let messages = observer.drain();
    let resends: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::ChunkResend(payload) => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(resends.len(), 1);
    assert!(!messages.iter().any(|m| matches!(
        m,
        Message::BlockChange(_) | Message::MultiBlockChange(_)
    )));

    // The resend carries the post-edit chunk.
    let raw = decompress_chunk(resends[0]).unwrap();
    let chunk = Chunk::from_bytes(&raw).unwrap();
    assert_eq!(
        chunk.get(BlockPos { x: 4, y: 64, z: 3 }.local()),
        BlockState::STONE
    );

    // The editor got every placement accepted.
    let editor_acks = acks(&editor.drain());
    assert_eq!(editor_acks.len(), 20);
    assert!(editor_acks.iter().all(|&(_, accepted)| accepted));
}

#[test]
fn test_velocity_updates_follow_kind_policy() {
    let mut harness = Harness::new();
    let mut client = harness.connect_and_login(1, "Alice");
    let _ = client.drain();

    let state = &mut harness.tick_loop.state;
    let projectile = state
        .registry
        .spawn(EntityKind::Projectile, None, [2_000, 65_000, 0]);
    let decoration = state
        .registry
        .spawn(EntityKind::Decoration, None, [4_000, 65_000, 0]);
    for id in [projectile, decoration] {
        let entity = state.registry.get(id).unwrap().clone();
        state.entities.track(&entity, &state.kinds);
    }

    // Step across a viewer-recompute boundary so the client sees both.
    for _ in 0..60 {
        harness.tick_loop.step();
    }
    let spawned = client
        .drain()
        .iter()
        .filter(|m| matches!(m, Message::EntitySpawn(_)))
        .count();
    assert_eq!(spawned, 2);

    // The projectile flies on its velocity; the decoration is pushed the
    // same distance directly.
    let state = &mut harness.tick_loop.state;
    state.registry.get_mut(projectile).unwrap().vel = [300, 0, 0];
    state.registry.get_mut(decoration).unwrap().pos[0] += 300;
    harness.tick_loop.step();

    let messages = client.drain();
    let velocity_ids: Vec<_> = messages
        .iter()
        .filter_map(|m| match m {
            Message::EntityVelocity(v) => Some(v.id),
            _ => None,
        })
        .collect();
    assert_eq!(velocity_ids, vec![projectile]);
    let deltas = messages
        .iter()
        .filter(|m| matches!(m, Message::EntityPositionDelta(_)))
        .count();
    assert_eq!(deltas, 2);
}

#[test]
fn test_extreme_move_is_contained() {
    let mut harness = Harness::new();
    let mut client = harness.connect_and_login(1, "Alice");
    let _ = client.drain();

    // A hostile client reporting the far corner of i64 space must not take
    // the simulation down; it just ends up very far away.
    harness.move_to(&client, [i64::MAX, i64::MAX, i64::MIN]);
    for _ in 0..60 {
        harness.tick_loop.step();
    }

    harness.submit(
        &client,
        1,
        ClientAction::PlaceBlock {
            pos: BlockPos { x: 0, y: 64, z: 0 },
            block: BlockState::STONE,
        },
    );
    harness.tick_loop.step();

    let messages = client.drain();
    assert_eq!(acks(&messages), vec![(1, false)]);
    assert!(harness.tick_loop.state.sessions.get(client.id).is_some());
    assert_eq!(
        harness
            .tick_loop
            .state
            .world
            .block_at(BlockPos { x: 0, y: 64, z: 0 }),
        Some(BlockState::AIR)
    );
}

#[test]
fn test_prediction_mismatch_gates_until_resync_ack() {
    let mut harness = Harness::new();
    let mut client = harness.connect_and_login(1, "Alice");
    let _ = client.drain();

    // Clicking an empty slot while predicting it will hold an item.
    harness.submit(
        &client,
        1,
        ClientAction::ClickSlot {
            window_id: 0,
            slot: 0,
            expected: Some(ItemStack { item: 1, count: 1 }),
        },
    );
    harness.tick_loop.step();
    let messages = client.drain();
    assert_eq!(acks(&messages), vec![(1, false)]);
    assert!(messages.iter().any(|m| matches!(m, Message::SlotCorrection(_))));
    assert!(messages.contains(&Message::ResyncTerminator));

    // Gated: a further action produces no reply at all.
    harness.submit(
        &client,
        2,
        ClientAction::PlaceBlock {
            pos: BlockPos { x: 0, y: 64, z: 0 },
            block: BlockState::STONE,
        },
    );
    harness.tick_loop.step();
    assert!(acks(&client.drain()).is_empty());
    assert_eq!(
        harness
            .tick_loop
            .state
            .world
            .block_at(BlockPos { x: 0, y: 64, z: 0 }),
        Some(BlockState::AIR)
    );

    // The ack lifts the gate and actions flow again.
    harness.send(client.id, Message::ResyncAck);
    harness.submit(
        &client,
        3,
        ClientAction::PlaceBlock {
            pos: BlockPos { x: 0, y: 64, z: 0 },
            block: BlockState::STONE,
        },
    );
    harness.tick_loop.step();
    assert_eq!(acks(&client.drain()), vec![(3, true)]);
}

#[test]
fn test_disconnect_cleans_up_completely() {
    let mut harness = Harness::new();
    let mut observer = harness.connect_and_login(1, "Alice");
    let leaver = harness.connect_and_login(2, "Bob");
    let _ = observer.drain();

    // Bring the observer's viewer set up to date so it sees Bob's avatar.
    for _ in 0..60 {
        harness.tick_loop.step();
    }
    let _ = observer.drain();

    harness
        .events
        .try_send(NetEvent::Disconnected { id: leaver.id })
        .unwrap();
    harness.tick_loop.step();

    // Bob's avatar despawns for Alice and the session is gone.
    let messages = observer.drain();
    assert!(
        messages
            .iter()
            .any(|m| matches!(m, Message::EntityDespawn(_)))
    );
    assert!(harness.tick_loop.state.sessions.get(leaver.id).is_none());
    assert_eq!(harness.tick_loop.state.registry.len(), 1);
}
