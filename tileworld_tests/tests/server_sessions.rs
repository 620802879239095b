//! Session lifecycle, Move diffing and protocol enforcement on the server.

use bytes::Bytes;
use tileworld_server::{server::player_of, transport::TransportEvent, GameServer};
use tileworld_shared::{
    component::CollisionState,
    math::Vec2,
    net::{build, SessionId},
    protocol::{Create, Delete, EntityPosition, MoveBatch, NetMsg, Packet, Position, Use},
};
use tileworld_tests::{fixture_config, fixture_storage, Harness, RecordingTransport, SPAWN_A};

fn server() -> anyhow::Result<GameServer<RecordingTransport>> {
    Ok(GameServer::new(
        fixture_config(),
        fixture_storage()?,
        RecordingTransport::new(),
    ))
}

fn open(server: &mut GameServer<RecordingTransport>, id: u32) -> SessionId {
    let id = SessionId(id);
    server.transport_mut().sessions.insert(id);
    server.handle_event(TransportEvent::Open(id));
    id
}

fn report(position: Vec2) -> anyhow::Result<Bytes> {
    Position {
        position,
        cstate: CollisionState::Ground,
    }
    .encode()
}

#[test]
fn join_and_leave_are_announced_to_the_level() -> anyhow::Result<()> {
    let mut h = Harness::new()?;
    let a = h.connect()?;
    let b = h.connect()?;

    let initial_b = h
        .received(b)
        .into_iter()
        .find_map(|m| match m {
            NetMsg::Initial(i) => Some(i.clone()),
            _ => None,
        })
        .expect("initial for b");
    assert_eq!(initial_b.player, player_of(b));
    assert_eq!(initial_b.level, "a");
    assert_eq!(initial_b.position, SPAWN_A);
    assert_eq!(
        initial_b.entities,
        vec![EntityPosition {
            id: player_of(a),
            position: SPAWN_A,
        }]
    );
    assert!(h.received(a).contains(&&NetMsg::Create(Create {
        id: player_of(b),
        position: SPAWN_A,
    })));

    h.idle(1)?;
    assert!(h.client(a)?.registry().is_alive(player_of(b)));

    h.take_delivered();
    h.disconnect(b)?;
    assert_eq!(h.received(a), vec![&NetMsg::Delete(Delete { id: player_of(b) })]);
    assert!(!h.server.registry().is_alive(player_of(b)));
    assert_eq!(h.server.session_count(), 1);

    h.idle(1)?;
    assert!(!h.client(a)?.registry().is_alive(player_of(b)));
    Ok(())
}

#[test]
fn only_moved_entities_are_batched() -> anyhow::Result<()> {
    let mut server = server()?;
    let a = open(&mut server, 0);
    let b = open(&mut server, 1);
    server.transport_mut().take_sent();

    server.on_message(a, report(Vec2::new(80.0, 88.0))?);
    server.synchronize();

    let sent = server.transport_mut().take_messages()?;
    assert_eq!(sent.len(), 2, "one batch per session in the level");
    for (_, msg) in &sent {
        let NetMsg::Move(MoveBatch { entities }) = msg else {
            panic!("expected a move batch, got {msg:?}");
        };
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, player_of(a));
        assert_eq!(entities[0].position, Vec2::new(80.0, 88.0));
    }
    let mut to: Vec<_> = sent.iter().map(|(id, _)| *id).collect();
    to.sort();
    assert_eq!(to, vec![a, b]);

    // Nothing moved since: nothing is sent.
    server.synchronize();
    assert!(server.transport_mut().take_sent().is_empty());
    Ok(())
}

#[test]
fn reporting_the_same_position_is_not_a_move() -> anyhow::Result<()> {
    let mut server = server()?;
    let a = open(&mut server, 0);
    server.transport_mut().take_sent();

    server.on_message(a, report(SPAWN_A)?);
    server.synchronize();
    assert!(server.transport_mut().take_sent().is_empty());
    Ok(())
}

#[test]
fn sync_without_sessions_only_counts_the_tick() -> anyhow::Result<()> {
    let mut server = server()?;
    for _ in 0..3 {
        server.synchronize();
    }
    assert_eq!(server.tick(), 3);
    assert!(server.transport_mut().take_sent().is_empty());
    Ok(())
}

#[test]
fn malformed_frames_close_the_session() -> anyhow::Result<()> {
    let mut server = server()?;
    let a = open(&mut server, 0);
    let b = open(&mut server, 1);
    let c = open(&mut server, 2);

    // Truncated header.
    server.on_message(a, Bytes::from_static(&[0, 0]));
    // Unknown message id.
    server.on_message(b, build(99, &[])?);
    // A server-only message.
    server.on_message(c, Delete { id: player_of(a) }.encode()?);

    assert_eq!(server.transport_mut().take_closed(), vec![a, b, c]);
    Ok(())
}

#[test]
fn non_finite_report_closes_the_session_without_a_broadcast() -> anyhow::Result<()> {
    let mut server = server()?;
    let a = open(&mut server, 0);
    let b = open(&mut server, 1);
    server.transport_mut().take_sent();

    server.on_message(a, report(Vec2::new(f32::NAN, 88.0))?);
    server.on_message(b, report(Vec2::new(80.0, f32::INFINITY))?);
    assert_eq!(server.transport_mut().take_closed(), vec![a, b]);

    server.synchronize();
    server.synchronize();
    assert!(server.transport_mut().take_sent().is_empty());
    Ok(())
}

#[test]
fn frames_behind_a_violation_are_dropped() -> anyhow::Result<()> {
    let mut server = server()?;
    let a = open(&mut server, 0);
    let b = open(&mut server, 1);
    server.transport_mut().take_sent();

    // Both frames were queued before the close took effect.
    server.on_message(a, Bytes::from_static(&[0xff]));
    server.on_message(a, Use { which: "doorA".into() }.encode()?);
    server.on_message(a, report(Vec2::new(80.0, 88.0))?);

    assert!(server.is_closing(a));
    assert_eq!(server.transport_mut().take_closed(), vec![a]);
    assert_eq!(server.level_of(a), Some("a"));
    server.synchronize();
    assert!(server.transport_mut().take_sent().is_empty());

    // Once the close lands the player leaves as usual.
    server.handle_event(TransportEvent::Close(a));
    assert!(!server.is_closing(a));
    assert_eq!(
        server.transport_mut().take_messages()?,
        vec![(b, NetMsg::Delete(Delete { id: player_of(a) }))]
    );
    Ok(())
}

#[test]
fn using_missing_or_unusable_objects_closes_the_session() -> anyhow::Result<()> {
    let mut server = server()?;
    let a = open(&mut server, 0);
    let b = open(&mut server, 1);

    server.on_message(a, Use { which: "nope".into() }.encode()?);
    server.on_message(b, Use { which: "marker".into() }.encode()?);

    assert_eq!(server.transport_mut().take_closed(), vec![a, b]);
    assert_eq!(server.level_of(a), Some("a"));
    Ok(())
}

#[test]
fn broken_portal_is_not_the_clients_fault() -> anyhow::Result<()> {
    let mut server = server()?;
    let a = open(&mut server, 0);
    server.transport_mut().take_sent();

    server.on_message(a, Use { which: "crack".into() }.encode()?);

    assert!(server.transport_mut().take_closed().is_empty());
    assert!(server.transport_mut().take_sent().is_empty());
    assert_eq!(server.level_of(a), Some("a"));
    Ok(())
}

#[test]
fn closed_session_leaves_through_the_harness() -> anyhow::Result<()> {
    let mut h = Harness::new()?;
    let a = h.connect()?;
    let b = h.connect()?;
    h.idle(1)?;

    // A protocol violation from b: the server closes it and a hears a Delete.
    h.server.on_message(b, Bytes::from_static(&[1]));
    h.take_delivered();
    h.flush()?;
    assert!(h.received(a).contains(&&NetMsg::Delete(Delete { id: player_of(b) })));

    h.idle(1)?;
    assert_eq!(
        h.client(b)?.state,
        tileworld_client::client::ClientState::Disconnected
    );
    assert!(h.client(b)?.notices[0].contains("closed by server"));
    Ok(())
}
