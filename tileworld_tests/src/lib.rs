//! In-memory fixtures for the integration tests.
//!
//! [`Harness`] wires one [`GameServer`] to any number of [`GameClient`]s
//! without sockets: the server talks to a [`RecordingTransport`], each client
//! to a [`LoopbackLink`], and `flush` shuttles frames between them until
//! nothing is left in flight. Every frame the server emits is also decoded
//! into `Harness::delivered` so tests can assert on exact traffic.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    path::Path,
};

use anyhow::Context;
use bytes::Bytes;
use tileworld_client::{
    assets::LevelLoader,
    connection::{LinkEvent, ServerLink},
    GameClient,
};
use tileworld_server::{
    levels::LevelStorage,
    transport::{Transport, TransportEvent},
    GameServer,
};
use tileworld_shared::{
    config::{EngineConfig, SpawnPoint},
    input::InputState,
    level::{Facing, Level, LevelObject, PortalObject, PortalProps},
    math::Vec2,
    net::SessionId,
    protocol::NetMsg,
    render::{RenderBackend, SpriteDraw},
};

/// Ground row tops out at y = 96, so a standing player sits at y = 88.
pub const FLOOR_Y: f32 = 88.0;

/// Spawn in level `a`, standing inside `doorA`.
pub const SPAWN_A: Vec2 = Vec2::new(72.0, FLOOR_Y);

/// Where a player using `doorA` lands: two tiles left of `doorB`.
pub const ARRIVAL_B: Vec2 = Vec2::new(128.0, 64.0);

const ROWS: [&str; 8] = [
    "....................",
    "....................",
    "....................",
    "....................",
    "....................",
    "....................",
    "####################",
    "####################",
];

fn portal(x: f32, y: f32, to: &str, direction: Facing) -> LevelObject {
    LevelObject::Portal(PortalObject {
        x,
        y,
        width: 16.0,
        height: 32.0,
        props: PortalProps {
            to: to.to_string(),
            direction,
        },
    })
}

/// Levels `a` and `b`, joined by `doorA` <-> `doorB`.
///
/// `a` also has `crack`, a portal into a level that does not exist, and
/// `marker`, an object that is not usable.
pub fn fixture_levels() -> anyhow::Result<Vec<Level>> {
    let a = Level::from_ascii("a", &ROWS)?
        .with_object("doorA", portal(64.0, 64.0, "b.doorB", Facing::Right))
        .with_object("crack", portal(256.0, 64.0, "c.nowhere", Facing::Left))
        .with_object("marker", LevelObject::Point { x: 200.0, y: 80.0 });
    let b = Level::from_ascii("b", &ROWS)?
        .with_object("doorB", portal(160.0, 64.0, "a.doorA", Facing::Left));
    Ok(vec![a, b])
}

/// Writes the fixture levels as `<dir>/<name>.json`.
pub fn write_fixture_levels(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    for level in fixture_levels()? {
        let path = dir.join(format!("{}.json", level.name));
        let text = serde_json::to_string_pretty(&level)?;
        std::fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}

pub fn fixture_storage() -> anyhow::Result<LevelStorage> {
    let mut storage = LevelStorage::new();
    for level in fixture_levels()? {
        storage.insert(level);
    }
    Ok(storage)
}

/// A loader that never touches the filesystem.
pub fn fixture_loader() -> anyhow::Result<LevelLoader> {
    let mut loader = LevelLoader::new("unused");
    for level in fixture_levels()? {
        loader.insert(level);
    }
    Ok(loader)
}

pub fn fixture_config() -> EngineConfig {
    EngineConfig {
        spawn: SpawnPoint {
            level: "a".to_string(),
            x: SPAWN_A.x,
            y: SPAWN_A.y,
        },
        ..EngineConfig::default()
    }
}

/// Transport that keeps what the server sent instead of writing it anywhere.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Sessions considered connected; frames to anyone else are dropped.
    pub sessions: BTreeSet<SessionId>,
    sent: Vec<(SessionId, Bytes)>,
    closed: Vec<SessionId>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent since the last call, in send order.
    pub fn take_sent(&mut self) -> Vec<(SessionId, Bytes)> {
        std::mem::take(&mut self.sent)
    }

    /// Sessions the server closed since the last call.
    pub fn take_closed(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.closed)
    }

    /// Decoded frames sent since the last call.
    pub fn take_messages(&mut self) -> anyhow::Result<Vec<(SessionId, NetMsg)>> {
        self.take_sent()
            .into_iter()
            .map(|(id, frame)| Ok((id, NetMsg::decode(frame)?)))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, to: SessionId, frame: Bytes) {
        if self.sessions.contains(&to) {
            self.sent.push((to, frame));
        }
    }

    fn broadcast(&mut self, frame: Bytes, include: bool, ids: &[SessionId]) {
        let targets: Vec<SessionId> = if include {
            ids.iter().copied().filter(|id| self.sessions.contains(id)).collect()
        } else {
            self.sessions
                .iter()
                .copied()
                .filter(|id| !ids.contains(id))
                .collect()
        };
        for id in targets {
            self.sent.push((id, frame.clone()));
        }
    }

    fn close(&mut self, id: SessionId) {
        if self.sessions.remove(&id) {
            self.closed.push(id);
        }
    }
}

/// Client link backed by two queues.
#[derive(Debug)]
pub struct LoopbackLink {
    inbox: VecDeque<LinkEvent>,
    outbox: Vec<Bytes>,
    open: bool,
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self {
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            open: true,
        }
    }

    /// Queues a frame as if it came from the server.
    pub fn push_frame(&mut self, frame: Bytes) {
        self.inbox.push_back(LinkEvent::Frame(frame));
    }

    /// Queues the end of the connection.
    pub fn push_close(&mut self, reason: &str) {
        self.inbox.push_back(LinkEvent::Closed(reason.to_string()));
    }

    /// Frames the client sent since the last call.
    pub fn take_sent(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_messages(&mut self) -> anyhow::Result<Vec<NetMsg>> {
        self.take_sent().into_iter().map(NetMsg::decode).collect()
    }
}

impl ServerLink for LoopbackLink {
    fn send(&mut self, frame: Bytes) {
        if self.open {
            self.outbox.push(frame);
        }
    }

    fn poll(&mut self) -> Option<LinkEvent> {
        let event = self.inbox.pop_front()?;
        if matches!(event, LinkEvent::Closed(_)) {
            self.open = false;
        }
        Some(event)
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// One draw call, owned.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnSprite {
    pub sheet: String,
    pub animation: String,
    pub frame: u32,
    pub position: Vec2,
    pub flip_x: bool,
}

/// Renderer that remembers the last frame.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub camera: Option<Vec2>,
    pub sprites: Vec<DrawnSprite>,
    pub frames: u32,
}

impl RenderBackend for RecordingRenderer {
    fn begin_frame(&mut self) {
        self.camera = None;
        self.sprites.clear();
    }

    fn set_camera(&mut self, center: Vec2) {
        self.camera = Some(center);
    }

    fn draw_sprite(&mut self, sprite: &SpriteDraw<'_>) {
        self.sprites.push(DrawnSprite {
            sheet: sprite.sheet.to_string(),
            animation: sprite.animation.to_string(),
            frame: sprite.frame,
            position: sprite.position,
            flip_x: sprite.flip_x,
        });
    }

    fn end_frame(&mut self) {
        self.frames += 1;
    }
}

/// Server plus clients, connected in memory.
pub struct Harness {
    pub server: GameServer<RecordingTransport>,
    pub clients: BTreeMap<SessionId, GameClient<LoopbackLink>>,
    /// Every server frame, decoded, in delivery order.
    pub delivered: Vec<(SessionId, NetMsg)>,
    next_session: u32,
}

impl Harness {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_config(fixture_config())
    }

    pub fn with_config(cfg: EngineConfig) -> anyhow::Result<Self> {
        Ok(Self {
            server: GameServer::new(cfg, fixture_storage()?, RecordingTransport::new()),
            clients: BTreeMap::new(),
            delivered: Vec::new(),
            next_session: 0,
        })
    }

    /// Opens a session at the server's current spawn point.
    pub fn connect(&mut self) -> anyhow::Result<SessionId> {
        let id = SessionId(self.next_session);
        self.next_session += 1;

        let client = GameClient::new(self.server.cfg.clone(), LoopbackLink::new(), fixture_loader()?);
        self.clients.insert(id, client);
        self.server.transport_mut().sessions.insert(id);
        self.server.handle_event(TransportEvent::Open(id));
        self.flush()?;
        Ok(id)
    }

    /// Drops the client as if its socket went away.
    pub fn disconnect(&mut self, id: SessionId) -> anyhow::Result<()> {
        self.clients.remove(&id);
        self.server.transport_mut().sessions.remove(&id);
        self.server.handle_event(TransportEvent::Close(id));
        self.flush()
    }

    pub fn client(&self, id: SessionId) -> anyhow::Result<&GameClient<LoopbackLink>> {
        self.clients
            .get(&id)
            .with_context(|| format!("no client for session {id}"))
    }

    pub fn client_mut(&mut self, id: SessionId) -> anyhow::Result<&mut GameClient<LoopbackLink>> {
        self.clients
            .get_mut(&id)
            .with_context(|| format!("no client for session {id}"))
    }

    /// Moves frames both ways until nothing is in flight.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        loop {
            let mut progressed = false;

            for (&id, client) in self.clients.iter_mut() {
                for frame in client.link_mut().take_sent() {
                    self.server.on_message(id, frame);
                    progressed = true;
                }
            }

            for (id, frame) in self.server.transport_mut().take_sent() {
                let msg = NetMsg::decode(frame.clone())
                    .with_context(|| format!("server sent a bad frame to {id}"))?;
                self.delivered.push((id, msg));
                if let Some(client) = self.clients.get_mut(&id) {
                    client.link_mut().push_frame(frame);
                }
                progressed = true;
            }

            for id in self.server.transport_mut().take_closed() {
                if let Some(client) = self.clients.get_mut(&id) {
                    client.link_mut().push_close("closed by server");
                }
                self.server.handle_event(TransportEvent::Close(id));
                progressed = true;
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// One tick everywhere: every client updates with its input, then the
    /// server synchronizes.
    pub fn tick(&mut self, input: impl Fn(SessionId) -> InputState) -> anyhow::Result<()> {
        for (&id, client) in self.clients.iter_mut() {
            client.update(&input(id));
        }
        self.flush()?;
        self.server.synchronize();
        self.flush()
    }

    /// Ticks with nothing pressed.
    pub fn idle(&mut self, ticks: usize) -> anyhow::Result<()> {
        for _ in 0..ticks {
            self.tick(|_| InputState::default())?;
        }
        Ok(())
    }

    pub fn take_delivered(&mut self) -> Vec<(SessionId, NetMsg)> {
        std::mem::take(&mut self.delivered)
    }

    /// Messages delivered to `id` so far.
    pub fn received(&self, id: SessionId) -> Vec<&NetMsg> {
        self.delivered
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, msg)| msg)
            .collect()
    }
}
