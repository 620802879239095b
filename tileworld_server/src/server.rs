//! Server implementation.
//!
//! The server is authoritative over who exists where, not over how players
//! move: each client simulates its own body and reports the result, and the
//! server relays every change to the clients in the same level.
//!
//! Per tick (`synchronize`):
//! - group every `NetTransform` by level
//! - collect the ones that moved since the previous tick into a Move batch
//! - settle each transform so the next tick starts a fresh delta
//! - send each level's batch to the sessions in that level only
//!
//! Determinism notes:
//! - All mutation happens on the tick thread; the transport only queues.
//! - Levels are visited in name order and batches keep registry order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{anyhow, bail, Context};
use bytes::Bytes;
use tileworld_shared::{
    component::{NetTransform, Player},
    config::EngineConfig,
    ecs::{Component, Entity, Registry},
    level::LevelObject,
    math::Vec2,
    net::SessionId,
    protocol::{
        Create, Delete, EntityMove, EntityPosition, Initial, MoveBatch, NetMsg, Packet, Position,
        Transfer,
    },
};
use tracing::{debug, info, trace, warn};

use crate::{
    levels::{Destination, LevelStorage},
    transport::{Transport, TransportEvent},
};

/// Marks a player entity with the session that controls it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
}

impl Component for Session {}

/// A session's player entity shares its numeric id.
pub fn player_of(session: SessionId) -> Entity {
    Entity(session.0)
}

#[derive(Default)]
struct LevelBatch {
    moves: Vec<EntityMove>,
    recipients: Vec<SessionId>,
}

/// Game server.
pub struct GameServer<T: Transport> {
    pub cfg: EngineConfig,
    registry: Registry,
    levels: LevelStorage,
    transport: T,
    sessions: BTreeSet<SessionId>,
    /// Sessions asked to close whose Close event has not arrived yet.
    closing: BTreeSet<SessionId>,
    tick: u64,
}

impl<T: Transport> GameServer<T> {
    pub fn new(cfg: EngineConfig, levels: LevelStorage, transport: T) -> Self {
        Self {
            cfg,
            registry: Registry::new(),
            levels,
            transport,
            sessions: BTreeSet::new(),
            closing: BTreeSet::new(),
            tick: 0,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn levels(&self) -> &LevelStorage {
        &self.levels
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ticks run so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Level the session's player is currently in.
    pub fn level_of(&self, session: SessionId) -> Option<&str> {
        self.registry
            .get::<NetTransform>(player_of(session))
            .ok()
            .flatten()
            .map(|net| net.level.as_str())
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open(session) => self.on_open(session),
            TransportEvent::Close(session) => self.on_close(session),
            TransportEvent::Frame(session, frame) => self.on_message(session, frame),
        }
    }

    /// Spawns the session's player and introduces it to its level.
    pub fn on_open(&mut self, session: SessionId) {
        let spawn = self.cfg.spawn.clone();
        let position = Vec2::new(spawn.x, spawn.y);
        let player = player_of(session);

        if self.levels.get(&spawn.level).is_none() {
            warn!(level = %spawn.level, "spawn level is not loaded");
        }

        let bundle = (NetTransform::new(spawn.level.clone(), position), Session { id: session }, Player);
        if let Err(e) = self.registry.insert(player, bundle) {
            warn!(session = %session, error = %e, "cannot spawn player; closing");
            self.close_session(session);
            return;
        }
        self.sessions.insert(session);

        let initial = Initial {
            player,
            level: spawn.level.clone(),
            position,
            entities: self.snapshot_of(&spawn.level, player),
        };
        self.send_packet(session, &initial);

        let recipients = self.recipients_in(&spawn.level, player);
        self.broadcast_packet(&Create { id: player, position }, &recipients);

        info!(session = %session, entity = %player, level = %spawn.level, "player joined");
    }

    /// Removes the session's player and tells its level.
    pub fn on_close(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        self.closing.remove(&session);
        let player = player_of(session);

        let level = match self.registry.get::<NetTransform>(player) {
            Ok(Some(net)) => net.level.clone(),
            _ => {
                debug!(session = %session, "closed session had no player");
                return;
            }
        };
        if let Err(e) = self.registry.destroy(player) {
            warn!(session = %session, error = %e, "destroy player failed");
            return;
        }

        let recipients = self.recipients_in(&level, player);
        self.broadcast_packet(&Delete { id: player }, &recipients);
        info!(session = %session, entity = %player, level = %level, "player left");
    }

    /// Applies one client frame. Anything malformed or unexpected closes the
    /// session, and frames it already queued behind the bad one are dropped.
    pub fn on_message(&mut self, session: SessionId, frame: Bytes) {
        if self.closing.contains(&session) {
            trace!(session = %session, "dropping frame from closing session");
            return;
        }
        let result = NetMsg::decode(frame).and_then(|msg| match msg {
            NetMsg::Position(report) => self.apply_position(session, report),
            NetMsg::Use(action) => self.use_object(session, &action.which),
            other => Err(anyhow!("client sent server-only message {other:?}")),
        });

        if let Err(e) = result {
            warn!(session = %session, error = %format!("{e:#}"), "protocol violation; closing session");
            self.close_session(session);
        }
    }

    /// Whether the session was told to close and is waiting for its Close event.
    pub fn is_closing(&self, session: SessionId) -> bool {
        self.closing.contains(&session)
    }

    fn close_session(&mut self, session: SessionId) {
        if self.closing.insert(session) {
            self.transport.close(session);
        }
    }

    fn apply_position(&mut self, session: SessionId, report: Position) -> anyhow::Result<()> {
        let net = self
            .registry
            .get_mut::<NetTransform>(player_of(session))?
            .context("player has no transform")?;
        net.update_position(report.position);
        net.cstate = report.cstate;
        trace!(session = %session, x = report.position.x, y = report.position.y, "position");
        Ok(())
    }

    /// Only portals are usable. Naming an object that is missing or not a
    /// portal is a client error; a portal with a broken target is a level
    /// error and only logged.
    fn use_object(&mut self, session: SessionId, which: &str) -> anyhow::Result<()> {
        let player = player_of(session);
        let from = self
            .registry
            .get::<NetTransform>(player)?
            .context("player has no transform")?
            .level
            .clone();
        let level = self
            .levels
            .get(&from)
            .with_context(|| format!("player is in unknown level '{from}'"))?
            .clone();

        let portal = match level.object(which) {
            Some(LevelObject::Portal(portal)) => portal,
            Some(_) => bail!("object '{which}' in level '{from}' is not usable"),
            None => bail!("no object '{which}' in level '{from}'"),
        };

        match self.levels.destination(portal) {
            Ok(dest) => self.transfer(session, &from, dest),
            Err(e) => {
                warn!(level = %from, portal = %which, error = %format!("{e:#}"), "portal has no destination");
                Ok(())
            }
        }
    }

    /// Moves the session's player to `dest` in one step.
    fn transfer(&mut self, session: SessionId, from: &str, dest: Destination) -> anyhow::Result<()> {
        let player = player_of(session);

        let leaving = self.recipients_in(from, player);
        let arriving = self.recipients_in(&dest.level, player);
        let snapshot = self.snapshot_of(&dest.level, player);

        let net = self
            .registry
            .get_mut::<NetTransform>(player)?
            .context("player has no transform")?;
        net.level = dest.level.clone();
        // No motion in flight: arrivals learn the position from Create, not Move.
        net.reset_position(dest.position);

        self.send_packet(
            session,
            &Transfer {
                level: dest.level.clone(),
                position: dest.position,
                entities: snapshot,
            },
        );
        self.broadcast_packet(&Delete { id: player }, &leaving);
        self.broadcast_packet(
            &Create {
                id: player,
                position: dest.position,
            },
            &arriving,
        );

        info!(
            session = %session,
            from = %from,
            to = %dest.level,
            x = dest.position.x,
            y = dest.position.y,
            "level transfer"
        );
        Ok(())
    }

    /// Sends every level the entities in it that moved since the last tick.
    pub fn synchronize(&mut self) {
        self.tick += 1;
        if self.sessions.is_empty() {
            return;
        }

        let mut owners = HashMap::new();
        self.registry.for_each_with_all::<(Session,)>(|entity, (session,)| {
            owners.insert(entity, session.id);
        });

        let mut batches: BTreeMap<String, LevelBatch> = BTreeMap::new();
        self.registry
            .for_each_with_all_mut::<(NetTransform,)>(|entity, (net,)| {
                let batch = batches.entry(net.level.clone()).or_default();
                if net.moved() {
                    batch.moves.push(EntityMove {
                        id: entity,
                        position: net.position(),
                        cstate: net.cstate,
                    });
                }
                net.transform.settle();
                if let Some(&session) = owners.get(&entity) {
                    batch.recipients.push(session);
                }
            });

        for (level, batch) in batches {
            if batch.recipients.is_empty() || batch.moves.is_empty() {
                continue;
            }
            trace!(tick = self.tick, level = %level, moved = batch.moves.len(), "move batch");
            self.broadcast_packet(
                &MoveBatch {
                    entities: batch.moves,
                },
                &batch.recipients,
            );
        }
    }

    /// Sessions whose player is in `level`, `except` excluded.
    fn recipients_in(&self, level: &str, except: Entity) -> Vec<SessionId> {
        let mut out = Vec::new();
        self.registry
            .for_each_with_all::<(NetTransform, Session)>(|entity, (net, session)| {
                if entity != except && net.level == level {
                    out.push(session.id);
                }
            });
        out
    }

    /// Positions of every networked entity in `level`, `except` excluded.
    fn snapshot_of(&self, level: &str, except: Entity) -> Vec<EntityPosition> {
        let mut out = Vec::new();
        self.registry
            .for_each_with_all::<(NetTransform,)>(|entity, (net,)| {
                if entity != except && net.level == level {
                    out.push(EntityPosition {
                        id: entity,
                        position: net.position(),
                    });
                }
            });
        out.sort_by_key(|e| e.id);
        out
    }

    fn send_packet<P: Packet>(&mut self, to: SessionId, packet: &P) {
        match packet.encode() {
            Ok(frame) => self.transport.send(to, frame),
            Err(e) => warn!(session = %to, error = %format!("{e:#}"), "encode failed"),
        }
    }

    fn broadcast_packet<P: Packet>(&mut self, packet: &P, recipients: &[SessionId]) {
        if recipients.is_empty() {
            return;
        }
        match packet.encode() {
            Ok(frame) => self.transport.broadcast(frame, true, recipients),
            Err(e) => warn!(error = %format!("{e:#}"), "encode failed"),
        }
    }
}
