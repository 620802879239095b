//! Client implementation.
//!
//! The client simulates exactly one body, the local player, and mirrors
//! everything else from the server. One `update` is one tick:
//!
//! 1. physics for the local `RigidBody` (skipped while the level loads)
//! 2. use action: portal under the player + use key + cooldown
//! 3. network: settle remote transforms, apply server messages, report
//!    the local position if it changed
//!
//!    While a use request may still turn into a Transfer, reports are held
//!    back: the server would apply them to the player's new level. The hold
//!    ends when the Transfer arrives or after one use cooldown, and a held
//!    change is reported then.
//! 4. animation for every sprite
//!
//! Rendering is separate (`draw`) and blends with the leftover tick fraction.

use std::time::Duration;

use bytes::Bytes;
use tileworld_shared::{
    component::{NetTransform, Player, RigidBody},
    config::EngineConfig,
    ecs::{Entity, Registry},
    input::{Buttons, InputState},
    level::{Facing, Level, TILE_HALF_EXTENTS},
    math::{Aabb, Vec2},
    physics::TilePhysics,
    protocol::{
        Create, Delete, EntityPosition, Initial, MoveBatch, NetMsg, Packet, Position, Transfer,
        Use,
    },
    render::{RenderBackend, SpriteDraw},
};
use tracing::{debug, info, trace, warn};

use crate::{
    animation::{animate_humanoid, Sprite},
    assets::{LevelHandle, LevelLoader},
    connection::{Connection, LinkEvent, ServerLink},
};

/// Minimum time between two use actions.
pub const USE_COOLDOWN: Duration = Duration::from_millis(250);

/// Client connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, waiting for the Initial message.
    Connecting,
    /// Player spawned.
    Playing,
    /// Connection lost; see `notices`.
    Disconnected,
}

/// High-level game client.
pub struct GameClient<L: ServerLink> {
    pub cfg: EngineConfig,
    pub state: ClientState,
    registry: Registry,
    link: L,
    loader: LevelLoader,
    level: Option<LevelHandle>,
    player: Entity,
    physics: TilePhysics,
    use_cooldown_ticks: u32,
    use_cooldown: u32,
    transfer_hold: u32,
    unreported: bool,
    tick: u64,
    /// Messages for the user (disconnects, levels that failed to load).
    pub notices: Vec<String>,
}

impl GameClient<Connection> {
    /// Connects over TCP using `cfg.server_addr` and `cfg.connect_timeout_ms`.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let link = Connection::connect(
            &cfg.server_addr,
            Duration::from_millis(cfg.connect_timeout_ms),
        )
        .await?;
        let loader = LevelLoader::new(&cfg.levels_dir);
        Ok(Self::new(cfg.clone(), link, loader))
    }
}

impl<L: ServerLink> GameClient<L> {
    pub fn new(cfg: EngineConfig, link: L, loader: LevelLoader) -> Self {
        let step = 1.0 / f64::from(cfg.tick_hz.max(1));
        let use_cooldown_ticks = (USE_COOLDOWN.as_secs_f64() / step).ceil() as u32;
        Self {
            cfg,
            state: ClientState::Connecting,
            registry: Registry::new(),
            link,
            loader,
            level: None,
            player: Entity::NULL,
            physics: TilePhysics::default(),
            use_cooldown_ticks,
            use_cooldown: 0,
            transfer_hold: 0,
            unreported: false,
            tick: 0,
            notices: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// The local player, `Entity::NULL` before Initial.
    pub fn player(&self) -> Entity {
        self.player
    }

    pub fn player_body(&self) -> Option<&RigidBody> {
        self.registry.get::<RigidBody>(self.player).ok().flatten()
    }

    /// Name of the level the player is in.
    pub fn level_name(&self) -> Option<&str> {
        self.level.as_ref().map(|h| h.name())
    }

    /// The current level, once loaded.
    pub fn level(&self) -> Option<&Level> {
        self.level.as_ref().and_then(|h| h.level()).map(|l| l.as_ref())
    }

    pub fn use_cooldown_ticks(&self) -> u32 {
        self.use_cooldown_ticks
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Runs one tick.
    pub fn update(&mut self, input: &InputState) {
        if self.state == ClientState::Disconnected {
            return;
        }
        self.tick += 1;
        if let Some(handle) = self.level.as_mut() {
            let was_loading = handle.is_loading();
            self.loader.poll(handle);
            // The player stays frozen in a level that never loads; say so once.
            if let (true, Some(e)) = (was_loading, handle.error()) {
                self.notices
                    .push(format!("Level '{}' failed to load: {e}", handle.name()));
            }
        }

        let stepped = self.step_physics(input);
        self.step_use(input);
        self.step_network(stepped);
        self.step_animation();
    }

    fn step_physics(&mut self, input: &InputState) -> bool {
        let Some(level) = self.level.as_ref().and_then(|h| h.level()).cloned() else {
            return false;
        };
        match self.registry.get_mut::<RigidBody>(self.player) {
            Ok(Some(body)) => {
                self.physics.step(body, input, &*level);
                true
            }
            _ => false,
        }
    }

    fn step_use(&mut self, input: &InputState) {
        if self.use_cooldown > 0 {
            self.use_cooldown -= 1;
        }
        if !input.is_pressed(Buttons::USE) || self.use_cooldown > 0 {
            return;
        }
        let Some(level) = self.level.as_ref().and_then(|h| h.level()) else {
            return;
        };
        let Some(body) = self.registry.get::<RigidBody>(self.player).ok().flatten() else {
            return;
        };

        let player_box = Aabb::new(*body.position.current(), TILE_HALF_EXTENTS);
        let target = level
            .portals()
            .into_iter()
            .find(|(_, portal)| player_box.overlaps(&portal.bounds()))
            .map(|(name, _)| name.to_string());

        if let Some(which) = target {
            debug!(portal = %which, "use");
            self.send(&Use { which });
            self.use_cooldown = self.use_cooldown_ticks;
            self.transfer_hold = self.use_cooldown_ticks;
        }
    }

    fn step_network(&mut self, stepped: bool) {
        // Every remote transform starts the tick at rest; Move batches below
        // are the only thing that sets them in motion again.
        self.registry
            .for_each_with_all_mut::<(NetTransform,)>(|_, (net,)| net.transform.settle());

        while let Some(event) = self.link.poll() {
            match event {
                LinkEvent::Frame(frame) => self.handle_frame(frame),
                LinkEvent::Closed(reason) => {
                    self.disconnect(reason);
                    return;
                }
            }
        }

        let holding = self.transfer_hold > 0;
        self.transfer_hold = self.transfer_hold.saturating_sub(1);
        if !stepped {
            return;
        }
        let Some((moved, report)) = self.player_body().map(|body| {
            (
                body.position.changed(),
                Position {
                    position: *body.position.current(),
                    cstate: body.cstate,
                },
            )
        }) else {
            return;
        };
        if holding {
            self.unreported |= moved;
            return;
        }
        if moved | std::mem::take(&mut self.unreported) {
            self.send(&report);
        }
    }

    fn step_animation(&mut self) {
        self.registry
            .for_each_with_all_mut::<(RigidBody, Sprite)>(|_, (body, sprite)| {
                animate_humanoid(sprite, body.velocity, body.cstate);
            });
        self.registry
            .for_each_with_all_mut::<(NetTransform, Sprite)>(|_, (net, sprite)| {
                let delta = net.position().sub(net.previous_position());
                animate_humanoid(sprite, delta, net.cstate);
            });
    }

    fn handle_frame(&mut self, frame: Bytes) {
        match NetMsg::decode(frame) {
            Ok(msg) => self.apply(msg),
            Err(e) => warn!(error = %format!("{e:#}"), "dropping bad frame from server"),
        }
    }

    /// Applies one server message.
    pub fn apply(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::Initial(initial) => self.on_initial(initial),
            NetMsg::Create(create) => self.on_create(create),
            NetMsg::Delete(delete) => self.on_delete(delete),
            NetMsg::Move(batch) => self.on_move(batch),
            NetMsg::Transfer(transfer) => self.on_transfer(transfer),
            NetMsg::Position(_) | NetMsg::Use(_) => {
                warn!("server sent a client-only message; ignored");
            }
        }
    }

    fn on_initial(&mut self, initial: Initial) {
        let stale: Vec<Entity> = self.registry.entities().collect();
        for entity in stale {
            let _ = self.registry.destroy(entity);
        }

        self.player = initial.player;
        let bundle = (
            RigidBody::new(initial.position),
            Player,
            Sprite::new(self.cfg.player_sprite.clone()),
        );
        if let Err(e) = self.registry.insert(initial.player, bundle) {
            warn!(error = %e, "cannot create local player");
            return;
        }
        self.spawn_remotes(&initial.level, &initial.entities);
        self.level = Some(self.loader.load(&initial.level));
        self.state = ClientState::Playing;
        info!(
            entity = %initial.player,
            level = %initial.level,
            others = initial.entities.len(),
            "Spawned"
        );
    }

    fn on_create(&mut self, create: Create) {
        if create.id == self.player {
            return;
        }
        let Some(level) = self.level_name().map(str::to_string) else {
            debug!(entity = %create.id, "create before initial; ignored");
            return;
        };
        self.spawn_remote(&level, create.id, create.position);
    }

    fn on_delete(&mut self, delete: Delete) {
        if delete.id == self.player {
            return;
        }
        if let Err(e) = self.registry.destroy(delete.id) {
            debug!(error = %e, "delete for unknown entity");
        }
    }

    fn on_move(&mut self, batch: MoveBatch) {
        for entry in batch.entities {
            if entry.id == self.player {
                continue;
            }
            match self.registry.get_mut::<NetTransform>(entry.id) {
                Ok(Some(net)) => {
                    net.update_position(entry.position);
                    net.cstate = entry.cstate;
                }
                _ => trace!(entity = %entry.id, "move for unknown entity"),
            }
        }
    }

    fn on_transfer(&mut self, transfer: Transfer) {
        match self.registry.get_mut::<RigidBody>(self.player) {
            Ok(Some(body)) => body.reset(transfer.position),
            _ => {
                warn!("transfer without a local player; ignored");
                return;
            }
        }

        self.level = Some(self.loader.load(&transfer.level));
        // The server already knows where the player is now.
        self.transfer_hold = 0;
        self.unreported = false;

        let others: Vec<Entity> = self
            .registry
            .entities()
            .filter(|&e| e != self.player)
            .collect();
        for entity in others {
            let _ = self.registry.destroy(entity);
        }
        self.spawn_remotes(&transfer.level, &transfer.entities);

        info!(
            level = %transfer.level,
            x = transfer.position.x,
            y = transfer.position.y,
            others = transfer.entities.len(),
            "Transferred"
        );
    }

    fn spawn_remotes(&mut self, level: &str, entities: &[EntityPosition]) {
        for e in entities {
            if e.id != self.player {
                self.spawn_remote(level, e.id, e.position);
            }
        }
    }

    fn spawn_remote(&mut self, level: &str, id: Entity, position: Vec2) {
        let bundle = (
            NetTransform::new(level, position),
            Player,
            Sprite::new(self.cfg.player_sprite.clone()),
        );
        if let Err(e) = self.registry.insert(id, bundle) {
            warn!(error = %e, "cannot create remote entity");
        }
    }

    fn send<P: Packet>(&mut self, packet: &P) {
        match packet.encode() {
            Ok(frame) => self.link.send(frame),
            Err(e) => warn!(error = %format!("{e:#}"), "encode failed"),
        }
    }

    fn disconnect(&mut self, reason: String) {
        warn!(reason = %reason, "Disconnected from server");
        self.notices.push(format!("Disconnected: {reason}"));
        self.state = ClientState::Disconnected;
    }

    /// Draws remote sprites at their blended transforms and centers the
    /// camera on the local body.
    pub fn draw(&self, renderer: &mut dyn RenderBackend, weight: f32) {
        renderer.begin_frame();

        if let Some(body) = self.player_body() {
            renderer.set_camera(body.position.get(weight));
        }

        self.registry
            .for_each_with_all::<(NetTransform, Sprite)>(|_, (net, sprite)| {
                let t = net.get(weight);
                renderer.draw_sprite(&SpriteDraw {
                    sheet: &sprite.sheet,
                    animation: sprite.animation.name(),
                    frame: sprite.frame,
                    position: t.position,
                    rotation: t.rotation,
                    scale: t.scale,
                    flip_x: sprite.direction == Facing::Left,
                });
            });

        self.registry
            .for_each_with_all::<(RigidBody, Sprite)>(|_, (body, sprite)| {
                renderer.draw_sprite(&SpriteDraw {
                    sheet: &sprite.sheet,
                    animation: sprite.animation.name(),
                    frame: sprite.frame,
                    position: body.position.get(weight),
                    rotation: 0.0,
                    scale: Vec2::new(1.0, 1.0),
                    flip_x: sprite.direction == Facing::Left,
                });
            });

        renderer.end_frame();
    }
}
