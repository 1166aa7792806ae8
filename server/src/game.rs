//! Authoritative game state
//!
//! [`Simulation`] owns the entity registry and the player table and is only
//! ever touched by the tick thread. Everything else talks to it through
//! [`SimCommand`]s: network handlers send player input, worker jobs send the
//! results of database lookups. Each [`Simulation::tick`] drains those
//! commands, runs the systems in a fixed order, sweeps destroyed entities and
//! returns the packets to send.

use crate::client_manager::PeerId;
use crate::components::{Collider, Health, Ownership, Script, Ship, Signature, Transform, Vector2};
use crate::config::{ServerConfig, WeaponConfig};
use crate::database::{record_kills, Database, PlayerProfile};
use crate::entity::{EntityId, EntityRegistry};
use crate::error::JobError;
use crate::job_queue::JobQueue;
use crate::players::{Player, PlayerHandle, PlayerRegistry};
use crate::script::{NullScriptHost, ScriptHost};
use crate::systems::{
    apply_script_requests, lifetime_system, movement_system, ownership_system, projectile_system,
    script_system, weapon_system, Kill,
};
use crate::weapon::{Weapon, WeaponKind};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    timestamp_ms, EntityKind, EntityState, ServerPacket, MAX_THRUST, RESPAWN_DELAY_MS,
    SHIP_HULL, SHIP_RADIUS,
};
use std::f32::consts::TAU;
use std::sync::Arc;

const SPAWN_RADIUS: f32 = 1000.0;

/// Requests for the tick thread.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Move { peer: PeerId, thrust: Vector2 },
    Trigger { peer: PeerId, pressed: bool },
    PlayerLoaded { peer: PeerId, profile: PlayerProfile },
    JoinFailed { peer: PeerId, reason: String },
    Leave { peer: PeerId },
    SetScript { peer: PeerId, script: Option<String> },
}

pub type SimSender = Sender<SimCommand>;
pub type SimReceiver = Receiver<SimCommand>;

pub fn sim_channel() -> (SimSender, SimReceiver) {
    crossbeam_channel::unbounded()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Peer(PeerId),
    Broadcast,
}

/// A packet leaving the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: Target,
    pub packet: ServerPacket,
}

impl Outgoing {
    pub fn to_peer(peer: PeerId, packet: ServerPacket) -> Self {
        Self {
            target: Target::Peer(peer),
            packet,
        }
    }

    pub fn broadcast(packet: ServerPacket) -> Self {
        Self {
            target: Target::Broadcast,
            packet,
        }
    }
}

struct Persistence {
    jobs: Arc<JobQueue>,
    database: Arc<dyn Database>,
}

pub struct Simulation {
    registry: EntityRegistry,
    players: PlayerRegistry,
    scripts: Box<dyn ScriptHost>,
    commands: SimReceiver,
    weapons: WeaponConfig,
    max_players: usize,
    rng: StdRng,
    tick: u64,
    clock_secs: f64,
    outbox: Vec<Outgoing>,
    persistence: Option<Persistence>,
}

impl Simulation {
    pub fn new(config: &ServerConfig, commands: SimReceiver) -> Self {
        Self {
            registry: EntityRegistry::new(),
            players: PlayerRegistry::new(),
            scripts: Box::new(NullScriptHost),
            commands,
            weapons: config.weapons.clone(),
            max_players: config.max_players,
            rng: StdRng::seed_from_u64(config.world_seed),
            tick: 0,
            clock_secs: 0.0,
            outbox: Vec::new(),
            persistence: None,
        }
    }

    pub fn with_script_host(mut self, host: Box<dyn ScriptHost>) -> Self {
        self.scripts = host;
        self
    }

    /// Kill counts of departing players are written back through a worker job.
    pub fn with_persistence(mut self, jobs: Arc<JobQueue>, database: Arc<dyn Database>) -> Self {
        self.persistence = Some(Persistence { jobs, database });
        self
    }

    /// Must be called from the tick thread before the first tick.
    pub fn bind_to_current_thread(&mut self) {
        self.registry.bind_to_current_thread();
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn players(&self) -> &PlayerRegistry {
        &self.players
    }

    pub fn player(&self, peer: PeerId) -> Option<&Player> {
        self.players
            .find_by_peer(peer)
            .and_then(|handle| self.players.get(handle))
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Simulation time in milliseconds, advanced only by ticks.
    pub fn now_ms(&self) -> u64 {
        (self.clock_secs * 1000.0) as u64
    }

    /// Advances the world by `dt` seconds and returns the packets to send.
    pub fn tick(&mut self, dt: f32) -> Vec<Outgoing> {
        self.registry.assert_tick_thread();
        let dt = dt.max(0.0);
        self.clock_secs += f64::from(dt);
        let now_ms = self.now_ms();

        self.drain_commands();
        self.respawn_due_players(now_ms);

        lifetime_system(&mut self.registry, dt);
        movement_system(&mut self.registry, dt);
        let kills = projectile_system(&mut self.registry, &mut self.players);
        self.report_kills(&kills);
        weapon_system(&mut self.registry, now_ms);
        ownership_system(&mut self.registry, &self.players);
        let requests = script_system(&self.registry, self.scripts.as_mut(), dt);
        apply_script_requests(&mut self.registry, requests);

        for id in self.registry.sweep() {
            self.outbox.push(Outgoing::broadcast(ServerPacket::EntityDestroyed {
                entity: id.to_bits(),
            }));
        }
        self.release_lost_ships(now_ms);

        self.tick += 1;
        let snapshot = self.snapshot();
        self.outbox.push(Outgoing::broadcast(snapshot));
        std::mem::take(&mut self.outbox)
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.apply_command(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply_command(&mut self, command: SimCommand) {
        match command {
            SimCommand::Move { peer, thrust } => {
                if let Some(transform) = self
                    .ship_of(peer)
                    .and_then(|ship| self.registry.transforms.get_mut(ship))
                {
                    transform.thrust = thrust.clamp_length(MAX_THRUST);
                }
            }
            SimCommand::Trigger { peer, pressed } => {
                if let Some(weapon) = self
                    .ship_of(peer)
                    .and_then(|ship| self.registry.weapons.get_mut(ship))
                {
                    weapon.trigger_held = pressed;
                }
            }
            SimCommand::SetScript { peer, script } => {
                let Some(ship) = self.ship_of(peer) else {
                    debug!("Peer {} set a script without a ship", peer);
                    return;
                };
                match script {
                    Some(name) => {
                        self.registry.scripts.insert(ship, Script { name });
                    }
                    None => {
                        self.registry.scripts.remove(ship);
                    }
                }
            }
            SimCommand::PlayerLoaded { peer, profile } => self.admit_player(peer, profile),
            SimCommand::JoinFailed { peer, reason } => {
                self.outbox.push(Outgoing::to_peer(
                    peer,
                    ServerPacket::JoinRejected { reason },
                ));
            }
            SimCommand::Leave { peer } => self.remove_player(peer),
        }
    }

    fn ship_of(&self, peer: PeerId) -> Option<EntityId> {
        self.player(peer).and_then(|player| player.ship)
    }

    fn admit_player(&mut self, peer: PeerId, profile: PlayerProfile) {
        let rejection = if self.players.find_by_peer(peer).is_some() {
            Some("already joined")
        } else if self.players.len() >= self.max_players {
            Some("server full")
        } else {
            None
        };
        if let Some(reason) = rejection {
            info!("Rejecting {} from peer {}: {}", profile.name, peer, reason);
            self.outbox.push(Outgoing::to_peer(
                peer,
                ServerPacket::JoinRejected {
                    reason: reason.to_string(),
                },
            ));
            return;
        }

        let name = profile.name.clone();
        let handle = self.players.insert(Player::new(peer, profile));
        let ship = self.spawn_ship(handle);
        info!("Player {} joined from peer {} with ship {}", name, peer, ship);

        self.outbox.push(Outgoing::to_peer(
            peer,
            ServerPacket::Welcome {
                player_id: peer,
                ship: ship.to_bits(),
                tick: self.tick,
            },
        ));
    }

    fn remove_player(&mut self, peer: PeerId) {
        let Some(handle) = self.players.find_by_peer(peer) else {
            return;
        };
        let Some(player) = self.players.remove(handle) else {
            return;
        };
        // The ship is orphaned and removed by the ownership pass.
        info!(
            "Player {} left ({} kills, {} deaths)",
            player.name(),
            player.kills,
            player.deaths
        );

        if player.kills == 0 {
            return;
        }
        if let Some(persistence) = &self.persistence {
            let database = Arc::clone(&persistence.database);
            let name = player.profile.name.clone();
            let kills = player.kills;
            persistence
                .jobs
                .submit(move || record_kills(database.as_ref(), &name, kills).map_err(JobError::from));
        }
    }

    fn spawn_ship(&mut self, owner: PlayerHandle) -> EntityId {
        let angle = self.rng.gen_range(0.0..TAU);
        let distance = self.rng.gen_range(0.0..SPAWN_RADIUS);
        let position = Vector2::new(angle.cos(), angle.sin()).scale(distance);

        let (peer, preference) = match self.players.get(owner) {
            Some(player) => (player.peer, player.profile.preferred_weapon),
            None => (0, 0),
        };
        let kind = WeaponKind::from_preference(preference);
        let cooldown_ms = kind.cooldown_ms(&self.weapons);

        let ship = self.registry.spawn();
        self.registry.transforms.insert(ship, Transform::at(position));
        self.registry
            .colliders
            .insert(ship, Collider { radius: SHIP_RADIUS });
        self.registry.healths.insert(ship, Health::new(SHIP_HULL));
        self.registry.ships.insert(ship, Ship);
        self.registry.weapons.insert(ship, Weapon::new(kind, cooldown_ms));
        self.registry.signatures.insert(
            ship,
            Signature {
                id: i64::from(peer),
                size: SHIP_RADIUS,
                volume: 1.0,
            },
        );
        self.registry.ownerships.insert(ship, Ownership { owner });

        if let Some(player) = self.players.get_mut(owner) {
            player.ship = Some(ship);
            player.respawn_at_ms = None;
        }
        ship
    }

    fn respawn_due_players(&mut self, now_ms: u64) {
        let due: Vec<PlayerHandle> = self
            .players
            .iter()
            .filter(|(_, player)| {
                player.ship.is_none() && player.respawn_at_ms.is_some_and(|at| at <= now_ms)
            })
            .map(|(handle, _)| handle)
            .collect();

        for handle in due {
            let ship = self.spawn_ship(handle);
            if let Some(player) = self.players.get(handle) {
                debug!("Respawned {} in ship {}", player.name(), ship);
            }
        }
    }

    /// Clears ship references that did not survive the sweep.
    fn release_lost_ships(&mut self, now_ms: u64) {
        for handle in self.players.handles() {
            let Some(player) = self.players.get_mut(handle) else {
                continue;
            };
            if let Some(ship) = player.ship {
                if !self.registry.is_alive(ship) {
                    player.ship = None;
                    player.respawn_at_ms = Some(now_ms + RESPAWN_DELAY_MS);
                }
            }
        }
    }

    fn report_kills(&mut self, kills: &[Kill]) {
        for kill in kills {
            let peer_of = |handle: Option<PlayerHandle>| {
                handle
                    .and_then(|handle| self.players.get(handle))
                    .map(|player| player.peer)
            };
            let victim = peer_of(kill.victim);
            let killer = peer_of(kill.killer);
            if !self.registry.ships.contains(kill.ship) {
                continue;
            }
            match (victim, killer) {
                (Some(victim), Some(killer)) => {
                    info!("Peer {} destroyed the ship of peer {}", killer, victim)
                }
                _ => debug!("Ship {} destroyed", kill.ship),
            }
            self.outbox.push(Outgoing::broadcast(ServerPacket::ShipDestroyed {
                ship: kill.ship.to_bits(),
                victim,
                killer,
            }));
        }
    }

    pub fn snapshot(&self) -> ServerPacket {
        let entities = self
            .registry
            .transforms
            .iter()
            .map(|(id, transform)| {
                let kind = if self.registry.ships.contains(id) {
                    EntityKind::Ship
                } else if let Some(projectile) = self.registry.projectiles.get(id) {
                    projectile.kind
                } else {
                    EntityKind::Other
                };
                let owner = self
                    .registry
                    .ownerships
                    .get(id)
                    .and_then(|ownership| self.players.get(ownership.owner))
                    .map(|player| player.peer);
                EntityState {
                    id: id.to_bits(),
                    kind,
                    x: transform.position.x,
                    y: transform.position.y,
                    vel_x: transform.velocity.x,
                    vel_y: transform.velocity.y,
                    hull: self.registry.healths.get(id).map(|health| health.hull),
                    owner,
                }
            })
            .collect();

        ServerPacket::Snapshot {
            tick: self.tick,
            timestamp: timestamp_ms(),
            entities,
        }
    }
}
