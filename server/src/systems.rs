//! Per-tick simulation systems
//!
//! Each system is a plain function over the registry, run by the simulation in
//! a fixed order: lifetime, movement, projectile, weapon, ownership, script.
//! Systems only ever *mark* entities for destruction; marked entities stay
//! visible to later systems as pending and disappear at the sweep that ends
//! the tick.

use crate::components::{Collider, LifeTime, Projectile, Transform, Vector2};
use crate::entity::{EntityId, EntityRegistry};
use crate::players::{PlayerHandle, PlayerRegistry};
use crate::script::{ScriptHost, ScriptRequest};
use crate::weapon::FireAction;
use log::warn;
use shared::{EntityKind, MAX_SHIP_SPEED, MAX_THRUST, SHIP_ACCELERATION, TORPEDO_RADIUS, WORLD_RADIUS};
use std::collections::HashMap;

/// A hull brought to zero during the projectile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kill {
    pub ship: EntityId,
    pub victim: Option<PlayerHandle>,
    pub killer: Option<PlayerHandle>,
}

/// Counts lifetimes down and marks expired entities. Returns how many expired.
pub fn lifetime_system(registry: &mut EntityRegistry, dt: f32) -> usize {
    let EntityRegistry {
        lifetimes, pending, ..
    } = registry;

    let mut expired = 0;
    for (id, lifetime) in lifetimes.iter_mut() {
        if pending.contains(id) {
            continue;
        }
        if lifetime.tick(dt) && pending.mark(id) {
            expired += 1;
        }
    }
    expired
}

/// Applies ship thrust, integrates positions and enforces the world boundary.
pub fn movement_system(registry: &mut EntityRegistry, dt: f32) {
    let EntityRegistry {
        transforms,
        ships,
        pending,
        ..
    } = registry;

    for (id, transform) in transforms.iter_mut() {
        if pending.contains(id) {
            continue;
        }

        let is_ship = ships.contains(id);
        if is_ship {
            let acceleration = transform.thrust.scale(SHIP_ACCELERATION * dt);
            transform.velocity = transform
                .velocity
                .add(&acceleration)
                .clamp_length(MAX_SHIP_SPEED);
            if transform.thrust.magnitude() > 0.0 {
                transform.heading = transform.thrust.normalize();
            }
        }

        transform.position = transform.position.add(&transform.velocity.scale(dt));

        if transform.position.magnitude() > WORLD_RADIUS {
            if is_ship {
                transform.position = transform.position.normalize().scale(WORLD_RADIUS);
                transform.velocity = Vector2::ZERO;
            } else {
                pending.mark(id);
            }
        }
    }
}

fn distance_to_segment(point: Vector2, start: Vector2, end: Vector2) -> f32 {
    let segment = end.sub(&start);
    let length_sq = segment.dot(&segment);
    if length_sq == 0.0 {
        return point.sub(&start).magnitude();
    }
    let t = (point.sub(&start).dot(&segment) / length_sq).clamp(0.0, 1.0);
    point.sub(&start.add(&segment.scale(t))).magnitude()
}

struct Hit {
    projectile: EntityId,
    target: EntityId,
    damage: u16,
}

/// Resolves projectile overlaps and applies damage.
///
/// A target is checked and recorded against a projectile in one step, and
/// damage is applied only for first-time hits, so no projectile damages the
/// same target twice. Hulls reaching zero are marked and reported as kills.
pub fn projectile_system(registry: &mut EntityRegistry, players: &mut PlayerRegistry) -> Vec<Kill> {
    let EntityRegistry {
        transforms,
        colliders,
        healths,
        projectiles,
        ownerships,
        pending,
        ..
    } = registry;

    let mut hits = Vec::new();
    // Damage already committed to each target during this pass.
    let mut committed: HashMap<EntityId, u16> = HashMap::new();
    for (projectile_id, projectile) in projectiles.iter_mut() {
        if pending.contains(projectile_id) {
            continue;
        }
        let Some(origin) = transforms.get(projectile_id) else {
            continue;
        };
        let reach = colliders.get(projectile_id).map_or(0.0, |c| c.radius);
        let tip = origin.position.add(&origin.heading.scale(projectile.length));

        for (target, health) in healths.iter() {
            let doomed = committed
                .get(&target)
                .is_some_and(|&damage| damage >= health.hull);
            if target == projectile_id
                || Some(target) == projectile.shooter
                || health.is_destroyed()
                || doomed
                || pending.contains(target)
                || projectile.has_been_hit(target)
            {
                continue;
            }
            let (Some(body), Some(collider)) = (transforms.get(target), colliders.get(target))
            else {
                continue;
            };
            if distance_to_segment(body.position, origin.position, tip) > reach + collider.radius {
                continue;
            }

            if projectile.mark_as_hit(target) {
                let total = committed.entry(target).or_insert(0);
                *total = total.saturating_add(projectile.damage);
                hits.push(Hit {
                    projectile: projectile_id,
                    target,
                    damage: projectile.damage,
                });
                if projectile.destroy_on_hit {
                    pending.mark(projectile_id);
                    break;
                }
            }
        }
    }

    let mut kills = Vec::new();
    for hit in hits {
        let Some(health) = healths.get_mut(hit.target) else {
            continue;
        };
        if !health.apply_damage(hit.damage) {
            continue;
        }
        pending.mark(hit.target);

        // Owners that already left count as no owner.
        let killer = ownerships
            .get(hit.projectile)
            .map(|o| o.owner)
            .filter(|handle| players.contains(*handle));
        let victim = ownerships
            .get(hit.target)
            .map(|o| o.owner)
            .filter(|handle| players.contains(*handle));

        if killer != victim {
            if let Some(player) = killer.and_then(|handle| players.get_mut(handle)) {
                player.kills += 1;
            }
        }
        if let Some(player) = victim.and_then(|handle| players.get_mut(handle)) {
            player.deaths += 1;
        }

        kills.push(Kill {
            ship: hit.target,
            victim,
            killer,
        });
    }
    kills
}

/// Pulls every held trigger through the weapon gate and spawns the shots.
/// Returns the number of shots fired.
pub fn weapon_system(registry: &mut EntityRegistry, now_ms: u64) -> usize {
    let mut shots = Vec::new();
    {
        let EntityRegistry {
            weapons, pending, ..
        } = &mut *registry;
        for (shooter, weapon) in weapons.iter_mut() {
            if !weapon.trigger_held || pending.contains(shooter) {
                continue;
            }
            if let Some(action) = weapon.shoot(now_ms) {
                shots.push((shooter, action));
            }
        }
    }

    let fired = shots.len();
    for (shooter, action) in shots {
        spawn_shot(registry, shooter, action);
    }
    fired
}

/// Spawns the entity described by `action` in front of `shooter`.
pub fn spawn_shot(
    registry: &mut EntityRegistry,
    shooter: EntityId,
    action: FireAction,
) -> Option<EntityId> {
    let origin = *registry.transforms.get(shooter)?;
    let owner = registry.ownerships.get(shooter).copied();
    let shooter_radius = registry.colliders.get(shooter).map_or(0.0, |c| c.radius);

    let (transform, projectile, radius, lifetime) = match action {
        FireAction::SpawnTorpedo {
            damage,
            speed,
            lifetime,
        } => {
            let muzzle = origin
                .position
                .add(&origin.heading.scale(shooter_radius + TORPEDO_RADIUS));
            let mut transform = Transform::at(muzzle);
            transform.heading = origin.heading;
            transform.velocity = origin.velocity.add(&origin.heading.scale(speed));
            (
                transform,
                Projectile::new(EntityKind::Torpedo, damage, Some(shooter)),
                TORPEDO_RADIUS,
                lifetime,
            )
        }
        FireAction::SpawnBeam {
            damage,
            length,
            lifetime,
        } => {
            let mut transform =
                Transform::at(origin.position.add(&origin.heading.scale(shooter_radius)));
            transform.heading = origin.heading;
            transform.velocity = origin.velocity;
            (
                transform,
                Projectile::new(EntityKind::PlasmaBeam, damage, Some(shooter)).piercing(length),
                1.0,
                lifetime,
            )
        }
    };

    let id = registry.spawn();
    registry.transforms.insert(id, transform);
    registry.colliders.insert(id, Collider { radius });
    registry.lifetimes.insert(id, LifeTime::new(lifetime));
    registry.projectiles.insert(id, projectile);
    if let Some(ownership) = owner {
        registry.ownerships.insert(id, ownership);
    }
    Some(id)
}

/// Drops owner references that no longer resolve. Ships left without a pilot
/// are marked for destruction; anything else simply becomes ownerless.
pub fn ownership_system(registry: &mut EntityRegistry, players: &PlayerRegistry) -> usize {
    let orphaned: Vec<EntityId> = registry
        .ownerships
        .iter()
        .filter(|(_, ownership)| !players.contains(ownership.owner))
        .map(|(id, _)| id)
        .collect();

    for id in &orphaned {
        registry.ownerships.remove(*id);
        if registry.ships.contains(*id) {
            registry.mark_for_destruction(*id);
        }
    }
    orphaned.len()
}

/// Ticks every scripted entity. A failing script is logged once and detached.
pub fn script_system(
    registry: &EntityRegistry,
    host: &mut dyn ScriptHost,
    dt: f32,
) -> Vec<(EntityId, ScriptRequest)> {
    host.begin_tick(dt);
    let mut requests = Vec::new();
    for (id, script) in registry.scripts.iter() {
        if registry.is_pending_destruction(id) {
            continue;
        }
        match host.tick(id, script, dt) {
            Ok(batch) => requests.extend(batch.into_iter().map(|request| (id, request))),
            Err(e) => {
                warn!("Script on entity {} failed, detaching: {}", id, e);
                requests.push((id, ScriptRequest::Detach));
            }
        }
    }
    requests
}

pub fn apply_script_requests(
    registry: &mut EntityRegistry,
    requests: Vec<(EntityId, ScriptRequest)>,
) {
    for (id, request) in requests {
        match request {
            ScriptRequest::Destroy => {
                registry.mark_for_destruction(id);
            }
            ScriptRequest::SetTrigger(held) => {
                if let Some(weapon) = registry.weapons.get_mut(id) {
                    weapon.trigger_held = held;
                }
            }
            ScriptRequest::Thrust(thrust) => {
                if let Some(transform) = registry.transforms.get_mut(id) {
                    if thrust.is_finite() {
                        transform.thrust = thrust.clamp_length(MAX_THRUST);
                    }
                }
            }
            ScriptRequest::Detach => {
                registry.scripts.remove(id);
            }
        }
    }
}
