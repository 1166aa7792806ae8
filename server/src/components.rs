use crate::entity::EntityId;
use crate::players::PlayerHandle;
use shared::EntityKind;
use std::collections::HashSet;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector, or zero for a zero vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns the difference of two vectors.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn dot(&self, other: &Vector2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    ///Returns the vector shortened to at most `max` length.
    pub fn clamp_length(&self, max: f32) -> Vector2 {
        if self.magnitude() > max {
            self.normalize().scale(max)
        } else {
            *self
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Position and motion of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vector2,
    pub velocity: Vector2,
    /// Requested acceleration direction, ships only. Length at most 1.
    pub thrust: Vector2,
    /// Unit vector the entity faces; weapons fire along it.
    pub heading: Vector2,
}

impl Transform {
    pub fn at(position: Vector2) -> Self {
        Self {
            position,
            velocity: Vector2::ZERO,
            thrust: Vector2::ZERO,
            heading: Vector2::new(1.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    pub hull: u16,
    pub max_hull: u16,
}

impl Health {
    pub fn new(max_hull: u16) -> Self {
        Self {
            hull: max_hull,
            max_hull,
        }
    }

    /// Applies damage and returns true only on the hit that destroys the hull.
    pub fn apply_damage(&mut self, damage: u16) -> bool {
        if self.hull == 0 {
            return false;
        }
        self.hull = self.hull.saturating_sub(damage);
        self.hull == 0
    }

    pub fn is_destroyed(&self) -> bool {
        self.hull == 0
    }
}

/// Time to live in seconds.
///
/// Elapsed time is accumulated rather than subtracted so the entity expires on
/// the tick where the summed `dt` first reaches the duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifeTime {
    duration: f32,
    elapsed: f32,
}

impl LifeTime {
    pub fn new(seconds: f32) -> Self {
        Self {
            duration: seconds.max(0.0),
            elapsed: 0.0,
        }
    }

    pub fn remaining(&self) -> f32 {
        (self.duration - self.elapsed).max(0.0)
    }

    /// Advances by `dt` (never backwards) and reports whether time ran out.
    pub fn tick(&mut self, dt: f32) -> bool {
        self.elapsed += dt.max(0.0);
        self.is_expired()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed >= self.duration
    }
}

/// Damage carrier that hits every target at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub kind: EntityKind,
    pub damage: u16,
    /// Ship that fired it; never hit by its own shot.
    pub shooter: Option<EntityId>,
    /// Length of the damaging segment along the heading. Zero for point shots.
    pub length: f32,
    pub destroy_on_hit: bool,
    hit_entities: HashSet<EntityId>,
}

impl Projectile {
    pub fn new(kind: EntityKind, damage: u16, shooter: Option<EntityId>) -> Self {
        Self {
            kind,
            damage,
            shooter,
            length: 0.0,
            destroy_on_hit: true,
            hit_entities: HashSet::new(),
        }
    }

    pub fn piercing(mut self, length: f32) -> Self {
        self.length = length.max(0.0);
        self.destroy_on_hit = false;
        self
    }

    pub fn has_been_hit(&self, target: EntityId) -> bool {
        self.hit_entities.contains(&target)
    }

    /// Records a hit on `target`. Returns true only the first time, which is
    /// the only time damage may be applied.
    pub fn mark_as_hit(&mut self, target: EntityId) -> bool {
        self.hit_entities.insert(target)
    }

    pub fn hit_count(&self) -> usize {
        self.hit_entities.len()
    }
}

/// Weak back reference to the controlling player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub owner: PlayerHandle,
}

/// Sensor classification data. Read-only once attached.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signature {
    pub id: i64,
    pub size: f32,
    pub volume: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: String,
}

/// Marks an entity as a player ship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ship;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vector_math() {
        let v = Vector2::new(3.0, 4.0);
        assert_approx_eq!(v.magnitude(), 5.0);
        assert_approx_eq!(v.normalize().magnitude(), 1.0);
        assert_eq!(Vector2::ZERO.normalize(), Vector2::ZERO);
        assert_approx_eq!(v.clamp_length(1.0).magnitude(), 1.0);
        assert_eq!(v.sub(&v), Vector2::ZERO);
        assert_approx_eq!(v.dot(&Vector2::new(1.0, 0.0)), 3.0);
    }

    #[test]
    fn test_lifetime_clamps_and_never_increases() {
        let mut lifetime = LifeTime::new(1.0);
        assert!(!lifetime.tick(0.4));
        assert!(!lifetime.tick(-5.0));
        assert_approx_eq!(lifetime.remaining(), 0.6);
        assert!(lifetime.tick(2.0));
        assert_eq!(lifetime.remaining(), 0.0);
        assert!(lifetime.is_expired());
    }

    #[test]
    fn test_projectile_hits_are_idempotent() {
        let target = EntityId::new(4, 0);
        let other = EntityId::new(5, 0);
        let mut projectile = Projectile::new(EntityKind::Torpedo, 25, None);

        assert!(!projectile.has_been_hit(target));
        assert!(projectile.mark_as_hit(target));
        assert!(!projectile.mark_as_hit(target));
        assert!(projectile.has_been_hit(target));
        assert!(!projectile.has_been_hit(other));
        assert_eq!(projectile.hit_count(), 1);
    }

    #[test]
    fn test_health_reports_destruction_once() {
        let mut health = Health::new(30);
        assert!(!health.apply_damage(20));
        assert!(health.apply_damage(20));
        assert!(!health.apply_damage(20));
        assert!(health.is_destroyed());
    }

    #[test]
    fn test_piercing_projectile() {
        let beam = Projectile::new(EntityKind::PlasmaBeam, 10, None).piercing(300.0);
        assert!(!beam.destroy_on_hit);
        assert_approx_eq!(beam.length, 300.0);
    }
}
