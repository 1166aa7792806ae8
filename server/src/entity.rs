//! Entity identifiers and the authoritative entity registry
//!
//! An entity is an index plus a generation. Freed slots are recycled with a
//! bumped generation, so an id held by anyone after its entity died never
//! resolves to the entity that later reuses the slot.
//!
//! Components live in one [`SparseSet`] per kind, exposed as fields so systems
//! can borrow several kinds at once. Destruction is tag-and-sweep: systems mark
//! entities during a tick and [`EntityRegistry::sweep`] removes them at the tick
//! boundary.

use crate::components::{
    Collider, Health, LifeTime, Ownership, Projectile, Script, Ship, Signature, Transform,
};
use crate::storage::SparseSet;
use crate::weapon::Weapon;
use std::collections::HashSet;
use std::fmt;
use std::thread::{self, ThreadId};

/// Unique identifier for an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub const fn index(self) -> u32 {
        self.index
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Packs the id as `generation << 32 | index` for the wire.
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Hands out entity ids and recycles freed slots.
#[derive(Debug, Default)]
pub struct EntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free: Vec<u32>,
}

impl EntityAllocator {
    pub fn allocate(&mut self) -> EntityId {
        if let Some(index) = self.free.pop() {
            let slot = index as usize;
            self.alive[slot] = true;
            return EntityId::new(index, self.generations[slot]);
        }

        let index = self.generations.len() as u32;
        self.generations.push(0);
        self.alive.push(true);
        EntityId::new(index, 0)
    }

    /// Frees `id`. Returns false for stale or already freed ids.
    pub fn free(&mut self, id: EntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let slot = id.index() as usize;
        self.alive[slot] = false;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.free.push(id.index());
        true
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        let slot = id.index() as usize;
        slot < self.alive.len() && self.alive[slot] && self.generations[slot] == id.generation()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len() - self.free.len()
    }
}

/// Entities marked for removal at the end of the current tick.
#[derive(Debug, Default)]
pub struct PendingDestruction {
    order: Vec<EntityId>,
    set: HashSet<EntityId>,
}

impl PendingDestruction {
    /// Returns true the first time an entity is marked.
    pub fn mark(&mut self, id: EntityId) -> bool {
        if self.set.insert(id) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.set.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn drain(&mut self) -> Vec<EntityId> {
        self.set.clear();
        std::mem::take(&mut self.order)
    }
}

/// Owns every live entity and its components.
///
/// The registry is bound to the thread that simulates it. Structural changes
/// from any other thread are a bug and trip a debug assertion.
pub struct EntityRegistry {
    allocator: EntityAllocator,
    owner_thread: ThreadId,
    pub transforms: SparseSet<Transform>,
    pub colliders: SparseSet<Collider>,
    pub healths: SparseSet<Health>,
    pub lifetimes: SparseSet<LifeTime>,
    pub projectiles: SparseSet<Projectile>,
    pub ownerships: SparseSet<Ownership>,
    pub weapons: SparseSet<Weapon>,
    pub signatures: SparseSet<Signature>,
    pub scripts: SparseSet<Script>,
    pub ships: SparseSet<Ship>,
    pub pending: PendingDestruction,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::default(),
            owner_thread: thread::current().id(),
            transforms: SparseSet::new(),
            colliders: SparseSet::new(),
            healths: SparseSet::new(),
            lifetimes: SparseSet::new(),
            projectiles: SparseSet::new(),
            ownerships: SparseSet::new(),
            weapons: SparseSet::new(),
            signatures: SparseSet::new(),
            scripts: SparseSet::new(),
            ships: SparseSet::new(),
            pending: PendingDestruction::default(),
        }
    }

    /// Hands ownership of the registry to the calling thread.
    pub fn bind_to_current_thread(&mut self) {
        self.owner_thread = thread::current().id();
    }

    pub fn assert_tick_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner_thread,
            "entity registry mutated off the simulation thread"
        );
    }

    pub fn spawn(&mut self) -> EntityId {
        self.assert_tick_thread();
        self.allocator.allocate()
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.allocator.is_alive(id)
    }

    /// Marks `id` for removal at the next sweep. Returns false if the entity is
    /// dead or already marked.
    pub fn mark_for_destruction(&mut self, id: EntityId) -> bool {
        self.assert_tick_thread();
        self.is_alive(id) && self.pending.mark(id)
    }

    pub fn is_pending_destruction(&self, id: EntityId) -> bool {
        self.pending.contains(id)
    }

    /// Removes every marked entity with all its components, in marking order.
    pub fn sweep(&mut self) -> Vec<EntityId> {
        self.assert_tick_thread();
        let doomed = self.pending.drain();
        let mut removed = Vec::with_capacity(doomed.len());
        for id in doomed {
            if !self.allocator.free(id) {
                continue;
            }
            self.transforms.remove(id);
            self.colliders.remove(id);
            self.healths.remove(id);
            self.lifetimes.remove(id);
            self.projectiles.remove(id);
            self.ownerships.remove(id);
            self.weapons.remove(id);
            self.signatures.remove(id);
            self.scripts.remove(id);
            self.ships.remove(id);
            removed.push(id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.allocator.alive_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
