//! Connected players and generation-checked handles to them
//!
//! Entities refer to their pilot through a [`PlayerHandle`]. Removing a player
//! bumps the slot generation, so every handle still stored on an entity simply
//! stops resolving instead of pointing at whoever joins next.

use crate::client_manager::PeerId;
use crate::database::PlayerProfile;
use crate::entity::EntityId;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlayerHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub peer: PeerId,
    pub profile: PlayerProfile,
    /// Ship currently piloted, if any.
    pub ship: Option<EntityId>,
    pub kills: u32,
    pub deaths: u32,
    /// Simulation time at which a destroyed ship is replaced.
    pub respawn_at_ms: Option<u64>,
}

impl Player {
    pub fn new(peer: PeerId, profile: PlayerProfile) -> Self {
        Self {
            peer,
            profile,
            ship: None,
            kills: 0,
            deaths: 0,
            respawn_at_ms: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }
}

#[derive(Debug)]
struct PlayerSlot {
    generation: u32,
    player: Option<Player>,
}

#[derive(Debug, Default)]
pub struct PlayerRegistry {
    slots: Vec<PlayerSlot>,
    free: Vec<u32>,
    by_peer: HashMap<PeerId, PlayerHandle>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, player: Player) -> PlayerHandle {
        let peer = player.peer;
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.player = Some(player);
                PlayerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(PlayerSlot {
                    generation: 0,
                    player: Some(player),
                });
                PlayerHandle {
                    index,
                    generation: 0,
                }
            }
        };
        self.by_peer.insert(peer, handle);
        handle
    }

    /// Removes the player; all outstanding handles to it become stale.
    pub fn remove(&mut self, handle: PlayerHandle) -> Option<Player> {
        if !self.contains(handle) {
            return None;
        }
        let slot = &mut self.slots[handle.index as usize];
        let player = slot.player.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.by_peer.remove(&player.peer);
        Some(player)
    }

    pub fn contains(&self, handle: PlayerHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: PlayerHandle) -> Option<&Player> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.player.as_ref()
    }

    pub fn get_mut(&mut self, handle: PlayerHandle) -> Option<&mut Player> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.player.as_mut()
    }

    pub fn find_by_peer(&self, peer: PeerId) -> Option<PlayerHandle> {
        self.by_peer.get(&peer).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlayerHandle, &Player)> {
        self.by_peer
            .values()
            .filter_map(|handle| self.get(*handle).map(|player| (*handle, player)))
    }

    pub fn handles(&self) -> Vec<PlayerHandle> {
        let mut handles: Vec<PlayerHandle> = self.by_peer.values().copied().collect();
        handles.sort_by_key(|handle| handle.index);
        handles
    }

    pub fn len(&self) -> usize {
        self.by_peer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_peer.is_empty()
    }
}
