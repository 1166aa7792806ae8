//! Cooldown-gated weapons
//!
//! Every weapon variant goes through the same [`Weapon::shoot`] gate. A variant
//! only describes what a shot spawns; whether it may fire is decided here and
//! cannot be overridden. The shot timestamp is recorded before the fire action
//! is handed out, so a second call at the same instant is always refused.

use crate::config::WeaponConfig;
use shared::{
    PLASMA_DAMAGE, PLASMA_LENGTH, PLASMA_LIFETIME, TORPEDO_DAMAGE, TORPEDO_LIFETIME,
    TORPEDO_SPEED,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeaponKind {
    Torpedo {
        damage: u16,
        speed: f32,
        lifetime: f32,
    },
    PlasmaBeam {
        damage: u16,
        length: f32,
        lifetime: f32,
    },
}

impl WeaponKind {
    pub fn torpedo() -> Self {
        WeaponKind::Torpedo {
            damage: TORPEDO_DAMAGE,
            speed: TORPEDO_SPEED,
            lifetime: TORPEDO_LIFETIME,
        }
    }

    pub fn plasma_beam() -> Self {
        WeaponKind::PlasmaBeam {
            damage: PLASMA_DAMAGE,
            length: PLASMA_LENGTH,
            lifetime: PLASMA_LIFETIME,
        }
    }

    /// Maps the profile's stored weapon preference; unknown values get torpedoes.
    pub fn from_preference(preference: i16) -> Self {
        match preference {
            1 => Self::plasma_beam(),
            _ => Self::torpedo(),
        }
    }

    pub fn cooldown_ms(&self, config: &WeaponConfig) -> u64 {
        match self {
            WeaponKind::Torpedo { .. } => config.torpedo_cooldown_ms,
            WeaponKind::PlasmaBeam { .. } => config.plasma_beam_cooldown_ms,
        }
    }

    fn fire_action(&self) -> FireAction {
        match *self {
            WeaponKind::Torpedo {
                damage,
                speed,
                lifetime,
            } => FireAction::SpawnTorpedo {
                damage,
                speed,
                lifetime,
            },
            WeaponKind::PlasmaBeam {
                damage,
                length,
                lifetime,
            } => FireAction::SpawnBeam {
                damage,
                length,
                lifetime,
            },
        }
    }
}

/// What a successful shot spawns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FireAction {
    SpawnTorpedo {
        damage: u16,
        speed: f32,
        lifetime: f32,
    },
    SpawnBeam {
        damage: u16,
        length: f32,
        lifetime: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponState {
    Idle,
    Cooldown { remaining_ms: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Weapon {
    kind: WeaponKind,
    cooldown_ms: u64,
    last_shoot_ms: Option<u64>,
    shots_fired: u64,
    /// Set by player input or scripts; the weapon system fires while held.
    pub trigger_held: bool,
}

impl Weapon {
    pub fn new(kind: WeaponKind, cooldown_ms: u64) -> Self {
        Self {
            kind,
            cooldown_ms,
            last_shoot_ms: None,
            shots_fired: 0,
            trigger_held: false,
        }
    }

    pub fn kind(&self) -> &WeaponKind {
        &self.kind
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    pub fn last_shoot_ms(&self) -> Option<u64> {
        self.last_shoot_ms
    }

    pub fn shots_fired(&self) -> u64 {
        self.shots_fired
    }

    pub fn state(&self, now_ms: u64) -> WeaponState {
        match self.last_shoot_ms {
            Some(last) if now_ms.saturating_sub(last) < self.cooldown_ms => WeaponState::Cooldown {
                remaining_ms: self.cooldown_ms - now_ms.saturating_sub(last),
            },
            _ => WeaponState::Idle,
        }
    }

    pub fn is_ready(&self, now_ms: u64) -> bool {
        self.state(now_ms) == WeaponState::Idle
    }

    /// Fires if the cooldown has elapsed. A refused shot is not an error.
    pub fn shoot(&mut self, now_ms: u64) -> Option<FireAction> {
        if !self.is_ready(now_ms) {
            return None;
        }
        self.last_shoot_ms = Some(now_ms);
        self.shots_fired += 1;
        Some(self.kind.fire_action())
    }
}
