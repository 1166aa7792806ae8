//! Script collaborator boundary
//!
//! The script system hands each scripted entity to a [`ScriptHost`] once per
//! tick. Hosts never mutate the registry; they answer with
//! [`ScriptRequest`]s that the simulation applies itself after the pass.

use crate::components::{Script, Vector2};
use crate::entity::EntityId;
use crate::error::ScriptError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScriptRequest {
    Destroy,
    SetTrigger(bool),
    Thrust(Vector2),
    /// Removes the entity's `Script` component.
    Detach,
}

pub trait ScriptHost: Send {
    /// Called once per tick before any entity is ticked.
    fn begin_tick(&mut self, _dt: f32) {}

    fn tick(
        &mut self,
        entity: EntityId,
        script: &Script,
        dt: f32,
    ) -> Result<Vec<ScriptRequest>, ScriptError>;
}

/// Host that ignores every script.
#[derive(Debug, Default)]
pub struct NullScriptHost;

impl ScriptHost for NullScriptHost {
    fn tick(&mut self, _: EntityId, _: &Script, _: f32) -> Result<Vec<ScriptRequest>, ScriptError> {
        Ok(Vec::new())
    }
}

/// Small set of named autopilot behaviours sharing one host clock.
///
/// - `idle`: does nothing
/// - `autofire`: keeps the trigger held
/// - `orbit`: thrusts along a slowly rotating direction
#[derive(Debug, Default)]
pub struct BuiltinScriptHost {
    elapsed: f32,
}

impl BuiltinScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knows(name: &str) -> bool {
        matches!(name, "idle" | "autofire" | "orbit")
    }
}

impl ScriptHost for BuiltinScriptHost {
    fn begin_tick(&mut self, dt: f32) {
        self.elapsed += dt.max(0.0);
    }

    fn tick(
        &mut self,
        entity: EntityId,
        script: &Script,
        _dt: f32,
    ) -> Result<Vec<ScriptRequest>, ScriptError> {
        match script.name.as_str() {
            "idle" => Ok(Vec::new()),
            "autofire" => Ok(vec![ScriptRequest::SetTrigger(true)]),
            "orbit" => {
                // Offset by entity so a fleet doesn't move in lockstep.
                let angle = self.elapsed * 0.5 + entity.index() as f32;
                Ok(vec![ScriptRequest::Thrust(Vector2::new(angle.cos(), angle.sin()))])
            }
            other => Err(ScriptError::NotFound(other.to_string())),
        }
    }
}
