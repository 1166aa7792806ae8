//! Opcode-indexed dispatch of incoming packets
//!
//! The first byte of every application packet selects a handler from a flat
//! 256-entry table. The table is filled once through [`CommandStoreBuilder`]
//! and is immutable afterwards, so network tasks can dispatch concurrently
//! through a shared reference without locking.
//!
//! A rejected packet never reaches a handler and never affects other peers:
//! dispatch logs one line naming the peer and reports failure to the caller,
//! which owns any connection-level policy.

use crate::client_manager::PeerId;
use crate::error::{CommandError, ProtocolError};
use log::warn;

/// Decodes the payload of one opcode and turns it into a simulation action.
pub type Handler = Box<dyn Fn(PeerId, &[u8]) -> Result<(), ProtocolError> + Send + Sync>;

const OPCODE_COUNT: usize = 256;

struct CommandEntry {
    name: &'static str,
    enabled: bool,
    handler: Handler,
}

pub struct CommandStoreBuilder {
    entries: Vec<Option<CommandEntry>>,
}

impl CommandStoreBuilder {
    pub fn new() -> Self {
        Self {
            entries: (0..OPCODE_COUNT).map(|_| None).collect(),
        }
    }

    /// Binds `opcode` to `handler`. Binding an opcode twice is a wiring bug and
    /// is reported so startup can abort.
    pub fn register_incoming<F>(
        &mut self,
        opcode: u8,
        name: &'static str,
        enabled: bool,
        handler: F,
    ) -> Result<&mut Self, CommandError>
    where
        F: Fn(PeerId, &[u8]) -> Result<(), ProtocolError> + Send + Sync + 'static,
    {
        let slot = &mut self.entries[usize::from(opcode)];
        if slot.is_some() {
            return Err(CommandError::DuplicateOpcode(opcode));
        }
        *slot = Some(CommandEntry {
            name,
            enabled,
            handler: Box::new(handler),
        });
        Ok(self)
    }

    /// Disables an already registered opcode. Unknown opcodes are ignored.
    pub fn disable(&mut self, opcode: u8) -> &mut Self {
        if let Some(entry) = self.entries[usize::from(opcode)].as_mut() {
            entry.enabled = false;
        }
        self
    }

    pub fn build(self) -> CommandStore {
        CommandStore {
            entries: self.entries.into_boxed_slice(),
        }
    }
}

impl Default for CommandStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CommandStore {
    entries: Box<[Option<CommandEntry>]>,
}

impl CommandStore {
    pub fn builder() -> CommandStoreBuilder {
        CommandStoreBuilder::new()
    }

    /// Routes one packet to its handler, running at most one handler.
    pub fn try_dispatch(&self, peer: PeerId, packet: &[u8]) -> Result<(), ProtocolError> {
        let (opcode, payload) = shared::split_opcode(packet).ok_or(ProtocolError::Decode {
            peer,
            reason: "packet has no opcode",
        })?;

        match self.entries[usize::from(opcode)].as_ref() {
            Some(entry) if entry.enabled => (entry.handler)(peer, payload),
            _ => Err(ProtocolError::UnknownOpcode { peer, opcode }),
        }
    }

    /// Same as [`try_dispatch`](Self::try_dispatch) but logs the failure and
    /// only reports whether the packet was accepted.
    pub fn dispatch(&self, peer: PeerId, packet: &[u8]) -> bool {
        match self.try_dispatch(peer, packet) {
            Ok(()) => true,
            Err(e) => {
                let command = packet
                    .first()
                    .and_then(|&opcode| self.name(opcode))
                    .unwrap_or("unknown");
                warn!("Rejected {} packet from peer {}: {}", command, peer, e);
                false
            }
        }
    }

    pub fn is_registered(&self, opcode: u8) -> bool {
        self.entries[usize::from(opcode)].is_some()
    }

    pub fn is_enabled(&self, opcode: u8) -> bool {
        self.entries[usize::from(opcode)]
            .as_ref()
            .is_some_and(|entry| entry.enabled)
    }

    pub fn name(&self, opcode: u8) -> Option<&'static str> {
        self.entries[usize::from(opcode)].as_ref().map(|entry| entry.name)
    }

    /// Number of registered opcodes, enabled or not.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
