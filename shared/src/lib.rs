use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_VERSION: u32 = 3;

pub const WORLD_RADIUS: f32 = 4000.0;
pub const MAX_SHIP_SPEED: f32 = 250.0;
pub const SHIP_ACCELERATION: f32 = 400.0;
pub const RESPAWN_DELAY_MS: u64 = 3000;
pub const MAX_THRUST: f32 = 1.0;
pub const SHIP_RADIUS: f32 = 24.0;
pub const SHIP_HULL: u16 = 100;
pub const MAX_NAME_LEN: usize = 24;

pub const TORPEDO_DAMAGE: u16 = 25;
pub const TORPEDO_SPEED: f32 = 600.0;
pub const TORPEDO_LIFETIME: f32 = 3.0;
pub const TORPEDO_RADIUS: f32 = 4.0;

pub const PLASMA_DAMAGE: u16 = 10;
pub const PLASMA_LENGTH: f32 = 300.0;
pub const PLASMA_LIFETIME: f32 = 0.25;

/// Opcodes carried in the first byte of every application packet.
pub mod opcodes {
    // client -> server
    pub const PING: u8 = 0x01;
    pub const MOVE: u8 = 0x02;
    pub const SHOOT: u8 = 0x03;
    pub const JOIN: u8 = 0x04;
    pub const LEAVE: u8 = 0x05;
    pub const SET_SCRIPT: u8 = 0x06;

    // server -> client
    pub const PONG: u8 = 0x81;
    pub const WELCOME: u8 = 0x82;
    pub const JOIN_REJECTED: u8 = 0x83;
    pub const SNAPSHOT: u8 = 0x84;
    pub const ENTITY_DESTROYED: u8 = 0x85;
    pub const SHIP_DESTROYED: u8 = 0x86;
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty packet")]
    Empty,
    #[error("unknown server opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("payload: {0}")]
    Payload(#[from] bincode::Error),
}

// Client payloads

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Ping {
    pub timestamp: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Move {
    pub thrust_x: f32,
    pub thrust_y: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Shoot {
    pub pressed: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Join {
    pub client_version: u32,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SetScript {
    pub script: Option<String>,
}

// Server payloads

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Ship,
    Torpedo,
    PlasmaBeam,
    Other,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EntityState {
    pub id: u64,
    pub kind: EntityKind,
    pub x: f32,
    pub y: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub hull: Option<u16>,
    pub owner: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ServerPacket {
    Pong {
        timestamp: u64,
        server_time: u64,
    },
    Welcome {
        player_id: u32,
        ship: u64,
        tick: u64,
    },
    JoinRejected {
        reason: String,
    },
    Snapshot {
        tick: u64,
        timestamp: u64,
        entities: Vec<EntityState>,
    },
    EntityDestroyed {
        entity: u64,
    },
    ShipDestroyed {
        ship: u64,
        victim: Option<u32>,
        killer: Option<u32>,
    },
}

impl ServerPacket {
    pub fn opcode(&self) -> u8 {
        match self {
            ServerPacket::Pong { .. } => opcodes::PONG,
            ServerPacket::Welcome { .. } => opcodes::WELCOME,
            ServerPacket::JoinRejected { .. } => opcodes::JOIN_REJECTED,
            ServerPacket::Snapshot { .. } => opcodes::SNAPSHOT,
            ServerPacket::EntityDestroyed { .. } => opcodes::ENTITY_DESTROYED,
            ServerPacket::ShipDestroyed { .. } => opcodes::SHIP_DESTROYED,
        }
    }

    /// Frames the packet as `[opcode][bincode(self)]`.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        encode_packet(self.opcode(), self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (opcode, payload) = split_opcode(bytes).ok_or(FrameError::Empty)?;
        if !(opcodes::PONG..=opcodes::SHIP_DESTROYED).contains(&opcode) {
            return Err(FrameError::UnknownOpcode(opcode));
        }
        let packet: ServerPacket = decode_payload(payload)?;
        if packet.opcode() != opcode {
            return Err(FrameError::UnknownOpcode(opcode));
        }
        Ok(packet)
    }
}

pub fn encode_packet<T: Serialize + ?Sized>(opcode: u8, payload: &T) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(payload)?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(opcode);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Splits a packet into its opcode and the remaining payload bytes.
pub fn split_opcode(packet: &[u8]) -> Option<(u8, &[u8])> {
    packet.split_first().map(|(opcode, rest)| (*opcode, rest))
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(payload)
}

// Get current timestamp in milliseconds
pub fn timestamp_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}
