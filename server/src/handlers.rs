//! Handlers for the client opcodes
//!
//! Handlers run on network tasks. They decode and validate the payload, then
//! either answer directly (`PING`), forward a [`SimCommand`] to the tick
//! thread, or enqueue a worker job (`JOIN`, which needs the database).

use crate::client_manager::PeerId;
use crate::command_store::CommandStore;
use crate::components::Vector2;
use crate::database::{load_or_create_profile, Database};
use crate::error::{CommandError, JobError, ProtocolError};
use crate::game::{Outgoing, SimCommand, SimSender};
use crate::job_queue::JobQueue;
use log::{debug, info};
use serde::de::DeserializeOwned;
use shared::{
    decode_payload, opcodes, timestamp_ms, Join, Move, Ping, ServerPacket, SetScript, Shoot,
    MAX_NAME_LEN, MAX_THRUST, PROTOCOL_VERSION,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub const MAX_SCRIPT_NAME_LEN: usize = 32;

// Slack for clients normalising thrust in f32
const THRUST_TOLERANCE: f32 = 1e-3;

/// Everything the handlers need to reach the rest of the server.
#[derive(Clone)]
pub struct HandlerContext {
    pub sim: SimSender,
    pub jobs: Arc<JobQueue>,
    pub outgoing: UnboundedSender<Outgoing>,
    pub database: Arc<dyn Database>,
}

fn decode<T: DeserializeOwned>(opcode: u8, payload: &[u8]) -> Result<T, ProtocolError> {
    decode_payload(payload).map_err(|source| ProtocolError::Payload { opcode, source })
}

fn forward(sim: &SimSender, command: SimCommand) -> Result<(), ProtocolError> {
    sim.send(command).map_err(|_| ProtocolError::SimulationClosed)
}

pub fn validate_thrust(x: f32, y: f32) -> Result<Vector2, ProtocolError> {
    let thrust = Vector2::new(x, y);
    if !thrust.is_finite() {
        return Err(ProtocolError::InvalidValue {
            field: "thrust",
            reason: "not a finite number".to_string(),
        });
    }
    if thrust.magnitude() > MAX_THRUST + THRUST_TOLERANCE {
        return Err(ProtocolError::InvalidValue {
            field: "thrust",
            reason: format!("magnitude {:.3} exceeds {}", thrust.magnitude(), MAX_THRUST),
        });
    }
    Ok(thrust.clamp_length(MAX_THRUST))
}

pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    let length = name.chars().count();
    if name.trim().is_empty() || length > MAX_NAME_LEN {
        return Err(ProtocolError::InvalidValue {
            field: "name",
            reason: format!("length must be 1..={}, got {}", MAX_NAME_LEN, length),
        });
    }
    if name.chars().any(char::is_control) {
        return Err(ProtocolError::InvalidValue {
            field: "name",
            reason: "contains control characters".to_string(),
        });
    }
    Ok(())
}

fn validate_script(script: &Option<String>) -> Result<(), ProtocolError> {
    match script {
        Some(name) if name.is_empty() || name.len() > MAX_SCRIPT_NAME_LEN => {
            Err(ProtocolError::InvalidValue {
                field: "script",
                reason: format!("length must be 1..={}", MAX_SCRIPT_NAME_LEN),
            })
        }
        _ => Ok(()),
    }
}

/// Registers every client opcode and disables the ones listed in `disabled`.
pub fn build_command_store(
    ctx: HandlerContext,
    disabled: &[u8],
) -> Result<CommandStore, CommandError> {
    let mut builder = CommandStore::builder();

    let outgoing = ctx.outgoing.clone();
    builder.register_incoming(opcodes::PING, "ping", true, move |peer, payload| {
        let ping: Ping = decode(opcodes::PING, payload)?;
        outgoing
            .send(Outgoing::to_peer(
                peer,
                ServerPacket::Pong {
                    timestamp: ping.timestamp,
                    server_time: timestamp_ms(),
                },
            ))
            .map_err(|_| ProtocolError::SimulationClosed)
    })?;

    let sim = ctx.sim.clone();
    builder.register_incoming(opcodes::MOVE, "move", true, move |peer, payload| {
        let movement: Move = decode(opcodes::MOVE, payload)?;
        let thrust = validate_thrust(movement.thrust_x, movement.thrust_y)?;
        forward(&sim, SimCommand::Move { peer, thrust })
    })?;

    let sim = ctx.sim.clone();
    builder.register_incoming(opcodes::SHOOT, "shoot", true, move |peer, payload| {
        let shoot: Shoot = decode(opcodes::SHOOT, payload)?;
        forward(
            &sim,
            SimCommand::Trigger {
                peer,
                pressed: shoot.pressed,
            },
        )
    })?;

    let sim = ctx.sim.clone();
    let jobs = Arc::clone(&ctx.jobs);
    let database = Arc::clone(&ctx.database);
    builder.register_incoming(opcodes::JOIN, "join", true, move |peer, payload| {
        let join: Join = decode(opcodes::JOIN, payload)?;
        if join.client_version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidValue {
                field: "client_version",
                reason: format!("expected {}, got {}", PROTOCOL_VERSION, join.client_version),
            });
        }
        validate_name(&join.name)?;
        debug!("Peer {} joining as {}", peer, join.name);

        if jobs.submit(load_profile_job(peer, join.name, Arc::clone(&database), sim.clone())) {
            Ok(())
        } else {
            Err(ProtocolError::SimulationClosed)
        }
    })?;

    // LEAVE carries no payload; trailing bytes are ignored.
    let sim = ctx.sim.clone();
    builder.register_incoming(opcodes::LEAVE, "leave", true, move |peer, _| {
        forward(&sim, SimCommand::Leave { peer })
    })?;

    let sim = ctx.sim;
    builder.register_incoming(opcodes::SET_SCRIPT, "set_script", true, move |peer, payload| {
        let request: SetScript = decode(opcodes::SET_SCRIPT, payload)?;
        validate_script(&request.script)?;
        forward(
            &sim,
            SimCommand::SetScript {
                peer,
                script: request.script,
            },
        )
    })?;

    for opcode in disabled {
        info!("Opcode 0x{:02x} disabled by configuration", opcode);
        builder.disable(*opcode);
    }

    Ok(builder.build())
}

fn load_profile_job(
    peer: PeerId,
    name: String,
    database: Arc<dyn Database>,
    sim: SimSender,
) -> impl FnOnce() -> Result<(), JobError> + Send + 'static {
    move || {
        let (command, outcome) = match load_or_create_profile(database.as_ref(), &name) {
            Ok(profile) if profile.banned => {
                info!("Refusing banned player {} on peer {}", name, peer);
                let command = SimCommand::JoinFailed {
                    peer,
                    reason: "banned".to_string(),
                };
                (command, Ok(()))
            }
            Ok(profile) => (SimCommand::PlayerLoaded { peer, profile }, Ok(())),
            Err(e) => {
                let command = SimCommand::JoinFailed {
                    peer,
                    reason: "profile unavailable".to_string(),
                };
                (command, Err(JobError::from(e)))
            }
        };
        sim.send(command).map_err(|_| JobError::ResultChannelClosed)?;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemoryDatabase, PlayerProfile};
    use crate::error::DbError;
    use crate::game::{sim_channel, SimReceiver, Target};
    use shared::encode_packet;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Fixture {
        store: CommandStore,
        sim: SimReceiver,
        outgoing: UnboundedReceiver<Outgoing>,
        jobs: Arc<JobQueue>,
        database: Arc<MemoryDatabase>,
    }

    fn fixture(disabled: &[u8]) -> Fixture {
        fixture_with(disabled, MemoryDatabase::new())
    }

    fn fixture_with(disabled: &[u8], database: MemoryDatabase) -> Fixture {
        let (sim_tx, sim_rx) = sim_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let jobs = Arc::new(JobQueue::new(16));
        let database = Arc::new(database);
        let ctx = HandlerContext {
            sim: sim_tx,
            jobs: Arc::clone(&jobs),
            outgoing: out_tx,
            database: database.clone(),
        };
        Fixture {
            store: build_command_store(ctx, disabled).unwrap(),
            sim: sim_rx,
            outgoing: out_rx,
            jobs,
            database,
        }
    }

    fn run_next_job(jobs: &JobQueue) -> Result<(), JobError> {
        let job = jobs.dequeue(Duration::from_millis(50)).expect("queued job");
        job()
    }

    fn join_packet(version: u32, name: &str) -> Vec<u8> {
        encode_packet(
            opcodes::JOIN,
            &Join {
                client_version: version,
                name: name.to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_all_opcodes_registered() {
        let f = fixture(&[]);
        assert_eq!(f.store.len(), 6);
        assert_eq!(f.store.name(opcodes::SET_SCRIPT), Some("set_script"));
    }

    #[test]
    fn test_ping_answers_directly() {
        let mut f = fixture(&[]);
        let packet = encode_packet(opcodes::PING, &Ping { timestamp: 77 }).unwrap();
        assert!(f.store.dispatch(3, &packet));

        let reply = tokio_test::block_on(f.outgoing.recv()).unwrap();
        assert_eq!(reply.target, Target::Peer(3));
        assert!(matches!(reply.packet, ServerPacket::Pong { timestamp: 77, .. }));
        assert!(f.sim.try_recv().is_err());
    }

    #[test]
    fn test_move_forwarded_to_simulation() {
        let f = fixture(&[]);
        let packet = encode_packet(
            opcodes::MOVE,
            &Move {
                thrust_x: 0.6,
                thrust_y: 0.8,
            },
        )
        .unwrap();
        f.store.try_dispatch(5, &packet).unwrap();

        match f.sim.try_recv().unwrap() {
            SimCommand::Move { peer, thrust } => {
                assert_eq!(peer, 5);
                assert!((thrust.magnitude() - 1.0).abs() < 1e-5);
            }
            other => panic!("Unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_thrust_rejected() {
        let f = fixture(&[]);
        for (x, y) in [(f32::NAN, 0.0), (f32::INFINITY, 0.0), (3.0, 0.0)] {
            let packet = encode_packet(
                opcodes::MOVE,
                &Move {
                    thrust_x: x,
                    thrust_y: y,
                },
            )
            .unwrap();
            assert!(matches!(
                f.store.try_dispatch(5, &packet),
                Err(ProtocolError::InvalidValue { field: "thrust", .. })
            ));
        }
        assert!(f.sim.try_recv().is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let f = fixture(&[]);
        let packet = encode_packet(
            opcodes::MOVE,
            &Move {
                thrust_x: 0.1,
                thrust_y: 0.1,
            },
        )
        .unwrap();
        assert!(matches!(
            f.store.try_dispatch(5, &packet[..4]),
            Err(ProtocolError::Payload {
                opcode: opcodes::MOVE,
                ..
            })
        ));
    }

    #[test]
    fn test_join_loads_profile_on_worker() {
        let f = fixture(&[]);
        assert!(f.store.dispatch(9, &join_packet(PROTOCOL_VERSION, "vega")));
        assert!(f.sim.try_recv().is_err());

        run_next_job(&f.jobs).unwrap();
        assert_eq!(
            f.sim.try_recv().unwrap(),
            SimCommand::PlayerLoaded {
                peer: 9,
                profile: PlayerProfile::new("vega"),
            }
        );
        assert!(f.database.profile("vega").is_some());
    }

    #[test]
    fn test_join_banned_player() {
        let mut banned = PlayerProfile::new("mallory");
        banned.banned = true;
        let f = fixture_with(&[], MemoryDatabase::with_profiles([banned]));
        assert!(f.store.dispatch(9, &join_packet(PROTOCOL_VERSION, "mallory")));

        run_next_job(&f.jobs).unwrap();
        assert_eq!(
            f.sim.try_recv().unwrap(),
            SimCommand::JoinFailed {
                peer: 9,
                reason: "banned".to_string(),
            }
        );
    }

    #[test]
    fn test_join_reports_database_outage() {
        let f = fixture(&[]);
        f.database.set_available(false);
        assert!(f.store.dispatch(9, &join_packet(PROTOCOL_VERSION, "vega")));

        assert!(matches!(
            run_next_job(&f.jobs),
            Err(JobError::Database(DbError::Unavailable))
        ));
        assert_eq!(
            f.sim.try_recv().unwrap(),
            SimCommand::JoinFailed {
                peer: 9,
                reason: "profile unavailable".to_string(),
            }
        );
    }

    #[test]
    fn test_join_validation() {
        let f = fixture(&[]);
        assert!(matches!(
            f.store.try_dispatch(9, &join_packet(PROTOCOL_VERSION + 1, "vega")),
            Err(ProtocolError::InvalidValue {
                field: "client_version",
                ..
            })
        ));
        assert!(f.store.try_dispatch(9, &join_packet(PROTOCOL_VERSION, "")).is_err());
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(f
            .store
            .try_dispatch(9, &join_packet(PROTOCOL_VERSION, &long_name))
            .is_err());
        assert!(f.jobs.is_empty());
    }

    #[test]
    fn test_leave_ignores_payload() {
        let f = fixture(&[]);
        assert!(f.store.dispatch(2, &[opcodes::LEAVE, 0xff]));
        assert_eq!(f.sim.try_recv().unwrap(), SimCommand::Leave { peer: 2 });
    }

    #[test]
    fn test_set_script_validation() {
        let f = fixture(&[]);
        let clear = encode_packet(opcodes::SET_SCRIPT, &SetScript { script: None }).unwrap();
        assert!(f.store.dispatch(2, &clear));
        assert_eq!(
            f.sim.try_recv().unwrap(),
            SimCommand::SetScript {
                peer: 2,
                script: None
            }
        );

        let empty = encode_packet(
            opcodes::SET_SCRIPT,
            &SetScript {
                script: Some(String::new()),
            },
        )
        .unwrap();
        assert!(!f.store.dispatch(2, &empty));
    }

    #[test]
    fn test_disabled_opcode_not_forwarded() {
        let f = fixture(&[opcodes::SHOOT]);
        let packet = encode_packet(opcodes::SHOOT, &Shoot { pressed: true }).unwrap();
        assert!(matches!(
            f.store.try_dispatch(1, &packet),
            Err(ProtocolError::UnknownOpcode {
                peer: 1,
                opcode: opcodes::SHOOT
            })
        ));
        assert!(f.sim.try_recv().is_err());
    }

    #[test]
    fn test_closed_simulation_reported() {
        let f = fixture(&[]);
        drop(f.sim);
        assert!(matches!(
            f.store.try_dispatch(1, &[opcodes::LEAVE]),
            Err(ProtocolError::SimulationClosed)
        ));
    }
}
