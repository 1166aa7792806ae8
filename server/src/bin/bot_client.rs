//! Headless bot that joins a running server, flies around and fires.

use clap::Parser;
use log::{info, warn};
use server::script::BuiltinScriptHost;
use shared::{
    encode_packet, opcodes, timestamp_ms, EntityKind, EntityState, Join, Move, Ping, ServerPacket,
    SetScript, Shoot, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: SocketAddr,

    /// Pilot name
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// How many seconds to fly before leaving
    #[arg(short = 'd', long, default_value = "10")]
    duration: u64,

    /// Hand the ship to a server-side script instead of steering
    #[arg(long)]
    script: Option<String>,
}

async fn send<T: serde::Serialize>(
    socket: &UdpSocket,
    server: SocketAddr,
    opcode: u8,
    payload: &T,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = encode_packet(opcode, payload)?;
    socket.send_to(&data, server).await?;
    Ok(())
}

/// The ship currently flown by `player_id`. Changes on every respawn.
fn own_ship(entities: &[EntityState], player_id: u32) -> Option<&EntityState> {
    entities
        .iter()
        .find(|e| e.kind == EntityKind::Ship && e.owner == Some(player_id))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Bot socket bound to {}", socket.local_addr()?);

    send(
        &socket,
        args.server,
        opcodes::JOIN,
        &Join {
            client_version: PROTOCOL_VERSION,
            name: args.name.clone(),
        },
    )
    .await?;

    // Buffer for receiving data
    let mut buf = [0u8; 65_536];

    let player_id = loop {
        let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf)).await??;
        match ServerPacket::decode(&buf[..len]) {
            Ok(ServerPacket::Welcome {
                player_id, ship, ..
            }) => {
                info!("Joined as player {} flying ship {}", player_id, ship);
                break player_id;
            }
            Ok(ServerPacket::JoinRejected { reason }) => {
                warn!("Join rejected: {}", reason);
                return Ok(());
            }
            // Snapshots can arrive before the welcome
            Ok(_) => continue,
            Err(e) => warn!("Failed to decode packet: {}", e),
        }
    };

    if let Some(script) = &args.script {
        if !BuiltinScriptHost::knows(script) {
            warn!("Script {} is not built in, the server will detach it", script);
        }
        send(
            &socket,
            args.server,
            opcodes::SET_SCRIPT,
            &SetScript {
                script: Some(script.clone()),
            },
        )
        .await?;
    }
    send(&socket, args.server, opcodes::SHOOT, &Shoot { pressed: true }).await?;

    let steps = args.duration * 4;
    for step in 0..steps {
        if args.script.is_none() {
            let angle = step as f32 / 8.0;
            send(
                &socket,
                args.server,
                opcodes::MOVE,
                &Move {
                    thrust_x: angle.cos(),
                    thrust_y: angle.sin(),
                },
            )
            .await?;
        }
        if step % 4 == 0 {
            send(
                &socket,
                args.server,
                opcodes::PING,
                &Ping {
                    timestamp: timestamp_ms(),
                },
            )
            .await?;
        }

        // Drain whatever arrived since the last step
        while let Ok(Ok((len, _))) =
            timeout(Duration::from_millis(1), socket.recv_from(&mut buf)).await
        {
            match ServerPacket::decode(&buf[..len]) {
                Ok(ServerPacket::Pong { timestamp, .. }) => {
                    info!("RTT {}ms", timestamp_ms().saturating_sub(timestamp));
                }
                Ok(ServerPacket::Snapshot { tick, entities, .. }) if step % 4 == 0 => {
                    let own = own_ship(&entities, player_id);
                    info!(
                        "Tick {}: {} entities, own ship {:?}",
                        tick,
                        entities.len(),
                        own.map(|e| (e.x, e.y, e.hull))
                    );
                }
                Ok(ServerPacket::ShipDestroyed {
                    ship: lost,
                    victim,
                    killer,
                }) if victim == Some(player_id) => {
                    info!("Ship {} destroyed by {:?}", lost, killer);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to decode packet: {}", e),
            }
        }

        sleep(Duration::from_millis(250)).await;
    }

    // Send leave when done
    socket.send_to(&[opcodes::LEAVE], args.server).await?;
    info!("Bot finished");
    Ok(())
}
