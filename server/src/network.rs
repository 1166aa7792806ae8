//! UDP transport
//!
//! The server runs three concurrent tasks:
//! - **Network Receiver**: maps source addresses to peers and hands each
//!   datagram to the [`CommandStore`]
//! - **Network Sender**: writes packets produced by the tick thread and by
//!   handlers to one peer or to every peer
//! - **Timeout Checker**: drops silent peers and tells the simulation they left
//!
//! The transport owns connection policy only. Peers that keep sending
//! rejected packets are disconnected here; the dispatcher itself never does.

use crate::client_manager::{ClientManager, ErrorVerdict, PeerId};
use crate::command_store::CommandStore;
use crate::config::ServerConfig;
use crate::game::{Outgoing, SimCommand, SimSender, Target};
use log::{debug, error, info, warn};
use shared::{opcodes, split_opcode};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

const RECV_BUFFER_SIZE: usize = 2048;
const TIMEOUT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    commands: Arc<CommandStore>,
    sim: SimSender,
    outgoing: Option<mpsc::UnboundedReceiver<Outgoing>>,
}

impl Server {
    /// Binds the socket from `config.bind`.
    pub async fn bind(
        config: &ServerConfig,
        commands: Arc<CommandStore>,
        sim: SimSender,
        outgoing: mpsc::UnboundedReceiver<Outgoing>,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(&config.bind).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let clients = ClientManager::new(
            config.max_players,
            config.client_timeout(),
            config.max_protocol_errors,
        );

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(clients)),
            commands,
            sim,
            outgoing: Some(outgoing),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn clients(&self) -> Arc<RwLock<ClientManager>> {
        Arc::clone(&self.clients)
    }

    fn spawn_network_sender(&mut self) {
        let Some(mut outgoing) = self.outgoing.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                let data = match message.packet.encode() {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Failed to encode packet: {}", e);
                        continue;
                    }
                };

                let targets: Vec<(PeerId, SocketAddr)> = {
                    let clients_guard = clients.read().await;
                    match message.target {
                        Target::Peer(peer) => clients_guard
                            .addr_of(peer)
                            .map(|addr| (peer, addr))
                            .into_iter()
                            .collect(),
                        Target::Broadcast => clients_guard.get_client_addrs(),
                    }
                };

                for (peer, addr) in targets {
                    if let Err(e) = socket.send_to(&data, addr).await {
                        error!("Failed to send to peer {}: {}", peer, e);
                    }
                }
            }
            debug!("Network sender stopped");
        });
    }

    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let sim = self.sim.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMEOUT_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };
                for peer in timed_out {
                    if sim.send(SimCommand::Leave { peer }).is_err() {
                        debug!("Simulation gone, stopping timeout checker");
                        return;
                    }
                }
            }
        });
    }

    /// Dispatches one datagram from `addr`.
    async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        let peer = {
            let mut clients = self.clients.write().await;
            clients.connect(addr)
        };
        let Some(peer) = peer else {
            warn!("Dropping packet from {}: server full", addr);
            return;
        };

        if self.commands.dispatch(peer, data) {
            if matches!(split_opcode(data), Some((opcodes::LEAVE, _))) {
                self.clients.write().await.remove_client(&peer);
            }
            return;
        }

        let verdict = self.clients.write().await.record_protocol_error(peer);
        if verdict == ErrorVerdict::Kick && self.sim.send(SimCommand::Leave { peer }).is_err() {
            debug!("Simulation gone while kicking peer {}", peer);
        }
    }

    /// Runs the transport until the socket fails.
    pub async fn run(mut self) -> io::Result<()> {
        self.spawn_network_sender();
        self.spawn_timeout_checker();
        info!("Server started successfully");

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => self.handle_datagram(&buffer[..len], addr).await,
                Err(e) => {
                    error!("Error receiving packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}
