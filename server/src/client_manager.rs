//! Transport-level peer tracking for the multiplayer server
//!
//! This module maps UDP source addresses to peer ids and enforces the
//! connection-level policies the dispatcher leaves to the transport:
//! - Peer lifecycle (first packet, leave, timeout)
//! - Capacity limits on simultaneously tracked addresses
//! - Counting protocol errors and kicking peers that keep sending garbage
//!
//! Whether a peer is also a *player* is decided by the simulation; a peer
//! becomes one only after a successful join.

use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Identifier the transport assigns to a remote address.
pub type PeerId = u32;

/// Represents a connected peer
///
/// Each client maintains:
/// - Connection metadata (ID, address, last activity)
/// - The number of rejected packets it has sent
#[derive(Debug)]
pub struct Client {
    /// Unique peer identifier assigned by the server
    pub id: PeerId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Packets rejected by the dispatcher so far
    pub protocol_errors: u32,
}

impl Client {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            protocol_errors: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// What the receiver should do after a rejected packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerdict {
    Tolerate,
    Kick,
}

pub struct ClientManager {
    clients: HashMap<PeerId, Client>,
    by_addr: HashMap<SocketAddr, PeerId>,
    next_client_id: PeerId,
    max_clients: usize,
    timeout: Duration,
    max_protocol_errors: u32,
}

impl ClientManager {
    pub fn new(max_clients: usize, timeout: Duration, max_protocol_errors: u32) -> Self {
        Self {
            clients: HashMap::new(),
            by_addr: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
            max_protocol_errors,
        }
    }

    /// Returns the peer id for `addr`, registering the address on first
    /// contact. `None` when the server is at capacity.
    pub fn connect(&mut self, addr: SocketAddr) -> Option<PeerId> {
        if let Some(id) = self.by_addr.get(&addr).copied() {
            if let Some(client) = self.clients.get_mut(&id) {
                client.touch();
            }
            return Some(id);
        }

        // Enforce server capacity limits
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id = self.next_client_id.wrapping_add(1).max(1);

        info!("Peer {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));
        self.by_addr.insert(addr, client_id);
        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &PeerId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            self.by_addr.remove(&client.addr);
            info!("Peer {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.by_addr.get(&addr).copied()
    }

    pub fn addr_of(&self, client_id: PeerId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Counts a rejected packet. Once a peer reaches the configured limit it
    /// is removed and the caller is told to kick it.
    pub fn record_protocol_error(&mut self, client_id: PeerId) -> ErrorVerdict {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return ErrorVerdict::Tolerate;
        };
        client.protocol_errors += 1;
        if client.protocol_errors < self.max_protocol_errors {
            return ErrorVerdict::Tolerate;
        }

        warn!(
            "Peer {} sent {} bad packets, disconnecting",
            client_id, client.protocol_errors
        );
        self.remove_client(&client_id);
        ErrorVerdict::Kick
    }

    /// Removes and returns every peer silent for longer than the timeout.
    pub fn check_timeouts(&mut self) -> Vec<PeerId> {
        let timed_out: Vec<PeerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(self.timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            info!("Peer {} timed out", client_id);
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn manager(max_clients: usize) -> ClientManager {
        ClientManager::new(max_clients, Duration::from_secs(5), 3)
    }

    #[test]
    fn test_client_creation() {
        let addr = test_addr();
        let client = Client::new(1, addr);

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, addr);
        assert_eq!(client.protocol_errors, 0);
    }

    #[test]
    fn test_client_timeout() {
        let addr = test_addr();
        let mut client = Client::new(1, addr);

        assert!(!client.is_timed_out(Duration::from_secs(1)));

        client.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(client.is_timed_out(Duration::from_secs(1)));

        client.touch();
        assert!(!client.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_connect_assigns_sequential_ids() {
        let mut manager = manager(3);

        assert_eq!(manager.connect(test_addr()), Some(1));
        assert_eq!(manager.connect(test_addr2()), Some(2));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_connect_same_addr_reuses_id() {
        let mut manager = manager(3);

        let first = manager.connect(test_addr());
        let second = manager.connect(test_addr());
        assert_eq!(first, second);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_connect_max_capacity() {
        let mut manager = manager(1);

        assert!(manager.connect(test_addr()).is_some());
        assert!(manager.connect(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_client() {
        let mut manager = manager(2);
        let addr = test_addr();

        let client_id = manager.connect(addr).unwrap();
        assert!(manager.remove_client(&client_id));
        assert!(manager.is_empty());
        assert_eq!(manager.find_client_by_addr(addr), None);

        assert!(!manager.remove_client(&999));
    }

    #[test]
    fn test_find_client_by_addr() {
        let mut manager = manager(2);
        let client_id1 = manager.connect(test_addr()).unwrap();
        let _client_id2 = manager.connect(test_addr2()).unwrap();

        assert_eq!(manager.find_client_by_addr(test_addr()), Some(client_id1));
        assert_eq!(manager.addr_of(client_id1), Some(test_addr()));

        let unknown_addr: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_client_by_addr(unknown_addr), None);
    }

    #[test]
    fn test_protocol_errors_kick_at_limit() {
        let mut manager = manager(2);
        let client_id = manager.connect(test_addr()).unwrap();

        assert_eq!(manager.record_protocol_error(client_id), ErrorVerdict::Tolerate);
        assert_eq!(manager.record_protocol_error(client_id), ErrorVerdict::Tolerate);
        assert_eq!(manager.record_protocol_error(client_id), ErrorVerdict::Kick);
        assert!(manager.is_empty());

        assert_eq!(manager.record_protocol_error(client_id), ErrorVerdict::Tolerate);
    }

    #[test]
    fn test_check_timeouts_removes_idle_peers() {
        let mut manager = ClientManager::new(4, Duration::from_millis(10), 3);
        let idle = manager.connect(test_addr()).unwrap();
        let active = manager.connect(test_addr2()).unwrap();

        manager.clients.get_mut(&idle).unwrap().last_seen =
            Instant::now() - Duration::from_secs(1);

        assert_eq!(manager.check_timeouts(), vec![idle]);
        assert_eq!(manager.find_client_by_addr(test_addr2()), Some(active));
        assert_eq!(manager.len(), 1);
    }
}
