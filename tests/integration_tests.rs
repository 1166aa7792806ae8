//! Integration tests for the server components working together
//!
//! These tests validate cross-component interactions and real network behavior.

use server::config::ServerConfig;
use server::database::{MemoryDatabase, PlayerProfile};
use server::game::{sim_channel, Outgoing, SimCommand, Simulation, Target};
use server::handlers::{build_command_store, HandlerContext};
use server::job_queue::JobQueue;
use server::network::Server;
use server::tick::TickLoop;
use server::worker_pool::WorkerPool;
use shared::{encode_packet, opcodes, EntityKind, Join, ServerPacket, Shoot, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// JOB QUEUE AND WORKER POOL TESTS
mod worker_tests {
    use super::*;

    /// Every enqueued job runs exactly once for any worker count
    #[test]
    fn queue_liveness_across_worker_counts() {
        for workers in [1, 2, 8] {
            let queue = Arc::new(JobQueue::new(64));
            let runs: Arc<Vec<AtomicUsize>> = Arc::new((0..300).map(|_| AtomicUsize::new(0)).collect());

            let mut pool =
                WorkerPool::start(workers, Arc::clone(&queue), Duration::from_millis(10)).unwrap();
            for index in 0..300 {
                let runs = Arc::clone(&runs);
                assert!(queue.submit(move || {
                    runs[index].fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }));
            }

            assert!(wait_until(Duration::from_secs(5), || pool.jobs_executed() == 300));
            pool.shutdown();
            pool.join();

            assert!(runs.iter().all(|count| count.load(Ordering::SeqCst) == 1));
        }
    }

    /// Jobs submitted from many producer threads are neither lost nor duplicated
    #[test]
    fn concurrent_producers() {
        let queue = Arc::new(JobQueue::new(16));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::start(4, Arc::clone(&queue), Duration::from_millis(10)).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..250 {
                        let counter = Arc::clone(&counter);
                        queue.submit(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        });
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 1000
        }));
        pool.shutdown();
        pool.join();
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
        assert_eq!(pool.jobs_executed(), 1000);
    }
}

/// SIMULATION TESTS
mod simulation_tests {
    use super::*;

    /// A join goes packet -> handler -> worker job -> simulation -> welcome
    #[test]
    fn join_flows_through_worker_pool() {
        let config = ServerConfig::default();
        let jobs = Arc::new(JobQueue::new(16));
        let mut pool = WorkerPool::start(2, Arc::clone(&jobs), Duration::from_millis(10)).unwrap();
        let (sim_tx, sim_rx) = sim_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        let store = build_command_store(
            HandlerContext {
                sim: sim_tx,
                jobs: Arc::clone(&jobs),
                outgoing: out_tx,
                database: Arc::new(MemoryDatabase::new()),
            },
            &[],
        )
        .unwrap();
        let mut simulation = Simulation::new(&config, sim_rx);

        let join = encode_packet(
            opcodes::JOIN,
            &Join {
                client_version: PROTOCOL_VERSION,
                name: "vega".to_string(),
            },
        )
        .unwrap();
        assert!(store.dispatch(11, &join));
        assert!(wait_until(Duration::from_secs(2), || pool.jobs_executed() == 1));

        let out = simulation.tick(1.0 / 30.0);
        assert!(out
            .iter()
            .any(|o| o.target == Target::Peer(11)
                && matches!(o.packet, ServerPacket::Welcome { player_id: 11, .. })));
        assert_eq!(simulation.player(11).map(|p| p.name()), Some("vega"));

        let shoot = encode_packet(opcodes::SHOOT, &Shoot { pressed: true }).unwrap();
        assert!(store.dispatch(11, &shoot));
        simulation.tick(1.0 / 30.0);
        assert_eq!(simulation.registry().projectiles.len(), 1);
        assert!(out_rx.try_recv().is_err());

        pool.shutdown();
        pool.join();
    }

    /// Torpedoes expire exactly at their lifetime and are announced once each
    #[test]
    fn torpedo_lifetime_expiry_is_announced_once() {
        let config = ServerConfig {
            weapons: server::config::WeaponConfig {
                torpedo_cooldown_ms: 10_000,
                plasma_beam_cooldown_ms: 10_000,
            },
            ..ServerConfig::default()
        };
        let (tx, rx) = sim_channel();
        let mut simulation = Simulation::new(&config, rx);
        tx.send(SimCommand::PlayerLoaded {
            peer: 1,
            profile: PlayerProfile::new("vega"),
        })
        .unwrap();
        simulation.tick(0.0);
        tx.send(SimCommand::Trigger {
            peer: 1,
            pressed: true,
        })
        .unwrap();

        let mut torpedo = None;
        let mut destroyed_at = Vec::new();
        for tick in 0..100 {
            let out = simulation.tick(0.0625);
            if torpedo.is_none() {
                torpedo = simulation.registry().projectiles.ids().first().copied();
            }
            for o in out {
                if let (Some(id), ServerPacket::EntityDestroyed { entity }) = (torpedo, &o.packet) {
                    if *entity == id.to_bits() {
                        destroyed_at.push(tick);
                    }
                }
            }
        }

        // Fired on tick 0, 3s lifetime at 62.5ms per tick
        assert_eq!(destroyed_at, vec![48]);
    }

    /// Snapshots report ships and projectiles with their owners
    #[test]
    fn snapshot_describes_world() {
        let (tx, rx) = sim_channel();
        let mut simulation = Simulation::new(&ServerConfig::default(), rx);
        for (peer, name) in [(1, "vega"), (2, "altair")] {
            tx.send(SimCommand::PlayerLoaded {
                peer,
                profile: PlayerProfile::new(name),
            })
            .unwrap();
        }
        let out = simulation.tick(0.01);

        let snapshot = out
            .into_iter()
            .filter(|o| o.target == Target::Broadcast)
            .find_map(|o| match o.packet {
                ServerPacket::Snapshot { entities, .. } => Some(entities),
                _ => None,
            })
            .unwrap();
        let mut owners: Vec<_> = snapshot
            .iter()
            .filter(|e| e.kind == EntityKind::Ship)
            .map(|e| e.owner)
            .collect();
        owners.sort();
        assert_eq!(owners, vec![Some(1), Some(2)]);
    }
}

/// END-TO-END TESTS
mod end_to_end_tests {
    use super::*;

    /// A real client joins over UDP and receives its welcome and snapshots
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn client_joins_over_udp() {
        let config = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            tick_rate: 60,
            ..ServerConfig::default()
        };
        let jobs = Arc::new(JobQueue::new(config.job_queue_capacity));
        let mut pool = WorkerPool::start(2, Arc::clone(&jobs), config.dequeue_timeout()).unwrap();
        let (sim_tx, sim_rx) = sim_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Outgoing>();

        let store = Arc::new(
            build_command_store(
                HandlerContext {
                    sim: sim_tx.clone(),
                    jobs: Arc::clone(&jobs),
                    outgoing: out_tx.clone(),
                    database: Arc::new(MemoryDatabase::new()),
                },
                &config.disabled_opcodes,
            )
            .unwrap(),
        );
        let tick_loop = TickLoop::spawn(
            Simulation::new(&config, sim_rx),
            config.tick_duration(),
            out_tx,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        let server = Server::bind(&config, store, sim_tx, out_rx).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let join = encode_packet(
            opcodes::JOIN,
            &Join {
                client_version: PROTOCOL_VERSION,
                name: "vega".to_string(),
            },
        )
        .unwrap();
        socket.send_to(&join, server_addr).await.unwrap();

        let mut buf = [0u8; 65_536];
        let mut welcomed = None;
        let mut snapshot_with_ship = false;
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline && !(welcomed.is_some() && snapshot_with_ship) {
            let Ok(Ok((len, _))) =
                timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await
            else {
                continue;
            };
            match ServerPacket::decode(&buf[..len]).unwrap() {
                ServerPacket::Welcome { ship, .. } => welcomed = Some(ship),
                ServerPacket::Snapshot { entities, .. } => {
                    if let Some(ship) = welcomed {
                        snapshot_with_ship |= entities.iter().any(|e| e.id == ship);
                    }
                }
                _ => {}
            }
        }

        assert!(welcomed.is_some());
        assert!(snapshot_with_ship);

        tick_loop.shutdown();
        tick_loop.join().unwrap();
        pool.shutdown();
        pool.join();
    }
}
