//! # Armada Server Library
//!
//! Authoritative simulation server for a networked multiplayer space game.
//! The server owns the world, validates every client action and broadcasts
//! the resulting state.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! All entities live in one [`entity::EntityRegistry`] owned by the tick
//! thread. Systems run in a fixed order every tick (lifetime, movement,
//! projectile, weapon, ownership, script) and only mark entities for
//! destruction; removal happens in one sweep at the end of the tick.
//!
//! ### Command Dispatch
//! The first byte of every datagram is an opcode. The
//! [`command_store::CommandStore`] routes it to exactly one registered and
//! enabled handler or rejects it without side effects.
//!
//! ### Background Work
//! Blocking work such as profile lookups runs on a fixed
//! [`worker_pool::WorkerPool`] draining a shared [`job_queue::JobQueue`].
//! Results travel back to the tick thread as [`game::SimCommand`]s.
//!
//! ## Architecture Design
//!
//! ### Threads
//! - one tick thread running [`tick::TickLoop`]
//! - `worker_thread_count` worker threads
//! - tokio tasks for the UDP transport
//!
//! ### UDP-Based Communication
//! Uses UDP sockets for low-latency communication with clients. Payloads are
//! bincode-encoded messages from the `shared` crate behind a one-byte opcode.
//!
//! ## Module Organization
//!
//! - `client_manager`: address to peer mapping, timeouts, protocol error limits
//! - `command_store`, `handlers`: opcode table and the game's handlers
//! - `components`, `entity`, `storage`, `players`: world data model
//! - `systems`, `weapon`, `script`: per-tick logic
//! - `game`, `tick`: the simulation and its thread
//! - `job_queue`, `worker_pool`, `database`: background work
//! - `network`: the tokio UDP server
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::database::MemoryDatabase;
//! use server::game::{sim_channel, Simulation};
//! use server::handlers::{build_command_store, HandlerContext};
//! use server::job_queue::JobQueue;
//! use server::network::Server;
//! use server::tick::TickLoop;
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let (sim_tx, sim_rx) = sim_channel();
//!     let (out_tx, out_rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let ctx = HandlerContext {
//!         sim: sim_tx.clone(),
//!         jobs: Arc::new(JobQueue::new(config.job_queue_capacity)),
//!         outgoing: out_tx.clone(),
//!         database: Arc::new(MemoryDatabase::new()),
//!     };
//!     let commands = Arc::new(build_command_store(ctx, &config.disabled_opcodes)?);
//!
//!     let simulation = Simulation::new(&config, sim_rx);
//!     let _tick = TickLoop::spawn(
//!         simulation,
//!         config.tick_duration(),
//!         out_tx,
//!         Arc::new(AtomicBool::new(false)),
//!     )?;
//!
//!     Server::bind(&config, commands, sim_tx, out_rx).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod command_store;
pub mod components;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod game;
pub mod handlers;
pub mod job_queue;
pub mod network;
pub mod players;
pub mod script;
pub mod storage;
pub mod systems;
pub mod tick;
pub mod weapon;
pub mod worker_pool;
