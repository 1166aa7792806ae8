//! Fixed-rate tick loop on a dedicated thread
//!
//! The loop owns the [`Simulation`] for its whole life. Outgoing packets are
//! handed to the network sender task over an unbounded tokio channel, so the
//! tick thread never waits on the socket.

use crate::game::{Outgoing, Simulation};
use log::{debug, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

// Cap the maximum delta time to 50ms
const MAX_DELTA_TIME: f32 = 1.0 / 20.0;
const STATS_INTERVAL_TICKS: u64 = 60;

pub struct TickLoop {
    handle: JoinHandle<Simulation>,
    shutdown: Arc<AtomicBool>,
}

impl TickLoop {
    /// Moves `simulation` onto a new `tick` thread and starts ticking.
    pub fn spawn(
        mut simulation: Simulation,
        tick_duration: Duration,
        outgoing: UnboundedSender<Outgoing>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("tick".to_string())
            .spawn(move || {
                simulation.bind_to_current_thread();
                run(&mut simulation, tick_duration, &outgoing, &flag);
                simulation
            })?;
        Ok(Self { handle, shutdown })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Waits for the loop to stop and hands the simulation back.
    pub fn join(self) -> thread::Result<Simulation> {
        self.handle.join()
    }
}

/// Ticks until `shutdown` is set or the outgoing channel closes.
pub fn run(
    simulation: &mut Simulation,
    tick_duration: Duration,
    outgoing: &UnboundedSender<Outgoing>,
    shutdown: &AtomicBool,
) {
    info!(
        "Tick loop started at {:.1}Hz",
        1.0 / tick_duration.as_secs_f64()
    );

    let mut next_tick = Instant::now() + tick_duration;
    let mut last_update = Instant::now();
    let mut busy = Duration::ZERO;

    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
        next_tick += tick_duration;
        // Skip missed ticks instead of bursting to catch up
        let now = Instant::now();
        if next_tick < now {
            next_tick = now + tick_duration;
        }

        let mut delta_time = now.duration_since(last_update).as_secs_f32();
        last_update = now;
        if delta_time > MAX_DELTA_TIME {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                delta_time, MAX_DELTA_TIME
            );
            delta_time = MAX_DELTA_TIME;
        }

        let started = Instant::now();
        for packet in simulation.tick(delta_time) {
            if outgoing.send(packet).is_err() {
                info!("Outgoing channel closed, stopping tick loop");
                return;
            }
        }
        busy += started.elapsed();

        let tick = simulation.tick_count();
        if tick % STATS_INTERVAL_TICKS == 0 {
            debug!(
                "Tick {}: {} players, {} entities, avg {:.2}ms per tick",
                tick,
                simulation.players().len(),
                simulation.registry().len(),
                busy.as_secs_f64() * 1000.0 / STATS_INTERVAL_TICKS as f64
            );
            busy = Duration::ZERO;
        }
    }

    info!("Tick loop stopped after {} ticks", simulation.tick_count());
}
