use clap::Parser;
use log::{error, info, warn};
use server::config::ServerConfig;
use server::database::{Database, MemoryDatabase};
use server::error::ServerError;
use server::game::{sim_channel, Simulation};
use server::handlers::{build_command_store, HandlerContext};
use server::job_queue::JobQueue;
use server::network::Server;
use server::script::BuiltinScriptHost;
use server::tick::TickLoop;
use server::worker_pool::WorkerPool;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server IP address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Tick rate (updates per second)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Loads the config file (if any) and applies the command-line overrides.
    fn resolve_config(&self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if self.host.is_some() || self.port.is_some() {
            let (default_host, default_port) = config
                .bind
                .rsplit_once(':')
                .map(|(host, port)| (host.to_string(), port.to_string()))
                .unwrap_or_else(|| ("127.0.0.1".to_string(), "8080".to_string()));
            let host = self.host.clone().unwrap_or(default_host);
            let port = self.port.map(|p| p.to_string()).unwrap_or(default_port);
            config.bind = format!("{}:{}", host, port);
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(workers) = self.workers {
            config.worker_thread_count = workers;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = args.resolve_config()?;
    info!(
        "Starting server on {} at {}Hz with {} workers",
        config.bind, config.tick_rate, config.worker_thread_count
    );

    let jobs = Arc::new(JobQueue::new(config.job_queue_capacity));
    let mut workers = WorkerPool::start(
        config.worker_thread_count,
        Arc::clone(&jobs),
        config.dequeue_timeout(),
    )?;
    let database: Arc<dyn Database> = Arc::new(MemoryDatabase::new());

    let (sim_tx, sim_rx) = sim_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let ctx = HandlerContext {
        sim: sim_tx.clone(),
        jobs: Arc::clone(&jobs),
        outgoing: out_tx.clone(),
        database: Arc::clone(&database),
    };
    // A duplicate opcode is a wiring bug: refuse to start.
    let commands = Arc::new(
        build_command_store(ctx, &config.disabled_opcodes).map_err(ServerError::from)?,
    );

    let simulation = Simulation::new(&config, sim_rx)
        .with_script_host(Box::new(BuiltinScriptHost::new()))
        .with_persistence(Arc::clone(&jobs), database);
    let shutdown = Arc::new(AtomicBool::new(false));
    let tick_loop = TickLoop::spawn(simulation, config.tick_duration(), out_tx, shutdown)?;

    let server = Server::bind(&config, commands, sim_tx, out_rx).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Network server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    tick_loop.shutdown();
    if tick_loop.join().is_err() {
        error!("Tick thread panicked");
    }

    if !jobs.is_empty() {
        warn!("Dropping {} queued jobs", jobs.len());
    }
    workers.shutdown();
    workers.join();
    info!(
        "{} workers executed {} jobs ({} failed)",
        workers.thread_count(),
        workers.jobs_executed(),
        workers.jobs_failed()
    );

    Ok(())
}
