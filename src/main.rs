use clap::Parser;
use log::{error, info, warn};
use occupancy_reconciler::attendance::AttendancePipeline;
use occupancy_reconciler::clock::SystemClock;
use occupancy_reconciler::config::{Config, load_dotenv};
use occupancy_reconciler::instance_lock::InstanceLock;
use occupancy_reconciler::occupancy::{OccupancyBindings, OccupancyReconciler};
use occupancy_reconciler::scheduler::{self, Schedule};
use occupancy_reconciler::simulation;
use occupancy_reconciler::store::{MemoryStore, MqttStore, ValueStore};
use occupancy_reconciler::topology::Topology;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "occupancy-reconciler")]
#[command(about = "Reconciles occupancy and attendance control points with building sensors")]
struct Cli {
    /// Topology document listing positions, zones and capacities
    #[arg(long, env = "TOPOLOGY_FILE")]
    topology: Option<PathBuf>,

    /// Seconds a sensor flap must last before vacancy is confirmed
    #[arg(long, env = "DEBOUNCE_WINDOW_SECS")]
    debounce_secs: Option<u64>,

    /// Run against a simulated in-memory building instead of MQTT
    #[arg(long)]
    simulate: bool,

    /// Simulation step period in seconds
    #[arg(long, default_value_t = 5)]
    simulate_period: u64,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let _lock = match InstanceLock::acquire() {
        Ok(lock) => lock,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut config = Config::from_env();
    if let Some(path) = cli.topology {
        config.topology_file = path;
    }
    if let Some(secs) = cli.debounce_secs {
        config.occupancy.debounce_window_secs = secs;
    }

    info!("Starting occupancy reconciler");
    info!("  Topology: {}", config.topology_file.display());
    info!("  Debounce window: {}s", config.occupancy.debounce_window_secs);
    info!(
        "  Working hours: {}h-{}h (gate {})",
        config.occupancy.working_hours.start,
        config.occupancy.working_hours.end,
        if config.occupancy.gate_on_working_hours { "on" } else { "off" }
    );

    let topology = match Topology::load(&config.topology_file) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to load topology: {}", e);
            std::process::exit(1);
        }
    };
    let positions = topology.working_positions();
    info!(
        "  {} working positions, {} zones",
        positions.len(),
        topology.zones.len()
    );

    let cancel = CancellationToken::new();
    let mut background: Vec<JoinHandle<()>> = Vec::new();

    let store: Arc<dyn ValueStore> = if cli.simulate {
        info!("Running in simulation mode");
        let memory = Arc::new(MemoryStore::new());
        simulation::seed(&memory, &topology);
        background.push(simulation::run_simulation(
            memory.clone(),
            topology.clone(),
            Duration::from_secs(cli.simulate_period.max(1)),
            cancel.clone(),
        ));
        memory
    } else {
        match MqttStore::connect(&config.mqtt, &topology.capacities).await {
            Ok((mqtt, routing)) => {
                background.push(routing);
                mqtt
            }
            Err(e) => {
                error!("Failed to connect value store: {}", e);
                std::process::exit(1);
            }
        }
    };

    let reconciler = Arc::new(OccupancyReconciler::new(
        store.clone(),
        Arc::new(SystemClock),
        config.occupancy.debounce_window(),
    ));
    let gate = config
        .occupancy
        .gate_on_working_hours
        .then_some(config.occupancy.working_hours);
    let bindings = Arc::new(OccupancyBindings::new(reconciler, gate));
    let attendance = Arc::new(AttendancePipeline::new(store, topology.zones.clone()));

    let summary = bindings.bind_all(&positions).await;
    info!(
        "[Occupancy] {} positions bound, {} skipped, {} failed",
        summary.bound, summary.skipped, summary.failed
    );
    let summary = attendance.bind_all_affluence().await;
    info!(
        "[Attendance] {} affluence zones bound, {} skipped, {} failed",
        summary.bound, summary.skipped, summary.failed
    );

    let occupation = attendance.clone();
    background.push(scheduler::spawn(
        "occupation",
        Schedule::Hourly,
        cancel.clone(),
        move || {
            let occupation = occupation.clone();
            async move {
                let report = occupation.publish_occupation().await;
                if !report.failed.is_empty() {
                    warn!(
                        "[Attendance] {} zones not published this hour",
                        report.failed.len()
                    );
                }
            }
        },
    ));

    let end_of_day = bindings.clone();
    let reset_positions = Arc::new(positions);
    background.push(scheduler::spawn(
        "end-of-day release",
        Schedule::DailyAt(config.occupancy.working_hours.end),
        cancel.clone(),
        move || {
            let bindings = end_of_day.clone();
            let positions = reset_positions.clone();
            async move {
                let reset = bindings.reset_all(&positions).await;
                info!("[Release] {} control points reset", reset);
            }
        },
    ));

    info!("Occupancy reconciler is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    cancel.cancel();
    bindings.shutdown().await;
    attendance.shutdown().await;
    for handle in background {
        handle.abort();
    }

    info!("Occupancy reconciler stopped");
}
