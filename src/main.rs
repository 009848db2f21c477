use campus_escrow::application::engine::{EngineParts, EscrowEngine};
use campus_escrow::config::EngineConfig;
use campus_escrow::domain::payout::PayoutStatus;
use campus_escrow::domain::ports::{
    ClockRef, OrderStoreRef, PayoutStore, PayoutStoreRef, ScoutStoreRef, SystemClock,
};
use campus_escrow::infrastructure::cron::SettlementCron;
use campus_escrow::infrastructure::gateway::SimulatedGateway;
use campus_escrow::infrastructure::in_memory::{
    InMemoryDirectory, InMemoryOrderStore, InMemoryPayoutStore, InMemoryScoutStore, ManualClock,
};
use campus_escrow::interfaces::csv::action_reader::ActionReader;
use campus_escrow::interfaces::csv::payout_writer::PayoutWriter;
use campus_escrow::interfaces::simulator::Simulator;
use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine settings (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a CSV of marketplace actions and print every payout
    Simulate {
        input: PathBuf,
        #[arg(long)]
        directory: PathBuf,
    },
    /// Run one calendar settlement batch now
    Settle {
        #[arg(long)]
        directory: PathBuf,
    },
    /// Process explicitly requested and retried payouts
    ProcessPending {
        #[arg(long)]
        directory: PathBuf,
    },
    /// Print stored payouts as CSV
    Payouts {
        #[arg(long)]
        status: Option<PayoutStatus>,
    },
    /// Run settlement on the configured cron schedule until Ctrl-C
    Daemon {
        #[arg(long)]
        directory: PathBuf,
    },
}

struct Stores {
    orders: OrderStoreRef,
    payouts: PayoutStoreRef,
    scouts: ScoutStoreRef,
}

fn in_memory_stores() -> Stores {
    Stores {
        orders: Arc::new(InMemoryOrderStore::new()),
        payouts: Arc::new(InMemoryPayoutStore::new()),
        scouts: Arc::new(InMemoryScoutStore::new()),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn persistent_stores(db_path: &Path) -> Result<Stores> {
    use campus_escrow::infrastructure::rocksdb::RocksDbStore;

    let store = RocksDbStore::open(db_path).into_diagnostic()?;
    info!(path = %db_path.display(), "Using RocksDB storage");
    Ok(Stores {
        orders: Arc::new(store.clone()),
        payouts: Arc::new(store.clone()),
        scouts: Arc::new(store),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn persistent_stores(_db_path: &Path) -> Result<Stores> {
    eprintln!(
        "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
    );
    Ok(in_memory_stores())
}

fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    match db_path {
        Some(db_path) => persistent_stores(db_path),
        None => Ok(in_memory_stores()),
    }
}

fn load_directory(path: &Path) -> Result<Arc<InMemoryDirectory>> {
    let file = File::open(path).into_diagnostic()?;
    Ok(Arc::new(
        InMemoryDirectory::from_json_reader(file).into_diagnostic()?,
    ))
}

fn build_engine(
    config: &EngineConfig,
    stores: &Stores,
    directory: Arc<InMemoryDirectory>,
    gateway: SimulatedGateway,
    clock: ClockRef,
) -> EscrowEngine {
    EscrowEngine::new(
        config,
        EngineParts {
            orders: stores.orders.clone(),
            payouts: stores.payouts.clone(),
            scouts: stores.scouts.clone(),
            listings: directory.clone(),
            users: directory,
            gateway: Arc::new(gateway),
            clock,
        },
    )
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).into_diagnostic()?;
    let stores = open_stores(cli.db_path.as_deref())?;
    let gateway = SimulatedGateway::new(config.gateway.clone());

    match cli.command {
        Command::Simulate { input, directory } => {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let engine = build_engine(
                &config,
                &stores,
                load_directory(&directory)?,
                gateway.clone(),
                clock.clone(),
            );
            let mut simulator = Simulator::new(engine, gateway, clock, stores.orders.clone());

            let file = File::open(input).into_diagnostic()?;
            let reader = ActionReader::new(file);
            for (row, action) in reader.actions().enumerate() {
                match action {
                    Ok(action) => {
                        if let Err(e) = simulator.apply(&action).await {
                            eprintln!("Error applying action on row {}: {}", row + 1, e);
                        }
                    }
                    Err(e) => {
                        eprintln!("Error reading action: {}", e);
                    }
                }
            }

            let payouts = stores.payouts.all().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = PayoutWriter::new(stdout.lock());
            writer.write_payouts(payouts).into_diagnostic()?;
        }
        Command::Settle { directory } => {
            let engine = build_engine(
                &config,
                &stores,
                load_directory(&directory)?,
                gateway,
                Arc::new(SystemClock),
            );
            let report = engine.settlement.run_settlement().await.into_diagnostic()?;
            print_json(&report)?;
        }
        Command::ProcessPending { directory } => {
            let engine = build_engine(
                &config,
                &stores,
                load_directory(&directory)?,
                gateway,
                Arc::new(SystemClock),
            );
            let report = engine.settlement.process_pending().await.into_diagnostic()?;
            print_json(&report)?;
        }
        Command::Payouts { status } => {
            let payouts = match status {
                Some(status) => stores.payouts.with_status(status).await,
                None => stores.payouts.all().await,
            }
            .into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = PayoutWriter::new(stdout.lock());
            writer.write_payouts(payouts).into_diagnostic()?;
        }
        Command::Daemon { directory } => {
            let engine = build_engine(
                &config,
                &stores,
                load_directory(&directory)?,
                gateway,
                Arc::new(SystemClock),
            );
            let mut cron = SettlementCron::new(engine.settlement.clone(), &config.settlement_cron)
                .await
                .into_diagnostic()?;
            cron.start().await.into_diagnostic()?;

            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            cron.stop().await.into_diagnostic()?;
        }
    }

    Ok(())
}
