use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod catalog;
mod detectors;
mod health;
mod models;
mod pipeline;
mod report;
mod store;

use catalog::SignalCatalog;
use models::Signal;
use store::Store;

#[derive(Parser)]
#[command(name = "permit-signals")]
#[command(about = "Parcel health signal pipeline over a permit database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the dev schema (SQLite) or verify the managed schema (Postgres)
    InitDb,
    /// Load realistic sample source data (SQLite dev backend only)
    Seed,
    /// Run the full signal pipeline and print the run summary
    Run {
        /// Emit the run summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the stored health record for one parcel
    Health {
        /// Parcel key as block/lot, e.g. 3512/001
        #[arg(long)]
        block_lot: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set (postgres:// for production, sqlite:// for dev)")?;

    let store = Store::connect(&database_url)
        .await
        .context("failed to connect to the permit database")?;
    let catalog = SignalCatalog::new();

    match cli.command {
        Commands::InitDb => {
            store.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            store.seed().await?;
            println!("Seed data inserted.");
        }
        Commands::Run { json } => {
            let summary = pipeline::run_signal_pipeline(&store, &catalog).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", report::render_summary(&summary));
            }
        }
        Commands::Health { block_lot } => {
            match store.fetch_health(&block_lot).await? {
                Some(row) => {
                    println!(
                        "{}: {} ({} signals, {} at risk), computed {}",
                        row.block_lot,
                        row.tier,
                        row.signal_count,
                        row.at_risk_count,
                        row.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    let signals: Vec<Signal> = serde_json::from_str(&row.signals_json)
                        .context("stored signals_json is not valid")?;
                    for signal in signals {
                        println!(
                            "- {} [{}] {}",
                            signal.signal_type.as_str(),
                            signal.severity.as_str(),
                            signal.detail
                        );
                    }
                }
                None => println!("No health record for parcel {block_lot}."),
            }
        }
    }

    Ok(())
}
