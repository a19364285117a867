//! kube-cert-manager Migration CLI
//!
//! Moves the legacy store into `PostgreSQL` and replicates cluster objects.
//! Pedantic lints relaxed for CLI ergonomics.

// CLI tool - relax pedantic lints for ergonomics
#![allow(clippy::pedantic)]

use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use kcm_migrate::commands;
use kcm_migrate::{MigrationConfig, TransferStats};

#[derive(Parser)]
#[command(name = "kcm-migrate")]
#[command(version)]
#[command(about = "Migrate kube-cert-manager state to PostgreSQL and another cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", default_value = "conf.yaml", global = true)]
    config: PathBuf,

    /// Dry run mode (don't write to destination)
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Batch size override
    #[arg(long, global = true)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log every key/value pair in the embedded store
    PrintData,

    /// Apply pending schema migrations
    CreateTables,

    /// Roll back every schema migration
    DropTables,

    /// Roll back the most recent schema migration
    Rollback,

    /// Show schema migration status
    Status,

    /// Create tables and copy the embedded store into PostgreSQL
    Migrate,

    /// Copy secrets and certificates between clusters
    KubeMigrate,

    /// Validate configuration file
    Validate,

    /// Generate example configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "conf.yaml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { output } = &cli.command {
        init_logging(cli.verbose, None)?;
        commands::write_example_config(output)?;
        println!("✅ Generated configuration: {:?}", output);
        println!(
            "   Edit the file and run: kcm-migrate --config {:?} migrate --dry-run",
            output
        );
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_logging(cli.verbose, config.log_file.as_deref())?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::PrintData => {
            let dumps = commands::dump_kv(config.require_kv()?, config.options.batch_size)?;
            println!("\n📦 Partitions:");
            for dump in &dumps {
                match &dump.error {
                    Some(e) => println!("   {:<20} {} entries (error: {})", dump.name, dump.entries, e),
                    None => println!("   {:<20} {} entries", dump.name, dump.entries),
                }
            }
        }
        Commands::CreateTables => {
            let summary = commands::create_tables(config.require_postgres()?).await?;
            println!(
                "✅ Schema up to date ({} applied now, {} already applied)",
                summary.applied.len(),
                summary.already_applied
            );
        }
        Commands::DropTables => {
            let rolled_back = commands::drop_tables(config.require_postgres()?).await?;
            println!("✅ Rolled back {} migration(s)", rolled_back.len());
        }
        Commands::Rollback => match commands::rollback_last(config.require_postgres()?).await? {
            Some(id) => println!("✅ Rolled back '{}'", id),
            None => println!("Nothing to roll back"),
        },
        Commands::Status => {
            let status = commands::migration_status(config.require_postgres()?).await?;
            println!("\n📊 Migrations:");
            for migration in status {
                let applied = migration
                    .applied_at
                    .map_or("pending".to_string(), |at| at.to_rfc3339());
                println!("   {:<20} {}", migration.id, applied);
            }
        }
        Commands::Migrate => {
            let report = commands::migrate(&config, &cancel).await?;
            println!("\n✅ Migration Complete!");
            for partition in &report.partitions {
                print_stats(partition.kind.name(), &partition.stats);
                if let Some(e) = &partition.error {
                    println!("     partition error: {}", e);
                }
            }
            let totals = report.totals();
            println!("   Duration:   {:.2}s", totals.duration_secs);
            println!("   Throughput: {:.0} records/sec", totals.throughput());
            if !report.is_clean() {
                anyhow::bail!("migration finished with {} failed record(s)", totals.failed);
            }
        }
        Commands::KubeMigrate => {
            let report = commands::kube_migrate(&config, &cancel).await?;
            println!("\n✅ Replication Complete!");
            print_stats("secrets", &report.secrets);
            print_stats("certificates", &report.certificates);
            if !report.is_clean() {
                anyhow::bail!(
                    "replication finished with {} failed object(s)",
                    report.secrets.failed + report.certificates.failed
                );
            }
        }
        Commands::Validate => {
            println!("✅ Configuration is valid!");
            println!("   kv:       {}", section(config.kv.is_some()));
            println!("   postgres: {}", section(config.postgres.is_some()));
            println!("   kube:     {}", section(config.kube.is_some()));
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let mut config = MigrationConfig::from_file(&cli.config)?;

    if cli.dry_run {
        config.options.dry_run = true;
    }

    if let Some(bs) = cli.batch_size {
        config.options.batch_size = bs;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn print_stats(label: &str, stats: &TransferStats) {
    println!(
        "   {:<16} transferred {:>6}  skipped {:>6}  failed {:>6}",
        label, stats.transferred, stats.skipped, stats.failed
    );
    for failure in &stats.failures {
        println!("     ✗ {}: {}", failure.item, failure.reason);
    }
}

fn section(present: bool) -> &'static str {
    if present {
        "configured"
    } else {
        "not configured"
    }
}
