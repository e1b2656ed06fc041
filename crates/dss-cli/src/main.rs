//! dss - Dropbox registration service
//!
//! Watches an incoming directory, moves each arriving item into the data
//! store and records the registration, rolling back whatever a failed or
//! interrupted registration left behind.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "dss")]
#[command(about = "Transactional dataset registration from a dropbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./dss.toml or ~/.config/dss/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan the dropbox and register incoming items
    Run(cmd::run::RunArgs),
    /// Roll back transactions left by a dead process
    Recover(cmd::recover::RecoverArgs),
    /// Inspect or clear faulty dropbox items
    Faulty(cmd::faulty::FaultyArgs),
    /// Inspect stored data sets
    Store(cmd::store::StoreArgs),
    /// Show pending deletions
    Shredder,
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    dss_core::init_logging(cli.quiet, cli.debug);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config),
        Command::Recover(args) => cmd::recover::run(args, &config),
        Command::Faulty(args) => cmd::faulty::run(args, &config),
        Command::Store(args) => cmd::store::run(args, &config),
        Command::Shredder => cmd::shredder::run(&config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let reg = &config.registrator;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            let dirs = [
                ("Incoming", &reg.incoming_dir),
                ("Staging", &reg.staging_dir),
                ("Precommit", &reg.precommit_dir),
                ("Store", &reg.store_root),
                ("Rollback", &reg.rollback_dir),
                ("Journal", &config.journal.dir),
                ("Shredder", &config.shredder.dir),
                ("Shredder queue", &config.shredder.queue_file),
            ];
            for (name, dir) in dirs {
                table.add_row(vec![name, &dir.display().to_string()]);
            }
            table.add_row(vec!["Data store code", &reg.data_store_code]);
            table.add_row(vec!["Data set type", &reg.data_set_type]);
            table.add_row(vec![
                "Experiment",
                reg.experiment.as_deref().unwrap_or("not set"),
            ]);
            table.add_row(vec![
                "Check interval",
                &format!("{}s", reg.check_interval_secs),
            ]);
            table.add_row(vec![
                "Registration retries",
                &format!(
                    "{} (pause {}s)",
                    reg.registration_max_retry_count, reg.registration_retry_pause_secs
                ),
            ]);
            table.add_row(vec![
                "Staging wait",
                &format!("{:?}", reg.staging_wait().total()),
            ]);
            table.add_row(vec![
                "Faulty items",
                if reg.reprocess_faulty {
                    "reprocessed"
                } else {
                    "remembered"
                },
            ]);
            table.add_row(vec![
                "Is-finished marker",
                if reg.use_is_finished_marker {
                    "required"
                } else {
                    "not used"
                },
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
