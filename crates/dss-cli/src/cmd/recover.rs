//! `dss recover` - roll back transactions left behind by a dead process

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use dss_core::RollbackStack;
use dss_registrator::{find_rollback_stacks, rollback_dead_transactions};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Rollback directory (default: from config)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Also roll back stacks that are still locked
    #[arg(long)]
    pub force: bool,

    /// Only list the stacks
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: RecoverArgs, config: &Config) -> Result<()> {
    let dir = args
        .dir
        .unwrap_or_else(|| config.registrator.rollback_dir.clone());

    if args.dry_run {
        return list(&dir);
    }

    let report = rollback_dead_transactions(&dir, args.force)?;
    if !report.had_work() {
        eprintln!("No dead transactions in {}", dir.display());
        return Ok(());
    }
    eprintln!(
        "Rolled back {} transactions ({} commands), {} locked, {} failed",
        report.rolled_back, report.commands_reversed, report.skipped_locked, report.failed
    );
    if report.skipped_locked > 0 && !args.force {
        eprintln!("Run with --force once no other registrator uses {}", dir.display());
    }
    Ok(())
}

fn list(dir: &std::path::Path) -> Result<()> {
    let stacks = find_rollback_stacks(dir)?;
    if stacks.is_empty() {
        eprintln!("No dead transactions in {}", dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Stack").fg(Color::Cyan),
            Cell::new("Commands").fg(Color::Cyan),
            Cell::new("Locked").fg(Color::Cyan),
        ]);

    for path in &stacks {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match RollbackStack::open(path) {
            Ok(stack) => {
                let locked = if stack.is_locked_state() {
                    Cell::new("yes").fg(Color::Yellow)
                } else {
                    Cell::new("no").fg(Color::DarkGrey)
                };
                table.add_row(vec![Cell::new(name), Cell::new(stack.len()), locked]);
            }
            Err(e) => {
                table.add_row(vec![
                    Cell::new(name),
                    Cell::new(format!("unreadable: {e}")).fg(Color::Red),
                    Cell::new("-"),
                ]);
            }
        }
    }

    eprintln!("\n{table}");
    eprintln!("{} stacks total", stacks.len());
    Ok(())
}
