//! `dss store` - inspect stored data sets

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use dss_registrator::{DataSetManifest, MANIFEST_FILENAME};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub action: StoreAction,

    /// Store root (default: store_root from config)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// List stored data sets
    List,
    /// Verify content hashes
    Verify {
        /// Specific data set code to verify (default: all)
        code: Option<String>,
    },
}

pub fn run(args: StoreArgs, config: &Config) -> Result<()> {
    let dir = args
        .dir
        .unwrap_or_else(|| config.registrator.store_root.clone());
    match args.action {
        StoreAction::List => list(&dir),
        StoreAction::Verify { code } => verify(&dir, code.as_deref()),
    }
}

fn short(hash: &str) -> &str {
    &hash[..std::cmp::min(8, hash.len())]
}

/// Data set directories under `root` that carry a manifest, by code.
fn stored_data_sets(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e).with_context(|| format!("cannot list {}", root.display())),
    };
    for entry in entries {
        let path = entry
            .with_context(|| format!("cannot list {}", root.display()))?
            .path();
        if path.join(MANIFEST_FILENAME).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn list(root: &Path) -> Result<()> {
    let dirs = stored_data_sets(root)?;
    if dirs.is_empty() {
        eprintln!("No stored data sets.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Code").fg(Color::Cyan),
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Owner").fg(Color::Cyan),
            Cell::new("Files").fg(Color::Cyan),
            Cell::new("Content").fg(Color::Cyan),
            Cell::new("Stored").fg(Color::Cyan),
        ]);

    for dir in &dirs {
        let manifest = DataSetManifest::read_from(dir)?;
        let info = &manifest.data_set;
        table.add_row(vec![
            Cell::new(&info.code),
            Cell::new(info.data_set_type.as_deref().unwrap_or("-")),
            Cell::new(info.owner_description()),
            Cell::new(manifest.file_hashes.len()),
            Cell::new(short(&manifest.content_hash)),
            Cell::new(manifest.stored_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    eprintln!("\n{table}");
    eprintln!("{} data sets total", dirs.len());
    Ok(())
}

fn verify(root: &Path, code: Option<&str>) -> Result<()> {
    let dirs = match code {
        Some(code) => {
            let dir = root.join(code);
            if !dir.join(MANIFEST_FILENAME).is_file() {
                bail!("data set {code} not found in {}", root.display());
            }
            vec![dir]
        }
        None => stored_data_sets(root)?,
    };

    let mut broken = 0;
    for dir in &dirs {
        let manifest = DataSetManifest::read_from(dir)?;
        let mismatches = manifest.verify(dir)?;
        if mismatches.is_empty() {
            eprintln!("{}: OK", manifest.data_set.code);
            continue;
        }
        broken += 1;
        eprintln!("{}: {} files differ", manifest.data_set.code, mismatches.len());
        for m in &mismatches {
            match &m.actual {
                Some(actual) => eprintln!(
                    "  {}: expected {}, got {}",
                    m.path,
                    short(&m.expected),
                    short(actual)
                ),
                None => eprintln!("  {}: missing", m.path),
            }
        }
    }

    if broken > 0 {
        bail!("{broken} of {} data sets failed verification", dirs.len());
    }
    eprintln!("{} data sets verified", dirs.len());
    Ok(())
}
