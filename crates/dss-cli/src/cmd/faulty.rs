//! `dss faulty` - inspect and clear items the scanner gave up on

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use dss_scanner::{FAULTY_PATH_FILENAME, read_faulty_file};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct FaultyArgs {
    #[command(subcommand)]
    pub action: FaultyAction,

    /// Scanned directory (default: incoming_dir from config)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum FaultyAction {
    /// List faulty items
    List,
    /// Let items be processed again
    Clear {
        /// Item names to clear (default: all)
        items: Vec<String>,
    },
}

pub fn run(args: FaultyArgs, config: &Config) -> Result<()> {
    let dir = args
        .dir
        .unwrap_or_else(|| config.registrator.incoming_dir.clone());
    let file = dir.join(FAULTY_PATH_FILENAME);
    match args.action {
        FaultyAction::List => list(&file),
        FaultyAction::Clear { items } => clear(&file, &items),
    }
}

fn list(file: &Path) -> Result<()> {
    let Some((names, _)) = read_faulty_file(file)? else {
        eprintln!("No faulty items.");
        return Ok(());
    };
    let mut names: Vec<_> = names.into_iter().collect();
    names.sort();
    for name in &names {
        println!("{name}");
    }
    eprintln!("{} faulty items", names.len());
    Ok(())
}

fn clear(file: &Path, items: &[String]) -> Result<()> {
    if items.is_empty() {
        match fs::remove_file(file) {
            Ok(()) => eprintln!("Cleared all faulty items."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => eprintln!("No faulty items."),
            Err(e) => {
                return Err(e).with_context(|| format!("cannot remove {}", file.display()));
            }
        }
        return Ok(());
    }

    let content = match fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("No faulty items.");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("cannot read {}", file.display())),
    };
    let (kept, removed) = remove_lines(&content, items);
    fs::write(file, kept).with_context(|| format!("cannot write {}", file.display()))?;
    eprintln!("Cleared {removed} faulty items.");
    Ok(())
}

/// Drop lines naming one of `items`. Returns the new content and how many
/// lines were dropped.
fn remove_lines(content: &str, items: &[String]) -> (String, usize) {
    let mut kept = String::new();
    let mut removed = 0;
    for line in content.lines() {
        let name = Path::new(line.trim())
            .file_name()
            .map(|n| n.to_string_lossy());
        if name.is_some_and(|n| items.iter().any(|i| *i == n)) {
            removed += 1;
        } else if !line.trim().is_empty() {
            kept.push_str(line);
            kept.push('\n');
        }
    }
    (kept, removed)
}
