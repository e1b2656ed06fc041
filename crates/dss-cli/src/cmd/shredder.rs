//! `dss shredder` - show deletions still pending

use anyhow::Result;

use dss_core::list_shredder_items;

use crate::config::Config;

pub fn run(config: &Config) -> Result<()> {
    let queue_file = &config.shredder.queue_file;
    let items = list_shredder_items(queue_file)?;
    if items.is_empty() {
        eprintln!("No pending deletions.");
        return Ok(());
    }
    for item in &items {
        let state = if item.exists() { "" } else { " (gone)" };
        println!("{}{state}", item.display());
    }
    eprintln!(
        "{} pending deletions in {}",
        items.len(),
        queue_file.display()
    );
    Ok(())
}
