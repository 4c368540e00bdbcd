mod config;
mod download;
mod error;
mod logging;
mod mangadex;
mod orchestrator;
mod scanner;
#[cfg(test)]
mod stub;
mod throttle;

use crate::config::{ensure_directories, get_config, Overrides};
use crate::download::Downloader;
use crate::mangadex::MangaDexClient;
use crate::orchestrator::Orchestrator;
use crate::scanner::{filter_units, scan, MangaUnit};
use anyhow::{Context, Result};
use clap::Parser;
use inquire::MultiSelect;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "mangadex-cover-fetcher", version)]
#[command(about = "Download MangaDex cover pages for every manga folder in a directory")]
struct Cli {
    /// Directory containing manga folders
    #[arg(long)]
    manga_dir: Option<PathBuf>,

    /// Directory to save cover pages
    #[arg(long)]
    cover_dir: Option<PathBuf>,

    /// Delay between requests in seconds
    #[arg(long)]
    delay: Option<f64>,

    /// Specific manga to process (by folder name)
    #[arg(long, num_args = 1..)]
    manga: Option<Vec<String>>,

    /// Prompt for directories and manga interactively
    #[arg(long, default_value_t = false)]
    interactive: bool,

    /// Attempts per request before giving up on transient errors
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Debug output on the console
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn pick_units(units: Vec<MangaUnit>) -> Result<Vec<MangaUnit>> {
    if units.is_empty() {
        return Ok(units);
    }
    let picked = MultiSelect::new("Select manga:", units)
        .with_all_selected_by_default()
        .with_help_message("↑↓ to move, space to toggle, → all, ← none, type to filter")
        .prompt()?;
    Ok(picked)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = Overrides {
        manga_dir: cli.manga_dir,
        cover_dir: cli.cover_dir,
        delay_secs: cli.delay,
        max_attempts: cli.max_attempts,
        interactive: cli.interactive,
    };

    let mut cfg = get_config(&overrides).context("cannot load configuration")?;
    let log = logging::init(&config::expand_home(&cfg.log_dir), cli.debug)
        .context("cannot set up logging")?;
    info!("Writing run log to {}", log.log_file.display());

    ensure_directories(&mut cfg, &overrides)?;
    let settings = cfg.settings()?;
    info!("Manga directory: {}", settings.manga_dir.display());
    info!("Cover directory: {}", settings.cover_dir.display());

    let local = scan(&settings.manga_dir)?;
    let units = match cli.manga {
        Some(names) => filter_units(&local, &names),
        None if cli.interactive => pick_units(local)?,
        None => local,
    };

    fs::create_dir_all(&settings.cover_dir).with_context(|| {
        format!(
            "cannot create cover directory {}",
            settings.cover_dir.display()
        )
    })?;

    let catalog = MangaDexClient::new(&settings)?;
    let downloader = Downloader::new(&settings)?;
    let mut orchestrator = Orchestrator::new(
        catalog,
        downloader,
        settings.retry,
        settings.cover_dir.clone(),
    );
    orchestrator.run(&units);

    Ok(())
}
