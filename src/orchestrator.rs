use crate::download::{plan, DownloadStatus, Downloader};
use crate::error::FetchError;
use crate::mangadex::MangaDexClient;
use crate::scanner::MangaUnit;
use crate::throttle::RetryPolicy;
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Searching,
    Listing,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Searching => "search",
            Stage::Listing => "cover listing",
        };
        write!(f, "{}", name)
    }
}

/// Terminal state of one manga.
#[derive(Debug)]
pub enum MangaOutcome {
    NotFound,
    Failed { stage: Stage, error: FetchError },
    Done {
        downloaded: usize,
        skipped: usize,
        duplicates: usize,
        failed: usize,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub manga_processed: usize,
    pub manga_found: usize,
    pub manga_not_found: usize,
    pub manga_failed: usize,
    pub covers_downloaded: usize,
    pub covers_skipped: usize,
    pub covers_duplicate: usize,
    pub covers_failed: usize,
}

impl RunStats {
    fn record(&mut self, outcome: &MangaOutcome) {
        self.manga_processed += 1;
        match outcome {
            MangaOutcome::NotFound => self.manga_not_found += 1,
            MangaOutcome::Failed { stage, .. } => {
                if *stage != Stage::Searching {
                    self.manga_found += 1;
                }
                self.manga_failed += 1;
            }
            MangaOutcome::Done {
                downloaded,
                skipped,
                duplicates,
                failed,
            } => {
                self.manga_found += 1;
                self.covers_downloaded += downloaded;
                self.covers_skipped += skipped;
                self.covers_duplicate += duplicates;
                self.covers_failed += failed;
            }
        }
    }

    pub fn log_summary(&self) {
        info!("{}", "=".repeat(50));
        info!("DOWNLOAD STATISTICS");
        info!("{}", "=".repeat(50));
        info!("Total manga processed: {}", self.manga_processed);
        info!("Found on MangaDex: {}", self.manga_found);
        info!("Not found: {}", self.manga_not_found);
        info!("Failed: {}", self.manga_failed);
        info!("Covers downloaded: {}", self.covers_downloaded);
        info!("Covers skipped (already present): {}", self.covers_skipped);
        info!("Covers sharing a volume (other locales): {}", self.covers_duplicate);
        info!("Covers failed: {}", self.covers_failed);
        info!("{}", "=".repeat(50));
    }
}

pub struct Orchestrator {
    catalog: MangaDexClient,
    downloader: Downloader,
    retry: RetryPolicy,
    cover_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        catalog: MangaDexClient,
        downloader: Downloader,
        retry: RetryPolicy,
        cover_dir: PathBuf,
    ) -> Self {
        Self {
            catalog,
            downloader,
            retry,
            cover_dir,
        }
    }

    /// Processes every unit in order. Per-manga failures are logged and
    /// counted; they never stop the run.
    pub fn run(&mut self, units: &[MangaUnit]) -> RunStats {
        let mut stats = RunStats::default();
        info!("Starting to process {} manga", units.len());

        for (i, unit) in units.iter().enumerate() {
            let _span = info_span!("manga", name = %unit.folder_name).entered();
            info!("Progress: {}/{} - {}", i + 1, units.len(), unit);

            let outcome = self.process(unit);
            match &outcome {
                MangaOutcome::NotFound => {
                    warn!("No results found for '{}', skipping", unit)
                }
                MangaOutcome::Failed { stage, error } => {
                    error!("'{}' failed during {}: {}", unit, stage, error)
                }
                MangaOutcome::Done {
                    downloaded,
                    skipped,
                    duplicates,
                    failed,
                } => info!(
                    "'{}' done: {} downloaded, {} skipped, {} duplicate, {} failed",
                    unit, downloaded, skipped, duplicates, failed
                ),
            }
            stats.record(&outcome);
        }

        stats.log_summary();
        stats
    }

    pub fn process(&mut self, unit: &MangaUnit) -> MangaOutcome {
        let title = unit.folder_name.as_str();

        let catalog = &mut self.catalog;
        let found = match self.retry.call("search", || catalog.search(title)) {
            Ok(found) => found,
            Err(FetchError::NotFound(_)) => return MangaOutcome::NotFound,
            Err(error) => {
                return MangaOutcome::Failed {
                    stage: Stage::Searching,
                    error,
                }
            }
        };

        let covers = match self
            .retry
            .call("cover listing", || catalog.list_covers(&found.id))
        {
            Ok(covers) => covers,
            Err(error) => {
                return MangaOutcome::Failed {
                    stage: Stage::Listing,
                    error,
                }
            }
        };
        if covers.is_empty() {
            warn!("No covers found for '{}'", unit);
        } else {
            info!("Found {} covers for '{}'", covers.len(), unit);
        }

        let (mut downloaded, mut skipped, mut duplicates, mut failed) = (0, 0, 0, 0);
        let mut planned = HashSet::new();
        for (cover, dest) in plan(&self.cover_dir, title, covers) {
            if !planned.insert(dest.clone()) {
                duplicates += 1;
                debug!(
                    "Cover {} (locale {}) maps to {} like an earlier cover, not fetching",
                    cover.id,
                    cover.locale.as_deref().unwrap_or("unknown"),
                    dest.display()
                );
                continue;
            }
            let outcome = self.downloader.fetch(cover, dest);
            match &outcome.status {
                DownloadStatus::Downloaded => downloaded += 1,
                DownloadStatus::Skipped => skipped += 1,
                DownloadStatus::Failed(e) => {
                    failed += 1;
                    debug!(
                        "{} -> {} gave up after {} attempt(s): {}",
                        outcome.cover.remote_url,
                        outcome.path.display(),
                        outcome.attempts,
                        e
                    );
                }
            }
        }

        MangaOutcome::Done {
            downloaded,
            skipped,
            duplicates,
            failed,
        }
    }
}
