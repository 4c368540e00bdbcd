use crate::error::FetchError;
use crate::throttle::RetryPolicy;
use anyhow::Result;
use inquire::validator::Validation;
use inquire::Text;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const APP_NAME: &str = "mangadex-cover-fetcher";
const CONFIG_NAME: &str = "config";

pub const DEFAULT_API_BASE: &str = "https://api.mangadex.org";
pub const DEFAULT_UPLOADS_BASE: &str = "https://uploads.mangadex.org";
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub manga_dir: String,
    pub cover_dir: String,
    pub delay_secs: f64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
    pub page_size: u32,
    pub api_base: String,
    pub uploads_base: String,
    pub user_agent: String,
    pub cover_locales: Vec<String>,
    pub log_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            manga_dir: "".into(),
            cover_dir: "".into(),
            delay_secs: 1.0,
            max_attempts: 3,
            backoff_ms: 1000,
            timeout_secs: 30,
            page_size: MAX_PAGE_SIZE,
            api_base: DEFAULT_API_BASE.into(),
            uploads_base: DEFAULT_UPLOADS_BASE.into(),
            user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
            cover_locales: Vec::new(),
            log_dir: ".".into(),
        }
    }
}

/// Values given on the command line; they win over the stored config.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub manga_dir: Option<PathBuf>,
    pub cover_dir: Option<PathBuf>,
    pub delay_secs: Option<f64>,
    pub max_attempts: Option<u32>,
    pub interactive: bool,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub manga_dir: PathBuf,
    pub cover_dir: PathBuf,
    pub delay: Duration,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub page_size: u32,
    pub api_base: String,
    pub uploads_base: String,
    pub user_agent: String,
    pub cover_locales: Vec<String>,
    pub log_dir: PathBuf,
}

impl AppConfig {
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(dir) = &overrides.manga_dir {
            self.manga_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(dir) = &overrides.cover_dir {
            self.cover_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(delay) = overrides.delay_secs {
            self.delay_secs = delay;
        }
        if let Some(attempts) = overrides.max_attempts {
            self.max_attempts = attempts;
        }
    }

    fn needs_directories(&self) -> bool {
        self.manga_dir.trim().is_empty() || self.cover_dir.trim().is_empty()
    }

    pub fn settings(&self) -> Result<Settings, FetchError> {
        if self.needs_directories() {
            return Err(FetchError::Config(
                "both the manga directory and the cover directory are required".into(),
            ));
        }
        if !self.delay_secs.is_finite() || self.delay_secs < 0.0 {
            return Err(FetchError::Config(format!(
                "delay must be a non-negative number of seconds, got {}",
                self.delay_secs
            )));
        }
        if self.max_attempts == 0 {
            return Err(FetchError::Config("max_attempts must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(FetchError::Config(format!(
                "page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let delay = Duration::try_from_secs_f64(self.delay_secs).map_err(|e| {
            FetchError::Config(format!("delay of {} seconds is out of range: {}", self.delay_secs, e))
        })?;

        let manga_dir = expand_home(&self.manga_dir);
        if !manga_dir.is_dir() {
            return Err(FetchError::Config(format!(
                "manga directory does not exist: {}",
                manga_dir.display()
            )));
        }

        Ok(Settings {
            manga_dir,
            cover_dir: expand_home(&self.cover_dir),
            delay,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                backoff: Duration::from_millis(self.backoff_ms),
            },
            timeout: Duration::from_secs(self.timeout_secs),
            page_size: self.page_size,
            api_base: self.api_base.trim_end_matches('/').to_string(),
            uploads_base: self.uploads_base.trim_end_matches('/').to_string(),
            user_agent: self.user_agent.clone(),
            cover_locales: self.cover_locales.clone(),
            log_dir: expand_home(&self.log_dir),
        })
    }
}

pub fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim();
    match (raw.strip_prefix("~"), dirs::home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with(['/', '\\']) => {
            home.join(rest.trim_start_matches(['/', '\\']))
        }
        _ => PathBuf::from(raw),
    }
}

fn default_directories() -> (PathBuf, PathBuf) {
    let documents = dirs::home_dir().unwrap_or_default().join("Documents");
    (documents.join("Manga"), documents.join("Cover-Pages"))
}

/// Stored config with the command-line overrides applied.
pub fn get_config(overrides: &Overrides) -> Result<AppConfig> {
    let mut cfg: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;
    cfg.apply(overrides);
    Ok(cfg)
}

/// Prompts for the directories when asked to or when they are still unset,
/// and remembers the answers for the next run.
pub fn ensure_directories(cfg: &mut AppConfig, overrides: &Overrides) -> Result<()> {
    if !overrides.interactive && !cfg.needs_directories() {
        return Ok(());
    }

    let (manga_dir, cover_dir) = prompt_directories(cfg, overrides)?;
    cfg.manga_dir = manga_dir.clone();
    cfg.cover_dir = cover_dir.clone();

    let stored: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;
    let new_stored = AppConfig {
        manga_dir,
        cover_dir,
        ..stored
    };
    confy::store(APP_NAME, CONFIG_NAME, &new_stored)?;
    info!(
        "Saved directories to {}",
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)?.display()
    );
    Ok(())
}

fn prompt_directories(cfg: &AppConfig, overrides: &Overrides) -> Result<(String, String)> {
    let (default_manga, default_cover) = default_directories();
    let or_default = |value: &str, fallback: &Path| {
        if value.trim().is_empty() {
            fallback.to_string_lossy().into_owned()
        } else {
            value.to_string()
        }
    };

    let manga_dir = match &overrides.manga_dir {
        Some(dir) => dir.to_string_lossy().into_owned(),
        None => Text::new("Enter source directory (containing manga folders):")
            .with_default(&or_default(&cfg.manga_dir, &default_manga))
            .with_validator(|input: &str| {
                if expand_home(input).is_dir() {
                    Ok(Validation::Valid)
                } else {
                    Ok(Validation::Invalid("Directory does not exist".into()))
                }
            })
            .prompt()?,
    };

    let cover_dir = match &overrides.cover_dir {
        Some(dir) => dir.to_string_lossy().into_owned(),
        None => Text::new("Enter destination directory (for cover pages):")
            .with_default(&or_default(&cfg.cover_dir, &default_cover))
            .with_validator(|input: &str| {
                if input.trim().is_empty() {
                    Ok(Validation::Invalid("Please enter a directory path".into()))
                } else {
                    Ok(Validation::Valid)
                }
            })
            .prompt()?,
    };

    Ok((manga_dir, cover_dir))
}
