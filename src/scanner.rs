use crate::error::{FetchError, FetchResult};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const SYSTEM_DIRS: [&str; 4] = [
    "@eaDir",
    "$RECYCLE.BIN",
    "System Volume Information",
    "lost+found",
];

/// One local manga folder, keyed by its folder name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MangaUnit {
    pub folder_name: String,
}

impl MangaUnit {
    pub fn new(folder_name: impl Into<String>) -> Self {
        Self {
            folder_name: folder_name.into(),
        }
    }
}

impl Display for MangaUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.folder_name)
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || SYSTEM_DIRS.contains(&name)
}

/// Lists the immediate subdirectories of `root`, sorted by name.
pub fn scan(root: &Path) -> FetchResult<Vec<MangaUnit>> {
    if !root.is_dir() {
        return Err(FetchError::Config(format!(
            "manga directory does not exist or is not a directory: {}",
            root.display()
        )));
    }

    let entries = fs::read_dir(root).map_err(|e| FetchError::io(root, e))?;
    let mut units = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| FetchError::io(root, e))?;
        let file_type = entry.file_type().map_err(|e| FetchError::io(entry.path(), e))?;
        let is_dir = file_type.is_dir() || (file_type.is_symlink() && entry.path().is_dir());
        if !is_dir {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }
        units.push(MangaUnit::new(name));
    }
    units.sort();

    info!("Found {} manga directories in {}", units.len(), root.display());
    Ok(units)
}

/// Keeps the requested names, in request order. Names with no local folder
/// are still returned so they can be looked up as plain titles.
pub fn filter_units(units: &[MangaUnit], wanted: &[String]) -> Vec<MangaUnit> {
    wanted
        .iter()
        .map(|name| {
            if !units.iter().any(|u| &u.folder_name == name) {
                warn!("'{}' is not a folder in the manga directory", name);
            }
            MangaUnit::new(name.as_str())
        })
        .collect()
}
