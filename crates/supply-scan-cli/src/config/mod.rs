//! Configuration loading and resolution.

use std::path::{Path, PathBuf};

/// Environment variable naming the catalog file.
pub const CATALOG_ENV: &str = "SUPPLY_SCAN_CATALOG";

/// Resolve the catalog path.
///
/// Returns `None` when nothing was given and no catalog exists in the usual
/// places; the caller then falls back to a fixed-outcome verifier.
pub fn resolve_catalog_path(explicit: Option<&str>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_catalog_path_in(
        explicit,
        std::env::var(CATALOG_ENV).ok().as_deref(),
        &cwd,
        &home_dir(),
    )
}

/// Resolution with every input passed in.
pub fn resolve_catalog_path_in(
    explicit: Option<&str>,
    env_path: Option<&str>,
    cwd: &Path,
    home: &Path,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Some(path) = env_path.filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }

    let cwd_catalog = cwd.join(".supply-scan/catalog.json");
    if cwd_catalog.exists() {
        return Some(cwd_catalog);
    }

    let home_catalog = default_catalog_path(home);
    home_catalog.exists().then_some(home_catalog)
}

/// `$HOME/.supply-scan/catalog.json`.
pub fn default_catalog_path(home: &Path) -> PathBuf {
    home.join(".supply-scan").join("catalog.json")
}

pub(crate) fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
