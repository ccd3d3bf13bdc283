use std::path::PathBuf;

const APP_DIR: &str = "aurora-store";

/// Returns the data root: `$AURORA_HOME` if set, else `<data_dir>/aurora-store`.
///
/// Falls back to the system temp directory when no data directory can be
/// resolved (e.g. a stripped-down service environment with no `$HOME`).
pub fn aurora_home() -> PathBuf {
    resolve_home(std::env::var_os("AURORA_HOME").map(PathBuf::from), dirs::data_dir())
}

fn resolve_home(env: Option<PathBuf>, data_dir: Option<PathBuf>) -> PathBuf {
    env.or_else(|| data_dir.map(|d| d.join(APP_DIR)))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR))
}

/// Extraction cache root.
pub fn cache_dir() -> PathBuf {
    if std::env::var_os("AURORA_HOME").is_some() {
        return aurora_home().join("cache");
    }
    dirs::cache_dir().map_or_else(|| aurora_home().join("cache"), |c| c.join(APP_DIR))
}

/// Downloaded APKs: <home>/downloads
pub fn download_dir() -> PathBuf {
    aurora_home().join("downloads")
}

/// OBB root: <home>/obb
pub fn obb_dir() -> PathBuf {
    aurora_home().join("obb")
}

/// Stored user preferences: <home>/preferences.toml
pub fn preferences_path() -> PathBuf {
    aurora_home().join("preferences.toml")
}
