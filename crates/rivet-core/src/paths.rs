//! Locations of the rivet home, configuration and cache on disk.

use dirs::home_dir;
use std::path::PathBuf;

/// Returns the rivet home directory, or None if the user's home cannot be resolved.
pub fn try_rivet_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("RIVET_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".rivet"))
}

/// Returns the rivet home directory (`$RIVET_HOME` or `~/.rivet`).
///
/// Falls back to `.rivet` in the working directory when no home directory
/// can be resolved.
pub fn rivet_home() -> PathBuf {
    try_rivet_home().unwrap_or_else(|| PathBuf::from(".rivet"))
}

/// Configuration file: ~/.rivet/config.toml
pub fn config_path() -> PathBuf {
    rivet_home().join("config.toml")
}

/// Local cache store file: ~/.rivet/cache.json
pub fn cache_path() -> PathBuf {
    rivet_home().join("cache.json")
}

/// Build folders: ~/.rivet/builds
pub fn build_path() -> PathBuf {
    rivet_home().join("builds")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_under_the_home() {
        let home = rivet_home();
        assert_eq!(config_path(), home.join("config.toml"));
        assert_eq!(cache_path(), home.join("cache.json"));
        assert_eq!(build_path(), home.join("builds"));
    }
}
