// ABOUTME: XDG Base Directory paths for parley's configuration and conversation database.
// ABOUTME: Falls back to the working directory when the platform exposes no home directory.

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "parley";
const APPLICATION: &str = "parley";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Config directory (e.g., ~/.config/parley/), or `.` without XDG directories
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default config file, e.g. ~/.config/parley/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Data directory (e.g., ~/.local/share/parley/), or ./data without XDG directories
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Default conversation database
pub fn store_file() -> PathBuf {
    data_dir().join("conversations.db")
}

/// Expand a leading `~` to the user's home directory
pub fn expand_tilde(path: &str) -> String {
    let rest = if path == "~" {
        ""
    } else if let Some(stripped) = path.strip_prefix("~/") {
        stripped
    } else {
        return path.to_string();
    };

    match directories::BaseDirs::new() {
        Some(base) => base.home_dir().join(rest).to_string_lossy().to_string(),
        None => {
            tracing::warn!(
                path = %path,
                "Failed to expand tilde in path: could not determine home directory"
            );
            path.to_string()
        }
    }
}
