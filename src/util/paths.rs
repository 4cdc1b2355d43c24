//! Where domtape keeps its config, logs and recorded sessions.

use std::path::PathBuf;
use std::sync::OnceLock;

static ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Pin the data directory for this process. Only the first call counts;
/// `None` pins `~/.domtape`.
pub fn init_data_dir(dir: Option<PathBuf>) {
    let dir = dir.unwrap_or_else(home_data_dir);
    if let Err(ignored) = ROOT.set(dir) {
        tracing::debug!(ignored = %ignored.display(), "data dir already pinned");
    }
}

fn home_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".domtape")
}

pub fn data_dir() -> PathBuf {
    ROOT.get().cloned().unwrap_or_else(home_data_dir)
}

pub fn log_file_path() -> PathBuf {
    data_dir().join("logs").join("domtape.log")
}

/// Default [`ChunkStore`](crate::transport::ChunkStore) directory.
pub fn chunks_dir() -> PathBuf {
    data_dir().join("sessions")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
