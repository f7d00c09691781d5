//! Where chatsearch keeps its own data (config and the index file).
//!
//! The chat export stays wherever the user downloaded it. We only store app state here.

use std::path::PathBuf;

/// File name of the index inside the app data directory.
pub const INDEX_FILENAME: &str = "chatindex.csv";

/// Returns the directory where chatsearch stores config and the index.
/// On Linux: `~/.local/share/chatsearch/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "chatsearch", "chatsearch")?
        .data_local_dir()
        .to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Default location of the index file.
pub fn default_index_path() -> Option<PathBuf> {
    app_data_dir().map(|dir| dir.join(INDEX_FILENAME))
}
