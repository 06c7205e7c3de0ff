use std::path::{Path, PathBuf};

const CONFIG_DIR_NAME: &str = ".tunnelpass";

/// Expand a leading `~` to the home directory
pub fn expand_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// `~/.tunnelpass`, or `./.tunnelpass` when there is no home directory
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default location of a named identity key
pub fn default_key_path(name: &str) -> PathBuf {
    default_config_dir().join(format!("{}.key", name))
}

pub fn default_credentials_path() -> PathBuf {
    default_config_dir().join("credentials.json")
}
