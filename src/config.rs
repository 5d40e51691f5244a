use std::{path::PathBuf, time::Duration};

use crate::model::Provider;

pub const DEFAULT_CONFIG_DIR: &str = "/etc/nixos";
pub const DEFAULT_SWAP_DIR: &str = "/tmp";
pub const DEFAULT_STATE_VERSION: &str = "24.05";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Size of the install-time swap file.
pub const EPHEMERAL_SWAP_MB: u64 = 512;

/// Holds every run-time parameter, fixed once the command line is parsed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub dry_run: bool,
    pub assume_yes: bool,
    pub provider: Option<Provider>,
    pub no_swap: bool,
    pub swap_dir: PathBuf,
    pub config_dir: PathBuf,
    pub overwrite: bool,
    pub state_version: String,
    pub timeout: Duration,
    pub exec: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dry_run: false,
            assume_yes: false,
            provider: None,
            no_swap: false,
            swap_dir: PathBuf::from(DEFAULT_SWAP_DIR),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            overwrite: false,
            state_version: DEFAULT_STATE_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            exec: Vec::new(),
        }
    }
}

impl Settings {
    /// Path of the temporary swap file for this process.
    pub fn swap_file_path(&self) -> PathBuf {
        self.swap_dir
            .join(format!("nixos-infect.{}.swp", std::process::id()))
    }
}
