use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command '{0}' failed with exit code {1}")]
    CommandFailed(String, i32),

    #[error("Command '{0}' not found — is it installed?")]
    CommandNotFound(String),

    #[error("Command '{0}' did not finish within {1} seconds")]
    CommandTimedOut(String, u64),

    #[error("Installation cancelled by user")]
    Cancelled,

    #[error("This installer must be run as root (sudo)")]
    NotRoot,

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Unsupported boot configuration: {0}")]
    UnsupportedBootConfiguration(String),

    #[error("Host inspection failed: {0}")]
    ProbeFailure(String),

    #[error("Cannot render configuration: {0}")]
    Render(String),
}
