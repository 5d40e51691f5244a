use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    cmd::{self, CmdOutput},
    error::InstallerError,
};

/// Everything the detection steps are allowed to ask of the machine.
///
/// The live implementation talks to the real system; tests script one.
pub trait Host {
    /// Runs an inspection or setup command and captures its stdout.
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput, InstallerError>;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Entries of a directory, sorted by path.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Follows symlinks all the way down (`readlink -f`).
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;
}

/// The machine we are running on.
pub struct LiveHost {
    timeout: Duration,
}

impl LiveHost {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Host for LiveHost {
    fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput, InstallerError> {
        cmd::run_capture(program, args, self.timeout)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}
