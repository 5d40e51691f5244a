use std::path::{Path, PathBuf};

use crate::{
    config::{Settings, EPHEMERAL_SWAP_MB},
    error::InstallerError,
    host::Host,
    model::SwapPlan,
    probe::{self, SwapEntry},
    ui,
};

/// Decides how the installation and the rendered system get swap.
///
/// Order of precedence:
///   1. a disk-backed swap area already in use → keep it
///   2. `--no-swap` → none, zram in the new system
///   3. something else already active (zram, a file) → none
///   4. nothing at all → a temporary file for install-time headroom
pub fn resolve(host: &dyn Host, settings: &Settings) -> Result<SwapPlan, InstallerError> {
    let swaps = probe::active_swaps(host)?;

    let plan = if let Some(entry) = swaps.iter().find(|s| is_block_device(s)) {
        SwapPlan::Existing {
            device_path: entry.name.clone(),
        }
    } else if settings.no_swap || !swaps.is_empty() {
        SwapPlan::None
    } else {
        SwapPlan::EphemeralFile {
            path: settings.swap_file_path().to_string_lossy().into_owned(),
            size_mb: EPHEMERAL_SWAP_MB,
        }
    };

    match &plan {
        SwapPlan::Existing { device_path } => {
            ui::print_success(&format!("Reusing swap on {}.", device_path));
        }
        SwapPlan::EphemeralFile { path, size_mb } => {
            ui::print_info(&format!("No swap found — a {} MB swap file ({}) will be used during install.", size_mb, path));
        }
        SwapPlan::None => ui::print_info("No disk swap — the new system will use zram."),
    }
    log::info!("Swap plan: {:?}", plan);

    Ok(plan)
}

fn is_block_device(entry: &SwapEntry) -> bool {
    entry.name.starts_with("/dev/") && !entry.name.starts_with("/dev/zram") && entry.kind != "file"
}

// ── Temporary swap file ───────────────────────────────────────────────────────

/// Keeps the temporary swap file alive. Dropping it turns the swap off and
/// deletes the file, whichever way the run ends.
pub struct SwapFileGuard<'h> {
    host: &'h dyn Host,
    path: PathBuf,
}

impl SwapFileGuard<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SwapFileGuard<'_> {
    fn drop(&mut self) {
        let path = self.path.to_string_lossy().into_owned();

        match self.host.run("swapoff", &[&path]) {
            Ok(out) if out.success() => {}
            Ok(out) => log::debug!("swapoff {} exited with {}", path, out.code),
            Err(e) => log::warn!("swapoff {}: {}", path, e),
        }
        match self.host.remove_file(&self.path) {
            Ok(()) => log::info!("Removed temporary swap file {}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Cannot remove {}: {}", path, e),
        }
    }
}

fn step(host: &dyn Host, program: &str, args: &[&str]) -> Result<(), InstallerError> {
    let out = host.run(program, args)?;
    if !out.success() {
        return Err(InstallerError::CommandFailed(program.to_string(), out.code));
    }
    Ok(())
}

/// Creates and enables the swap file of an `EphemeralFile` plan. Any other
/// plan needs nothing and yields `None`.
pub fn activate<'h>(
    host: &'h dyn Host,
    plan: &SwapPlan,
) -> Result<Option<SwapFileGuard<'h>>, InstallerError> {
    let SwapPlan::EphemeralFile { path, size_mb } = plan else {
        return Ok(None);
    };

    // Armed before the file exists so a half-finished setup is undone too.
    let guard = SwapFileGuard {
        host,
        path: PathBuf::from(path),
    };

    let pb = ui::spinner(format!("Creating {} MB swap file at {}…", size_mb, path));
    let size = format!("{}M", size_mb);
    let result = step(host, "fallocate", &["-l", &size, path])
        .and_then(|_| step(host, "chmod", &["600", path]))
        .and_then(|_| step(host, "mkswap", &[path]))
        .and_then(|_| step(host, "swapon", &[path]));
    pb.finish_and_clear();
    result?;

    ui::print_success(&format!("Temporary swap active on {}.", path));
    Ok(Some(guard))
}
