use crate::{error::InstallerError, host::Host, model::RootFsInfo, probe};

/// Reads the device and filesystem type currently mounted at `/`.
pub fn detect(host: &dyn Host) -> Result<RootFsInfo, InstallerError> {
    let fs = probe::filesystem_of(host, "/")?
        .filter(|fs| fs.target == "/")
        .ok_or_else(|| InstallerError::ProbeFailure("no filesystem is mounted at /".to_string()))?;

    log::info!("Root filesystem: {} ({})", fs.source, fs.fs_type);
    Ok(RootFsInfo {
        source_device: fs.source,
        fs_type: fs.fs_type,
    })
}
