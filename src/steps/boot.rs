use std::path::{Path, PathBuf};

use crate::{
    error::InstallerError,
    host::Host,
    model::{BootTarget, HostProfile},
    probe, ui,
};

/// Where an ESP is conventionally mounted, most specific first.
pub const ESP_CANDIDATES: [&str; 3] = ["/boot/EFI", "/boot/efi", "/boot"];

/// Whole-disk nodes for a legacy GRUB install: virtio, SCSI, Xen, NVMe.
pub const GRUB_DEVICES: [&str; 4] = ["/dev/vda", "/dev/sda", "/dev/xvda", "/dev/nvme0n1"];

pub const BY_UUID_DIR: &str = "/dev/disk/by-uuid";

/// Decides where the boot loader goes. The firmware mode alone picks the
/// variant; failing to locate its device aborts the run.
pub fn detect(host: &dyn Host, profile: &HostProfile) -> Result<BootTarget, InstallerError> {
    let target = if profile.is_efi {
        find_esp(host)?
    } else {
        find_grub_device(host)?
    };

    match &target {
        BootTarget::Efi { esp_device_id, mount_point, .. } => {
            ui::print_success(&format!("ESP at {} ({}).", mount_point, esp_device_id));
        }
        BootTarget::Legacy { grub_device_path } => {
            ui::print_success(&format!("GRUB will be installed to {}.", grub_device_path));
        }
    }
    log::info!("Boot target: {:?}", target);

    Ok(target)
}

fn find_esp(host: &dyn Host) -> Result<BootTarget, InstallerError> {
    for dir in ESP_CANDIDATES {
        if !host.is_dir(Path::new(dir)) {
            continue;
        }
        let Some(fs) = probe::filesystem_of(host, dir)? else {
            continue;
        };
        // Only a filesystem boundary exactly here counts; /boot living on
        // the root filesystem is not an ESP.
        if fs.target != dir {
            log::debug!("{} is part of the filesystem mounted at {}", dir, fs.target);
            continue;
        }

        if fs.fs_type.is_empty() {
            log::warn!("findmnt reports no filesystem type for {}; skipping it", dir);
            continue;
        }

        match by_uuid_alias(host, &fs.source) {
            Some(esp_device_id) => {
                return Ok(BootTarget::Efi {
                    esp_device_id,
                    mount_point: dir.to_string(),
                    fs_type: fs.fs_type,
                });
            }
            None => log::warn!("{} is mounted from {} which has no by-uuid alias", dir, fs.source),
        }
    }

    Err(InstallerError::UnsupportedBootConfiguration(format!(
        "no EFI system partition with a {} alias is mounted at any of {}",
        BY_UUID_DIR,
        ESP_CANDIDATES.join(", ")
    )))
}

/// Finds the `/dev/disk/by-uuid` entry that resolves to the same node as
/// `source`. Entries are visited in sorted order.
fn by_uuid_alias(host: &dyn Host, source: &str) -> Option<String> {
    let device = host
        .canonicalize(Path::new(source))
        .unwrap_or_else(|_| PathBuf::from(source));

    let aliases = match host.read_dir(Path::new(BY_UUID_DIR)) {
        Ok(a) => a,
        Err(e) => {
            log::warn!("Cannot list {}: {}", BY_UUID_DIR, e);
            return None;
        }
    };

    aliases
        .into_iter()
        .find(|alias| host.canonicalize(alias).is_ok_and(|real| real == device))
        .map(|alias| alias.to_string_lossy().into_owned())
}

fn find_grub_device(host: &dyn Host) -> Result<BootTarget, InstallerError> {
    GRUB_DEVICES
        .iter()
        .find(|dev| host.exists(Path::new(dev)))
        .map(|dev| BootTarget::Legacy {
            grub_device_path: dev.to_string(),
        })
        .ok_or_else(|| {
            InstallerError::UnsupportedBootConfiguration(format!(
                "none of {} exists",
                GRUB_DEVICES.join(", ")
            ))
        })
}
