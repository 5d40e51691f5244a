use std::path::Path;

use crate::{
    error::InstallerError,
    host::Host,
    model::{HostProfile, Provider},
    probe, ui,
};

pub const EFI_FIRMWARE_DIR: &str = "/sys/firmware/efi";

/// A provider recognised by the presence of any one of its marker files.
pub struct MarkerRule {
    pub provider: Provider,
    pub markers: &'static [&'static str],
}

/// Checked top to bottom; the first rule with a marker present wins.
pub const PROVIDER_RULES: &[MarkerRule] = &[
    MarkerRule {
        provider: Provider::Hetznercloud,
        markers: &["/etc/hetzner-build"],
    },
    MarkerRule {
        provider: Provider::Digitalocean,
        markers: &["/etc/digitalocean", "/opt/digitalocean"],
    },
    MarkerRule {
        provider: Provider::Amazon,
        markers: &["/etc/ec2_version", "/usr/bin/ec2-metadata"],
    },
];

/// Returns the first provider whose marker exists, `Generic` otherwise.
pub fn detect_provider(host: &dyn Host, rules: &[MarkerRule]) -> Provider {
    rules
        .iter()
        .find(|rule| rule.markers.iter().any(|m| host.exists(Path::new(m))))
        .map(|rule| rule.provider)
        .unwrap_or(Provider::Generic)
}

/// Builds the host profile: provider (unless forced), firmware mode and
/// architecture.
pub fn detect(host: &dyn Host, forced: Option<Provider>) -> Result<HostProfile, InstallerError> {
    let provider = match forced {
        Some(p) => {
            log::info!("Provider forced to {}", p);
            p
        }
        None => detect_provider(host, PROVIDER_RULES),
    };
    let is_efi = host.is_dir(Path::new(EFI_FIRMWARE_DIR));
    let arch = probe::architecture(host)?;

    let profile = HostProfile {
        provider,
        is_efi,
        is_x86_64: arch == "x86_64",
    };
    log::info!("Host profile: {:?} ({})", profile, arch);

    if is_efi {
        ui::print_success("UEFI firmware detected — an EFI system partition is required.");
    } else {
        ui::print_warning("BIOS/Legacy firmware detected — GRUB goes to the disk MBR.");
    }
    ui::print_kv_box(
        "Host",
        &[
            ("Provider", provider.as_str()),
            ("Firmware", if is_efi { "UEFI" } else { "BIOS" }),
            ("Arch", arch.as_str()),
        ],
    );

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn first_matching_rule_wins() {
        let host = FakeHost::new()
            .file("/usr/bin/ec2-metadata", "")
            .dir("/opt/digitalocean");
        assert_eq!(detect_provider(&host, PROVIDER_RULES), Provider::Digitalocean);
    }

    #[test]
    fn no_marker_means_generic() {
        assert_eq!(detect_provider(&FakeHost::new(), PROVIDER_RULES), Provider::Generic);
    }

    #[test]
    fn profile_reads_firmware_and_arch() {
        let host = FakeHost::new()
            .dir(EFI_FIRMWARE_DIR)
            .file("/etc/hetzner-build", "")
            .command("uname -m", 0, "x86_64\n");
        let profile = detect(&host, None).unwrap();
        assert_eq!(
            profile,
            HostProfile {
                provider: Provider::Hetznercloud,
                is_efi: true,
                is_x86_64: true,
            }
        );
    }

    #[test]
    fn forced_provider_skips_markers() {
        let host = FakeHost::new()
            .file("/etc/hetzner-build", "")
            .command("uname -m", 0, "aarch64\n");
        let profile = detect(&host, Some(Provider::Amazon)).unwrap();
        assert_eq!(profile.provider, Provider::Amazon);
        assert!(!profile.is_efi);
        assert!(!profile.is_x86_64);
    }
}
