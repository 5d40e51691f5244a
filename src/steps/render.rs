//! Turns the detected host facts into NixOS modules.
//!
//! Everything here is a pure function of its inputs: same facts, same bytes.
//! List-valued settings keep the order in which the facts were discovered,
//! since NixOS treats the first address of an interface as its primary one.

use crate::{
    error::InstallerError,
    model::{
        BootTarget, HostProfile, Identity, IpAddress, NetworkSnapshot, Provider, RenderedConfig,
        RenderedFile, RootFsInfo, SwapPlan,
    },
    steps::boot::BY_UUID_DIR,
};

pub const HARDWARE_FILE: &str = "hardware-configuration.nix";
pub const NETWORKING_FILE: &str = "networking.nix";
pub const SWAP_FILE: &str = "swap.nix";
pub const CONFIGURATION_FILE: &str = "configuration.nix";

// ── Public API ────────────────────────────────────────────────────────────────

/// Renders the hardware, networking and swap modules.
pub fn render(
    profile: &HostProfile,
    boot: &BootTarget,
    rootfs: &RootFsInfo,
    swap: &SwapPlan,
    network: &NetworkSnapshot,
) -> Result<RenderedConfig, InstallerError> {
    Ok(RenderedConfig {
        files: vec![
            RenderedFile {
                name: HARDWARE_FILE,
                contents: render_hardware(profile, boot, rootfs)?,
            },
            RenderedFile {
                name: NETWORKING_FILE,
                contents: render_networking(network)?,
            },
            RenderedFile {
                name: SWAP_FILE,
                contents: render_swap(swap),
            },
        ],
    })
}

/// Renders the top-level `configuration.nix` that pulls the generated
/// modules together.
pub fn render_configuration(identity: &Identity, state_version: &str) -> RenderedFile {
    let mut out = String::from("{ ... }: {\n  imports = [\n");
    for file in [HARDWARE_FILE, NETWORKING_FILE, SWAP_FILE] {
        out.push_str(&format!("    ./{}\n", file));
    }
    out.push_str("  ];\n\n");
    out.push_str("  boot.tmp.cleanOnBoot = true;\n");
    out.push_str(&format!("  networking.hostName = {};\n", nix_str(&identity.hostname)));
    if let Some(ref domain) = identity.domain {
        out.push_str(&format!("  networking.domain = {};\n", nix_str(domain)));
    }
    out.push_str("  services.openssh.enable = true;\n");
    let keys: Vec<String> = identity.authorized_keys.iter().map(|k| nix_str(k)).collect();
    out.push_str(&format!(
        "  users.users.root.openssh.authorizedKeys.keys = {};\n",
        nix_list(&keys, 2)
    ));
    out.push_str(&format!("  system.stateVersion = {};\n", nix_str(state_version)));
    out.push_str("}\n");

    RenderedFile {
        name: CONFIGURATION_FILE,
        contents: out,
    }
}

// ── Modules ───────────────────────────────────────────────────────────────────

fn render_hardware(
    profile: &HostProfile,
    boot: &BootTarget,
    rootfs: &RootFsInfo,
) -> Result<String, InstallerError> {
    require("root filesystem device", &rootfs.source_device)?;
    require("root filesystem type", &rootfs.fs_type)?;

    let guest_profile = match profile.provider {
        Provider::Amazon => "/virtualisation/amazon-image.nix",
        _ => "/profiles/qemu-guest.nix",
    };
    let modules: &[&str] = if profile.is_x86_64 {
        &["ata_piix", "uhci_hcd", "xen_blkfront", "vmw_pvscsi"]
    } else {
        &["virtio_pci", "virtio_scsi", "usbhid"]
    };
    let modules: Vec<String> = modules.iter().map(|m| nix_str(m)).collect();

    let mut out = String::from("{ modulesPath, ... }:\n{\n");
    out.push_str(&format!("  imports = [ (modulesPath + \"{}\") ];\n", guest_profile));
    out.push_str(&format!(
        "  boot.initrd.availableKernelModules = [ {} ];\n",
        modules.join(" ")
    ));
    out.push_str("  boot.initrd.kernelModules = [ \"nvme\" ];\n\n");

    match boot {
        BootTarget::Efi {
            esp_device_id,
            mount_point,
            fs_type,
        } => {
            require("ESP device", esp_device_id)?;
            if !esp_device_id.starts_with(&format!("{}/", BY_UUID_DIR)) {
                return Err(InstallerError::Render(format!(
                    "ESP device {} is not a {} path",
                    esp_device_id, BY_UUID_DIR
                )));
            }
            if profile.provider == Provider::Amazon {
                out.push_str("  ec2.efi = true;\n");
            }
            out.push_str("  boot.loader.grub = {\n");
            out.push_str("    efiSupport = true;\n");
            out.push_str("    efiInstallAsRemovable = true;\n");
            out.push_str("    device = \"nodev\";\n");
            out.push_str("  };\n");
            if mount_point != "/boot" {
                out.push_str(&format!(
                    "  boot.loader.efi.efiSysMountPoint = {};\n",
                    nix_str(mount_point)
                ));
            }
            out.push_str(&format!(
                "  fileSystems.{} = {{ device = {}; fsType = {}; }};\n",
                nix_str(mount_point),
                nix_str(esp_device_id),
                nix_str(fs_type)
            ));
        }
        BootTarget::Legacy { grub_device_path } => {
            require("GRUB device", grub_device_path)?;
            out.push_str(&format!(
                "  boot.loader.grub.device = {};\n",
                nix_str(grub_device_path)
            ));
        }
    }

    out.push_str(&format!(
        "  fileSystems.\"/\" = {{ device = {}; fsType = {}; }};\n",
        nix_str(&rootfs.source_device),
        nix_str(&rootfs.fs_type)
    ));
    out.push_str("}\n");
    Ok(out)
}

fn render_networking(net: &NetworkSnapshot) -> Result<String, InstallerError> {
    let iface = &net.primary_interface_name;
    require("primary interface name", iface)?;

    let nameservers: Vec<String> = net.nameservers.iter().map(|n| nix_str(n)).collect();

    let mut out = String::from("{ lib, ... }: {\n");
    out.push_str("  # Static settings captured from the running system.\n");
    out.push_str("  networking = {\n");
    out.push_str(&format!("    nameservers = {};\n", nix_list(&nameservers, 4)));
    for (option, gateway) in [("defaultGateway", &net.gateway4), ("defaultGateway6", &net.gateway6)] {
        if let Some(gw) = gateway {
            out.push_str(&format!("    {} = {{\n", option));
            out.push_str(&format!("      address = {};\n", nix_str(gw)));
            out.push_str(&format!("      interface = {};\n", nix_str(iface)));
            out.push_str("    };\n");
        }
    }
    out.push_str("    dhcpcd.enable = false;\n");
    out.push_str(&format!(
        "    usePredictableInterfaceNames = lib.mkForce {};\n",
        net.uses_predictable_naming
    ));
    out.push_str("    interfaces = {\n");
    out.push_str(&format!("      {} = {{\n", nix_attr(iface)));
    out.push_str(&format!(
        "        ipv4.addresses = {};\n",
        nix_list(&address_records(&net.ipv4_addresses), 8)
    ));
    out.push_str(&format!(
        "        ipv6.addresses = {};\n",
        nix_list(&address_records(&net.ipv6_addresses), 8)
    ));
    if let Some(ref gw) = net.gateway4 {
        out.push_str(&format!(
            "        ipv4.routes = [ {{ address = {}; prefixLength = 32; }} ];\n",
            nix_str(gw)
        ));
    }
    if let Some(ref gw) = net.gateway6 {
        out.push_str(&format!(
            "        ipv6.routes = [ {{ address = {}; prefixLength = 128; }} ];\n",
            nix_str(gw)
        ));
    }
    out.push_str("      };\n");
    out.push_str("    };\n");
    out.push_str("  };\n");

    // Pin the name to the hardware address so the new system cannot
    // rename the interface out from under the static config.
    if let Some(ref mac) = net.mac_address {
        out.push_str("  services.udev.extraRules = ''\n");
        out.push_str(&format!(
            "    ATTR{{address}}==\"{}\", NAME=\"{}\"\n",
            mac, iface
        ));
        out.push_str("  '';\n");
    }
    out.push_str("}\n");
    Ok(out)
}

fn render_swap(swap: &SwapPlan) -> String {
    let mut out = String::from("{ ... }: {\n");
    match swap {
        SwapPlan::Existing { device_path } => {
            out.push_str("  zramSwap.enable = false;\n");
            out.push_str(&format!(
                "  swapDevices = [\n    {{ device = {}; }}\n  ];\n",
                nix_str(device_path)
            ));
        }
        // The install-time swap file is deleted before reboot.
        SwapPlan::EphemeralFile { .. } | SwapPlan::None => {
            out.push_str("  zramSwap.enable = true;\n");
            out.push_str("  swapDevices = [ ];\n");
        }
    }
    out.push_str("}\n");
    out
}

// ── Nix syntax helpers ────────────────────────────────────────────────────────

fn require(what: &str, value: &str) -> Result<(), InstallerError> {
    if value.trim().is_empty() {
        return Err(InstallerError::Render(format!("{} is missing", what)));
    }
    Ok(())
}

fn address_records(addrs: &[IpAddress]) -> Vec<String> {
    addrs
        .iter()
        .map(|a| {
            format!(
                "{{ address = {}; prefixLength = {}; }}",
                nix_str(&a.address),
                a.prefix_length
            )
        })
        .collect()
}

/// A double-quoted Nix string literal.
fn nix_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// An attribute name, quoted only when it is not a plain identifier
/// (`eth0.100`, names starting with a digit).
fn nix_attr(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '\''));
    if plain {
        name.to_string()
    } else {
        nix_str(name)
    }
}

/// One element per line, closing bracket aligned with `indent`.
fn nix_list(items: &[String], indent: usize) -> String {
    if items.is_empty() {
        return "[ ]".to_string();
    }
    let pad = " ".repeat(indent);
    let mut out = String::from("[\n");
    for item in items {
        out.push_str(&format!("{}  {}\n", pad, item));
    }
    out.push_str(&format!("{}]", pad));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn efi_profile() -> HostProfile {
        HostProfile {
            provider: Provider::Generic,
            is_efi: true,
            is_x86_64: true,
        }
    }

    fn esp() -> BootTarget {
        BootTarget::Efi {
            esp_device_id: "/dev/disk/by-uuid/2B1E-44F0".into(),
            mount_point: "/boot".into(),
            fs_type: "vfat".into(),
        }
    }

    fn rootfs() -> RootFsInfo {
        RootFsInfo {
            source_device: "/dev/vda2".into(),
            fs_type: "ext4".into(),
        }
    }

    fn eth0() -> NetworkSnapshot {
        NetworkSnapshot {
            primary_interface_name: "eth0".into(),
            mac_address: None,
            ipv4_addresses: vec![IpAddress {
                address: "10.0.0.5".into(),
                prefix_length: 24,
            }],
            ipv6_addresses: vec![],
            gateway4: Some("10.0.0.1".into()),
            gateway6: None,
            nameservers: vec!["10.0.0.2".into()],
            uses_predictable_naming: false,
        }
    }

    fn networking(net: &NetworkSnapshot) -> String {
        render(&efi_profile(), &esp(), &rootfs(), &SwapPlan::None, net)
            .unwrap()
            .get(NETWORKING_FILE)
            .unwrap()
            .to_string()
    }

    #[test]
    fn single_static_nic_on_efi_host() {
        let text = networking(&eth0());
        assert!(text.contains("      eth0 = {\n"));
        assert!(text.contains(
            "        ipv4.addresses = [\n          { address = \"10.0.0.5\"; prefixLength = 24; }\n        ];\n"
        ));
        assert_eq!(text.matches("prefixLength = 24;").count(), 1);
        assert!(text.contains(
            "    defaultGateway = {\n      address = \"10.0.0.1\";\n      interface = \"eth0\";\n    };\n"
        ));
        assert!(text.contains("        ipv6.addresses = [ ];\n"));
        assert!(!text.contains("defaultGateway6"));
        assert!(text.contains("    dhcpcd.enable = false;\n"));
        assert!(text.contains("    usePredictableInterfaceNames = lib.mkForce false;\n"));
    }

    #[test]
    fn address_and_nameserver_order_is_kept() {
        let mut net = eth0();
        net.ipv4_addresses.push(IpAddress {
            address: "10.0.0.9".into(),
            prefix_length: 32,
        });
        net.nameservers = vec!["9.9.9.9".into(), "8.8.8.8".into(), "1.1.1.1".into()];
        let text = networking(&net);

        let first = text.find("\"10.0.0.5\"").unwrap();
        let second = text.find("\"10.0.0.9\"").unwrap();
        assert!(first < second);
        let q9 = text.find("\"9.9.9.9\"").unwrap();
        let g8 = text.find("\"8.8.8.8\"").unwrap();
        let c1 = text.find("\"1.1.1.1\"").unwrap();
        assert!(q9 < g8 && g8 < c1);
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut net = eth0();
        net.gateway6 = Some("fe80::1".into());
        net.mac_address = Some("52:54:00:12:34:56".into());
        let a = render(&efi_profile(), &esp(), &rootfs(), &SwapPlan::None, &net).unwrap();
        let b = render(&efi_profile(), &esp(), &rootfs(), &SwapPlan::None, &net).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sanitized_resolvers_never_render_loopback() {
        let mut net = eth0();
        net.nameservers = crate::steps::network::sanitize_nameservers(vec![
            "127.0.0.1".into(),
            "1.1.1.1".into(),
            "::1".into(),
        ]);
        let text = networking(&net);
        assert!(!text.contains("\"127.0.0.1\""));
        assert!(!text.contains("\"::1\""));
        assert_eq!(text.matches("\"8.8.8.8\"").count(), 2);
    }

    #[test]
    fn ipv6_gateway_names_interface_and_udev_pins_mac() {
        let mut net = eth0();
        net.primary_interface_name = "enp1s0".into();
        net.uses_predictable_naming = true;
        net.gateway6 = Some("fe80::1".into());
        net.mac_address = Some("52:54:00:12:34:56".into());
        let text = networking(&net);
        assert!(text.contains(
            "    defaultGateway6 = {\n      address = \"fe80::1\";\n      interface = \"enp1s0\";\n    };\n"
        ));
        assert!(text.contains("usePredictableInterfaceNames = lib.mkForce true;"));
        assert!(text.contains("ATTR{address}==\"52:54:00:12:34:56\", NAME=\"enp1s0\""));
    }

    #[test]
    fn odd_interface_names_are_quoted() {
        let mut net = eth0();
        net.primary_interface_name = "eth0.100".into();
        assert!(networking(&net).contains("      \"eth0.100\" = {\n"));
    }

    #[test]
    fn missing_interface_name_is_a_render_error() {
        let mut net = eth0();
        net.primary_interface_name = String::new();
        let err = render(&efi_profile(), &esp(), &rootfs(), &SwapPlan::None, &net).unwrap_err();
        assert!(matches!(err, InstallerError::Render(_)));
    }

    #[test]
    fn efi_boot_uses_by_uuid_device() {
        let cfg = render(&efi_profile(), &esp(), &rootfs(), &SwapPlan::None, &eth0()).unwrap();
        let hw = cfg.get(HARDWARE_FILE).unwrap();
        assert!(hw.contains("    device = \"nodev\";\n"));
        assert!(hw.contains(
            "  fileSystems.\"/boot\" = { device = \"/dev/disk/by-uuid/2B1E-44F0\"; fsType = \"vfat\"; };\n"
        ));
        assert!(hw.contains("  fileSystems.\"/\" = { device = \"/dev/vda2\"; fsType = \"ext4\"; };\n"));
        assert!(!hw.contains("efiSysMountPoint"));
        assert!(hw.contains("/profiles/qemu-guest.nix"));
    }

    #[test]
    fn esp_outside_boot_sets_mount_point() {
        let boot = BootTarget::Efi {
            esp_device_id: "/dev/disk/by-uuid/2B1E-44F0".into(),
            mount_point: "/boot/efi".into(),
            fs_type: "vfat".into(),
        };
        let cfg = render(&efi_profile(), &boot, &rootfs(), &SwapPlan::None, &eth0()).unwrap();
        let hw = cfg.get(HARDWARE_FILE).unwrap();
        assert!(hw.contains("  boot.loader.efi.efiSysMountPoint = \"/boot/efi\";\n"));
        assert!(hw.contains("  fileSystems.\"/boot/efi\" = "));
    }

    #[test]
    fn raw_esp_node_is_refused() {
        let boot = BootTarget::Efi {
            esp_device_id: "/dev/vda1".into(),
            mount_point: "/boot".into(),
            fs_type: "vfat".into(),
        };
        let err = render(&efi_profile(), &boot, &rootfs(), &SwapPlan::None, &eth0()).unwrap_err();
        assert!(matches!(err, InstallerError::Render(_)));
    }

    #[test]
    fn legacy_boot_uses_whole_disk_and_aarch64_modules() {
        let profile = HostProfile {
            provider: Provider::Hetznercloud,
            is_efi: false,
            is_x86_64: false,
        };
        let boot = BootTarget::Legacy {
            grub_device_path: "/dev/sda".into(),
        };
        let cfg = render(&profile, &boot, &rootfs(), &SwapPlan::None, &eth0()).unwrap();
        let hw = cfg.get(HARDWARE_FILE).unwrap();
        assert!(hw.contains("  boot.loader.grub.device = \"/dev/sda\";\n"));
        assert!(hw.contains("\"virtio_pci\""));
        assert!(!hw.contains("efiSupport"));
    }

    #[test]
    fn amazon_uses_its_image_profile() {
        let profile = HostProfile {
            provider: Provider::Amazon,
            ..efi_profile()
        };
        let cfg = render(&profile, &esp(), &rootfs(), &SwapPlan::None, &eth0()).unwrap();
        let hw = cfg.get(HARDWARE_FILE).unwrap();
        assert!(hw.contains("(modulesPath + \"/virtualisation/amazon-image.nix\")"));
        assert!(hw.contains("  ec2.efi = true;\n"));
    }

    #[test]
    fn swap_module_follows_plan() {
        let existing = SwapPlan::Existing {
            device_path: "/dev/vda3".into(),
        };
        let text = render_swap(&existing);
        assert!(text.contains("{ device = \"/dev/vda3\"; }"));
        assert!(text.contains("zramSwap.enable = false;"));

        let ephemeral = SwapPlan::EphemeralFile {
            path: "/tmp/nixos-infect.42.swp".into(),
            size_mb: 512,
        };
        let text = render_swap(&ephemeral);
        assert!(!text.contains("nixos-infect.42.swp"));
        assert!(text.contains("swapDevices = [ ];"));
        assert!(text.contains("zramSwap.enable = true;"));
        assert_eq!(text, render_swap(&SwapPlan::None));
    }

    #[test]
    fn configuration_imports_generated_modules() {
        let identity = Identity {
            hostname: "web1".into(),
            domain: Some("example.com".into()),
            authorized_keys: vec!["ssh-ed25519 AAAAC3Nza admin@laptop".into()],
        };
        let file = render_configuration(&identity, "24.05");
        assert_eq!(file.name, CONFIGURATION_FILE);
        let text = file.contents;
        for module in [HARDWARE_FILE, NETWORKING_FILE, SWAP_FILE] {
            assert!(text.contains(&format!("    ./{}\n", module)));
        }
        assert!(text.contains("  networking.hostName = \"web1\";\n"));
        assert!(text.contains("  networking.domain = \"example.com\";\n"));
        assert!(text.contains("    \"ssh-ed25519 AAAAC3Nza admin@laptop\"\n"));
        assert!(text.contains("  system.stateVersion = \"24.05\";\n"));
    }

    #[test]
    fn nix_strings_are_escaped() {
        assert_eq!(nix_str(r#"a"b\c${d}$e"#), r#""a\"b\\c\${d}$e""#);
    }
}
