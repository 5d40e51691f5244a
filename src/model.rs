//! Facts gathered from the live host. Each value is produced once by a
//! detection step and only read afterwards.

use std::fmt;

/// Hosting provider, as far as marker files can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    Generic,
    Hetznercloud,
    Digitalocean,
    Amazon,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Generic => "generic",
            Provider::Hetznercloud => "hetznercloud",
            Provider::Digitalocean => "digitalocean",
            Provider::Amazon => "amazon",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostProfile {
    pub provider: Provider,
    pub is_efi: bool,
    pub is_x86_64: bool,
}

/// Where the boot loader goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootTarget {
    Efi {
        /// Always a `/dev/disk/by-uuid/*` path; raw device nodes may be
        /// renumbered once the root filesystem is swapped.
        esp_device_id: String,
        mount_point: String,
        fs_type: String,
    },
    Legacy {
        grub_device_path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFsInfo {
    pub source_device: String,
    pub fs_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapPlan {
    /// Block-device swap that the new system keeps using.
    Existing { device_path: String },
    /// Install-time headroom only; never written into the configuration.
    EphemeralFile { path: String, size_mb: u64 },
    /// The rendered system falls back to zram.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpAddress {
    pub address: String,
    pub prefix_length: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub primary_interface_name: String,
    pub mac_address: Option<String>,
    pub ipv4_addresses: Vec<IpAddress>,
    pub ipv6_addresses: Vec<IpAddress>,
    pub gateway4: Option<String>,
    pub gateway6: Option<String>,
    /// Never contains a loopback resolver.
    pub nameservers: Vec<String>,
    pub uses_predictable_naming: bool,
}

/// Hostname and login material carried over into `configuration.nix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub hostname: String,
    pub domain: Option<String>,
    pub authorized_keys: Vec<String>,
}

/// One generated file, named relative to the configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub name: &'static str,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedConfig {
    pub files: Vec<RenderedFile>,
}

impl RenderedConfig {
    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.contents.as_str())
    }
}
