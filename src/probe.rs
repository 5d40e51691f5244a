//! Typed queries against the live host. All text/JSON parsing of command
//! output lives here so the detection steps only see structured values.

use std::{collections::HashMap, path::Path};

use serde::Deserialize;

use crate::{error::InstallerError, host::Host};

pub const RESOLV_CONF: &str = "/etc/resolv.conf";

// ── Data types ────────────────────────────────────────────────────────────────

/// One row of `findmnt`: the filesystem that contains a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filesystem {
    pub target: String, // /boot
    pub source: String, // /dev/vda1
    pub fs_type: String, // vfat
}

/// One row of `swapon --show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEntry {
    pub name: String, // /dev/vda2, /dev/zram0, /swapfile
    pub kind: String, // partition, file
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    fn flag(self) -> &'static str {
        match self {
            Family::V4 => "-4",
            Family::V6 => "-6",
        }
    }

    fn ip_family(self) -> &'static str {
        match self {
            Family::V4 => "inet",
            Family::V6 => "inet6",
        }
    }
}

/// An entry of `ip -j link show`.
#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub ifname: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub link_type: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl Link {
    pub fn is_loopback(&self) -> bool {
        self.link_type.as_deref() == Some("loopback") || self.flags.iter().any(|f| f == "LOOPBACK")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub family: Family,
    pub local: String,
    pub prefix_len: u8,
}

#[derive(Deserialize)]
struct AddrInterface {
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

// Some iproute2 releases emit bare `{}` objects inside addr_info, so every
// field is optional and incomplete entries are skipped.
#[derive(Deserialize)]
struct AddrInfo {
    family: Option<String>,
    local: Option<String>,
    prefixlen: Option<u8>,
}

#[derive(Deserialize)]
struct Route {
    gateway: Option<String>,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Runs a command whose success we depend on; any failure is a probe failure.
fn required(host: &dyn Host, program: &str, args: &[&str]) -> Result<String, InstallerError> {
    let output = host
        .run(program, args)
        .map_err(|e| InstallerError::ProbeFailure(format!("{} {}: {}", program, args.join(" "), e)))?;

    if !output.success() {
        return Err(InstallerError::ProbeFailure(format!(
            "{} {} exited with status {}",
            program,
            args.join(" "),
            output.code
        )));
    }
    Ok(output.stdout)
}

fn parse_json<'a, T: Deserialize<'a>>(what: &str, text: &'a str) -> Result<T, InstallerError> {
    serde_json::from_str(text)
        .map_err(|e| InstallerError::ProbeFailure(format!("unexpected output from {}: {}", what, e)))
}

// ── Public API ────────────────────────────────────────────────────────────────

/// `uname -m`, e.g. `x86_64` or `aarch64`.
pub fn architecture(host: &dyn Host) -> Result<String, InstallerError> {
    Ok(required(host, "uname", &["-m"])?.trim().to_string())
}

/// `uname -n`, the node name (possibly fully qualified).
pub fn hostname(host: &dyn Host) -> Result<String, InstallerError> {
    Ok(required(host, "uname", &["-n"])?.trim().to_string())
}

/// Returns the filesystem holding `path`, or `None` when findmnt knows of
/// none (path missing, not mounted).
pub fn filesystem_of(host: &dyn Host, path: &str) -> Result<Option<Filesystem>, InstallerError> {
    let output = host
        .run(
            "findmnt",
            &[
                "--noheadings",
                "--pairs",
                "--nofsroot",
                "--output",
                "TARGET,SOURCE,FSTYPE",
                "--target",
                path,
            ],
        )
        .map_err(|e| InstallerError::ProbeFailure(format!("findmnt: {}", e)))?;

    if !output.success() {
        return Ok(None);
    }

    Ok(output.stdout.lines().find_map(|line| {
        let m = parse_pairs(line);
        Some(Filesystem {
            target: m.get("TARGET")?.clone(),
            source: strip_fsroot(m.get("SOURCE")?).to_string(),
            fs_type: m.get("FSTYPE").cloned().unwrap_or_default(),
        })
    }))
}

/// Drops the `[/subvol]` suffix findmnt appends for btrfs subvolumes and
/// bind mounts, should a findmnt build ignore `--nofsroot`.
fn strip_fsroot(source: &str) -> &str {
    match source.find('[') {
        Some(i) if source.ends_with(']') => &source[..i],
        _ => source,
    }
}

/// Active swap areas, in the order the kernel lists them.
pub fn active_swaps(host: &dyn Host) -> Result<Vec<SwapEntry>, InstallerError> {
    let output = host
        .run("swapon", &["--show=NAME,TYPE", "--noheadings", "--raw"])
        .map_err(|e| InstallerError::ProbeFailure(format!("swapon: {}", e)))?;

    // Exit status is non-zero on kernels without swap support: nothing active.
    if !output.success() {
        return Ok(vec![]);
    }

    Ok(output
        .stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let kind = fields.next().unwrap_or("").to_string();
            Some(SwapEntry { name, kind })
        })
        .collect())
}

/// Network links in kernel listing order.
pub fn links(host: &dyn Host) -> Result<Vec<Link>, InstallerError> {
    let stdout = required(host, "ip", &["-j", "link", "show"])?;
    parse_json("ip link", &stdout)
}

/// Every address configured on `iface`, in the order `ip` lists them.
pub fn addresses(host: &dyn Host, iface: &str) -> Result<Vec<Address>, InstallerError> {
    let stdout = required(host, "ip", &["-j", "address", "show", "dev", iface])?;
    let interfaces: Vec<AddrInterface> = parse_json("ip address", &stdout)?;

    Ok(interfaces
        .into_iter()
        .flat_map(|i| i.addr_info)
        .filter_map(|a| {
            let family = match a.family.as_deref()? {
                "inet" => Family::V4,
                "inet6" => Family::V6,
                _ => return None,
            };
            Some(Address {
                family,
                local: a.local?,
                prefix_len: a.prefixlen?,
            })
        })
        .collect())
}

/// Gateway of the default route through `iface`. Any trouble getting it
/// (no route, no IPv6 stack, odd output) reads as "no gateway".
pub fn default_gateway(host: &dyn Host, family: Family, iface: &str) -> Option<String> {
    let output = match host.run("ip", &["-j", family.flag(), "route", "show", "default", "dev", iface]) {
        Ok(o) if o.success() => o,
        Ok(o) => {
            log::warn!("No {} default route on {} (exit {})", family.ip_family(), iface, o.code);
            return None;
        }
        Err(e) => {
            log::warn!("Cannot list {} routes on {}: {}", family.ip_family(), iface, e);
            return None;
        }
    };

    let trimmed = output.stdout.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Vec<Route>>(trimmed) {
        Ok(routes) => routes.into_iter().find_map(|r| r.gateway),
        Err(e) => {
            log::warn!("Ignoring unreadable {} route listing: {}", family.ip_family(), e);
            None
        }
    }
}

/// Nameservers from the resolver configuration, in file order. A missing
/// file yields an empty list.
pub fn nameservers(host: &dyn Host) -> Vec<String> {
    match host.read_to_string(Path::new(RESOLV_CONF)) {
        Ok(text) => parse_resolv_conf(&text),
        Err(e) => {
            log::warn!("Cannot read {}: {}", RESOLV_CONF, e);
            vec![]
        }
    }
}

pub fn parse_resolv_conf(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            match words.next() {
                Some("nameserver") => words.next().map(str::to_string),
                _ => None,
            }
        })
        .collect()
}

// ── findmnt --pairs parser ────────────────────────────────────────────────────
//
// Each line looks like:   TARGET="/boot" SOURCE="/dev/vda1" FSTYPE="vfat"

fn parse_pairs(line: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let mut rest = line.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].split_whitespace().last().unwrap_or("").to_string();
        rest = &rest[eq + 1..];

        if !rest.starts_with('"') {
            break;
        }
        rest = &rest[1..];

        let Some(close) = rest.find('"') else { break };
        let value = unescape_hex(&rest[..close]);
        rest = &rest[close + 1..];

        if !key.is_empty() {
            map.insert(key, value);
        }
    }

    map
}

/// util-linux writes unsafe bytes in pairs output as `\xNN`.
fn unescape_hex(raw: &str) -> String {
    if !raw.contains("\\x") {
        return raw.to_string();
    }

    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') {
            if let Some(b) = raw
                .get(i + 2..i + 4)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    const FINDMNT: &str = "findmnt --noheadings --pairs --nofsroot --output TARGET,SOURCE,FSTYPE --target";

    #[test]
    fn parses_findmnt_pairs() {
        let host = FakeHost::new().command(
            &format!("{} /boot", FINDMNT),
            0,
            "TARGET=\"/boot\" SOURCE=\"/dev/vda1\" FSTYPE=\"vfat\"\n",
        );
        let fs = filesystem_of(&host, "/boot").unwrap().unwrap();
        assert_eq!(
            fs,
            Filesystem {
                target: "/boot".into(),
                source: "/dev/vda1".into(),
                fs_type: "vfat".into(),
            }
        );
    }

    #[test]
    fn findmnt_failure_means_no_filesystem() {
        let host = FakeHost::new().command(&format!("{} /boot/EFI", FINDMNT), 1, "");
        assert_eq!(filesystem_of(&host, "/boot/EFI").unwrap(), None);
    }

    #[test]
    fn subvolume_suffix_is_not_part_of_the_source() {
        assert_eq!(strip_fsroot("/dev/vda2[/root]"), "/dev/vda2");
        assert_eq!(strip_fsroot("/dev/vda2"), "/dev/vda2");
        assert_eq!(strip_fsroot("server:/export[x"), "server:/export[x");
    }

    #[test]
    fn pairs_values_are_unescaped() {
        let m = parse_pairs(r#"TARGET="/mnt/my\x20disk" SOURCE="/dev/sdb1""#);
        assert_eq!(m["TARGET"], "/mnt/my disk");
        assert_eq!(m["SOURCE"], "/dev/sdb1");
    }

    #[test]
    fn swapon_rows_keep_kernel_order() {
        let host = FakeHost::new().command(
            "swapon --show=NAME,TYPE --noheadings --raw",
            0,
            "/dev/zram0 partition\n/dev/vda2 partition\n",
        );
        let swaps = active_swaps(&host).unwrap();
        assert_eq!(swaps.len(), 2);
        assert_eq!(swaps[0].name, "/dev/zram0");
        assert_eq!(swaps[1].name, "/dev/vda2");
        assert_eq!(swaps[1].kind, "partition");
    }

    #[test]
    fn missing_swapon_is_a_probe_failure() {
        let host = FakeHost::new().without("swapon");
        assert!(matches!(active_swaps(&host), Err(InstallerError::ProbeFailure(_))));
    }

    #[test]
    fn addresses_skip_incomplete_entries() {
        let json = r#"[{"ifindex":2,"ifname":"eth0","addr_info":[
            {"family":"inet","local":"10.0.0.5","prefixlen":24,"scope":"global"},
            {},
            {"family":"inet6","local":"2001:db8::5","prefixlen":64,"scope":"global"}
        ]}]"#;
        let host = FakeHost::new().command("ip -j address show dev eth0", 0, json);
        let addrs = addresses(&host, "eth0").unwrap();
        assert_eq!(
            addrs,
            vec![
                Address { family: Family::V4, local: "10.0.0.5".into(), prefix_len: 24 },
                Address { family: Family::V6, local: "2001:db8::5".into(), prefix_len: 64 },
            ]
        );
    }

    #[test]
    fn garbage_link_listing_is_a_probe_failure() {
        let host = FakeHost::new().command("ip -j link show", 0, "not json");
        assert!(matches!(links(&host), Err(InstallerError::ProbeFailure(_))));
    }

    #[test]
    fn gateway_absence_is_not_an_error() {
        let host = FakeHost::new()
            .command("ip -j -4 route show default dev eth0", 0, r#"[{"dst":"default","gateway":"10.0.0.1"}]"#)
            .command("ip -j -6 route show default dev eth0", 0, "[]\n");
        assert_eq!(default_gateway(&host, Family::V4, "eth0").as_deref(), Some("10.0.0.1"));
        assert_eq!(default_gateway(&host, Family::V6, "eth0"), None);

        let failing = FakeHost::new().command("ip -j -6 route show default dev eth0", 2, "");
        assert_eq!(default_gateway(&failing, Family::V6, "eth0"), None);
    }

    #[test]
    fn resolv_conf_order_is_kept() {
        let text = "# generated\nsearch example.com\nnameserver 1.1.1.1\nnameserver   127.0.0.53\noptions edns0\n";
        assert_eq!(parse_resolv_conf(text), vec!["1.1.1.1", "127.0.0.53"]);
    }
}
