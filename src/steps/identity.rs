use std::path::Path;

use crate::{error::InstallerError, host::Host, model::Identity, probe};

pub const AUTHORIZED_KEYS: &str = "/root/.ssh/authorized_keys";

/// Collects what the new system needs to stay reachable: its name and the
/// SSH keys root can log in with today.
pub fn capture(host: &dyn Host) -> Result<Identity, InstallerError> {
    let node = probe::hostname(host)?;
    let (hostname, domain) = match node.split_once('.') {
        Some((h, d)) if !d.is_empty() => (h.to_string(), Some(d.to_string())),
        _ => (node.trim_end_matches('.').to_string(), None),
    };

    let authorized_keys = match host.read_to_string(Path::new(AUTHORIZED_KEYS)) {
        Ok(text) => parse_authorized_keys(&text),
        Err(e) => {
            log::warn!("Cannot read {}: {}", AUTHORIZED_KEYS, e);
            vec![]
        }
    };
    if authorized_keys.is_empty() {
        log::warn!("No SSH keys for root; the new system may be unreachable over SSH");
    }

    Ok(Identity {
        hostname,
        domain,
        authorized_keys,
    })
}

fn parse_authorized_keys(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::fake::FakeHost;

    #[test]
    fn splits_fqdn_and_reads_keys() {
        let host = FakeHost::new()
            .command("uname -n", 0, "web1.example.com\n")
            .file(
                AUTHORIZED_KEYS,
                "# managed by cloud-init\nssh-ed25519 AAAAC3Nza admin@laptop\n\nssh-rsa AAAAB3Nza ci\n",
            );
        let id = capture(&host).unwrap();
        assert_eq!(id.hostname, "web1");
        assert_eq!(id.domain.as_deref(), Some("example.com"));
        assert_eq!(id.authorized_keys, ["ssh-ed25519 AAAAC3Nza admin@laptop", "ssh-rsa AAAAB3Nza ci"]);
    }

    #[test]
    fn short_name_has_no_domain() {
        let host = FakeHost::new().command("uname -n", 0, "db\n");
        let id = capture(&host).unwrap();
        assert_eq!(id.hostname, "db");
        assert_eq!(id.domain, None);
        assert!(id.authorized_keys.is_empty());
    }
}
