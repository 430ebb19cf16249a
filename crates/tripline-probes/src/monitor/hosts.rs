//! `/etc/hosts`: host names per IP address.

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tripline_core::diff::{diff_nested, Change};
use tripline_core::engine::{Findings, Probe};
use tripline_core::error::{EngineError, Result};
use tripline_core::settings::HostsSettings;
use tripline_core::snapshot::{KeySet, Snapshot};

pub const NAME: &str = "monitor_hosts_file";

pub struct HostsProbe {
    settings: HostsSettings,
}

impl HostsProbe {
    pub fn new(settings: HostsSettings) -> Self {
        Self { settings }
    }
}

/// Parse a hosts file. Repeated IPs merge their names; a line with an IP but
/// no name cannot be interpreted and fails the whole collection.
pub fn parse_hosts(path: &Path) -> anyhow::Result<Snapshot<KeySet>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let mut by_ip: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let ip = fields.next().unwrap_or_default();
        let names: Vec<String> = fields.map(str::to_string).collect();
        if names.is_empty() {
            bail!("Not able to parse line: {line}");
        }
        by_ip.entry(ip.to_string()).or_default().extend(names);
    }
    Ok(by_ip
        .into_iter()
        .map(|(ip, names)| (ip, names.into_iter().collect::<KeySet>()))
        .collect())
}

impl Probe for HostsProbe {
    type State = Snapshot<KeySet>;

    fn name(&self) -> &'static str {
        NAME
    }

    fn activated(&self) -> bool {
        self.settings.activated
    }

    fn inspect(&self, prior: &Self::State, findings: &mut Findings) -> Result<Self::State> {
        let current =
            parse_hosts(&self.settings.hosts_file).map_err(|e| EngineError::collection(NAME, e))?;

        let changes = diff_nested(prior, &current, |names| names);

        for (ip, _) in changes.collections.removed() {
            findings.push(format!("Host name for IP '{ip}' was deleted."));
        }
        for (ip, members) in &changes.members {
            for change in members.iter() {
                match change {
                    Change::Removed { key, .. } => findings.push(format!(
                        "Host name entry for IP '{ip}' was removed.\n\nEntry: {key}"
                    )),
                    Change::Added { key, .. } => findings.push(format!(
                        "Host name entry for IP '{ip}' was added.\n\nEntry: {key}"
                    )),
                    Change::Modified { .. } => {}
                }
            }
        }
        for (ip, names) in changes.collections.added() {
            let mut message = format!("New host name was added for IP '{ip}'.\n\nEntries:\n");
            for name in names.iter() {
                message.push_str(name);
                message.push('\n');
            }
            findings.push(message);
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn probe_for(path: &Path) -> HostsProbe {
        HostsProbe::new(HostsSettings {
            activated: true,
            hosts_file: path.to_path_buf(),
        })
    }

    #[test]
    fn repeated_ips_merge_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(
            &path,
            "# comment\n127.0.0.1 localhost\n\n127.0.0.1   box box.local\n::1 ip6-localhost\n",
        )
        .unwrap();
        let hosts = parse_hosts(&path).unwrap();
        let names: Vec<&str> = hosts.get("127.0.0.1").unwrap().iter().collect();
        assert_eq!(names, vec!["box", "box.local", "localhost"]);
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn line_without_name_fails_collection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "127.0.0.1 localhost\n10.0.0.1\n").unwrap();
        let err = probe_for(&path)
            .inspect(&Snapshot::empty(), &mut Findings::new())
            .unwrap_err();
        assert!(err.to_string().contains("Not able to parse line: 10.0.0.1"));
    }

    #[test]
    fn reports_ip_and_name_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hosts");
        fs::write(&path, "127.0.0.1 localhost\n10.0.0.5 db\n").unwrap();
        let probe = probe_for(&path);
        let baseline = probe.inspect(&Snapshot::empty(), &mut Findings::new()).unwrap();

        fs::write(&path, "127.0.0.1 localhost update.vendor.com\n6.6.6.6 bank.example\n").unwrap();
        let mut findings = Findings::new();
        probe.inspect(&baseline, &mut findings).unwrap();

        let messages = findings.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], "Host name for IP '10.0.0.5' was deleted.");
        assert_eq!(
            messages[1],
            "Host name entry for IP '127.0.0.1' was added.\n\nEntry: update.vendor.com"
        );
        assert!(messages[2].starts_with("New host name was added for IP '6.6.6.6'."));
        assert!(messages[2].contains("bank.example\n"));
    }
}
