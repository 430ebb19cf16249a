//! Configuration surface, read from a single TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration with all probes activated. Settings are read-only
//! once loaded; defaulted values such as the search root are derived where
//! they are used instead of being written back here.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of all probe state scopes. Platform data dir when unset.
    pub state_dir: Option<PathBuf>,
    /// Deadline for a single probe when run through `run-all`.
    pub probe_timeout_secs: u64,
    pub alerts: AlertSettings,
    pub probes: ProbeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: None,
            probe_timeout_secs: 60,
            alerts: AlertSettings::default(),
            probes: ProbeSettings::default(),
        }
    }
}

impl Settings {
    /// Load from `path`, or from the default location when `path` is `None`.
    /// An explicitly given file must exist; a missing default file means
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (paths::default_config_file()?, false),
        };

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(EngineError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };

        Self::from_toml(&text)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Named pipe read by an AlertR FIFO sensor.
    pub fifo: Option<PathBuf>,
    pub mail_from: Option<String>,
    pub mail_to: Option<String>,
    pub smtp_server: String,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            fifo: None,
            mail_from: None,
            mail_to: None,
            smtp_server: "127.0.0.1:25".into(),
        }
    }
}

impl AlertSettings {
    pub fn mail(&self) -> Option<(&str, &str)> {
        match (&self.mail_from, &self.mail_to) {
            (Some(from), Some(to)) => Some((from.as_str(), to.as_str())),
            _ => None,
        }
    }

    /// No remote channel configured: alerts go to stdout.
    pub fn print_only(&self) -> bool {
        self.fifo.is_none() && self.mail().is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub monitor_passwd: PasswdSettings,
    pub monitor_hosts_file: HostsSettings,
    pub monitor_modules: ModulesSettings,
    pub monitor_ld_preload: LdPreloadSettings,
    pub monitor_cron: CronSettings,
    pub monitor_ssh_authorized_keys: SshKeysSettings,
    pub monitor_systemd_units: SystemdUnitsSettings,
    pub search_hidden_exe: SearchSettings,
    pub search_immutable_files: ImmutableSettings,
    pub search_deleted_exe: ProcessSettings,
    pub search_memfd_create: ProcessSettings,
    pub search_non_kthreads: NonKthreadsSettings,
    pub search_ssh_leftover_processes: ProcessSettings,
    pub search_dev_shm: DevShmSettings,
    pub verify_deb_packages: DebPackagesSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswdSettings {
    pub activated: bool,
    pub passwd_file: PathBuf,
}

impl Default for PasswdSettings {
    fn default() -> Self {
        Self {
            activated: true,
            passwd_file: PathBuf::from("/etc/passwd"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsSettings {
    pub activated: bool,
    pub hosts_file: PathBuf,
}

impl Default for HostsSettings {
    fn default() -> Self {
        Self {
            activated: true,
            hosts_file: PathBuf::from("/etc/hosts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesSettings {
    pub activated: bool,
    pub modules_file: PathBuf,
    /// Module names never reported as loaded or unloaded.
    pub whitelist: Vec<String>,
}

impl Default for ModulesSettings {
    fn default() -> Self {
        Self {
            activated: true,
            modules_file: PathBuf::from("/proc/modules"),
            whitelist: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdPreloadSettings {
    pub activated: bool,
    pub preload_file: PathBuf,
}

impl Default for LdPreloadSettings {
    fn default() -> Self {
        Self {
            activated: true,
            preload_file: PathBuf::from("/etc/ld.so.preload"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CronSettings {
    pub activated: bool,
    pub crontab_file: PathBuf,
    pub cron_d_dir: PathBuf,
    /// Per-user crontabs, each named after its user.
    pub user_crontab_dir: PathBuf,
    pub cron_script_dirs: Vec<PathBuf>,
    pub passwd_file: PathBuf,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            activated: true,
            crontab_file: PathBuf::from("/etc/crontab"),
            cron_d_dir: PathBuf::from("/etc/cron.d"),
            user_crontab_dir: PathBuf::from("/var/spool/cron/crontabs"),
            cron_script_dirs: [
                "/etc/cron.daily",
                "/etc/cron.hourly",
                "/etc/cron.monthly",
                "/etc/cron.weekly",
                "/etc/cron.d",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            passwd_file: PathBuf::from("/etc/passwd"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshKeysSettings {
    pub activated: bool,
    pub passwd_file: PathBuf,
}

impl Default for SshKeysSettings {
    fn default() -> Self {
        Self {
            activated: true,
            passwd_file: PathBuf::from("/etc/passwd"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemdUnitsSettings {
    pub activated: bool,
    pub unit_dirs: Vec<PathBuf>,
}

impl Default for SystemdUnitsSettings {
    fn default() -> Self {
        let dirs = [
            "/etc/systemd/system",
            "/etc/systemd/user",
            "/etc/systemd/network",
            "/usr/lib/systemd/system",
            "/usr/lib/systemd/user",
            "/usr/lib/systemd/network",
            "/usr/local/lib/systemd/system",
            "/usr/local/lib/systemd/user",
            "/usr/local/lib/systemd/network",
            "/lib/systemd/system",
            "/lib/systemd/user",
            "/lib/systemd/network",
        ];
        Self {
            activated: true,
            unit_dirs: dirs.into_iter().map(PathBuf::from).collect(),
        }
    }
}

/// Options shared by the resumable filesystem searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub activated: bool,
    pub search_in_steps: bool,
    /// Roots to search. Empty means `/`.
    pub search_locations: Vec<PathBuf>,
    pub directory_whitelist: Vec<PathBuf>,
    pub file_whitelist: Vec<PathBuf>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            activated: true,
            search_in_steps: false,
            search_locations: vec![],
            directory_whitelist: vec![],
            file_whitelist: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmutableSettings {
    #[serde(flatten)]
    pub search: SearchSettings,
    pub lsattr: PathBuf,
}

impl Default for ImmutableSettings {
    fn default() -> Self {
        Self {
            search: SearchSettings::default(),
            lsattr: PathBuf::from("lsattr"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebPackagesSettings {
    pub activated: bool,
    pub debsums: PathBuf,
    pub file_whitelist: Vec<PathBuf>,
}

impl Default for DebPackagesSettings {
    fn default() -> Self {
        Self {
            activated: true,
            debsums: PathBuf::from("/usr/bin/debsums"),
            file_whitelist: vec![],
        }
    }
}

/// Probes that only read the live process table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub activated: bool,
    pub proc_dir: PathBuf,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            activated: true,
            proc_dir: PathBuf::from("/proc"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NonKthreadsSettings {
    pub activated: bool,
    pub proc_dir: PathBuf,
    /// Bracketed command lines that legitimately map memory,
    /// e.g. `[lxc monitor] /var/lib/lxc web01`.
    pub whitelist: Vec<String>,
}

impl Default for NonKthreadsSettings {
    fn default() -> Self {
        Self {
            activated: true,
            proc_dir: PathBuf::from("/proc"),
            whitelist: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevShmSettings {
    pub activated: bool,
    pub shm_dir: PathBuf,
}

impl Default for DevShmSettings {
    fn default() -> Self {
        Self {
            activated: true,
            shm_dir: PathBuf::from("/dev/shm"),
        }
    }
}
