//! The fixed set of probes and how each is built from settings.

use clap::ValueEnum;
use tracing::info;

use tripline_core::engine::{Engine, Probe, RunMode, RunOutcome};
use tripline_core::error::Result;
use tripline_core::settings::Settings;

use crate::deb_packages::{self, DebPackagesProbe};
use crate::monitor::{cron, hosts, ld_preload, modules, passwd, ssh_keys, systemd_units};
use crate::process::{deleted_exe, memfd_create, non_kthreads, ssh_leftover};
use crate::search::{dev_shm, hidden_exe, immutable_files};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ProbeKind {
    MonitorCron,
    MonitorHostsFile,
    MonitorLdPreload,
    MonitorModules,
    MonitorPasswd,
    MonitorSshAuthorizedKeys,
    MonitorSystemdUnits,
    SearchDeletedExe,
    SearchDevShm,
    SearchHiddenExe,
    SearchImmutableFiles,
    SearchMemfdCreate,
    SearchNonKthreads,
    SearchSshLeftoverProcesses,
    VerifyDebPackages,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 15] = [
        ProbeKind::MonitorCron,
        ProbeKind::MonitorHostsFile,
        ProbeKind::MonitorLdPreload,
        ProbeKind::MonitorModules,
        ProbeKind::MonitorPasswd,
        ProbeKind::MonitorSshAuthorizedKeys,
        ProbeKind::MonitorSystemdUnits,
        ProbeKind::SearchDeletedExe,
        ProbeKind::SearchDevShm,
        ProbeKind::SearchHiddenExe,
        ProbeKind::SearchImmutableFiles,
        ProbeKind::SearchMemfdCreate,
        ProbeKind::SearchNonKthreads,
        ProbeKind::SearchSshLeftoverProcesses,
        ProbeKind::VerifyDebPackages,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::MonitorCron => cron::NAME,
            ProbeKind::MonitorHostsFile => hosts::NAME,
            ProbeKind::MonitorLdPreload => ld_preload::NAME,
            ProbeKind::MonitorModules => modules::NAME,
            ProbeKind::MonitorPasswd => passwd::NAME,
            ProbeKind::MonitorSshAuthorizedKeys => ssh_keys::NAME,
            ProbeKind::MonitorSystemdUnits => systemd_units::NAME,
            ProbeKind::SearchDeletedExe => deleted_exe::NAME,
            ProbeKind::SearchDevShm => dev_shm::NAME,
            ProbeKind::SearchHiddenExe => hidden_exe::NAME,
            ProbeKind::SearchImmutableFiles => immutable_files::NAME,
            ProbeKind::SearchMemfdCreate => memfd_create::NAME,
            ProbeKind::SearchNonKthreads => non_kthreads::NAME,
            ProbeKind::SearchSshLeftoverProcesses => ssh_leftover::NAME,
            ProbeKind::VerifyDebPackages => deb_packages::NAME,
        }
    }

    pub fn is_step_scan(self) -> bool {
        matches!(self, ProbeKind::SearchHiddenExe | ProbeKind::SearchImmutableFiles)
    }

    /// Probes that report only the present and persist nothing.
    pub fn is_stateless(self) -> bool {
        matches!(
            self,
            ProbeKind::SearchDeletedExe
                | ProbeKind::SearchDevShm
                | ProbeKind::SearchMemfdCreate
                | ProbeKind::SearchNonKthreads
                | ProbeKind::SearchSshLeftoverProcesses
                | ProbeKind::VerifyDebPackages
        )
    }

    /// Whether a baseline run has anything to record. Step scans keep only
    /// a cursor and stateless probes keep nothing.
    pub fn has_baseline(self) -> bool {
        !self.is_step_scan() && !self.is_stateless()
    }

    /// Build and run the probe. `None` means the run was skipped because
    /// the probe has nothing to do in baseline mode.
    pub fn run(self, settings: &Settings, engine: &Engine, mode: RunMode) -> Result<Option<RunOutcome>> {
        if mode == RunMode::Baseline && !self.has_baseline() {
            info!("{}: nothing to seed, skipped in baseline mode", self.name());
            return Ok(None);
        }

        let p = &settings.probes;
        let outcome = match self {
            ProbeKind::MonitorCron => run(engine, cron::CronProbe::new(p.monitor_cron.clone()), mode),
            ProbeKind::MonitorHostsFile => {
                run(engine, hosts::HostsProbe::new(p.monitor_hosts_file.clone()), mode)
            }
            ProbeKind::MonitorLdPreload => run(
                engine,
                ld_preload::LdPreloadProbe::new(p.monitor_ld_preload.clone()),
                mode,
            ),
            ProbeKind::MonitorModules => {
                run(engine, modules::ModulesProbe::new(p.monitor_modules.clone()), mode)
            }
            ProbeKind::MonitorPasswd => {
                run(engine, passwd::PasswdProbe::new(p.monitor_passwd.clone()), mode)
            }
            ProbeKind::MonitorSshAuthorizedKeys => run(
                engine,
                ssh_keys::SshKeysProbe::new(p.monitor_ssh_authorized_keys.clone()),
                mode,
            ),
            ProbeKind::MonitorSystemdUnits => run(
                engine,
                systemd_units::SystemdUnitsProbe::new(p.monitor_systemd_units.clone()),
                mode,
            ),
            ProbeKind::SearchDeletedExe => run(
                engine,
                deleted_exe::DeletedExeProbe::new(p.search_deleted_exe.clone()),
                mode,
            ),
            ProbeKind::SearchDevShm => {
                run(engine, dev_shm::DevShmProbe::new(p.search_dev_shm.clone()), mode)
            }
            ProbeKind::SearchHiddenExe => run(
                engine,
                hidden_exe::HiddenExeProbe::new(p.search_hidden_exe.clone()),
                mode,
            ),
            ProbeKind::SearchImmutableFiles => run(
                engine,
                immutable_files::ImmutableFilesProbe::new(p.search_immutable_files.clone()),
                mode,
            ),
            ProbeKind::SearchMemfdCreate => run(
                engine,
                memfd_create::MemfdCreateProbe::new(p.search_memfd_create.clone()),
                mode,
            ),
            ProbeKind::SearchNonKthreads => run(
                engine,
                non_kthreads::NonKthreadsProbe::new(p.search_non_kthreads.clone()),
                mode,
            ),
            ProbeKind::SearchSshLeftoverProcesses => run(
                engine,
                ssh_leftover::SshLeftoverProbe::new(p.search_ssh_leftover_processes.clone()),
                mode,
            ),
            ProbeKind::VerifyDebPackages => run(
                engine,
                DebPackagesProbe::new(p.verify_deb_packages.clone()),
                mode,
            ),
        }?;
        Ok(Some(outcome))
    }
}

fn run<P: Probe>(engine: &Engine, probe: P, mode: RunMode) -> Result<RunOutcome> {
    engine.run(&probe, mode)
}
