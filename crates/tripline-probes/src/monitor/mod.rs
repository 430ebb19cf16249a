//! Snapshot-and-diff probes over configuration files and kernel state.

pub mod cron;
pub mod hosts;
pub mod ld_preload;
pub mod modules;
pub mod passwd;
pub mod ssh_keys;
pub mod systemd_units;
