//! Concrete host probes and the `tripline` command line.

pub mod command;
pub mod deb_packages;
pub mod monitor;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod search;
pub mod users;

pub use registry::ProbeKind;
