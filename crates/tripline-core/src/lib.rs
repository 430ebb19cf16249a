//! Change detection and resumable scans for host integrity probes.

pub mod alert;
pub mod diff;
pub mod engine;
pub mod error;
pub mod paths;
pub mod settings;
pub mod snapshot;
pub mod state;
pub mod step;
pub mod whitelist;

pub use alert::{Alert, AlertKind, AlertRouter, AlertSink};
pub use diff::{diff, diff_nested, Change, ChangeSet, NestedChanges};
pub use engine::{Engine, Findings, Probe, RunMode, RunOutcome};
pub use error::{EngineError, Result};
pub use settings::Settings;
pub use snapshot::{KeySet, Keyed, Snapshot};
pub use state::{StateKind, StateScope, StateStore};
pub use step::{ScanUnit, StepCursor, StepMode};
pub use whitelist::{Located, Whitelist};
