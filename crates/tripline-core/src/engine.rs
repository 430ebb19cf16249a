//! One probe invocation: load prior state, inspect, report, persist.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::alert::AlertRouter;
use crate::error::{EngineError, Result};
use crate::state::{StateKind, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Report findings through the router.
    Monitor,
    /// Seed a baseline: findings are computed but never delivered.
    Baseline,
}

impl RunMode {
    pub fn from_init_flag(init: bool) -> Self {
        if init {
            RunMode::Baseline
        } else {
            RunMode::Monitor
        }
    }
}

/// Messages produced while inspecting. Findings are security-relevant
/// changes; errors are non-fatal operational problems (an unresolvable
/// whitelist entry, an unparseable tool output line) that did not stop
/// the run.
#[derive(Debug, Default)]
pub struct Findings {
    findings: Vec<String>,
    errors: Vec<String>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.findings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.findings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

pub trait Probe {
    type State: Serialize + DeserializeOwned + Default;

    fn name(&self) -> &'static str;

    fn activated(&self) -> bool;

    /// Which file of the probe's scope holds its state.
    fn state_kind(&self) -> StateKind {
        StateKind::Plain
    }

    /// Probes that only report the present (e.g. package verification)
    /// neither load nor store anything.
    fn stateful(&self) -> bool {
        true
    }

    /// Observe the system, compare against `prior` and return the state to
    /// persist. An error aborts the run with nothing persisted.
    fn inspect(&self, prior: &Self::State, findings: &mut Findings) -> Result<Self::State>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Deactivated,
    Completed {
        findings: usize,
        /// Findings handed to the router; zero in baseline mode.
        delivered: usize,
        errors: usize,
    },
}

pub struct Engine {
    store: StateStore,
    router: AlertRouter,
}

impl Engine {
    pub fn new(store: StateStore, router: AlertRouter) -> Self {
        Self { store, router }
    }

    pub fn router(&self) -> &AlertRouter {
        &self.router
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Run `probe` once. Any returned error has already been reported
    /// through the router; the caller only needs it for its exit status.
    pub fn run<P: Probe>(&self, probe: &P, mode: RunMode) -> Result<RunOutcome> {
        let name = probe.name();
        if !probe.activated() {
            info!("{name}: deactivated");
            return Ok(RunOutcome::Deactivated);
        }

        let scope = self.store.scope(name);
        let kind = probe.state_kind();

        let prior = if probe.stateful() {
            scope.load::<P::State>(kind).map_err(|e| self.fail(name, e))?
        } else {
            P::State::default()
        };

        let mut findings = Findings::new();
        let inspected = probe.inspect(&prior, &mut findings);
        // Whatever was detected before a failure still goes out; only the
        // state is withheld.
        let delivered = self.deliver(name, &findings, mode);
        let next = inspected.map_err(|e| self.fail(name, e))?;

        if probe.stateful() {
            scope.store(kind, &next).map_err(|e| self.fail(name, e))?;
        }

        info!(
            "{name}: {} finding(s), {} delivered, {} error(s)",
            findings.len(),
            delivered,
            findings.errors().len()
        );
        Ok(RunOutcome::Completed {
            findings: findings.len(),
            delivered,
            errors: findings.errors().len(),
        })
    }

    /// Send errors, then findings unless this is a baseline run. Returns
    /// the number of findings handed to the router.
    fn deliver(&self, name: &str, findings: &Findings, mode: RunMode) -> usize {
        for message in findings.errors() {
            self.router.error(name, message.clone());
        }

        match mode {
            RunMode::Monitor => {
                for message in findings.messages() {
                    self.router.finding(name, message.clone());
                }
                findings.len()
            }
            RunMode::Baseline => {
                debug!("{name}: baseline run, {} finding(s) suppressed", findings.len());
                0
            }
        }
    }

    fn fail(&self, name: &str, err: EngineError) -> EngineError {
        self.router.error(name, err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertKind, RecordingSink};
    use crate::snapshot::KeySet;
    use tempfile::tempdir;

    struct Fixed {
        observed: Vec<&'static str>,
    }

    impl Probe for Fixed {
        type State = KeySet;

        fn name(&self) -> &'static str {
            "fixed"
        }

        fn activated(&self) -> bool {
            true
        }

        fn inspect(&self, prior: &KeySet, findings: &mut Findings) -> Result<KeySet> {
            let current: KeySet = self.observed.iter().copied().collect();
            for change in crate::diff::diff(prior, &current) {
                findings.push(format!("{change:?}"));
            }
            Ok(current)
        }
    }

    #[test]
    fn monitor_mode_delivers_every_finding() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::default();
        let engine = Engine::new(
            StateStore::new(dir.path()),
            AlertRouter::with_sinks("host", vec![Box::new(sink.clone())]),
        );

        let outcome = engine
            .run(&Fixed { observed: vec!["a", "b"] }, RunMode::Monitor)
            .unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                findings: 2,
                delivered: 2,
                errors: 0
            }
        );
        assert_eq!(sink.count(AlertKind::Finding), 2);

        // Same observation again: nothing new.
        engine
            .run(&Fixed { observed: vec!["a", "b"] }, RunMode::Monitor)
            .unwrap();
        assert_eq!(sink.count(AlertKind::Finding), 2);
    }

    #[test]
    fn init_flag_selects_baseline() {
        assert_eq!(RunMode::from_init_flag(true), RunMode::Baseline);
        assert_eq!(RunMode::from_init_flag(false), RunMode::Monitor);
    }

    struct FailsAfterFinding;

    impl Probe for FailsAfterFinding {
        type State = KeySet;

        fn name(&self) -> &'static str {
            "partial"
        }

        fn activated(&self) -> bool {
            true
        }

        fn inspect(&self, _prior: &KeySet, findings: &mut Findings) -> Result<KeySet> {
            findings.push("Immutable files found.\n\nFile: /one/rootkit");
            Err(EngineError::Collection {
                probe: "partial".into(),
                message: "second root unreadable".into(),
            })
        }
    }

    #[test]
    fn findings_before_a_failure_are_still_delivered() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::default();
        let engine = Engine::new(
            StateStore::new(dir.path()),
            AlertRouter::with_sinks("host", vec![Box::new(sink.clone())]),
        );

        assert!(engine.run(&FailsAfterFinding, RunMode::Monitor).is_err());
        assert_eq!(sink.count(AlertKind::Finding), 1);
        assert_eq!(sink.count(AlertKind::Error), 1);
        assert!(!engine.store().scope("partial").path(StateKind::Plain).exists());

        // Baseline runs stay silent about findings even when failing.
        assert!(engine.run(&FailsAfterFinding, RunMode::Baseline).is_err());
        assert_eq!(sink.count(AlertKind::Finding), 1);
        assert_eq!(sink.count(AlertKind::Error), 2);
    }
}
