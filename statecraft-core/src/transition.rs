//! Runtime transitions and the lifecycle callback pipeline.
//!
//! A [`Transition`] is one in-flight state change. It runs through a fixed
//! sequence of [`Phase`]s; named phases invoke every applicable callback on
//! the target concurrently and wait for all of them to settle before the next
//! phase starts. Callback failures are recorded per phase and never stop the
//! pipeline. Once aborted, every phase that has not started yet is skipped.

use crate::definition::{Definition, TransitionId, TransitionRule};
use crate::error::{CallbackError, FsmError};
use crate::machine::Machine;
use crate::target::Callback;
use futures::future::{join_all, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    BeforeEvent,
    Activate,
    WillExit,
    WillEnter,
    CommitState,
    DidExit,
    DidEnter,
    Deactivate,
    AfterEvent,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::BeforeEvent,
        Phase::Activate,
        Phase::WillExit,
        Phase::WillEnter,
        Phase::CommitState,
        Phase::DidExit,
        Phase::DidEnter,
        Phase::Deactivate,
        Phase::AfterEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::BeforeEvent => "beforeEvent",
            Phase::Activate => "activate",
            Phase::WillExit => "willExit",
            Phase::WillEnter => "willEnter",
            Phase::CommitState => "commitState",
            Phase::DidExit => "didExit",
            Phase::DidEnter => "didEnter",
            Phase::Deactivate => "deactivate",
            Phase::AfterEvent => "afterEvent",
        }
    }

    /// Bookkeeping phases run by the machine itself; they take no callbacks.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Phase::Activate | Phase::CommitState | Phase::Deactivate
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseOutcome {
    /// Every callback of the phase settled.
    Settled,
    /// The transition was aborted before the phase started.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionStatus {
    Pending,
    Resolving,
    Resolved,
    Rejected,
}

impl fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransitionStatus::Pending => "pending",
            TransitionStatus::Resolving => "resolving",
            TransitionStatus::Resolved => "resolved",
            TransitionStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// What the machine did after a transition failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Recovery {
    /// The error event ran and moved the machine into `to_state`.
    Dispatched { to_state: String },
    /// No recovery transition could run.
    Unhandled { reason: String },
}

#[derive(Debug, Default)]
struct Record {
    outcomes: Vec<(Phase, PhaseOutcome)>,
    resolutions: BTreeMap<Phase, BTreeMap<String, Value>>,
    rejections: BTreeMap<Phase, BTreeMap<String, CallbackError>>,
    error: Option<String>,
    recovery: Option<Recovery>,
}

#[derive(Debug)]
struct TransitionInner {
    id: Uuid,
    rule: TransitionId,
    event: String,
    from_state: String,
    to_state: String,
    args: Vec<Value>,
    aborted: AtomicBool,
    status: Mutex<TransitionStatus>,
    record: Mutex<Record>,
}

/// A state change in progress.
///
/// Cheap to clone; every clone observes the same transition. Callbacks
/// receive one and may inspect or abort it.
#[derive(Debug, Clone)]
pub struct Transition {
    inner: Arc<TransitionInner>,
}

impl Transition {
    pub(crate) fn new(rule: &TransitionRule, args: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(TransitionInner {
                id: Uuid::new_v4(),
                rule: rule.id,
                event: rule.event.clone(),
                from_state: rule.from_state.clone(),
                to_state: rule.to_state.clone(),
                args,
                aborted: AtomicBool::new(false),
                status: Mutex::new(TransitionStatus::Pending),
                record: Mutex::new(Record::default()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The compiled rule this transition runs.
    pub fn rule_id(&self) -> TransitionId {
        self.inner.rule
    }

    pub fn event(&self) -> &str {
        &self.inner.event
    }

    pub fn from_state(&self) -> &str {
        &self.inner.from_state
    }

    pub fn to_state(&self) -> &str {
        &self.inner.to_state
    }

    /// Arguments passed to `send`.
    pub fn args(&self) -> &[Value] {
        &self.inner.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.inner.args.get(index)
    }

    pub fn status(&self) -> TransitionStatus {
        *self.inner.status.lock()
    }

    pub fn is_resolved(&self) -> bool {
        self.status() == TransitionStatus::Resolved
    }

    pub fn is_rejected(&self) -> bool {
        self.status() == TransitionStatus::Rejected
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Stops every phase that has not started yet.
    ///
    /// Has no effect once the transition is resolved or rejected, and never
    /// undoes a state that was already committed.
    pub fn abort(&self) {
        let status = self.status();
        if matches!(
            status,
            TransitionStatus::Resolved | TransitionStatus::Rejected
        ) {
            return;
        }

        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                id = %self.inner.id,
                "aborting transition {} ({} -> {})",
                self.inner.event,
                self.inner.from_state,
                self.inner.to_state
            );
        }
    }

    pub fn outcome(&self, phase: Phase) -> Option<PhaseOutcome> {
        self.inner
            .record
            .lock()
            .outcomes
            .iter()
            .find(|(p, _)| *p == phase)
            .map(|(_, outcome)| *outcome)
    }

    /// Phase outcomes in the order they were recorded.
    pub fn outcomes(&self) -> Vec<(Phase, PhaseOutcome)> {
        self.inner.record.lock().outcomes.clone()
    }

    /// Successful callback results of a phase, keyed by `<via>:<name>`.
    pub fn resolutions(&self, phase: Phase) -> BTreeMap<String, Value> {
        self.inner
            .record
            .lock()
            .resolutions
            .get(&phase)
            .cloned()
            .unwrap_or_default()
    }

    /// Failed callbacks of a phase, keyed by `<via>:<name>`.
    pub fn rejections(&self, phase: Phase) -> BTreeMap<String, CallbackError> {
        self.inner
            .record
            .lock()
            .rejections
            .get(&phase)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_rejections(&self) -> bool {
        self.inner
            .record
            .lock()
            .rejections
            .values()
            .any(|r| !r.is_empty())
    }

    /// The pipeline error that rejected this transition, if any.
    pub fn error(&self) -> Option<String> {
        self.inner.record.lock().error.clone()
    }

    pub fn recovery(&self) -> Option<Recovery> {
        self.inner.record.lock().recovery.clone()
    }

    /// A serializable snapshot of the transition.
    pub fn report(&self) -> TransitionReport {
        let record = self.inner.record.lock();
        TransitionReport {
            id: self.inner.id,
            event: self.inner.event.clone(),
            from: self.inner.from_state.clone(),
            to: self.inner.to_state.clone(),
            args: self.inner.args.clone(),
            status: self.status(),
            aborted: self.is_aborted(),
            outcomes: record.outcomes.iter().copied().collect(),
            resolutions: record.resolutions.clone(),
            rejections: record.rejections.clone(),
            error: record.error.clone(),
            recovery: record.recovery.clone(),
        }
    }

    /// JSON summary handed to the error event.
    pub(crate) fn describe(&self) -> Value {
        serde_json::json!({
            "id": self.inner.id.to_string(),
            "event": self.inner.event,
            "from": self.inner.from_state,
            "to": self.inner.to_state,
        })
    }

    /// Collects every rejection as `(phase, key, error)`.
    pub fn all_rejections(&self) -> Vec<(Phase, String, CallbackError)> {
        let record = self.inner.record.lock();
        record
            .rejections
            .iter()
            .flat_map(|(phase, by_key)| {
                by_key
                    .iter()
                    .map(move |(key, err)| (*phase, key.clone(), err.clone()))
            })
            .collect()
    }

    fn set_status(&self, status: TransitionStatus) {
        *self.inner.status.lock() = status;
    }

    fn record_outcome(&self, phase: Phase, outcome: PhaseOutcome) {
        self.inner.record.lock().outcomes.push((phase, outcome));
    }

    fn record_resolution(&self, phase: Phase, key: String, value: Value) {
        self.inner
            .record
            .lock()
            .resolutions
            .entry(phase)
            .or_default()
            .insert(key, value);
    }

    fn record_rejection(&self, phase: Phase, key: String, err: CallbackError) {
        self.inner
            .record
            .lock()
            .rejections
            .entry(phase)
            .or_default()
            .insert(key, err);
    }

    pub(crate) fn set_recovery(&self, recovery: Recovery) {
        self.inner.record.lock().recovery = Some(recovery);
    }
}

impl PartialEq for Transition {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Transition {}

/// Serializable view of a transition.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionReport {
    pub id: Uuid,
    pub event: String,
    pub from: String,
    pub to: String,
    pub args: Vec<Value>,
    pub status: TransitionStatus,
    pub aborted: bool,
    pub outcomes: BTreeMap<Phase, PhaseOutcome>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub resolutions: BTreeMap<Phase, BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub rejections: BTreeMap<Phase, BTreeMap<String, CallbackError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<Recovery>,
}

/// Handle to a running transition's eventual outcome.
#[derive(Debug)]
pub struct TransitionHandle {
    transition: Transition,
    task: JoinHandle<Result<Transition, FsmError>>,
}

impl TransitionHandle {
    pub(crate) fn new(transition: Transition, task: JoinHandle<Result<Transition, FsmError>>) -> Self {
        Self { transition, task }
    }

    /// The running transition, available before it settles.
    pub fn transition(&self) -> &Transition {
        &self.transition
    }

    /// Waits for the pipeline to finish.
    ///
    /// Resolves with the transition even when individual callbacks were
    /// rejected; those are on the transition's rejection maps. Only a
    /// rejection of the pipeline itself is returned as an error.
    pub async fn wait(self) -> Result<Transition, FsmError> {
        self.task.await?
    }
}

/// Runs the full pipeline for a transition already registered as active.
pub(crate) async fn perform(machine: Machine, transition: Transition) -> Result<Transition, FsmError> {
    transition.set_status(TransitionStatus::Resolving);

    let mut result = Ok(());
    for phase in Phase::ALL {
        result = run_phase(&machine, &transition, phase).await;
        if result.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    machine.release(&transition);

    match &result {
        Ok(()) => {
            transition.set_status(TransitionStatus::Resolved);
            tracing::info!(
                id = %transition.id(),
                aborted = transition.is_aborted(),
                "transition {} resolved ({} -> {})",
                transition.event(),
                transition.from_state(),
                transition.to_state()
            );
        }
        Err(e) => {
            transition.inner.record.lock().error = Some(e.to_string());
            transition.set_status(TransitionStatus::Rejected);
            tracing::warn!(
                id = %transition.id(),
                "transition {} rejected: {}",
                transition.event(),
                e
            );
        }
    }

    if result.is_err() || transition.has_rejections() {
        machine.recover(&transition).await;
    }

    result.map(|()| transition)
}

async fn run_phase(machine: &Machine, transition: &Transition, phase: Phase) -> Result<(), FsmError> {
    if transition.is_aborted() {
        tracing::debug!(id = %transition.id(), "skipping {} of aborted transition", phase);
        transition.record_outcome(phase, PhaseOutcome::Aborted);
        return Ok(());
    }

    match phase {
        Phase::Activate => machine.activate(transition),
        Phase::CommitState => machine.commit(transition),
        Phase::Deactivate => machine.release(transition),
        _ => run_callbacks(machine, transition, phase).await?,
    }

    transition.record_outcome(phase, PhaseOutcome::Settled);
    Ok(())
}

/// Names of the callbacks that apply to a phase, as `(key, name)` pairs.
pub(crate) fn callback_names(
    definition: &Definition,
    transition: &Transition,
    phase: Phase,
) -> Vec<(String, String)> {
    let rule = definition.transition(transition.rule_id());
    let mut names: Vec<(String, String)> = rule
        .callbacks
        .for_phase(phase)
        .iter()
        .map(|name| (format!("transition:{}", name), name.clone()))
        .collect();

    let (via, declared) = match phase {
        Phase::BeforeEvent | Phase::AfterEvent => (
            "event",
            definition
                .lookup_event(transition.event())
                .map(|e| e.callbacks_for(phase)),
        ),
        Phase::WillExit | Phase::DidExit => (
            "state",
            definition
                .lookup_state(transition.from_state())
                .ok()
                .map(|s| s.callbacks_for(phase)),
        ),
        Phase::WillEnter | Phase::DidEnter => (
            "state",
            definition
                .lookup_state(transition.to_state())
                .ok()
                .map(|s| s.callbacks_for(phase)),
        ),
        _ => ("", None),
    };

    for name in declared.unwrap_or_default() {
        names.push((format!("{}:{}", via, name), name.clone()));
    }

    names
}

async fn run_callbacks(machine: &Machine, transition: &Transition, phase: Phase) -> Result<(), FsmError> {
    let names = callback_names(machine.definition(), transition, phase);
    if names.is_empty() {
        return Ok(());
    }

    let mut callbacks: Vec<(String, Callback)> = Vec::with_capacity(names.len());
    for (key, name) in names {
        let callback = machine
            .target()
            .callback(&name)
            .ok_or_else(|| FsmError::MissingCallback {
                name: name.clone(),
                phase: phase.to_string(),
            })?;
        callbacks.push((key, callback));
    }

    tracing::debug!(
        id = %transition.id(),
        callbacks = callbacks.len(),
        "running {} callbacks",
        phase
    );

    let settled = join_all(callbacks.into_iter().map(|(key, callback)| {
        let transition = transition.clone();
        async move {
            let outcome = AssertUnwindSafe(async move { callback.call(transition).await })
                .catch_unwind()
                .await;
            (key, outcome)
        }
    }))
    .await;

    for (key, outcome) in settled {
        match outcome {
            Ok(Ok(value)) => transition.record_resolution(phase, key, value),
            Ok(Err(err)) => {
                tracing::warn!(id = %transition.id(), "{} callback {} rejected: {}", phase, key, err);
                transition.record_rejection(phase, key, err);
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!(id = %transition.id(), "{} callback {} panicked: {}", phase, key, message);
                transition.record_rejection(
                    phase,
                    key,
                    CallbackError::new(format!("callback panicked: {}", message)),
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule() -> TransitionRule {
        TransitionRule {
            id: TransitionId(0),
            event: "go".into(),
            from_state: "a".into(),
            to_state: "b".into(),
            guard: None,
            callbacks: Default::default(),
        }
    }

    #[test]
    fn test_phase_order() {
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
        assert_eq!(Phase::ALL[4], Phase::CommitState);
        assert!(Phase::Deactivate.is_internal());
        assert!(!Phase::DidEnter.is_internal());
        assert_eq!(Phase::WillEnter.to_string(), "willEnter");
    }

    #[test]
    fn test_new_transition() {
        let t = Transition::new(&rule(), vec![json!(1), json!("x")]);

        assert_eq!(t.status(), TransitionStatus::Pending);
        assert_eq!(t.event(), "go");
        assert_eq!(t.from_state(), "a");
        assert_eq!(t.to_state(), "b");
        assert_eq!(t.arg(1), Some(&json!("x")));
        assert!(t.arg(2).is_none());
        assert!(!t.is_aborted());
        assert!(!t.has_rejections());
    }

    #[test]
    fn test_abort_after_settle_is_ignored() {
        let t = Transition::new(&rule(), vec![]);
        t.set_status(TransitionStatus::Resolved);
        t.abort();
        assert!(!t.is_aborted());

        let t = Transition::new(&rule(), vec![]);
        t.abort();
        t.abort();
        assert!(t.is_aborted());
    }

    #[test]
    fn test_records_and_report() {
        let t = Transition::new(&rule(), vec![]);
        t.record_outcome(Phase::BeforeEvent, PhaseOutcome::Settled);
        t.record_resolution(Phase::BeforeEvent, "event:log".into(), json!(true));
        t.record_rejection(Phase::WillEnter, "state:check".into(), CallbackError::rejected());
        t.record_outcome(Phase::WillEnter, PhaseOutcome::Aborted);

        assert_eq!(t.outcome(Phase::BeforeEvent), Some(PhaseOutcome::Settled));
        assert_eq!(t.outcome(Phase::DidEnter), None);
        assert_eq!(t.resolutions(Phase::BeforeEvent)["event:log"], json!(true));
        assert!(t.has_rejections());
        assert_eq!(t.all_rejections().len(), 1);

        let report = serde_json::to_value(t.report()).unwrap();
        assert_eq!(report["status"], "pending");
        assert_eq!(report["outcomes"]["willEnter"], "aborted");
        assert_eq!(
            report["rejections"]["willEnter"]["state:check"]["message"],
            "rejected transition"
        );
    }

    #[test]
    fn test_clones_share_state() {
        let t = Transition::new(&rule(), vec![]);
        let other = t.clone();
        other.abort();
        assert!(t.is_aborted());
        assert_eq!(t, other);
        assert_ne!(t, Transition::new(&rule(), vec![]));
    }

    #[test]
    fn test_recovery_serialization() {
        let recovery = Recovery::Dispatched {
            to_state: "failed".into(),
        };
        assert_eq!(
            serde_json::to_value(&recovery).unwrap(),
            json!({ "kind": "dispatched", "to_state": "failed" })
        );
    }
}
