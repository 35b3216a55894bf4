//! The runtime state machine.
//!
//! A [`Machine`] pairs a compiled [`Definition`] with a [`Target`] and holds
//! the current state plus the set of active transitions. `send` resolves the
//! transition for an event synchronously and spawns its pipeline on the
//! current Tokio runtime.

use crate::definition::{Definition, ALL_MACRO};
use crate::error::FsmError;
use crate::guard::GuardEvaluator;
use crate::target::Target;
use crate::transition::{perform, Recovery, Transition, TransitionHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Machine runtime options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineOptions {
    /// Event dispatched after a transition fails.
    pub error_event: String,
    /// Whether failures dispatch the error event at all.
    pub dispatch_error_event: bool,
    /// When set and the definition has no error event, one moving every
    /// state into this state is added before compilation.
    pub default_error_state: Option<String>,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            error_event: "error".to_string(),
            dispatch_error_event: true,
            default_error_state: None,
        }
    }
}

impl MachineOptions {
    /// Adds the default error event to a payload that lacks one.
    pub fn prepare(&self, mut payload: Value) -> Value {
        let Some(state) = &self.default_error_state else {
            return payload;
        };

        if let Some(events) = payload.get_mut("events").and_then(Value::as_object_mut) {
            if !events.contains_key(&self.error_event) {
                tracing::debug!(
                    "adding default {} event into state '{}'",
                    self.error_event,
                    state
                );
                events.insert(
                    self.error_event.clone(),
                    json!({ "transition": { ALL_MACRO: state } }),
                );
            }
        }

        payload
    }
}

struct MachineState {
    current_state: String,
    active: Vec<Transition>,
}

struct MachineInner {
    definition: Arc<Definition>,
    target: Arc<dyn Target>,
    options: MachineOptions,
    state: Mutex<MachineState>,
}

/// A running state machine. Clones share the same machine.
#[derive(Clone)]
pub struct Machine {
    inner: Arc<MachineInner>,
}

impl Machine {
    pub fn new(definition: Arc<Definition>, target: Arc<dyn Target>) -> Self {
        Self::with_options(definition, target, MachineOptions::default())
    }

    pub fn with_options(
        definition: Arc<Definition>,
        target: Arc<dyn Target>,
        options: MachineOptions,
    ) -> Self {
        let current_state = definition.initial_state().to_string();
        Self {
            inner: Arc::new(MachineInner {
                definition,
                target,
                options,
                state: Mutex::new(MachineState {
                    current_state,
                    active: Vec::new(),
                }),
            }),
        }
    }

    /// Compiles a payload and starts a machine in its initial state.
    pub fn from_json(
        payload: &Value,
        target: Arc<dyn Target>,
        options: MachineOptions,
    ) -> Result<Self, FsmError> {
        let definition = Definition::compile(options.prepare(payload.clone()))?;
        Ok(Self::with_options(Arc::new(definition), target, options))
    }

    pub fn definition(&self) -> &Definition {
        &self.inner.definition
    }

    pub fn target(&self) -> &dyn Target {
        self.inner.target.as_ref()
    }

    pub fn options(&self) -> &MachineOptions {
        &self.inner.options
    }

    pub fn current_state(&self) -> String {
        self.inner.state.lock().current_state.clone()
    }

    pub fn is_transitioning(&self) -> bool {
        !self.inner.state.lock().active.is_empty()
    }

    pub fn active_transitions(&self) -> Vec<Transition> {
        self.inner.state.lock().active.clone()
    }

    /// Resolves the transition for `event` and starts it.
    ///
    /// Resolution errors are returned here and leave the machine untouched.
    /// Must be called from within a Tokio runtime.
    pub fn send(&self, event: &str, args: Vec<Value>) -> Result<TransitionHandle, FsmError> {
        let definition = self.definition();

        if definition.lookup_event(event).is_none() {
            return Err(FsmError::UnknownEvent {
                event: event.to_string(),
                known: definition.event_names().join(", "),
            });
        }

        let current = self.current_state();
        let candidates = definition.transitions_for(event, Some(current.as_str()));
        if candidates.is_empty() {
            return Err(FsmError::NoTransition {
                event: event.to_string(),
                state: current,
            });
        }

        let rule = GuardEvaluator::select(candidates, self.target(), &args)?.ok_or_else(|| {
            FsmError::NoUnguardedTransition {
                event: event.to_string(),
                state: current.clone(),
            }
        })?;

        let transition = Transition::new(rule, args);
        {
            let mut state = self.inner.state.lock();
            if !state.active.is_empty() && rule.to_state != state.current_state {
                return Err(FsmError::ConcurrentTransition {
                    current: state.current_state.clone(),
                    to: rule.to_state.clone(),
                    active: state.active.len(),
                });
            }
            state.active.push(transition.clone());
        }

        tracing::debug!(
            id = %transition.id(),
            "sending {} ({} -> {})",
            event,
            rule.from_state,
            rule.to_state
        );

        let task = tokio::spawn(perform(self.clone(), transition.clone()));
        Ok(TransitionHandle::new(transition, task))
    }

    /// True if the current state is `name_or_prefix` or lives under it.
    pub fn in_state(&self, name_or_prefix: &str) -> bool {
        self.definition()
            .is_in(&self.current_state(), name_or_prefix)
    }

    /// Probes whether some transition out of the current state would enter
    /// `state` right now, without running it.
    pub fn can_enter_state(&self, state: &str) -> Result<bool, FsmError> {
        let definition = self.definition();
        let current = definition.lookup_state(&self.current_state())?;

        for id in &current.exit_transitions {
            let rule = definition.transition(*id);
            if rule.to_state != state {
                continue;
            }
            let ctx = rule.guard_context(&[]);
            if GuardEvaluator::evaluate_opt(rule.guard(), self.target(), &ctx)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// `isIn<Name>` accessors for every namespace and state, with their
    /// current values.
    pub fn state_accessors(&self) -> Vec<(String, bool)> {
        let definition = self.definition();
        let current = self.current_state();
        let mut accessors: Vec<(String, bool)> = Vec::new();

        for name in definition
            .state_namespaces()
            .iter()
            .chain(definition.state_names())
        {
            let accessor = accessor_name(name);
            if accessors.iter().any(|(existing, _)| *existing == accessor) {
                continue;
            }
            accessors.push((accessor, definition.is_in(&current, name)));
        }

        accessors
    }

    /// Aborts a transition and drops it from the active set.
    pub fn abort(&self, transition: &Transition) {
        transition.abort();
        self.release(transition);
    }

    /// Aborts every active transition except `keep`.
    pub fn abort_active_transitions(&self, keep: Option<&Transition>) {
        let aborted: Vec<Transition> = {
            let mut state = self.inner.state.lock();
            let (kept, aborted): (Vec<Transition>, Vec<Transition>) = state
                .active
                .drain(..)
                .partition(|t| Some(t) == keep);
            state.active = kept;
            aborted
        };

        for transition in aborted {
            transition.abort();
        }
    }

    pub(crate) fn activate(&self, transition: &Transition) {
        let mut state = self.inner.state.lock();
        if !state.active.contains(transition) {
            state.active.push(transition.clone());
        }
    }

    pub(crate) fn commit(&self, transition: &Transition) {
        let mut state = self.inner.state.lock();
        tracing::debug!(
            id = %transition.id(),
            "committing state {} -> {}",
            state.current_state,
            transition.to_state()
        );
        state.current_state = transition.to_state().to_string();
    }

    pub(crate) fn release(&self, transition: &Transition) {
        self.inner
            .state
            .lock()
            .active
            .retain(|t| t != transition);
    }

    /// Aborts the remaining work and dispatches the error event for a
    /// transition that failed or had rejected callbacks.
    pub(crate) async fn recover(&self, failed: &Transition) {
        let options = self.options();

        if failed.event() == options.error_event {
            let reason = format!("the {} event itself failed", options.error_event);
            tracing::error!(id = %failed.id(), "{}", reason);
            failed.set_recovery(Recovery::Unhandled { reason });
            return;
        }

        if !options.dispatch_error_event {
            failed.set_recovery(Recovery::Unhandled {
                reason: "error event dispatch is disabled".to_string(),
            });
            return;
        }

        self.abort_active_transitions(None);

        let error = failed.error().unwrap_or_else(|| {
            failed
                .all_rejections()
                .into_iter()
                .map(|(phase, key, err)| format!("{} {}: {}", phase, key, err))
                .collect::<Vec<_>>()
                .join("; ")
        });
        let payload = json!({
            "error": error,
            "transition": failed.describe(),
        });

        let outcome = match self.send(&options.error_event, vec![payload]) {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };

        let recovery = match outcome {
            Ok(transition) => {
                tracing::info!(
                    id = %failed.id(),
                    "recovered from failed {} into '{}'",
                    failed.event(),
                    transition.to_state()
                );
                Recovery::Dispatched {
                    to_state: transition.to_state().to_string(),
                }
            }
            Err(e) => {
                tracing::error!(
                    id = %failed.id(),
                    "unhandled failure of {}: {}",
                    failed.event(),
                    e
                );
                Recovery::Unhandled {
                    reason: e.to_string(),
                }
            }
        };

        failed.set_recovery(recovery);
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Machine")
            .field("current_state", &state.current_state)
            .field("active", &state.active.len())
            .field("checksum", &self.inner.definition.checksum())
            .finish()
    }
}

/// Converts a state name or namespace into its `isIn` accessor name.
///
/// `loading.partial` becomes `isInLoadingPartial`.
pub fn accessor_name(name: &str) -> String {
    let mut accessor = String::from("isIn");
    let mut upper = true;

    for c in name.chars() {
        if matches!(c, '.' | '_' | '-' | ' ') {
            upper = true;
        } else if upper {
            accessor.extend(c.to_uppercase());
            upper = false;
        } else {
            accessor.push(c);
        }
    }

    accessor
}

/// An entity that owns a machine and exposes its state.
pub trait Stateful {
    fn machine(&self) -> &Machine;

    fn send_state_event(&self, event: &str, args: Vec<Value>) -> Result<TransitionHandle, FsmError> {
        self.machine().send(event, args)
    }

    fn current_state(&self) -> String {
        self.machine().current_state()
    }

    /// True while a transition is running.
    fn is_loading(&self) -> bool {
        self.machine().is_transitioning()
    }

    fn in_state(&self, name_or_prefix: &str) -> bool {
        self.machine().in_state(name_or_prefix)
    }

    fn can_enter_state(&self, state: &str) -> Result<bool, FsmError> {
        self.machine().can_enter_state(state)
    }
}
