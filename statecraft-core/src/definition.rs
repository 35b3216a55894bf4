//! State machine definition compiler.
//!
//! Definitions use a loosely structured JSON DSL with aliased keys and
//! shorthand forms:
//!
//! ```json
//! {
//!   "states": {
//!     "initialState": "idle",
//!     "knownStates": ["idle", "loading.partial", "loading.full", "failed"],
//!     "failed": { "didEnter": "reportFailure" }
//!   },
//!   "events": {
//!     "load": {
//!       "before": "resetProgress",
//!       "transitions": [
//!         { "from": "idle", "to": "loading.full", "if": "online" },
//!         { "idle": "loading.partial" }
//!       ]
//!     },
//!     "error": { "transition": { "$all": "failed" } }
//!   }
//! }
//! ```
//!
//! Compilation runs in a fixed order: the states declaration, per-state
//! callback definitions, events and their declared ("wound") transitions,
//! states implied by transitions, and finally unwinding every wound
//! transition into one [`TransitionRule`] per (event, from-state) pair.
//! Any error aborts compilation; there is no partially compiled definition.

use crate::alias::{self, Normalized, SchemaKind};
use crate::error::FsmError;
use crate::guard::Guard;
use crate::target::GuardContext;
use crate::transition::Phase;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Stands for every known state in a from-state list.
pub const ALL_MACRO: &str = "$all";
/// As a to-state, stay in the from-state; in a from-state list, same as `$all`.
pub const SAME_MACRO: &str = "$same";
/// The definition's initial state.
pub const INITIAL_MACRO: &str = "$initial";
/// Initial state used when the payload does not declare one.
pub const DEFAULT_INITIAL_STATE: &str = "initialized";

/// Index of a state in [`Definition::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct StateId(pub(crate) usize);

/// Index of a transition in [`Definition::transitions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TransitionId(pub(crate) usize);

/// Named callback lists attached to a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Callbacks {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before_event: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub will_exit: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub will_enter: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub did_exit: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub did_enter: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub after_event: Vec<String>,
}

impl Callbacks {
    fn from_normalized(def: &mut Normalized) -> Result<Self, FsmError> {
        Ok(Self {
            before_event: alias::names(def.take_sequence("beforeEvent"), "callback")?,
            will_exit: alias::names(def.take_sequence("willExit"), "callback")?,
            will_enter: alias::names(def.take_sequence("willEnter"), "callback")?,
            did_exit: alias::names(def.take_sequence("didExit"), "callback")?,
            did_enter: alias::names(def.take_sequence("didEnter"), "callback")?,
            after_event: alias::names(def.take_sequence("afterEvent"), "callback")?,
        })
    }

    /// Callback names declared for a lifecycle phase.
    pub fn for_phase(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::BeforeEvent => &self.before_event,
            Phase::WillExit => &self.will_exit,
            Phase::WillEnter => &self.will_enter,
            Phase::DidExit => &self.did_exit,
            Phase::DidEnter => &self.did_enter,
            Phase::AfterEvent => &self.after_event,
            Phase::Activate | Phase::CommitState | Phase::Deactivate => &[],
        }
    }
}

/// A state in the machine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub name: String,
    pub will_enter: Vec<String>,
    pub did_enter: Vec<String>,
    pub will_exit: Vec<String>,
    pub did_exit: Vec<String>,
    /// Transitions whose to-state is this state.
    pub enter_transitions: Vec<TransitionId>,
    /// Transitions whose from-state is this state.
    pub exit_transitions: Vec<TransitionId>,
}

impl State {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            will_enter: Vec::new(),
            did_enter: Vec::new(),
            will_exit: Vec::new(),
            did_exit: Vec::new(),
            enter_transitions: Vec::new(),
            exit_transitions: Vec::new(),
        }
    }

    fn apply(&mut self, mut def: Normalized) -> Result<(), FsmError> {
        self.will_enter = alias::names(def.take_sequence("willEnter"), "callback")?;
        self.did_enter = alias::names(def.take_sequence("didEnter"), "callback")?;
        self.will_exit = alias::names(def.take_sequence("willExit"), "callback")?;
        self.did_exit = alias::names(def.take_sequence("didExit"), "callback")?;
        Ok(())
    }

    /// Callback names this state declares for a lifecycle phase.
    pub fn callbacks_for(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::WillEnter => &self.will_enter,
            Phase::DidEnter => &self.did_enter,
            Phase::WillExit => &self.will_exit,
            Phase::DidExit => &self.did_exit,
            _ => &[],
        }
    }
}

/// An event in the machine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    pub before_event: Vec<String>,
    pub after_event: Vec<String>,
    /// Unwound transitions of this event, in declaration order.
    pub transitions: Vec<TransitionId>,
}

impl Event {
    /// Callback names this event declares for a lifecycle phase.
    pub fn callbacks_for(&self, phase: Phase) -> &[String] {
        match phase {
            Phase::BeforeEvent => &self.before_event,
            Phase::AfterEvent => &self.after_event,
            _ => &[],
        }
    }
}

/// A declared transition before its from-states are expanded.
#[derive(Debug, Clone)]
struct WoundTransition {
    from_states: Vec<String>,
    to_state: String,
    callbacks: Callbacks,
    guard: Option<Guard>,
}

/// One concrete (event, from-state, to-state) transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRule {
    pub id: TransitionId,
    pub event: String,
    pub from_state: String,
    pub to_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
    pub callbacks: Callbacks,
}

impl TransitionRule {
    pub fn guard(&self) -> Option<&Guard> {
        self.guard.as_ref()
    }

    pub fn is_guarded(&self) -> bool {
        self.guard.is_some()
    }

    /// Context handed to guard predicates when this rule is considered.
    pub fn guard_context(&self, args: &[Value]) -> GuardContext {
        GuardContext {
            event: self.event.clone(),
            from_state: self.from_state.clone(),
            to_state: self.to_state.clone(),
            args: args.to_vec(),
        }
    }
}

/// Compiled, immutable state/event/transition graph.
#[derive(Debug, Clone)]
pub struct Definition {
    initial_state: String,
    is_explicit: bool,
    states: Vec<State>,
    state_names: Vec<String>,
    state_namespaces: Vec<String>,
    events: Vec<Event>,
    event_names: Vec<String>,
    transitions: Vec<TransitionRule>,
    state_by_name: HashMap<String, StateId>,
    states_by_prefix: HashMap<String, Vec<StateId>>,
    event_by_name: HashMap<String, usize>,
    transitions_by_event: HashMap<String, Vec<TransitionId>>,
    transitions_by_event_from: HashMap<(String, String), Vec<TransitionId>>,
    checksum: String,
}

/// Serializable overview of a compiled definition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionSummary {
    pub initial_state: String,
    pub is_explicit: bool,
    pub state_names: Vec<String>,
    pub state_namespaces: Vec<String>,
    pub event_names: Vec<String>,
    pub transition_count: usize,
    pub checksum: String,
}

impl Definition {
    /// Compiles a definition from a JSON payload.
    pub fn from_json(json: &Value) -> Result<Self, FsmError> {
        Self::compile(json.clone())
    }

    /// Compiles a definition, consuming the payload.
    pub fn compile(payload: Value) -> Result<Self, FsmError> {
        let json_bytes = serde_json::to_vec(&payload)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        let mut root = match payload {
            Value::Object(map) => map,
            _ => {
                return Err(FsmError::malformed(
                    "the definition must be an object containing an \"events\" property",
                ))
            }
        };

        let events = match root.shift_remove("events") {
            None | Some(Value::Null) => return Err(FsmError::malformed("\"events\" must be defined")),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(FsmError::malformed("\"events\" must be an object")),
        };

        let mut states = match root.shift_remove("states") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(FsmError::malformed("\"states\" must be an object")),
        };

        let states_def = alias::normalize_map(&mut states, SchemaKind::States);
        let initial_state = match states_def.scalar("initialState") {
            None => DEFAULT_INITIAL_STATE.to_string(),
            Some(Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(FsmError::schema(format!(
                    "expected initialState to be a string, got {}",
                    other
                )))
            }
        };
        let known_states = alias::names(states_def.sequence("knownStates").to_vec(), "known state")?;

        let mut compiler = Compiler::new(initial_state);
        compiler.allocate_known_states(&known_states)?;
        compiler.apply_state_definitions(states)?;
        compiler.compile_events(events)?;
        compiler.extract_states_from_transitions()?;
        compiler.unwind_transitions()?;

        let definition = compiler.finish(checksum);
        tracing::debug!(
            states = definition.states.len(),
            events = definition.events.len(),
            transitions = definition.transitions.len(),
            "compiled definition {}",
            definition.checksum
        );

        Ok(definition)
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    /// True when the payload enumerated its known states up front.
    pub fn is_explicit(&self) -> bool {
        self.is_explicit
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state_names(&self) -> &[String] {
        &self.state_names
    }

    /// Distinct dot-prefixes across all state names.
    pub fn state_namespaces(&self) -> &[String] {
        &self.state_namespaces
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn event_names(&self) -> &[String] {
        &self.event_names
    }

    pub fn transitions(&self) -> &[TransitionRule] {
        &self.transitions
    }

    pub fn transition(&self, id: TransitionId) -> &TransitionRule {
        &self.transitions[id.0]
    }

    /// CRC32C of the payload the definition was compiled from.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state_by_name.contains_key(name)
    }

    /// Looks up a state by name; `$initial` resolves to the initial state.
    pub fn lookup_state(&self, name: &str) -> Result<&State, FsmError> {
        let name = if name == INITIAL_MACRO {
            self.initial_state.as_str()
        } else {
            name
        };

        self.state_by_name
            .get(name)
            .map(|id| &self.states[id.0])
            .ok_or_else(|| FsmError::UnknownState {
                state: name.to_string(),
            })
    }

    /// Returns the state named `prefix` (if any) followed by every state
    /// under that namespace.
    pub fn lookup_states(&self, prefix: &str) -> Result<Vec<&State>, FsmError> {
        let mut found = Vec::new();

        if let Some(id) = self.state_by_name.get(prefix) {
            found.push(&self.states[id.0]);
        }

        if let Some(ids) = self.states_by_prefix.get(prefix) {
            found.extend(ids.iter().map(|id| &self.states[id.0]));
        }

        if found.is_empty() {
            return Err(FsmError::NoMatchingStates {
                prefix: prefix.to_string(),
            });
        }

        Ok(found)
    }

    /// Returns true if `state` is `name_or_prefix` or lives under that namespace.
    pub fn is_in(&self, state: &str, name_or_prefix: &str) -> bool {
        if state == name_or_prefix {
            return true;
        }

        match (
            self.states_by_prefix.get(name_or_prefix),
            self.state_by_name.get(state),
        ) {
            (Some(ids), Some(id)) => ids.contains(id),
            _ => false,
        }
    }

    pub fn lookup_event(&self, name: &str) -> Option<&Event> {
        self.event_by_name.get(name).map(|idx| &self.events[*idx])
    }

    /// Candidate transitions for an event, optionally narrowed to one
    /// from-state (`$initial` allowed), in declaration order.
    pub fn transitions_for(&self, event: &str, from_state: Option<&str>) -> Vec<&TransitionRule> {
        let ids = match from_state {
            Some(from) => {
                let from = if from == INITIAL_MACRO {
                    self.initial_state.as_str()
                } else {
                    from
                };
                self.transitions_by_event_from
                    .get(&(event.to_string(), from.to_string()))
            }
            None => self.transitions_by_event.get(event),
        };

        ids.map(|ids| ids.iter().map(|id| self.transition(*id)).collect())
            .unwrap_or_default()
    }

    /// Returns all events that have a transition out of the given state.
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        let mut events: Vec<&str> = Vec::new();
        if let Ok(state) = self.lookup_state(state) {
            for id in &state.exit_transitions {
                let event = self.transition(*id).event.as_str();
                if !events.contains(&event) {
                    events.push(event);
                }
            }
        }
        events
    }

    pub fn summary(&self) -> DefinitionSummary {
        DefinitionSummary {
            initial_state: self.initial_state.clone(),
            is_explicit: self.is_explicit,
            state_names: self.state_names.clone(),
            state_namespaces: self.state_namespaces.clone(),
            event_names: self.event_names.clone(),
            transition_count: self.transitions.len(),
            checksum: self.checksum.clone(),
        }
    }
}

/// Working state while a definition is being compiled.
struct Compiler {
    initial_state: String,
    is_explicit: bool,
    states: Vec<State>,
    state_names: Vec<String>,
    state_namespaces: Vec<String>,
    state_by_name: HashMap<String, StateId>,
    states_by_prefix: HashMap<String, Vec<StateId>>,
    events: Vec<Event>,
    event_by_name: HashMap<String, usize>,
    wound: Vec<Vec<WoundTransition>>,
    transitions: Vec<TransitionRule>,
    transitions_by_event: HashMap<String, Vec<TransitionId>>,
    transitions_by_event_from: HashMap<(String, String), Vec<TransitionId>>,
}

impl Compiler {
    fn new(initial_state: String) -> Self {
        Self {
            initial_state,
            is_explicit: false,
            states: Vec::new(),
            state_names: Vec::new(),
            state_namespaces: Vec::new(),
            state_by_name: HashMap::new(),
            states_by_prefix: HashMap::new(),
            events: Vec::new(),
            event_by_name: HashMap::new(),
            wound: Vec::new(),
            transitions: Vec::new(),
            transitions_by_event: HashMap::new(),
            transitions_by_event_from: HashMap::new(),
        }
    }

    fn allocate_known_states(&mut self, known: &[String]) -> Result<(), FsmError> {
        if known.is_empty() {
            return Ok(());
        }

        self.is_explicit = true;

        if !known.contains(&self.initial_state) {
            return Err(FsmError::InitialStateNotKnown {
                initial: self.initial_state.clone(),
            });
        }

        let initial = self.initial_state.clone();
        self.allocate_state(&initial);
        for name in known {
            self.allocate_state(name);
        }

        Ok(())
    }

    fn apply_state_definitions(&mut self, states: Map<String, Value>) -> Result<(), FsmError> {
        for (key, payload) in states {
            let name = if key == INITIAL_MACRO {
                self.initial_state.clone()
            } else {
                key
            };
            self.update_state(&name, Some(payload))?;
        }
        Ok(())
    }

    /// Returns the existing state or allocates it, indexing every proper
    /// dot-prefix of its name.
    fn allocate_state(&mut self, name: &str) -> StateId {
        if let Some(id) = self.state_by_name.get(name) {
            return *id;
        }

        let id = StateId(self.states.len());
        self.states.push(State::new(name));
        self.state_names.push(name.to_string());
        self.state_by_name.insert(name.to_string(), id);

        let parts: Vec<&str> = name.split('.').collect();
        for end in 1..parts.len() {
            let prefix = parts[..end].join(".");
            if !self.state_namespaces.contains(&prefix) {
                self.state_namespaces.push(prefix.clone());
            }
            self.states_by_prefix.entry(prefix).or_default().push(id);
        }

        id
    }

    fn update_state(&mut self, name: &str, payload: Option<Value>) -> Result<StateId, FsmError> {
        let id = match self.state_by_name.get(name) {
            Some(id) => *id,
            None if self.is_explicit => {
                return Err(FsmError::UnknownState {
                    state: name.to_string(),
                })
            }
            None => self.allocate_state(name),
        };

        if let Some(mut payload) = payload.filter(|p| !p.is_null()) {
            let def = alias::normalize(&mut payload, SchemaKind::State)?;
            self.states[id.0].apply(def)?;
        }

        Ok(id)
    }

    fn compile_events(&mut self, events: Map<String, Value>) -> Result<(), FsmError> {
        for (name, mut payload) in events {
            let mut def = alias::normalize(&mut payload, SchemaKind::Event)?;

            let mut wound = Vec::new();
            for entry in def.take_sequence("transitions") {
                wound.push(wound_transition(&name, entry)?);
            }

            let event = Event {
                name: name.clone(),
                before_event: alias::names(def.take_sequence("beforeEvent"), "callback")?,
                after_event: alias::names(def.take_sequence("afterEvent"), "callback")?,
                transitions: Vec::new(),
            };

            self.event_by_name.insert(name, self.events.len());
            self.events.push(event);
            self.wound.push(wound);
        }

        if self.events.is_empty() {
            return Err(FsmError::NoEvents);
        }

        Ok(())
    }

    fn extract_states_from_transitions(&mut self) -> Result<(), FsmError> {
        let mut wound = std::mem::take(&mut self.wound);
        let mut used: HashSet<String> = HashSet::new();

        for transition in wound.iter_mut().flatten() {
            for from in transition.from_states.iter_mut() {
                if from == ALL_MACRO || from == SAME_MACRO {
                    continue;
                }

                if from == INITIAL_MACRO {
                    *from = self.initial_state.clone();
                }

                self.update_state(from, None)?;
                used.insert(from.clone());
            }

            if transition.to_state == INITIAL_MACRO {
                transition.to_state = self.initial_state.clone();
            }

            if transition.to_state != SAME_MACRO {
                self.update_state(&transition.to_state, None)?;
                used.insert(transition.to_state.clone());
            }
        }

        self.wound = wound;

        if !used.contains(&self.initial_state) {
            return Err(FsmError::InitialStateUnused {
                initial: self.initial_state.clone(),
            });
        }

        if self.is_explicit {
            if let Some(unused) = self.state_names.iter().find(|name| !used.contains(*name)) {
                return Err(FsmError::DeclaredStateUnused {
                    state: unused.clone(),
                });
            }
        }

        Ok(())
    }

    fn unwind_transitions(&mut self) -> Result<(), FsmError> {
        let wound = std::mem::take(&mut self.wound);

        for (event_idx, transitions) in wound.into_iter().enumerate() {
            let event_name = self.events[event_idx].name.clone();
            let mut unguarded: HashMap<String, usize> = HashMap::new();

            for transition in transitions {
                let from_states = if transition
                    .from_states
                    .iter()
                    .any(|s| s == ALL_MACRO || s == SAME_MACRO)
                {
                    self.state_names.clone()
                } else {
                    transition.from_states.clone()
                };

                for from in from_states {
                    if transition.guard.is_none() {
                        let count = unguarded.entry(from.clone()).or_insert(0);
                        *count += 1;
                        if *count > 1 {
                            return Err(FsmError::ConflictingTransition {
                                event: event_name,
                                state: from,
                            });
                        }
                    }

                    let to = if transition.to_state == SAME_MACRO {
                        from.clone()
                    } else {
                        transition.to_state.clone()
                    };

                    self.push_transition(event_idx, &event_name, from, to, &transition)?;
                }
            }
        }

        Ok(())
    }

    fn push_transition(
        &mut self,
        event_idx: usize,
        event_name: &str,
        from: String,
        to: String,
        wound: &WoundTransition,
    ) -> Result<(), FsmError> {
        let from_id = self.state_id(&from)?;
        let to_id = self.state_id(&to)?;
        let id = TransitionId(self.transitions.len());

        self.states[from_id.0].exit_transitions.push(id);
        self.states[to_id.0].enter_transitions.push(id);
        self.events[event_idx].transitions.push(id);
        self.transitions_by_event
            .entry(event_name.to_string())
            .or_default()
            .push(id);
        self.transitions_by_event_from
            .entry((event_name.to_string(), from.clone()))
            .or_default()
            .push(id);

        self.transitions.push(TransitionRule {
            id,
            event: event_name.to_string(),
            from_state: from,
            to_state: to,
            guard: wound.guard.clone(),
            callbacks: wound.callbacks.clone(),
        });

        Ok(())
    }

    fn state_id(&self, name: &str) -> Result<StateId, FsmError> {
        self.state_by_name
            .get(name)
            .copied()
            .ok_or_else(|| FsmError::UnknownState {
                state: name.to_string(),
            })
    }

    fn finish(self, checksum: String) -> Definition {
        let event_names = self.events.iter().map(|e| e.name.clone()).collect();

        Definition {
            initial_state: self.initial_state,
            is_explicit: self.is_explicit,
            states: self.states,
            state_names: self.state_names,
            state_namespaces: self.state_namespaces,
            events: self.events,
            event_names,
            transitions: self.transitions,
            state_by_name: self.state_by_name,
            states_by_prefix: self.states_by_prefix,
            event_by_name: self.event_by_name,
            transitions_by_event: self.transitions_by_event,
            transitions_by_event_from: self.transitions_by_event_from,
            checksum,
        }
    }
}

/// Normalizes one entry of an event's transition list.
fn wound_transition(event: &str, mut payload: Value) -> Result<WoundTransition, FsmError> {
    let mut def = alias::normalize(&mut payload, SchemaKind::Transition)?;

    let from_states = alias::names(def.take_sequence("fromStates"), "from state")?;
    let to_state = match def.take_scalar("toState") {
        None => None,
        Some(Value::String(name)) => Some(name),
        Some(other) => {
            return Err(FsmError::schema(format!(
                "expected to-state of event '{}' to be a string, got {}",
                event, other
            )))
        }
    };

    let guard = match (def.take_scalar("doIf"), def.take_scalar("doUnless")) {
        (Some(when), unless) => {
            if unless.is_some() {
                tracing::warn!(
                    event,
                    "transition declares both doIf and doUnless; only doIf is honored"
                );
            }
            Some(Guard::when(guard_source(event, &when)?)?)
        }
        (None, Some(unless)) => Some(Guard::unless(guard_source(event, &unless)?)?),
        (None, None) => None,
    };

    let callbacks = Callbacks::from_normalized(&mut def)?;

    // Whatever the schema did not consume is the { fromState: toState } form.
    let data: Vec<(String, Value)> = match payload {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Vec::new(),
    };

    let by_name = !from_states.is_empty() && to_state.is_some();
    let by_pair = !data.is_empty();

    if by_name && by_pair {
        return Err(FsmError::AmbiguousFromTo {
            event: event.to_string(),
        });
    }

    if by_pair && data.len() > 1 {
        return Err(FsmError::MultipleStatePairs {
            event: event.to_string(),
            count: data.len(),
        });
    }

    let (from_states, to_state) = match (data.into_iter().next(), to_state) {
        (Some((from, Value::String(to))), _) => (vec![from], to),
        (Some((from, other)), _) => {
            return Err(FsmError::schema(format!(
                "expected to-state for '{}' in event '{}' to be a string, got {}",
                from, event, other
            )))
        }
        (None, Some(to)) if by_name => (from_states, to),
        (None, _) => {
            return Err(FsmError::MissingFromTo {
                event: event.to_string(),
            })
        }
    };

    Ok(WoundTransition {
        from_states,
        to_state,
        callbacks,
        guard,
    })
}

fn guard_source<'a>(event: &str, value: &'a Value) -> Result<&'a str, FsmError> {
    value.as_str().ok_or_else(|| FsmError::InvalidGuard {
        reason: format!(
            "guard of event '{}' must name a target property, got {}",
            event, value
        ),
    })
}
