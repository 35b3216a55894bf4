//! Core error types.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors from the definition compiler and the state machine runtime.
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("schema error: {reason}")]
    Schema { reason: String },

    #[error("malformed definition: {reason}")]
    MalformedPayload { reason: String },

    #[error(
        "you must specify transition states using either form: from: \"state\", to: \"state\" \
         or fromState: \"toState\" not both (event '{event}')"
    )]
    AmbiguousFromTo { event: String },

    #[error("you must specify states to transition from and to in transitions of event '{event}'")]
    MissingFromTo { event: String },

    #[error(
        "only one fromState: \"toState\" pair can be specified per transition of event '{event}', \
         found {count}; use the from: [\"states\"], to: \"state\" form instead"
    )]
    MultipleStatePairs { event: String, count: usize },

    #[error(
        "an explicit list of known states was defined but it does not contain the initial \
         state '{initial}'"
    )]
    InitialStateNotKnown { initial: String },

    #[error("'{state}' is not a defined state, add it to the list of known states")]
    UnknownState { state: String },

    #[error("there are no states or substates defined matching the prefix '{prefix}'")]
    NoMatchingStates { prefix: String },

    #[error("initial state '{initial}' is not specified in any transitions")]
    InitialStateUnused { initial: String },

    #[error("state '{state}' is not used in any transitions; it is explicitly defined to be used")]
    DeclaredStateUnused { state: String },

    #[error("no events specified, at least one event must be specified to compile the machine")]
    NoEvents,

    #[error(
        "conflicting transition: the '{state}' state is transitioned from in more than one \
         unguarded transition of the '{event}' event"
    )]
    ConflictingTransition { event: String, state: String },

    #[error("invalid guard expression: {reason}")]
    InvalidGuard { reason: String },

    #[error("unknown event '{event}', try one of [{known}]")]
    UnknownEvent { event: String, known: String },

    #[error("no transition is defined for event '{event}' in state '{state}'")]
    NoTransition { event: String, state: String },

    #[error("no unguarded transition was resolved for event '{event}' in state '{state}'")]
    NoUnguardedTransition { event: String, state: String },

    #[error("expected guard property '{property}' on the target to be defined")]
    UndefinedGuard { property: String },

    #[error(
        "unable to transition out of '{current}' state to '{to}' state while {active} \
         transition(s) are active"
    )]
    ConcurrentTransition {
        current: String,
        to: String,
        active: usize,
    },

    #[error("callback '{name}' for {phase} is not defined on the target")]
    MissingCallback { name: String, phase: String },

    #[error("transition task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FsmError {
    /// Returns true for errors raised while compiling a definition.
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            FsmError::Schema { .. }
                | FsmError::MalformedPayload { .. }
                | FsmError::AmbiguousFromTo { .. }
                | FsmError::MissingFromTo { .. }
                | FsmError::MultipleStatePairs { .. }
                | FsmError::InitialStateNotKnown { .. }
                | FsmError::UnknownState { .. }
                | FsmError::InitialStateUnused { .. }
                | FsmError::DeclaredStateUnused { .. }
                | FsmError::NoEvents
                | FsmError::ConflictingTransition { .. }
                | FsmError::InvalidGuard { .. }
        )
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            FsmError::Schema { .. } => "SCHEMA_ERROR",
            FsmError::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            FsmError::AmbiguousFromTo { .. } => "AMBIGUOUS_FROM_TO",
            FsmError::MissingFromTo { .. } => "MISSING_FROM_TO",
            FsmError::MultipleStatePairs { .. } => "MULTIPLE_STATE_PAIRS",
            FsmError::InitialStateNotKnown { .. } => "INITIAL_STATE_NOT_KNOWN",
            FsmError::UnknownState { .. } => "UNKNOWN_STATE",
            FsmError::NoMatchingStates { .. } => "NO_MATCHING_STATES",
            FsmError::InitialStateUnused { .. } => "INITIAL_STATE_UNUSED",
            FsmError::DeclaredStateUnused { .. } => "DECLARED_STATE_UNUSED",
            FsmError::NoEvents => "NO_EVENTS",
            FsmError::ConflictingTransition { .. } => "CONFLICTING_TRANSITION",
            FsmError::InvalidGuard { .. } => "INVALID_GUARD",
            FsmError::UnknownEvent { .. } => "UNKNOWN_EVENT",
            FsmError::NoTransition { .. } => "NO_TRANSITION",
            FsmError::NoUnguardedTransition { .. } => "NO_UNGUARDED_TRANSITION",
            FsmError::UndefinedGuard { .. } => "UNDEFINED_GUARD",
            FsmError::ConcurrentTransition { .. } => "CONCURRENT_TRANSITION",
            FsmError::MissingCallback { .. } => "MISSING_CALLBACK",
            FsmError::Join(_) => "TASK_FAILED",
            FsmError::Json(_) => "BAD_REQUEST",
        }
    }

    pub(crate) fn schema(reason: impl Into<String>) -> Self {
        FsmError::Schema {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        FsmError::MalformedPayload {
            reason: reason.into(),
        }
    }
}

/// Failure of a single lifecycle callback.
///
/// Recorded in the rejection map of the phase it ran in; never stops the
/// phase or the pipeline by itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// The canonical rejection a callback returns to refuse a transition.
    pub fn rejected() -> Self {
        Self::new("rejected transition")
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CallbackError {}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}
