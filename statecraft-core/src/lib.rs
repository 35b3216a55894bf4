//! # statecraft-core
//!
//! Declarative finite-state-machine engine.
//!
//! This crate provides:
//! - Alias normalization of loosely structured definition payloads
//! - Definition compilation, validation and lookup indices
//! - Guard expression evaluation against a host target
//! - The runtime machine and its asynchronous callback pipeline

pub mod alias;
pub mod definition;
pub mod error;
pub mod guard;
pub mod machine;
pub mod target;
pub mod transition;

pub use alias::{normalize, Normalized, SchemaKind};
pub use definition::{Definition, DefinitionSummary, Event, State, TransitionRule};
pub use error::{CallbackError, FsmError};
pub use guard::{Guard, GuardEvaluator, GuardExpr};
pub use machine::{accessor_name, Machine, MachineOptions, Stateful};
pub use target::{Callback, CallbackResult, GuardContext, MapTarget, Property, Target};
pub use transition::{
    Phase, PhaseOutcome, Recovery, Transition, TransitionHandle, TransitionReport, TransitionStatus,
};
