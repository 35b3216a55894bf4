//! Alias resolution for definition payloads.
//!
//! Every configuration node accepts several spellings of the same field. A
//! static schema table maps each canonical field to its aliases (in priority
//! order) and says whether the value must be coerced into a sequence.
//! [`normalize`] consumes the recognized keys from the source object so the
//! remainder can be inspected as leftover data:
//!
//! ```json
//! { "initialState": "ready", "knownStates": "ready", "ready": { "willEnter": "notify" } }
//! ```
//!
//! normalized against [`SchemaKind::States`] yields
//! `{ initialState: "ready", knownStates: ["ready"] }` and leaves
//! `{ "ready": { "willEnter": "notify" } }` behind.

use crate::error::FsmError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// One row of a schema table.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub sequence: bool,
}

const fn field(
    canonical: &'static str,
    aliases: &'static [&'static str],
    sequence: bool,
) -> FieldSpec {
    FieldSpec {
        canonical,
        aliases,
        sequence,
    }
}

const TRANSITIONS: &[&str] = &["transition", "transitions"];
const INITIAL_STATES: &[&str] = &["initialState"];
const KNOWN_STATES: &[&str] = &["explicitStates", "knownStates"];
const BEFORES: &[&str] = &["before", "beforeEvent"];
const AFTERS: &[&str] = &["after", "afterEvent"];
const WILL_ENTERS: &[&str] = &["willEnter"];
const DID_ENTERS: &[&str] = &["didEnter", "enter", "action"];
const WILL_EXITS: &[&str] = &["willExit"];
const DID_EXITS: &[&str] = &["didExit", "exit"];
const DO_IFS: &[&str] = &["doIf", "guard", "if"];
const DO_UNLESSES: &[&str] = &["doUnless", "unless"];
const FROMS: &[&str] = &["from", "fromState", "fromStates"];
const TOS: &[&str] = &["to", "toState"];

const TRANSITION_FIELDS: &[FieldSpec] = &[
    field("fromStates", FROMS, true),
    field("toState", TOS, false),
    field("beforeEvent", BEFORES, true),
    field("afterEvent", AFTERS, true),
    field("willEnter", WILL_ENTERS, true),
    field("didEnter", DID_ENTERS, true),
    field("willExit", WILL_EXITS, true),
    field("didExit", DID_EXITS, true),
    field("doIf", DO_IFS, false),
    field("doUnless", DO_UNLESSES, false),
];

const EVENT_FIELDS: &[FieldSpec] = &[
    field("beforeEvent", BEFORES, true),
    field("afterEvent", AFTERS, true),
    field("transitions", TRANSITIONS, true),
];

const STATES_FIELDS: &[FieldSpec] = &[
    field("initialState", INITIAL_STATES, false),
    field("knownStates", KNOWN_STATES, true),
];

const STATE_FIELDS: &[FieldSpec] = &[
    field("willEnter", WILL_ENTERS, true),
    field("didEnter", DID_ENTERS, true),
    field("willExit", WILL_EXITS, true),
    field("didExit", DID_EXITS, true),
];

/// The node types a payload is normalized against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    Transition,
    Event,
    States,
    State,
}

impl SchemaKind {
    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            SchemaKind::Transition => TRANSITION_FIELDS,
            SchemaKind::Event => EVENT_FIELDS,
            SchemaKind::States => STATES_FIELDS,
            SchemaKind::State => STATE_FIELDS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchemaKind::Transition => "transition",
            SchemaKind::Event => "event",
            SchemaKind::States => "states",
            SchemaKind::State => "state",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = FsmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transition" => Ok(SchemaKind::Transition),
            "event" => Ok(SchemaKind::Event),
            "states" => Ok(SchemaKind::States),
            "state" => Ok(SchemaKind::State),
            other => Err(FsmError::schema(format!("type is unknown: {}", other))),
        }
    }
}

/// A canonical field value after alias resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Scalar(Option<Value>),
    Sequence(Vec<Value>),
}

/// The canonical view of one payload node.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    fields: HashMap<&'static str, Field>,
}

impl Normalized {
    /// Returns a scalar field, `None` when it was absent or null.
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Field::Scalar(value)) => value.as_ref(),
            _ => None,
        }
    }

    /// Returns a sequence field, empty when it was absent.
    pub fn sequence(&self, name: &str) -> &[Value] {
        match self.fields.get(name) {
            Some(Field::Sequence(values)) => values,
            _ => &[],
        }
    }

    pub fn take_scalar(&mut self, name: &str) -> Option<Value> {
        match self.fields.get_mut(name) {
            Some(Field::Scalar(value)) => value.take(),
            _ => None,
        }
    }

    pub fn take_sequence(&mut self, name: &str) -> Vec<Value> {
        match self.fields.get_mut(name) {
            Some(Field::Sequence(values)) => std::mem::take(values),
            _ => Vec::new(),
        }
    }
}

/// Resolves aliases in `source` against the schema for `kind`.
///
/// Consumed keys are removed from `source`; whatever is left is data the
/// schema does not describe.
pub fn normalize(source: &mut Value, kind: SchemaKind) -> Result<Normalized, FsmError> {
    let map = source
        .as_object_mut()
        .ok_or_else(|| FsmError::schema(format!("expected {} payload object", kind)))?;

    Ok(normalize_map(map, kind))
}

/// Same as [`normalize`] for a map that is already known to be an object.
pub fn normalize_map(map: &mut Map<String, Value>, kind: SchemaKind) -> Normalized {
    let mut normalized = Normalized::default();

    for spec in kind.fields() {
        let value = spec.aliases.iter().find_map(|alias| map.shift_remove(*alias));

        let field = if spec.sequence {
            Field::Sequence(to_sequence(value))
        } else {
            Field::Scalar(value.filter(|v| !v.is_null()))
        };

        normalized.fields.insert(spec.canonical, field);
    }

    normalized
}

fn to_sequence(value: Option<Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values,
        Some(other) => vec![other],
    }
}

/// Converts a list of JSON values into names, rejecting non-strings.
pub(crate) fn names(values: Vec<Value>, what: &str) -> Result<Vec<String>, FsmError> {
    values
        .into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            other => Err(FsmError::schema(format!(
                "expected {} to be a string, got {}",
                what, other
            ))),
        })
        .collect()
}
