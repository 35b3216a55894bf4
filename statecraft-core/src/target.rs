//! The host entity guards and callbacks are resolved against.
//!
//! The core never assumes a concrete host type. It asks a [`Target`] for a
//! readable property (guards) or a callable member (lifecycle callbacks) by
//! name. [`MapTarget`] is a ready-made adapter backed by concurrent maps.

use crate::error::CallbackError;
use crate::transition::Transition;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Outcome of one lifecycle callback.
pub type CallbackResult = Result<Value, CallbackError>;

/// What a guard predicate sees when it is evaluated.
#[derive(Debug, Clone)]
pub struct GuardContext {
    pub event: String,
    pub from_state: String,
    pub to_state: String,
    pub args: Vec<Value>,
}

/// A boolean check over the guard context.
#[derive(Clone)]
pub struct Predicate(Arc<dyn Fn(&GuardContext) -> bool + Send + Sync>);

impl Predicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&GuardContext) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn check(&self, ctx: &GuardContext) -> bool {
        (self.0)(ctx)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Predicate(..)")
    }
}

/// An asynchronous lifecycle callback invoked with the running transition.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Transition) -> BoxFuture<'static, CallbackResult> + Send + Sync>);

impl Callback {
    /// Wraps an async callback.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Transition) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        Self(Arc::new(
            move |transition| -> BoxFuture<'static, CallbackResult> { Box::pin(f(transition)) },
        ))
    }

    /// Wraps a synchronous callback; its result becomes an already-settled outcome.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Transition) -> CallbackResult + Send + Sync + 'static,
    {
        Self(Arc::new(move |transition| -> BoxFuture<'static, CallbackResult> {
            let result = f(&transition);
            Box::pin(async move { result })
        }))
    }

    /// A callback that succeeds with `null` and does nothing else.
    pub fn noop() -> Self {
        Self::sync(|_| Ok(Value::Null))
    }

    pub fn call(&self, transition: Transition) -> BoxFuture<'static, CallbackResult> {
        (self.0)(transition)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// A readable member of the target.
#[derive(Debug, Clone)]
pub enum Property {
    Value(Value),
    Predicate(Predicate),
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Property::Value(value)
    }
}

/// Capability interface over the host entity.
pub trait Target: Send + Sync {
    /// Resolves a readable property; `None` means undefined.
    fn property(&self, name: &str) -> Option<Property>;

    /// Resolves a callable member.
    fn callback(&self, name: &str) -> Option<Callback>;
}

/// Target backed by concurrent maps; properties may change at runtime.
#[derive(Default)]
pub struct MapTarget {
    properties: DashMap<String, Property>,
    callbacks: DashMap<String, Callback>,
}

impl MapTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(self, name: impl Into<String>, value: Value) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn with_predicate<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&GuardContext) -> bool + Send + Sync + 'static,
    {
        self.properties
            .insert(name.into(), Property::Predicate(Predicate::new(f)));
        self
    }

    pub fn with_callback<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Transition) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.set_callback(name, Callback::new(f));
        self
    }

    pub fn with_sync_callback<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Transition) -> CallbackResult + Send + Sync + 'static,
    {
        self.set_callback(name, Callback::sync(f));
        self
    }

    pub fn set_property(&self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), Property::Value(value));
    }

    pub fn remove_property(&self, name: &str) {
        self.properties.remove(name);
    }

    pub fn set_callback(&self, name: impl Into<String>, callback: Callback) {
        self.callbacks.insert(name.into(), callback);
    }
}

impl Target for MapTarget {
    fn property(&self, name: &str) -> Option<Property> {
        self.properties.get(name).map(|p| p.value().clone())
    }

    fn callback(&self, name: &str) -> Option<Callback> {
        self.callbacks.get(name).map(|c| c.value().clone())
    }
}

impl fmt::Debug for MapTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapTarget")
            .field("properties", &self.properties.len())
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> GuardContext {
        GuardContext {
            event: "go".into(),
            from_state: "a".into(),
            to_state: "b".into(),
            args: vec![json!(3)],
        }
    }

    #[test]
    fn test_properties_resolve_and_change() {
        let target = MapTarget::new().with_property("ready", json!(false));

        assert!(matches!(
            target.property("ready"),
            Some(Property::Value(Value::Bool(false)))
        ));

        target.set_property("ready", json!(true));
        assert!(matches!(
            target.property("ready"),
            Some(Property::Value(Value::Bool(true)))
        ));

        target.remove_property("ready");
        assert!(target.property("ready").is_none());
    }

    #[test]
    fn test_predicate_property() {
        let target = MapTarget::new().with_predicate("hasArgs", |ctx| !ctx.args.is_empty());

        match target.property("hasArgs") {
            Some(Property::Predicate(p)) => assert!(p.check(&ctx())),
            other => panic!("unexpected property: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_callback() {
        let target = MapTarget::new().with_sync_callback("known", |_| Ok(json!(1)));
        assert!(target.callback("known").is_some());
        assert!(target.callback("unknown").is_none());
    }
}
