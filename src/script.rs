//! Scripted targets and definition file loading.
//!
//! A target file lists property values and canned callback behavior:
//!
//! ```yaml
//! properties:
//!   online: true
//!   cache: { warm: false }
//! callbacks:
//!   prepare: { result: "ready" }
//!   upload: { delay_ms: 200 }
//!   validate: { fail: "payload too large", detail: { limit: 1024 } }
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use statecraft_core::{Callback, CallbackError, Property, Target};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Loads a JSON or YAML document, picking the format from the extension.
pub fn load_document(path: impl AsRef<Path>) -> Result<Value, Box<dyn std::error::Error>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read '{}': {}", path.display(), e))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    let value = if is_yaml {
        serde_yaml::from_str(&content)
            .map_err(|e| format!("failed to parse '{}': {}", path.display(), e))?
    } else {
        serde_json::from_str(&content)
            .map_err(|e| format!("failed to parse '{}': {}", path.display(), e))?
    };

    Ok(value)
}

/// Canned behavior of one callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptCallback {
    /// Value the callback resolves with.
    pub result: Value,
    /// When set, the callback rejects with this message.
    pub fail: Option<String>,
    /// Extra data attached to the rejection.
    pub detail: Option<Value>,
    /// Delay before settling.
    pub delay_ms: u64,
}

impl ScriptCallback {
    fn to_callback(&self) -> Callback {
        let script = self.clone();
        Callback::new(move |_transition| {
            let script = script.clone();
            async move {
                if script.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
                }
                match (script.fail, script.detail) {
                    (Some(message), Some(detail)) => Err(CallbackError::new(message).with_detail(detail)),
                    (Some(message), None) => Err(CallbackError::new(message)),
                    (None, _) => Ok(script.result),
                }
            }
        })
    }
}

/// On-disk shape of a target file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetFile {
    pub properties: BTreeMap<String, Value>,
    pub callbacks: BTreeMap<String, ScriptCallback>,
}

/// A target driven by a target file.
#[derive(Debug, Default)]
pub struct ScriptTarget {
    properties: DashMap<String, Value>,
    callbacks: DashMap<String, ScriptCallback>,
    lenient: bool,
}

impl ScriptTarget {
    pub fn new(file: TargetFile, lenient: bool) -> Self {
        Self {
            properties: file.properties.into_iter().collect(),
            callbacks: file.callbacks.into_iter().collect(),
            lenient,
        }
    }

    /// Loads a target file; `None` gives an empty target.
    pub fn load(path: Option<&Path>, lenient: bool) -> Result<Self, Box<dyn std::error::Error>> {
        let file = match path {
            Some(path) => serde_json::from_value(load_document(path)?)
                .map_err(|e| format!("invalid target file '{}': {}", path.display(), e))?,
            None => TargetFile::default(),
        };
        Ok(Self::new(file, lenient))
    }

    pub fn set_property(&self, name: impl Into<String>, value: Value) {
        self.properties.insert(name.into(), value);
    }

    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.properties.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Target for ScriptTarget {
    fn property(&self, name: &str) -> Option<Property> {
        self.properties
            .get(name)
            .map(|v| Property::Value(v.value().clone()))
    }

    fn callback(&self, name: &str) -> Option<Callback> {
        match self.callbacks.get(name) {
            Some(script) => Some(script.to_callback()),
            None if self.lenient => {
                tracing::debug!("callback {} is not scripted, treating as no-op", name);
                Some(Callback::noop())
            }
            None => None,
        }
    }
}
