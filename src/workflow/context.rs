/// Run context: the namespaced JSON document a run reads and extends
///
/// Seeded from the trigger payload under `data` and trigger metadata under `trigger`; each
/// action merges its output under its own channel (`extracted`, `apollo`, ...). A context is
/// owned by exactly one run (fan-out branches work on clones).

use crate::error::UnresolvedPath;
use crate::workflow::types::TriggerEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunContext {
    namespaces: Map<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a run started by `event`
    pub fn from_event(event: &TriggerEvent) -> Self {
        let mut context = Self::new();
        context
            .namespaces
            .insert("data".to_string(), event.payload.clone());
        context.namespaces.insert(
            "trigger".to_string(),
            serde_json::json!({
                "topic": event.topic,
                "eventType": event.event_type,
                "receivedAt": chrono::Utc::now().to_rfc3339(),
            }),
        );
        context
    }

    /// Walk a dotted path; numeric segments index into arrays
    pub fn resolve(&self, path: &str) -> Result<&Value, UnresolvedPath> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();
        let mut current = self
            .namespaces
            .get(head)
            .ok_or_else(|| UnresolvedPath::new(path, head))?;

        for segment in segments {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| UnresolvedPath::new(path, segment))?;
        }

        Ok(current)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.resolve(path).ok()
    }

    /// Set a value at a dotted path, creating intermediate objects
    ///
    /// Existing non-object values along the way are replaced.
    pub fn insert(&mut self, path: &str, value: Value) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return;
        };

        let mut current = &mut self.namespaces;
        for segment in segments {
            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return;
            };
            current = map;
        }
        current.insert(last.to_string(), value);
    }

    /// Merge an action's output under `channel`
    ///
    /// Object outputs are merged recursively into an existing object channel; anything else
    /// replaces the channel.
    pub fn merge(&mut self, channel: &str, output: Value) {
        match self.get_mut(channel) {
            Some(existing) if existing.is_object() && output.is_object() => deep_merge(existing, &output),
            _ => self.insert(channel, output),
        }
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        let mut segments = path.split('.');
        let mut current = self.namespaces.get_mut(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get_mut(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &String> {
        self.namespaces.keys()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.namespaces.clone())
    }
}

/// Merge `patch` into `target`: nested objects key by key, everything else replaced
pub(crate) fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => deep_merge(existing, value),
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
