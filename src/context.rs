use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Variable store for one workflow run.
///
/// Entries keep insertion order so serialized snapshots and debug output are
/// deterministic. Only the run that owns the context mutates it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    variables: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a dot-separated path such as `draft.title` or `items.0`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let root = self.variables.get(segments.next()?)?;
        segments.try_fold(root, resolve_segment)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn all(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.variables.clone())
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut context = Self::new();
        context.extend(iter);
        context
    }
}

impl<K: Into<String>> Extend<(K, Value)> for ExecutionContext {
    fn extend<I: IntoIterator<Item = (K, Value)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.set(name, value);
        }
    }
}

/// One step of path resolution. Objects are indexed by key, arrays by
/// position; scalars cannot be indexed into.
fn resolve_segment<'a>(current: &'a Value, segment: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}
