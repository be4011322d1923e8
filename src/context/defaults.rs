use crate::context::{frame::Frame, value::Value};
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

pub type ComputeDefault = Rc<dyn Fn(&Frame) -> Value>;

/// What a declared field resolves to when no frame in the chain defines it.
#[derive(Clone, Default)]
pub enum DefaultPolicy {
    #[default]
    Absent,
    Constant(Value),
    /// Evaluated lazily against the querying frame and cached on it.
    Computed(ComputeDefault),
}

impl DefaultPolicy {
    pub fn computed(compute: impl Fn(&Frame) -> Value + 'static) -> Self {
        DefaultPolicy::Computed(Rc::new(compute))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, DefaultPolicy::Absent)
    }
}

impl fmt::Debug for DefaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultPolicy::Absent => write!(f, "Absent"),
            DefaultPolicy::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            DefaultPolicy::Computed(_) => write!(f, "Computed(<fn>)"),
        }
    }
}

impl From<Value> for DefaultPolicy {
    fn from(value: Value) -> Self {
        DefaultPolicy::Constant(value)
    }
}

/// A field declared before any scope supplies a value for it.
#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub name: String,
    pub default: DefaultPolicy,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: DefaultPolicy::Absent,
        }
    }

    pub fn with_default(mut self, default: impl Into<DefaultPolicy>) -> Self {
        self.default = default.into();
        self
    }
}

/// Declared field names and their default policies, shared by a context and its frames.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: IndexMap<String, DefaultPolicy>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `name`, replacing the default policy if it was already known.
    pub fn declare(&mut self, name: impl Into<String>, policy: DefaultPolicy) {
        let name = name.into();
        debug!(field = %name, ?policy, "declaring field");
        self.fields.insert(name, policy);
    }

    /// Registers `name` with no default unless it is already declared.
    /// Returns `true` when the name was new.
    pub fn discover(&mut self, name: &str) -> bool {
        if self.fields.contains_key(name) {
            return false;
        }
        debug!(field = name, "discovered field");
        self.fields.insert(name.to_string(), DefaultPolicy::Absent);
        true
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn policy(&self, name: &str) -> Option<DefaultPolicy> {
        self.fields.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_keeps_existing_policy() {
        let mut registry = FieldRegistry::new();
        registry.declare("locale", DefaultPolicy::Constant(Value::from("en")));
        assert!(!registry.discover("locale"));
        assert!(matches!(
            registry.policy("locale"),
            Some(DefaultPolicy::Constant(Value::String(ref s))) if s == "en"
        ));
    }

    #[test]
    fn discover_registers_unknown_names_without_default() {
        let mut registry = FieldRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.discover("trace_id"));
        assert!(!registry.is_empty());
        assert!(registry.is_declared("trace_id"));
        assert!(registry.policy("trace_id").is_some_and(|p| p.is_absent()));
        assert_eq!(registry.names(), vec!["trace_id".to_string()]);
    }

    #[test]
    fn declare_replaces_policy() {
        let mut registry = FieldRegistry::new();
        registry.declare("retries", DefaultPolicy::Constant(Value::Int(1)));
        registry.declare("retries", DefaultPolicy::Constant(Value::Int(3)));
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            registry.policy("retries"),
            Some(DefaultPolicy::Constant(Value::Int(3)))
        ));
    }
}
