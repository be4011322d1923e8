//! Scope frames and the lookup engine.
//!
//! A [`Frame`] is one level of the scope hierarchy. Fields supplied when the
//! frame was entered are fixed for its lifetime; reading a declared field walks
//! the parent chain until the nearest definition is found and falls back to the
//! registry default when none is.

use crate::context::{
    defaults::{DefaultPolicy, FieldRegistry},
    error::{ContextError, ContextResult},
    value::{Fields, Value},
};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

struct FrameInner {
    id: u64,
    depth: usize,
    governed: IndexMap<String, Value>,
    loose: RefCell<IndexMap<String, Value>>,
    resolved_defaults: RefCell<HashMap<String, Value>>,
    parent: Option<Frame>,
    registry: Rc<RefCell<FieldRegistry>>,
}

/// Handle to one scope level. Cloning is cheap and keeps the frame and its
/// ancestors alive after the scope has exited.
#[derive(Clone)]
pub struct Frame {
    inner: Rc<FrameInner>,
}

impl Frame {
    pub(crate) fn new(
        id: u64,
        governed: IndexMap<String, Value>,
        loose: IndexMap<String, Value>,
        parent: Option<Frame>,
        registry: Rc<RefCell<FieldRegistry>>,
    ) -> Self {
        let depth = parent.as_ref().map_or(1, |p| p.depth() + 1);
        Self {
            inner: Rc::new(FrameInner {
                id,
                depth,
                governed,
                loose: RefCell::new(loose),
                resolved_defaults: RefCell::new(HashMap::new()),
                parent,
                registry,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Nesting depth; an outermost frame has depth 1.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub fn parent(&self) -> Option<&Frame> {
        self.inner.parent.as_ref()
    }

    /// This frame followed by each of its ancestors, nearest first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.inner.registry.borrow().is_declared(name)
    }

    /// Reads a field as seen from this frame.
    ///
    /// Declared fields are resolved through [`Frame::lookup`]. Any other name
    /// only sees what was stored directly on this frame.
    pub fn get(&self, name: &str) -> Option<Value> {
        if self.is_declared(name) {
            self.lookup(name)
        } else {
            self.inner.loose.borrow().get(name).cloned()
        }
    }

    /// Resolves `name` against this frame and its ancestors, nearest definition
    /// first, then the registry default.
    ///
    /// A value stored on this frame before `name` was declared still counts as
    /// this frame's own definition. It is not inherited by descendants.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.inner.loose.borrow().get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.inner.resolved_defaults.borrow().get(name) {
            return Some(value.clone());
        }
        for frame in self.ancestors() {
            if let Some(value) = frame.inner.governed.get(name) {
                return Some(value.clone());
            }
        }
        self.resolve_default(name)
    }

    fn resolve_default(&self, name: &str) -> Option<Value> {
        // The registry borrow must end before a computed default runs; it may read other fields.
        let policy = self.inner.registry.borrow().policy(name)?;
        let value = match policy {
            DefaultPolicy::Absent => return None,
            DefaultPolicy::Constant(value) => value,
            DefaultPolicy::Computed(compute) => {
                debug!(field = name, frame = self.id(), "computing default");
                compute(self)
            }
        };
        self.inner
            .resolved_defaults
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Some(value)
    }

    /// Whether this frame itself was given `name` when it was entered.
    pub fn defines(&self, name: &str) -> bool {
        self.inner.governed.contains_key(name)
    }

    /// Fields given to this frame on entry, without anything inherited.
    pub fn own_fields(&self) -> Fields {
        self.inner
            .governed
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Assigns an ungoverned field on this frame.
    ///
    /// Declared fields can only change by entering a new scope, so assigning one
    /// fails with [`ContextError::AccessViolation`].
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> ContextResult<()> {
        let name = name.into();
        if self.is_declared(&name) {
            return Err(ContextError::AccessViolation { name });
        }
        self.inner.loose.borrow_mut().insert(name, value.into());
        Ok(())
    }

    /// Every declared field visible from here plus this frame's own loose fields.
    pub fn resolved(&self) -> Fields {
        let names = self.inner.registry.borrow().names();
        let mut fields: Fields = names
            .into_iter()
            .filter_map(|name| self.lookup(&name).map(|value| (name, value)))
            .collect();
        fields.extend(
            self.inner
                .loose
                .borrow()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        fields
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.inner.id)
            .field("depth", &self.inner.depth)
            .field("fields", &self.inner.governed)
            .field("loose", &self.inner.loose.borrow())
            .field("parent", &self.inner.parent.as_ref().map(Frame::id))
            .finish()
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a Frame>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
