use crate::context::{
    defaults::{DefaultPolicy, FieldRegistry, FieldSpec},
    error::{ContextError, ContextResult},
    frame::Frame,
    store::{ScopeStore, StoreState},
    value::{Fields, Value},
};
use indexmap::IndexMap;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::debug;

pub type Initializer = Rc<dyn Fn(&Fields, Option<&Frame>) -> Option<Fields>>;

/// Which input field names take part in chain-walked lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Discovery {
    /// Any name seen in a scope's fields becomes a declared field.
    #[default]
    Automatic,
    /// Only pre-declared names are inherited. Other input names are stored on
    /// the entered frame alone.
    DeclaredOnly,
}

#[derive(Clone, Default)]
pub struct ContextOptions {
    fields: Vec<FieldSpec>,
    initializer: Option<Initializer>,
    discovery: Discovery,
}

impl ContextOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(self, name: impl Into<String>) -> Self {
        self.declare(FieldSpec::new(name))
    }

    pub fn field_with_default(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.declare(FieldSpec::new(name).with_default(DefaultPolicy::Constant(value.into())))
    }

    pub fn field_computed(
        self,
        name: impl Into<String>,
        compute: impl Fn(&Frame) -> Value + 'static,
    ) -> Self {
        self.declare(FieldSpec::new(name).with_default(DefaultPolicy::computed(compute)))
    }

    pub fn declare(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn fields(mut self, specs: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.fields.extend(specs);
        self
    }

    /// Computes each new frame's fields from the raw input and the parent frame.
    /// Returning `None` keeps the raw input.
    pub fn initializer(
        mut self,
        init: impl Fn(&Fields, Option<&Frame>) -> Option<Fields> + 'static,
    ) -> Self {
        self.initializer = Some(Rc::new(init));
        self
    }

    pub fn discovery(mut self, discovery: Discovery) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn field_specs(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn discovery_mode(&self) -> Discovery {
        self.discovery
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("fields", &self.fields)
            .field("initializer", &self.initializer.is_some())
            .field("discovery", &self.discovery)
            .finish()
    }
}

struct ContextInner {
    store: RefCell<ScopeStore>,
    next_frame_id: Cell<u64>,
    registry: Rc<RefCell<FieldRegistry>>,
    initializer: Option<Initializer>,
    discovery: Discovery,
}

/// Owns one scope store and the fields it governs.
///
/// A context is single-threaded. Code that needs ambient fields on several
/// threads creates one context per thread.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

pub fn create_context(options: ContextOptions) -> Context {
    Context::new(options)
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextOptions::default())
    }
}

impl Context {
    pub fn new(options: ContextOptions) -> Self {
        let mut registry = FieldRegistry::new();
        for spec in options.fields {
            registry.declare(spec.name, spec.default);
        }
        Self {
            inner: Rc::new(ContextInner {
                store: RefCell::new(ScopeStore::new()),
                next_frame_id: Cell::new(1),
                registry: Rc::new(RefCell::new(registry)),
                initializer: options.initializer,
                discovery: options.discovery,
            }),
        }
    }

    /// The active frame, if a scope is open.
    pub fn current(&self) -> Option<Frame> {
        self.inner.store.borrow().current()
    }

    pub fn state(&self) -> StoreState {
        self.inner.store.borrow().state().clone()
    }

    pub fn depth(&self) -> usize {
        self.inner.store.borrow().depth()
    }

    /// Active frames from the outermost to the current one.
    pub fn chain(&self) -> Vec<Frame> {
        self.inner.store.borrow().chain()
    }

    /// Reads `name` from the active frame.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.current().and_then(|frame| frame.get(name))
    }

    pub fn declare(&self, name: impl Into<String>, policy: impl Into<DefaultPolicy>) {
        self.inner.registry.borrow_mut().declare(name, policy.into());
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.inner.registry.borrow().is_declared(name)
    }

    pub fn declared_fields(&self) -> Vec<String> {
        self.inner.registry.borrow().names()
    }

    /// Builds the frame for a new scope under the active one without entering it.
    fn build_frame(&self, raw: Fields) -> Frame {
        let parent = self.current();
        let effective = match &self.inner.initializer {
            Some(init) => init(&raw, parent.as_ref()).unwrap_or(raw),
            None => raw,
        };

        let mut registry = self.inner.registry.borrow_mut();
        let mut governed = IndexMap::new();
        let mut loose = IndexMap::new();
        for (name, value) in effective {
            if self.inner.discovery == Discovery::Automatic {
                registry.discover(&name);
            }
            if registry.is_declared(&name) {
                governed.insert(name, value);
            } else {
                loose.insert(name, value);
            }
        }
        drop(registry);

        let id = self.inner.next_frame_id.get();
        self.inner.next_frame_id.set(id + 1);
        Frame::new(id, governed, loose, parent, self.inner.registry.clone())
    }

    /// Runs `callback` inside a new scope built from `fields` and returns its result.
    ///
    /// The frame active before the call is active again on every exit path,
    /// including a panic unwinding out of `callback`. Leaving an outermost scope
    /// puts the store in [`StoreState::Root`].
    pub fn run<R>(&self, fields: impl Into<Fields>, callback: impl FnOnce(&Frame) -> R) -> R {
        let frame = self.build_frame(fields.into());
        self.inner.store.borrow_mut().enter(frame.clone());
        let _guard = ScopeGuard { context: self };
        callback(&frame)
    }

    /// Like [`Context::run`], but a panic in `callback` is caught once the store
    /// has been restored and returned as [`ContextError::CallbackPanicked`].
    pub fn try_run<R>(
        &self,
        fields: impl Into<Fields>,
        callback: impl FnOnce(&Frame) -> R,
    ) -> ContextResult<R> {
        let fields = fields.into();
        panic::catch_unwind(AssertUnwindSafe(|| self.run(fields, callback))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            debug!(%message, "contained panic from scoped callback");
            ContextError::CallbackPanicked { message }
        })
    }

    /// Captures `fields` now and defers running `callback` until [`Bound::call`].
    ///
    /// The scope opened by each call inherits from whatever frame is active at
    /// call time, not from the frame active here.
    pub fn bind<F>(&self, fields: impl Into<Fields>, callback: F) -> Bound<F> {
        Bound {
            context: self.clone(),
            fields: fields.into(),
            callback,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("state", &self.inner.store.borrow().state())
            .field("declared", &self.inner.registry.borrow().names())
            .field("discovery", &self.inner.discovery)
            .finish()
    }
}

struct ScopeGuard<'a> {
    context: &'a Context,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.context.inner.store.borrow_mut().exit();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A callback bound to a field set, runnable later in a fresh scope.
pub struct Bound<F> {
    context: Context,
    fields: Fields,
    callback: F,
}

impl<F> Bound<F> {
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(&Frame, A) -> R,
    {
        self.context
            .run(&self.fields, |frame| (self.callback)(frame, args))
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }
}

impl<F> fmt::Debug for Bound<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound").field("fields", &self.fields).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_returns_callback_result_and_passes_active_frame() {
        let ctx = Context::default();
        let result = ctx.run(Fields::new(), |frame| {
            assert!(ctx.current().is_some_and(|current| current.ptr_eq(frame)));
            "some_value"
        });
        assert_eq!(result, "some_value");
    }

    #[test]
    fn context_starts_pristine_and_returns_to_root() {
        let ctx = Context::default();
        assert!(ctx.current().is_none());
        assert!(matches!(ctx.state(), StoreState::Pristine));
        ctx.run(Fields::new(), |_| ());
        assert!(ctx.current().is_none());
        assert!(matches!(ctx.state(), StoreState::Root));
    }

    #[test]
    fn frame_ids_are_numbered_per_context() {
        let first = Context::default();
        let second = Context::default();
        let ids = first.run(Fields::new(), |outer| {
            first.run(Fields::new(), |inner| (outer.id(), inner.id()))
        });
        assert_eq!(ids, (1, 2));
        assert_eq!(second.run(Fields::new(), |frame| frame.id()), 1);
        assert_eq!(first.run(Fields::new(), |frame| frame.id()), 3);
    }

    #[test]
    fn automatic_discovery_declares_input_names() {
        let ctx = Context::default();
        ctx.run(Fields::from([("z", 5)]), |_| {
            assert!(ctx.is_declared("z"));
            ctx.run(Fields::new(), |inner| {
                assert_eq!(inner.get("z"), Some(Value::Int(5)));
            });
        });
    }

    #[test]
    fn declared_only_keeps_unknown_fields_local() {
        let ctx = Context::new(ContextOptions::new().discovery(Discovery::DeclaredOnly));
        ctx.run(Fields::from([("z", 5)]), |outer| {
            assert!(!ctx.is_declared("z"));
            assert_eq!(outer.get("z"), Some(Value::Int(5)));
            ctx.run(Fields::new(), |inner| assert_eq!(inner.get("z"), None));
            outer.set("z", 6).unwrap();
            assert_eq!(outer.get("z"), Some(Value::Int(6)));
        });
    }

    #[test]
    fn initializer_sees_parent_and_replaces_input() {
        let ctx = Context::new(ContextOptions::new().initializer(|raw, parent| {
            let inherited = parent.map(Frame::resolved).unwrap_or_default();
            Some(inherited.merge(raw).with("depth", parent.map_or(1, |p| p.depth() + 1) as i64))
        }));
        ctx.run(Fields::from([("a", 1)]), |outer| {
            assert_eq!(outer.get("depth"), Some(Value::Int(1)));
            ctx.run(Fields::from([("b", 2)]), |inner| {
                assert!(inner.defines("a"));
                assert_eq!(inner.own_fields().len(), 3);
                assert_eq!(inner.get("depth"), Some(Value::Int(2)));
            });
        });
    }

    #[test]
    fn initializer_returning_none_keeps_raw_fields() {
        let ctx = Context::new(ContextOptions::new().initializer(|_, _| None));
        ctx.run(Fields::from([("a", 1)]), |frame| {
            assert_eq!(frame.get("a"), Some(Value::Int(1)));
        });
    }

    #[test]
    fn try_run_contains_panics() {
        let ctx = Context::default();
        ctx.run(Fields::from([("a", 1)]), |outer| {
            let err = ctx
                .try_run(Fields::new(), |_| -> () { panic!("boom") })
                .unwrap_err();
            assert!(matches!(err, ContextError::CallbackPanicked { ref message } if message == "boom"));
            assert!(ctx.current().is_some_and(|current| current.ptr_eq(outer)));
        });
    }

    #[test]
    fn bind_uses_ancestry_at_call_time() {
        let ctx = Context::default();
        let bound = ctx.bind(Fields::from([("x", 1)]), |frame: &Frame, suffix: &str| {
            format!("{}{}", frame.get("y").map(|v| v.to_string()).unwrap_or_default(), suffix)
        });
        assert_eq!(bound.call("!"), "!");
        let seen = ctx.run(Fields::from([("y", "outer")]), |_| bound.call("?"));
        assert_eq!(seen, "outer?");
    }
}
