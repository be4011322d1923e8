//! Ambient, dynamically scoped fields for nested synchronous calls.
//!
//! A [`Context`] owns a store of nested frames. [`Context::run`] opens a scope
//! with a set of fields; code running inside it reads the nearest enclosing
//! definition of a field through [`Context::current`] without it being passed
//! down as an argument.

pub mod config;
pub mod context;

pub use config::{ConfigError, ContextConfig};
pub use context::{
    create_context, Bound, Context, ContextError, ContextOptions, ContextResult, DefaultPolicy,
    Discovery, FieldSpec, Fields, Frame, StoreState, Value,
};
