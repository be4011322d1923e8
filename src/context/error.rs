use miette::Diagnostic;
use thiserror::Error;

pub type ContextResult<T> = Result<T, ContextError>;

#[derive(Debug, Error, Diagnostic)]
pub enum ContextError {
    #[error("Field `{name}` is governed by the context and cannot be assigned directly")]
    #[diagnostic(
        code(scoped_context::access_violation),
        help("open a nested scope with `Context::run` to give `{name}` a new value")
    )]
    AccessViolation { name: String },
    #[error("Scoped callback panicked: {message}")]
    #[diagnostic(code(scoped_context::callback_panicked))]
    CallbackPanicked { message: String },
}
