pub mod defaults;
pub mod error;
pub mod frame;
pub mod manager;
pub mod store;
pub mod value;

pub use defaults::{DefaultPolicy, FieldSpec};
pub use error::{ContextError, ContextResult};
pub use frame::Frame;
pub use manager::{create_context, Bound, Context, ContextOptions, Discovery};
pub use store::StoreState;
pub use value::{Fields, Value};
