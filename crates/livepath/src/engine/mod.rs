pub(crate) mod expr;
pub(crate) mod matcher;
pub mod runtime;
pub mod value;

pub use runtime::{Context, Error, Result};
pub use value::Value;
