//! Shared types for the Sprig engine.
//!
//! This crate defines the value types, runtime values, and function types
//! used across the module loader, the compiler and the execution engine,
//! together with the [`FuncTypePool`] that interns function types.

mod error;
mod func_type;
mod value;

pub use error::{TypeError, TypesResult};
pub use func_type::{same_type, FuncType, FuncTypePool};
pub use value::{Value, ValueType};
