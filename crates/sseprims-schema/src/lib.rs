//! Input validation at the session boundary.
//!
//! A stream request carries its input as raw JSON. Before a session starts,
//! the input runs through an [`InputValidator`] exactly once, producing either
//! a typed value or a list of issues the handler reports back as a 400.

pub mod config;
pub mod error;
pub mod schema;
mod strict;
pub mod validation;
pub mod validator;

pub use config::SchemaConfig;
pub use error::{Result, SchemaError};
pub use schema::JsonSchemaValidator;
pub use validation::{join_messages, Issue, Validation};
pub use validator::{
    typed, unvalidated, validator_fn, FnValidator, InputValidator, InputValidatorExt,
    SerdeValidator, Unvalidated, WithDefault,
};
