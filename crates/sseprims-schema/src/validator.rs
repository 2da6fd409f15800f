use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::validation::Validation;

/// Turns the raw `input` of a request into a typed value, or rejects it.
///
/// A missing `input` field is presented as `Value::Null`.
pub trait InputValidator: Send + Sync + 'static {
    type Input: Send + Sync + 'static;

    fn safe_parse(&self, raw: &Value) -> Validation<Self::Input>;
}

/// Combinators available on every validator.
pub trait InputValidatorExt: InputValidator + Sized {
    /// Substitute `default` when the input is missing or `null`.
    fn with_default(self, default: Value) -> WithDefault<Self> {
        WithDefault {
            inner: self,
            default,
        }
    }
}

impl<V: InputValidator> InputValidatorExt for V {}

/// Accepts any input as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unvalidated;

impl InputValidator for Unvalidated {
    type Input = Value;

    fn safe_parse(&self, raw: &Value) -> Validation<Value> {
        Validation::Success(raw.clone())
    }
}

/// Accepts any input.
pub fn unvalidated() -> Unvalidated {
    Unvalidated
}

/// Validates by deserializing into `T`.
pub struct SerdeValidator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeValidator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeValidator<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SerdeValidator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeValidator")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> InputValidator for SerdeValidator<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    type Input = T;

    fn safe_parse(&self, raw: &Value) -> Validation<T> {
        deserialize_input(raw)
    }
}

/// Validates by deserializing into `T`.
pub fn typed<T>() -> SerdeValidator<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    SerdeValidator::new()
}

pub(crate) fn deserialize_input<T: DeserializeOwned>(raw: &Value) -> Validation<T> {
    match T::deserialize(raw) {
        Ok(value) => Validation::Success(value),
        Err(err) => Validation::fail(format!("invalid input: {err}")),
    }
}

/// Validator backed by a closure.
pub struct FnValidator<F, T> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> InputValidator for FnValidator<F, T>
where
    F: Fn(&Value) -> Validation<T> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    type Input = T;

    fn safe_parse(&self, raw: &Value) -> Validation<T> {
        (self.f)(raw)
    }
}

/// Build a validator from a closure.
pub fn validator_fn<F, T>(f: F) -> FnValidator<F, T>
where
    F: Fn(&Value) -> Validation<T> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    FnValidator {
        f,
        _marker: PhantomData,
    }
}

/// See [`InputValidatorExt::with_default`].
#[derive(Debug, Clone)]
pub struct WithDefault<V> {
    inner: V,
    default: Value,
}

impl<V: InputValidator> InputValidator for WithDefault<V> {
    type Input = V::Input;

    fn safe_parse(&self, raw: &Value) -> Validation<V::Input> {
        if raw.is_null() {
            return self.inner.safe_parse(&self.default);
        }
        self.inner.safe_parse(raw)
    }
}
