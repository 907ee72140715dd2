#![forbid(unsafe_code)]

//! Runtime shape descriptors for untyped wire values.
//!
//! Every remote member is requested with a [`RuntimeType`]. Inbound values
//! are checked with [`validate`] before they reach any subscriber, and local
//! writes are checked before they are sent.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeType {
    Any,
    Null,
    Bool,
    Number,
    String,
    Vector,
    /// A reference to a remote object.
    Object,
    ArrayOf(Box<RuntimeType>),
    Nullable(Box<RuntimeType>),
    Tuple(Vec<RuntimeType>),
}

impl RuntimeType {
    #[must_use]
    pub fn array_of(inner: RuntimeType) -> Self {
        Self::ArrayOf(Box::new(inner))
    }

    #[must_use]
    pub fn nullable(inner: RuntimeType) -> Self {
        Self::Nullable(Box::new(inner))
    }

    #[must_use]
    pub fn tuple(elements: impl IntoIterator<Item = RuntimeType>) -> Self {
        Self::Tuple(elements.into_iter().collect())
    }

    /// Human-readable shape name, e.g. `number`, `string?`, `Vec3[]`.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Any => "any".to_owned(),
            Self::Null => "null".to_owned(),
            Self::Bool => "boolean".to_owned(),
            Self::Number => "number".to_owned(),
            Self::String => "string".to_owned(),
            Self::Vector => "Vec3".to_owned(),
            Self::Object => "object".to_owned(),
            Self::ArrayOf(inner) => format!("{}[]", inner.name()),
            Self::Nullable(inner) => format!("{}?", inner.name()),
            Self::Tuple(elements) => {
                let names: Vec<String> = elements.iter().map(Self::name).collect();
                format!("[{}]", names.join(", "))
            }
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A value did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeMismatch {
    #[error("expected {expected}, got {actual}")]
    Expected { expected: String, actual: String },

    #[error("inside array: {0}")]
    InsideArray(Box<TypeMismatch>),

    #[error("inside tuple: {0}")]
    InsideTuple(Box<TypeMismatch>),
}

impl TypeMismatch {
    fn expected(expected: &RuntimeType, actual: &Value) -> Self {
        Self::Expected {
            expected: expected.name(),
            actual: actual.type_name().to_owned(),
        }
    }
}

/// Return `value` unchanged if it has the shape `ty`.
pub fn validate(ty: &RuntimeType, value: Value) -> Result<Value, TypeMismatch> {
    check(ty, &value)?;
    Ok(value)
}

/// Whether `value` has the shape `ty`.
#[must_use]
pub fn is_type(ty: &RuntimeType, value: &Value) -> bool {
    check(ty, value).is_ok()
}

/// Shape name of a value, as used in mismatch messages.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    value.type_name()
}

fn check(ty: &RuntimeType, value: &Value) -> Result<(), TypeMismatch> {
    let matches = match (ty, value) {
        (RuntimeType::Any, _)
        | (RuntimeType::Null, Value::Null)
        | (RuntimeType::Bool, Value::Bool(_))
        | (RuntimeType::Number, Value::Number(_))
        | (RuntimeType::String, Value::String(_))
        | (RuntimeType::Vector, Value::Vector(_))
        | (RuntimeType::Object, Value::Object(_)) => true,
        (RuntimeType::Nullable(_), Value::Null) => true,
        (RuntimeType::Nullable(inner), _) => return check(inner, value),
        (RuntimeType::ArrayOf(inner), Value::List(items)) => {
            for item in items {
                check(inner, item).map_err(|err| TypeMismatch::InsideArray(Box::new(err)))?;
            }
            true
        }
        (RuntimeType::Tuple(elements), Value::List(items)) => {
            if elements.len() != items.len() {
                return Err(TypeMismatch::Expected {
                    expected: ty.name(),
                    actual: format!("array of length {}", items.len()),
                });
            }
            for (element, item) in elements.iter().zip(items) {
                check(element, item).map_err(|err| TypeMismatch::InsideTuple(Box::new(err)))?;
            }
            true
        }
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(TypeMismatch::expected(ty, value))
    }
}
