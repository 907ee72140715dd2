#![forbid(unsafe_code)]

//! Wire encoding of [`Value`].
//!
//! The wire format is plain JSON, with arrays used as tags:
//!
//! | JSON | Value |
//! |---|---|
//! | `null`, `true`, `1.5`, `"s"` | the matching scalar |
//! | `[x, y, z]` (three numbers) | [`Value::Vector`] |
//! | `[n]` (one number) | [`Value::Object`] with id `n` |
//! | `[[a, b, ...]]` (one array) | [`Value::List`] |
//!
//! A list of one item is therefore `[[item]]`, never `[item]`.

use serde_json::{Number, Value as Json};
use starscape_core::Vec3;

use crate::error::CodecError;
use crate::object::RemoteObject;
use crate::value::Value;

/// Decode a wire value. `resolve` maps object ids to handles.
pub fn decode_value(
    json: &Json,
    resolve: &mut dyn FnMut(u64) -> Result<RemoteObject, CodecError>,
) -> Result<Value, CodecError> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => n
            .as_f64()
            .map(Value::Number)
            .ok_or_else(|| CodecError::Unsupported(n.to_string())),
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Array(items) => match items.as_slice() {
            [Json::Number(id)] => resolve(object_id(id)?).map(Value::Object),
            [Json::Array(inner)] => inner
                .iter()
                .map(|item| decode_value(item, resolve))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            [_] => Err(CodecError::BadWrapped(json.to_string())),
            [x, y, z] => match (x.as_f64(), y.as_f64(), z.as_f64()) {
                (Some(x), Some(y), Some(z)) => Ok(Value::Vector(Vec3::new(x, y, z))),
                _ => Err(CodecError::BadVector(json.to_string())),
            },
            _ => Err(CodecError::BadLength(items.len())),
        },
        Json::Object(_) => Err(CodecError::Unsupported(json.to_string())),
    }
}

/// Encode a value for the wire. Fails on non-finite numbers, which JSON can
/// not represent.
pub fn encode_value(value: &Value) -> Result<Json, CodecError> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => Json::Number(encode_number(*n)?),
        Value::String(s) => Json::String(s.clone()),
        Value::Vector(v) => Json::Array(
            v.to_array()
                .into_iter()
                .map(|c| encode_number(c).map(Json::Number))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(obj) => Json::Array(vec![Json::from(obj.id())]),
        Value::List(items) => Json::Array(vec![Json::Array(
            items.iter().map(encode_value).collect::<Result<_, _>>()?,
        )]),
    })
}

fn object_id(n: &Number) -> Result<u64, CodecError> {
    if let Some(id) = n.as_u64() {
        return Ok(id);
    }
    match n.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f < u64::MAX as f64 => Ok(f as u64),
        _ => Err(CodecError::BadObjectId(n.to_string())),
    }
}

/// Whole numbers go out as JSON integers, except `-0.0`, which keeps its
/// sign as a float.
fn encode_number(n: f64) -> Result<Number, CodecError> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    let signed_zero = n == 0.0 && n.is_sign_negative();
    if n.fract() == 0.0 && n.abs() <= MAX_EXACT && !signed_zero {
        return Ok(Number::from(n as i64));
    }
    Number::from_f64(n).ok_or_else(|| CodecError::Unsupported(n.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_objects(id: u64) -> Result<RemoteObject, CodecError> {
        Err(CodecError::DestroyedObject(id))
    }

    fn decode(json: Json) -> Result<Value, CodecError> {
        decode_value(&json, &mut no_objects)
    }

    #[test]
    fn scalars() {
        assert_eq!(decode(json!(null)), Ok(Value::Null));
        assert_eq!(decode(json!(true)), Ok(Value::Bool(true)));
        assert_eq!(decode(json!(2.5)), Ok(Value::Number(2.5)));
        assert_eq!(decode(json!(3)), Ok(Value::Number(3.0)));
        assert_eq!(decode(json!("hi")), Ok(Value::from("hi")));
    }

    #[test]
    fn vectors_and_lists() {
        assert_eq!(
            decode(json!([1, 2.5, -3])),
            Ok(Value::Vector(Vec3::new(1.0, 2.5, -3.0)))
        );
        assert_eq!(
            decode(json!([[1, "a", [[]]]])),
            Ok(Value::List(vec![
                Value::from(1),
                Value::from("a"),
                Value::List(Vec::new()),
            ]))
        );
    }

    #[test]
    fn object_ids_go_through_resolver() {
        let mut seen = Vec::new();
        let result = decode_value(&json!([42]), &mut |id| {
            seen.push(id);
            Err(CodecError::DestroyedObject(id))
        });
        assert_eq!(result, Err(CodecError::DestroyedObject(42)));
        assert_eq!(seen, vec![42]);
    }

    #[test]
    fn malformed_arrays() {
        assert_eq!(
            decode(json!(["x"])),
            Err(CodecError::BadWrapped("[\"x\"]".into()))
        );
        assert!(matches!(decode(json!([1, "y", 3])), Err(CodecError::BadVector(_))));
        assert_eq!(decode(json!([1, 2])), Err(CodecError::BadLength(2)));
        assert_eq!(decode(json!([])), Err(CodecError::BadLength(0)));
        assert!(matches!(decode(json!([-1])), Err(CodecError::BadObjectId(_))));
        assert!(matches!(decode(json!({"a": 1})), Err(CodecError::Unsupported(_))));
    }

    #[test]
    fn encoding_mirrors_decoding() {
        assert_eq!(encode_value(&Value::from(vec![1, 2])), Ok(json!([[1, 2]])));
        assert_eq!(encode_value(&Value::from(vec![Value::Null])), Ok(json!([[null]])));
        assert_eq!(
            encode_value(&Value::Vector(Vec3::new(0.5, 1.0, 2.0))),
            Ok(json!([0.5, 1, 2]))
        );
        assert_eq!(encode_value(&Value::from("Bar")), Ok(json!("Bar")));
        assert_eq!(encode_value(&Value::from(1.25)), Ok(json!(1.25)));
    }

    #[test]
    fn negative_zero_keeps_its_sign() {
        let json = encode_value(&Value::Number(-0.0)).unwrap();
        assert_eq!(json.as_f64().map(f64::is_sign_negative), Some(true));
        match decode(json) {
            Ok(Value::Number(n)) => assert!(n == 0.0 && n.is_sign_negative()),
            other => panic!("expected a number, got {other:?}"),
        }
        assert_eq!(encode_value(&Value::Number(0.0)), Ok(json!(0)));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        assert!(encode_value(&Value::Number(f64::NAN)).is_err());
        assert!(encode_value(&Value::Number(f64::INFINITY)).is_err());
    }
}
