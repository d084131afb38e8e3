use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rmpv::Value as MpValue;
use serde_json::{Number, Value};

use super::CodecError;

/// JSON object that keeps its insertion order (`serde_json` is built with
/// `preserve_order`, so the map is index-backed).
pub type OrderedMap = serde_json::Map<String, Value>;

/// Decode a MessagePack buffer into an ordered JSON object.
///
/// Map keys keep their wire order. Integer keys are rendered as decimal
/// strings. Floats become arbitrary-precision JSON numbers formatted in
/// plain decimal notation, so re-emitting the structure reproduces the
/// value exactly (`1.0` stays `1.0`, `1e-9` becomes `0.000000001`);
/// downstream consumers diff the emitted files version-over-version.
pub fn from_msgpack(buf: &[u8]) -> Result<OrderedMap, CodecError> {
    let value = rmpv::decode::read_value(&mut &buf[..])
        .map_err(|err| CodecError::DecodeFailed(err.to_string()))?;

    match convert(value)? {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::DecodeFailed(format!("top-level value is {other:?}, expected map")))
    }
}

fn convert(value: MpValue) -> Result<Value, CodecError> {
    match value {
        MpValue::Nil => Ok(Value::Null),

        MpValue::Boolean(value) => Ok(Value::Bool(value)),

        MpValue::Integer(value) => {
            if let Some(value) = value.as_i64() {
                Ok(Value::Number(Number::from(value)))
            }

            else if let Some(value) = value.as_u64() {
                Ok(Value::Number(Number::from(value)))
            }

            else {
                Err(CodecError::DecodeFailed(format!("unrepresentable integer: {value}")))
            }
        }

        MpValue::F32(value) => float_number(decimal_repr(value)?),
        MpValue::F64(value) => float_number(decimal_repr(value)?),

        MpValue::String(value) => Ok(Value::String(lossy_str(&value))),

        // JSON has no bytes type. Encode the way Go's encoding/json does
        // so emitted files stay byte-compatible.
        MpValue::Binary(value) => Ok(Value::String(BASE64.encode(value))),

        MpValue::Array(values) => {
            let mut array = Vec::with_capacity(values.len());

            for value in values {
                array.push(convert(value)?);
            }

            Ok(Value::Array(array))
        }

        MpValue::Map(entries) => {
            let mut map = OrderedMap::new();

            for (key, value) in entries {
                map.insert(key_string(key)?, convert(value)?);
            }

            Ok(Value::Object(map))
        }

        MpValue::Ext(tag, _) => Err(CodecError::DecodeFailed(format!("unsupported ext value with tag {tag}")))
    }
}

fn key_string(key: MpValue) -> Result<String, CodecError> {
    match key {
        MpValue::String(key) => Ok(lossy_str(&key)),

        MpValue::Integer(key) => Ok(key.to_string()),

        MpValue::F32(key) => decimal_repr(key),
        MpValue::F64(key) => decimal_repr(key),

        MpValue::Boolean(key) => Ok(key.to_string()),

        MpValue::Nil => Ok(String::from("null")),

        other => Err(CodecError::DecodeFailed(format!("unsupported map key: {other}")))
    }
}

#[inline]
fn lossy_str(value: &rmpv::Utf8String) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}

fn float_number(repr: String) -> Result<Value, CodecError> {
    Number::from_str(&repr)
        .map(Value::Number)
        .map_err(|err| CodecError::DecodeFailed(format!("bad float literal {repr}: {err}")))
}

/// Plain decimal rendering of a float, lossless for its width, with at
/// least one fractional digit.
fn decimal_repr<F: std::fmt::Display + Into<f64> + Copy>(value: F) -> Result<String, CodecError> {
    let wide: f64 = value.into();

    if !wide.is_finite() {
        return Err(CodecError::DecodeFailed(format!("non-finite float: {value}")));
    }

    // Display for floats is shortest-roundtrip and never scientific,
    // so the only fixup needed is the mandatory decimal point.
    let mut repr = value.to_string();

    if !repr.contains('.') {
        repr.push_str(".0");
    }

    Ok(repr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &MpValue) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    #[test]
    fn decimal_reprs() {
        assert_eq!(decimal_repr(3.14_f64).unwrap(), "3.14");
        assert_eq!(decimal_repr(1.0_f64).unwrap(), "1.0");
        assert_eq!(decimal_repr(1e-9_f64).unwrap(), "0.000000001");
        assert_eq!(decimal_repr(-2.5_f64).unwrap(), "-2.5");
        assert_eq!(decimal_repr(100.0_f64).unwrap(), "100.0");

        assert!(decimal_repr(f64::NAN).is_err());
        assert!(decimal_repr(f64::INFINITY).is_err());
    }

    #[test]
    fn nested_maps_stay_ordered() {
        let wire = MpValue::Map(vec![
            (MpValue::from("outer"), MpValue::Map(vec![
                (MpValue::from("z"), MpValue::from(1)),
                (MpValue::from("a"), MpValue::from(2)),
                (MpValue::from("m"), MpValue::from(3))
            ]))
        ]);

        let decoded = from_msgpack(&encode(&wire)).unwrap();

        let Some(Value::Object(inner)) = decoded.get("outer") else {
            panic!("expected nested object");
        };

        assert_eq!(inner.keys().collect::<Vec<_>>(), ["z", "a", "m"]);
    }

    #[test]
    fn binary_becomes_base64() {
        let wire = MpValue::Map(vec![
            (MpValue::from("blob"), MpValue::Binary(vec![1, 2, 3]))
        ]);

        let decoded = from_msgpack(&encode(&wire)).unwrap();

        assert_eq!(decoded.get("blob"), Some(&Value::String(String::from("AQID"))));
    }

    #[test]
    fn scalars() {
        let wire = MpValue::Map(vec![
            (MpValue::from("null"), MpValue::Nil),
            (MpValue::from("yes"), MpValue::Boolean(true)),
            (MpValue::from("neg"), MpValue::from(-5)),
            (MpValue::from("big"), MpValue::from(u64::MAX))
        ]);

        let decoded = from_msgpack(&encode(&wire)).unwrap();

        assert_eq!(decoded.get("null"), Some(&Value::Null));
        assert_eq!(decoded.get("yes"), Some(&Value::Bool(true)));
        assert_eq!(decoded.get("neg").unwrap().as_i64(), Some(-5));
        assert_eq!(decoded.get("big").unwrap().as_u64(), Some(u64::MAX));
    }
}
