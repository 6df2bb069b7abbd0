//! JSON codec - the reference wire format.

use crate::error::CodecResult;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to JSON bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be represented as JSON
/// (e.g. a map with non-string keys).
pub fn to_json<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a value from JSON bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON or do not match
/// the target type's shape.
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    fn sample() -> Sample {
        Sample {
            id: 7,
            name: "peer".into(),
            tags: vec!["a".into(), "b".into()],
        }
    }

    #[test]
    fn roundtrip_struct() {
        let value = sample();
        let bytes = to_json(&value).unwrap();
        let decoded: Sample = from_json(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn output_is_human_readable() {
        let bytes = to_json(&sample()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"name\":\"peer\""));
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let result: CodecResult<Sample> = from_json(b"{\"id\":\"not a number\"}");
        assert!(result.is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        let result: CodecResult<Sample> = from_json(b"\x00\x01\x02");
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn arbitrary_strings_roundtrip(s in ".*") {
            let bytes = to_json(&s).unwrap();
            let back: String = from_json(&bytes).unwrap();
            prop_assert_eq!(back, s);
        }

        #[test]
        fn arbitrary_byte_vectors_roundtrip(v in proptest::collection::vec(any::<u8>(), 0..256)) {
            let bytes = to_json(&v).unwrap();
            let back: Vec<u8> = from_json(&bytes).unwrap();
            prop_assert_eq!(back, v);
        }
    }
}
