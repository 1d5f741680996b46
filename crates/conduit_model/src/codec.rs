//! CBOR encoding for stored objects.
//!
//! Structs are encoded as maps with fields in declaration order and all
//! open-ended maps in the model are `BTreeMap`s, so equal values always
//! produce identical bytes. Content ids are derived from those bytes.

use crate::error::{ModelError, ModelResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> ModelResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::into_writer(value, &mut buffer).map_err(|e| ModelError::encoding(e.to_string()))?;
    Ok(buffer)
}

/// Decodes a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ModelResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ModelError::decoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn equal_maps_encode_identically() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), 2);
        a.insert("a".to_string(), 1);

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), 1);
        b.insert("b".to_string(), 2);

        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
    }

    #[test]
    fn decode_garbage_fails() {
        let result: ModelResult<BTreeMap<String, i32>> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ModelError::DecodingFailed { .. })));
    }
}
