//! Stable 128-bit value hashing
//!
//! Every kind mixes its own seed into the running hash before its content, so values of
//! different kinds never share a hash prefix. Root values start from [`ROOT_SEED`]; nested
//! values start from a seed derived from their position (array index or property name).
//!
//! - Object properties are hashed independently and XOR-combined, so property order does
//!   not matter.
//! - Array elements are seeded by their index, so element order does.
//! - Numbers hash their canonical form, so `-0.0`, `0` and `0.0` are the same value.
//!
//! There is no randomized state: hashes are stable across processes.

use query_core::{Number, Value};
use xxhash_rust::xxh3::Xxh3;

/// Seed of every top-level value
pub const ROOT_SEED: u128 = 0xbfc2_359e_afc0_e2b7_2e6f_1a8d_94c3_7b05;

const NULL_SEED: u128 = 0x1380_f68b_ebd8_c4f7_9a2d_60b3_e1c5_0f47;
const FALSE_SEED: u128 = 0x8345_5b92_d4a7_e6d3_58f1_0c6e_b92a_4d81;
const TRUE_SEED: u128 = 0x4a1d_7c30_f9e2_8b65_c70e_b3d4_2f96_a158;
const NUMBER_SEED: u128 = 0x2d59_31ee_0a6c_b7f4_81c3_d95a_6e07_f2b9;
const STRING_SEED: u128 = 0xf7e4_1b3a_96cd_5082_0be9_74a1_c36d_58f2;
const ARRAY_SEED: u128 = 0x6c0f_a2d8_3b15_e947_d24a_8f61_0c7e_b395;
const OBJECT_SEED: u128 = 0x95b2_e07d_4c68_1af3_36d7_c2e9_8b40_5f1a;
const BINARY_SEED: u128 = 0x0e83_c5f6_7a29_d14b_f5a0_3e8c_61d7_92b4;
const GUID_SEED: u128 = 0xd3a6_4e17_b89c_025f_4b1e_f7d3_a06c_8925;

/// Base of the per-element seed: element `i` is hashed with `ARRAY_INDEX_SEED + i`
const ARRAY_INDEX_SEED: u128 = 0x52b7_f0c4_19e6_a83d_7c25_4be0_d9f1_6a03;
const PROPERTY_NAME_SEED: u128 = 0xa7d0_6b52_ce31_f948_e64f_29a7_5b0d_c316;

// Canonical number subtypes
const INT_TAG: u8 = 0;
const FLOAT_TAG: u8 = 1;

/// Hash a top-level value
pub fn hash(value: &Value) -> u128 {
    hash_with_seed(value, ROOT_SEED)
}

/// Hash a value starting from `seed`
pub fn hash_with_seed(value: &Value, seed: u128) -> u128 {
    match value {
        Value::Null => mix_seed(seed, NULL_SEED),
        Value::Bool(false) => mix_seed(seed, FALSE_SEED),
        Value::Bool(true) => mix_seed(seed, TRUE_SEED),
        Value::Number(number) => hash_number(*number, seed),
        Value::String(text) => mix(mix_seed(seed, STRING_SEED), text.as_bytes()),
        Value::Array(items) => {
            let mut hash = mix_seed(seed, ARRAY_SEED);
            for (index, item) in items.iter().enumerate() {
                let item_hash =
                    hash_with_seed(item, ARRAY_INDEX_SEED.wrapping_add(index as u128));
                hash = mix(hash, &item_hash.to_le_bytes());
            }
            hash
        }
        Value::Object(properties) => {
            let mut hash = mix_seed(seed, OBJECT_SEED);
            let mut combined: u128 = 0;
            for (name, value) in properties {
                combined ^= hash_with_seed(value, property_name_hash(name));
            }
            if combined != 0 {
                hash = mix(hash, &combined.to_le_bytes());
            }
            hash
        }
        Value::Binary(bytes) => mix(mix_seed(seed, BINARY_SEED), bytes),
        Value::Guid(guid) => mix(mix_seed(seed, GUID_SEED), guid.as_bytes()),
    }
}

fn hash_number(number: Number, seed: u128) -> u128 {
    let hash = mix_seed(seed, NUMBER_SEED);
    let mut buffer = [0u8; 9];
    match number.canonical() {
        Number::Int(i) => {
            buffer[0] = INT_TAG;
            buffer[1..].copy_from_slice(&i.to_le_bytes());
        }
        Number::Float(f) => {
            buffer[0] = FLOAT_TAG;
            buffer[1..].copy_from_slice(&f.to_bits().to_le_bytes());
        }
    }
    mix(hash, &buffer)
}

fn property_name_hash(name: &str) -> u128 {
    mix(mix_seed(PROPERTY_NAME_SEED, STRING_SEED), name.as_bytes())
}

fn mix_seed(seed: u128, kind_seed: u128) -> u128 {
    mix(seed, &kind_seed.to_le_bytes())
}

/// xxh3-128 over `seed || data`
pub fn mix(seed: u128, data: &[u8]) -> u128 {
    let mut hasher = Xxh3::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(data);
    hasher.digest128()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn h(json: serde_json::Value) -> u128 {
        hash(&Value::from(json))
    }

    #[test]
    fn test_hash_is_deterministic() {
        let value = Value::from(json!({"a": [1, "two", null], "b": {"c": 3.5}}));
        assert_eq!(hash(&value), hash(&value.clone()));
        assert_eq!(hash(&value), hash(&value));
    }

    #[test]
    fn test_hash_golden_values() {
        // persisted in continuation tokens, so these must never change
        assert_eq!(h(json!(null)), 0x771ff86f4cc70d0976ca2f5b2da6deca);
        assert_eq!(h(json!(0)), 0xe07c76a403e44f495f5834d666f1c977);
        assert_eq!(h(json!("")), 0xed7966d57be6b5f83d97cd0bc53fcc1f);
        assert_eq!(h(json!({"a": 1})), 0xbb2cbfbaa6ab46de34c572bcccee74b1);
        assert_eq!(h(json!([1, 2])), 0x23d0e92f80ede447fb3a5cf2f45e0411);
    }

    #[test]
    fn test_object_property_order_is_ignored() {
        let forward = Value::object([("a", Value::from(1i64)), ("b", Value::from(2i64))]);
        let reverse = Value::object([("b", Value::from(2i64)), ("a", Value::from(1i64))]);
        assert_eq!(hash(&forward), hash(&reverse));
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(h(json!([1, 2])), h(json!([2, 1])));
        assert_ne!(h(json!([[1], [2]])), h(json!([[2], [1]])));
    }

    #[test]
    fn test_numeric_subtypes_hash_equal() {
        assert_eq!(hash(&Value::from(0i64)), hash(&Value::from(-0.0)));
        assert_eq!(hash(&Value::from(0.0)), hash(&Value::from(-0.0)));
        assert_eq!(hash(&Value::from(42i64)), hash(&Value::from(42.0)));
        assert_ne!(hash(&Value::from(42i64)), hash(&Value::from(42.5)));
    }

    #[test]
    fn test_kinds_do_not_collide() {
        let values = vec![
            json!(null),
            json!(false),
            json!(true),
            json!(0),
            json!(""),
            json!([]),
            json!({}),
            json!([null]),
            json!({"a": null}),
            json!("null"),
        ];
        let hashes: std::collections::HashSet<u128> = values.into_iter().map(h).collect();
        assert_eq!(hashes.len(), 10);

        assert_ne!(hash(&Value::Binary(vec![])), hash(&Value::String(String::new())));
        assert_ne!(hash(&Value::Guid(Uuid::nil())), hash(&Value::Binary(vec![0; 16])));
    }

    #[test]
    fn test_nested_values_depend_on_position() {
        // same values under different property names
        assert_ne!(h(json!({"a": 1, "b": 2})), h(json!({"a": 2, "b": 1})));
        assert_ne!(h(json!({"a": 1})), h(json!({"b": 1})));
    }
}
