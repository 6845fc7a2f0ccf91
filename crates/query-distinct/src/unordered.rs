//! Unordered distinct map
//!
//! Values are dispatched by kind into buckets:
//!
//! | kind | storage |
//! |---|---|
//! | number | exact, canonical form |
//! | string of 1..=4 / 5..=8 / 9..=16 bytes | exact, bytes packed little endian into u32 / u64 / u128 |
//! | longer string, array, object, binary, guid | 128-bit hash |
//! | null, true, false, `""`, `[]`, `{}` | one flag bit each |
//!
//! Hash-only buckets accept the (negligible) chance that two different values share a
//! 128-bit hash, in which case the second one is reported as a duplicate.

use crate::hash;
use crate::map::parse_hash;
use ahash::AHashSet;
use query_core::{Number, QueryError, Result, Value};
use serde::{Deserialize, Serialize};

const NULL: u8 = 0x01;
const FALSE: u8 = 0x02;
const TRUE: u8 = 0x04;
const EMPTY_STRING: u8 = 0x08;
const EMPTY_ARRAY: u8 = 0x10;
const EMPTY_OBJECT: u8 = 0x20;

const SIMPLE_VALUE_NAMES: [(u8, &str); 6] = [
    (NULL, "Null"),
    (FALSE, "False"),
    (TRUE, "True"),
    (EMPTY_STRING, "EmptyString"),
    (EMPTY_ARRAY, "EmptyArray"),
    (EMPTY_OBJECT, "EmptyObject"),
];

/// Canonical number used as an exact set key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NumberKey {
    Int(i64),
    Float(u64),
}

impl NumberKey {
    fn new(number: Number) -> Self {
        match number.canonical() {
            Number::Int(i) => NumberKey::Int(i),
            // every NaN is the same value
            Number::Float(f) if f.is_nan() => NumberKey::Float(f64::NAN.to_bits()),
            Number::Float(f) => NumberKey::Float(f.to_bits()),
        }
    }

    fn number(self) -> Number {
        match self {
            NumberKey::Int(i) => Number::Int(i),
            NumberKey::Float(bits) => Number::Float(f64::from_bits(bits)),
        }
    }
}

/// Distinct map with no ordering assumption
#[derive(Debug, Clone, Default)]
pub struct UnorderedDistinctMap {
    numbers: AHashSet<NumberKey>,
    strings_length4: AHashSet<u32>,
    strings_length8: AHashSet<u64>,
    strings_length16: AHashSet<u128>,
    strings_length16_plus: AHashSet<u128>,
    arrays: AHashSet<u128>,
    objects: AHashSet<u128>,
    others: AHashSet<u128>,
    simple_values: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnorderedDistinctMapToken {
    #[serde(rename = "Numbers")]
    numbers: Vec<serde_json::Number>,
    /// NaN and the infinities, which have no JSON number form
    #[serde(rename = "NonFiniteNumbers", default, skip_serializing_if = "Vec::is_empty")]
    non_finite_numbers: Vec<String>,
    #[serde(rename = "StringsLength4")]
    strings_length4: Vec<u32>,
    #[serde(rename = "StringsLength8")]
    strings_length8: Vec<u64>,
    #[serde(rename = "StringsLength16")]
    strings_length16: Vec<String>,
    #[serde(rename = "StringsLength16+")]
    strings_length16_plus: Vec<String>,
    #[serde(rename = "Arrays")]
    arrays: Vec<String>,
    #[serde(rename = "Objects")]
    objects: Vec<String>,
    #[serde(rename = "Others", default)]
    others: Vec<String>,
    #[serde(rename = "SimpleValues")]
    simple_values: String,
}

impl UnorderedDistinctMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value; true when it was not seen before
    pub fn add(&mut self, value: &Value) -> bool {
        match value {
            Value::Null => self.add_simple(NULL),
            Value::Bool(false) => self.add_simple(FALSE),
            Value::Bool(true) => self.add_simple(TRUE),
            Value::Number(number) => self.numbers.insert(NumberKey::new(*number)),
            Value::String(text) => self.add_string(text, value),
            Value::Array(items) if items.is_empty() => self.add_simple(EMPTY_ARRAY),
            Value::Array(_) => self.arrays.insert(hash::hash(value)),
            Value::Object(properties) if properties.is_empty() => self.add_simple(EMPTY_OBJECT),
            Value::Object(_) => self.objects.insert(hash::hash(value)),
            Value::Binary(_) | Value::Guid(_) => self.others.insert(hash::hash(value)),
        }
    }

    fn add_simple(&mut self, flag: u8) -> bool {
        let added = self.simple_values & flag == 0;
        self.simple_values |= flag;
        added
    }

    fn add_string(&mut self, text: &str, value: &Value) -> bool {
        let bytes = text.as_bytes();
        match bytes.len() {
            0 => self.add_simple(EMPTY_STRING),
            1..=4 => {
                let mut buffer = [0u8; 4];
                buffer[..bytes.len()].copy_from_slice(bytes);
                self.strings_length4.insert(u32::from_le_bytes(buffer))
            }
            5..=8 => {
                let mut buffer = [0u8; 8];
                buffer[..bytes.len()].copy_from_slice(bytes);
                self.strings_length8.insert(u64::from_le_bytes(buffer))
            }
            9..=16 => {
                let mut buffer = [0u8; 16];
                buffer[..bytes.len()].copy_from_slice(bytes);
                self.strings_length16.insert(u128::from_le_bytes(buffer))
            }
            _ => self.strings_length16_plus.insert(hash::hash(value)),
        }
    }

    /// Number of distinct values retained
    pub fn len(&self) -> usize {
        self.numbers.len()
            + self.strings_length4.len()
            + self.strings_length8.len()
            + self.strings_length16.len()
            + self.strings_length16_plus.len()
            + self.arrays.len()
            + self.objects.len()
            + self.others.len()
            + self.simple_values.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the whole map as a JSON object
    pub fn continuation_token(&self) -> Option<String> {
        let mut numbers: Vec<Number> = self.numbers.iter().map(|key| key.number()).collect();
        numbers.sort_by(|a, b| a.total_cmp(b));

        let mut finite = Vec::with_capacity(numbers.len());
        let mut non_finite = Vec::new();
        for number in numbers {
            match number {
                Number::Int(i) => finite.push(serde_json::Number::from(i)),
                Number::Float(f) => match serde_json::Number::from_f64(f) {
                    Some(json) => finite.push(json),
                    None => non_finite.push(format_non_finite(f)),
                },
            }
        }

        let token = UnorderedDistinctMapToken {
            numbers: finite,
            non_finite_numbers: non_finite,
            strings_length4: sorted(&self.strings_length4),
            strings_length8: sorted(&self.strings_length8),
            strings_length16: hex_list(&self.strings_length16),
            strings_length16_plus: hex_list(&self.strings_length16_plus),
            arrays: hex_list(&self.arrays),
            objects: hex_list(&self.objects),
            others: hex_list(&self.others),
            simple_values: format_simple_values(self.simple_values),
        };
        serde_json::to_string(&token).ok()
    }

    /// Rebuild a map from a continuation token; `None` starts empty
    pub fn try_create(token: Option<&str>) -> Result<Self> {
        let text = match token {
            None => return Ok(Self::new()),
            Some(text) => text,
        };
        let malformed = |message: String| QueryError::malformed_continuation(message, text);

        let parsed: UnorderedDistinctMapToken = serde_json::from_str(text)
            .map_err(|e| malformed(format!("unordered distinct map token: {}", e)))?;

        let mut map = Self::new();
        for number in &parsed.numbers {
            let number = match number.as_i64() {
                Some(i) => Number::Int(i),
                None => Number::Float(number.as_f64().ok_or_else(|| {
                    malformed(format!("unparseable number {}", number))
                })?),
            };
            map.numbers.insert(NumberKey::new(number));
        }
        for text in &parsed.non_finite_numbers {
            let value = parse_non_finite(text)
                .ok_or_else(|| malformed(format!("unrecognized non-finite number '{}'", text)))?;
            map.numbers.insert(NumberKey::new(Number::Float(value)));
        }
        map.strings_length4.extend(parsed.strings_length4);
        map.strings_length8.extend(parsed.strings_length8);
        map.strings_length16 = parse_hex_list(&parsed.strings_length16, "StringsLength16")
            .map_err(&malformed)?;
        map.strings_length16_plus =
            parse_hex_list(&parsed.strings_length16_plus, "StringsLength16+")
                .map_err(&malformed)?;
        map.arrays = parse_hex_list(&parsed.arrays, "Arrays").map_err(&malformed)?;
        map.objects = parse_hex_list(&parsed.objects, "Objects").map_err(&malformed)?;
        map.others = parse_hex_list(&parsed.others, "Others").map_err(&malformed)?;
        map.simple_values = parse_simple_values(&parsed.simple_values).map_err(&malformed)?;
        Ok(map)
    }
}

fn format_non_finite(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value > 0.0 {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

fn parse_non_finite(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn sorted<T: Copy + Ord>(set: &AHashSet<T>) -> Vec<T> {
    let mut values: Vec<T> = set.iter().copied().collect();
    values.sort_unstable();
    values
}

fn hex_list(set: &AHashSet<u128>) -> Vec<String> {
    sorted(set)
        .into_iter()
        .map(|value| format!("{:032x}", value))
        .collect()
}

fn parse_hex_list(values: &[String], field: &str) -> std::result::Result<AHashSet<u128>, String> {
    values
        .iter()
        .map(|text| parse_hash(text).ok_or_else(|| format!("{} entry '{}' is not a 128-bit hex value", field, text)))
        .collect()
}

fn format_simple_values(flags: u8) -> String {
    let names: Vec<&str> = SIMPLE_VALUE_NAMES
        .iter()
        .filter(|(flag, _)| flags & flag != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "None".to_string()
    } else {
        names.join(", ")
    }
}

fn parse_simple_values(text: &str) -> std::result::Result<u8, String> {
    let mut flags = 0u8;
    for name in text.split(',').map(str::trim) {
        if name == "None" {
            continue;
        }
        let flag = SIMPLE_VALUE_NAMES
            .iter()
            .find(|(_, known)| *known == name)
            .map(|(flag, _)| *flag)
            .ok_or_else(|| format!("unrecognized simple value flag '{}'", name))?;
        flags |= flag;
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_twice() {
        let mut map = UnorderedDistinctMap::new();
        let doc = Value::from(json!({"id": "1", "tags": ["a", "b"]}));
        assert!(map.add(&doc));
        assert!(!map.add(&doc));
    }

    #[test]
    fn test_each_kind_is_tracked_once() {
        let mut map = UnorderedDistinctMap::new();
        let values = vec![
            json!(null),
            json!(true),
            json!(false),
            json!(""),
            json!([]),
            json!({}),
            json!(1),
            json!(1.5),
            json!("abc"),
            json!("abcdefg"),
            json!("abcdefghijklmno"),
            json!("a string well beyond sixteen bytes"),
            json!([1, 2]),
            json!({"a": 1}),
        ];
        for value in &values {
            assert!(map.add(&Value::from(value.clone())), "first add of {}", value);
        }
        for value in &values {
            assert!(!map.add(&Value::from(value.clone())), "second add of {}", value);
        }
        assert_eq!(map.len(), values.len());
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let mut map = UnorderedDistinctMap::new();
        assert!(map.add(&Value::from(0i64)));
        assert!(!map.add(&Value::from(-0.0)));
        assert!(!map.add(&Value::from(0.0)));
        assert!(map.add(&Value::from(0.25)));
    }

    #[test]
    fn test_short_strings_are_exact() {
        let mut map = UnorderedDistinctMap::new();
        assert!(map.add(&Value::from("ab")));
        assert!(map.add(&Value::from("ba")));
        assert!(map.add(&Value::from("abcdefgh")));
        assert!(map.add(&Value::from("abcdefgi")));
    }

    #[test]
    fn test_token_round_trip_preserves_membership() {
        let mut map = UnorderedDistinctMap::new();
        let values = vec![
            json!(null),
            json!(false),
            json!(-3),
            json!(2.5),
            json!("id"),
            json!("sixteen-byte-str"),
            json!("this one is definitely longer"),
            json!([null]),
            json!({"k": "v"}),
        ];
        for value in &values {
            map.add(&Value::from(value.clone()));
        }

        let token = map.continuation_token().unwrap();
        let mut resumed = UnorderedDistinctMap::try_create(Some(&token)).unwrap();
        for value in &values {
            assert!(!resumed.add(&Value::from(value.clone())), "{} lost", value);
        }
        assert!(resumed.add(&Value::from(json!(true))));
        assert!(resumed.add(&Value::from(json!("new"))));
    }

    #[test]
    fn test_non_finite_numbers_survive_token() {
        let mut map = UnorderedDistinctMap::new();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5] {
            assert!(map.add(&Value::from(value)));
        }
        // a NaN with a different payload is still NaN
        assert!(!map.add(&Value::from(f64::from_bits(f64::NAN.to_bits() | 1))));

        let token = map.continuation_token().unwrap();
        assert!(token.contains(r#""NonFiniteNumbers":["-Infinity","Infinity","NaN"]"#));
        let mut resumed = UnorderedDistinctMap::try_create(Some(&token)).unwrap();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5] {
            assert!(!resumed.add(&Value::from(value)), "{} lost", value);
        }
        assert_eq!(resumed.len(), 4);

        let err = UnorderedDistinctMap::try_create(Some(
            r#"{"Numbers": [], "NonFiniteNumbers": ["Huge"], "StringsLength4": [], "StringsLength8": [],
               "StringsLength16": [], "StringsLength16+": [], "Arrays": [], "Objects": [],
               "SimpleValues": "None"}"#,
        ))
        .unwrap_err();
        assert!(err.is_malformed_continuation());
    }

    #[test]
    fn test_simple_values_format() {
        assert_eq!(format_simple_values(0), "None");
        assert_eq!(format_simple_values(NULL | TRUE), "Null, True");
        assert_eq!(parse_simple_values("Null, True").unwrap(), NULL | TRUE);
        assert_eq!(parse_simple_values("None").unwrap(), 0);
    }

    #[test]
    fn test_malformed_tokens() {
        let cases = [
            "not json",
            "[]",
            r#"{"Numbers": []}"#,
            r#"{"Numbers": ["x"], "StringsLength4": [], "StringsLength8": [], "StringsLength16": [],
               "StringsLength16+": [], "Arrays": [], "Objects": [], "SimpleValues": "None"}"#,
            r#"{"Numbers": [], "StringsLength4": [], "StringsLength8": [], "StringsLength16": ["zz"],
               "StringsLength16+": [], "Arrays": [], "Objects": [], "SimpleValues": "None"}"#,
            r#"{"Numbers": [], "StringsLength4": [], "StringsLength8": [], "StringsLength16": [],
               "StringsLength16+": [], "Arrays": [], "Objects": [], "SimpleValues": "Maybe"}"#,
        ];
        for token in cases {
            let err = UnorderedDistinctMap::try_create(Some(token)).unwrap_err();
            assert!(err.is_malformed_continuation(), "accepted {}", token);
        }
    }
}
