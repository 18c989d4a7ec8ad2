//! URL query-string encoding for mappings and records.
//!
//! Records are any `Serialize` type whose serialized form is a map. Field
//! names follow serde: `#[serde(rename = "...")]` gives a field its external
//! name, and `#[serde(flatten)]` merges an embedded record's parameters into
//! the parent without a prefix.
//!
//! ```
//! use relay_http::encode::encode_record;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Page {
//!     offset: u32,
//! }
//!
//! #[derive(Serialize)]
//! struct Search {
//!     #[serde(rename = "q")]
//!     query: String,
//!     #[serde(flatten)]
//!     page: Page,
//! }
//!
//! let search = Search { query: "rust".into(), page: Page { offset: 20 } };
//! assert_eq!(encode_record(&search).unwrap(), "offset=20&q=rust");
//! ```

use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const UNSUPPORTED_SOURCE: &str =
    "only mapping or structured-record types are supported as query sources";

/// Encodes string pairs as a query string, sorted by key.
///
/// When a key appears more than once the last value wins.
///
/// ```
/// use relay_http::encode::encode_map;
///
/// let query = encode_map([("key", "abc"), ("id", "1")]);
/// assert_eq!(query, "id=1&key=abc");
/// ```
pub fn encode_map<I, K, V>(params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let params: BTreeMap<String, String> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    serialize_pairs(params)
}

/// Encodes a record (or a map-like value) as a query string, sorted by
/// parameter name.
///
/// # Errors
///
/// Returns [`Error::ConfigurationError`] if the value does not serialize to a
/// map, e.g. a bare scalar or a sequence.
pub fn encode_record<T>(record: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    Ok(serialize_pairs(record_params(record)?))
}

/// Flattens a record into its `(name, value)` parameter list, sorted by name.
///
/// Scalars are stringified, `None` fields are skipped, sequences yield one
/// parameter per element and nested (non-flattened) records are rendered as
/// their JSON text.
pub fn record_params<T>(record: &T) -> Result<Vec<(String, String)>>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(record)
        .map_err(|e| Error::config(format!("failed to serialize query record: {}", e)))?;

    let Value::Object(fields) = value else {
        return Err(Error::config(UNSUPPORTED_SOURCE));
    };

    let mut params = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items.into_iter().filter(|item| !item.is_null()) {
                    params.push((name.clone(), stringify(item)));
                }
            }
            other => params.push((name, stringify(other))),
        }
    }
    params.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(params)
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        nested => nested.to_string(),
    }
}

fn serialize_pairs<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Inner {
        #[serde(rename = "A")]
        a: u32,
    }

    #[derive(Serialize)]
    struct Outer {
        #[serde(rename = "B")]
        b: u32,
        #[serde(flatten)]
        embedded: Inner,
    }

    #[test]
    fn test_embedded_record_is_flattened_without_prefix() {
        let record = Outer {
            b: 2,
            embedded: Inner { a: 1 },
        };
        let params = record_params(&record).unwrap();
        assert_eq!(
            params,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_mapping_encodes_each_key_once() {
        let query = encode_map(HashMap::from([("id", "1"), ("key", "abc")]));
        assert_eq!(query.matches("id=1").count(), 1);
        assert_eq!(query.matches("key=abc").count(), 1);
        assert_eq!(query, "id=1&key=abc");
    }

    #[test]
    fn test_mapping_last_write_wins() {
        assert_eq!(encode_map([("a", "1"), ("a", "2")]), "a=2");
    }

    #[test]
    fn test_record_reference_and_field_names() {
        #[derive(Serialize)]
        struct User {
            id: u32,
            #[serde(rename = "is_vip")]
            vip: bool,
            nickname: Option<String>,
        }
        let user = User {
            id: 7,
            vip: true,
            nickname: None,
        };
        let by_ref: &User = &user;
        assert_eq!(encode_record(&by_ref).unwrap(), "id=7&is_vip=true");
    }

    #[test]
    fn test_values_are_url_encoded() {
        assert_eq!(encode_map([("q", "a b&c")]), "q=a+b%26c");
    }

    #[test]
    fn test_sequences_repeat_the_parameter() {
        #[derive(Serialize)]
        struct Filter {
            tag: Vec<&'static str>,
        }
        let filter = Filter {
            tag: vec!["x", "y"],
        };
        assert_eq!(encode_record(&filter).unwrap(), "tag=x&tag=y");
    }

    #[test]
    fn test_map_values_are_supported() {
        let query = encode_record(&HashMap::from([("a", 1)])).unwrap();
        assert_eq!(query, "a=1");
    }

    #[test]
    fn test_non_record_source_is_rejected() {
        let err = encode_record(&42).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("only mapping or structured-record"));

        assert!(encode_record(&vec![1, 2]).is_err());
    }

    #[test]
    fn test_encoding_is_stable() {
        let record = Outer {
            b: 2,
            embedded: Inner { a: 1 },
        };
        assert_eq!(encode_record(&record).unwrap(), encode_record(&record).unwrap());
    }
}
