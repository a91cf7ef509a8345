//! Response normalization
//!
//! Turns a raw [`Response`] into the shape selected by [`ResponseType`].
//! No error-code inspection happens here; an `errcode` body comes back as
//! ordinary data.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::http::Response;

/// Output shape for `Client::request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// The response as received
    Raw,
    /// Ordered key-value map
    #[default]
    Array,
    /// Map wrapped in a [`Collection`]
    Collection,
    /// Generic JSON value
    Object,
    /// Body text
    String,
}

impl ResponseType {
    /// Configuration name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Raw => "raw",
            ResponseType::Array => "array",
            ResponseType::Collection => "collection",
            ResponseType::Object => "object",
            ResponseType::String => "string",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(ResponseType::Raw),
            "array" => Ok(ResponseType::Array),
            "collection" => Ok(ResponseType::Collection),
            "object" => Ok(ResponseType::Object),
            "string" => Ok(ResponseType::String),
            other => Err(Error::Config(format!("unknown response type '{}'", other))),
        }
    }
}

/// Ordered map with keyed and positional access.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collection {
    items: Map<String, Value>,
}

impl Collection {
    /// Wrap a map.
    pub fn new(items: Map<String, Value>) -> Self {
        Self { items }
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    /// Entry at position `index`, in body order.
    pub fn nth(&self, index: usize) -> Option<(&str, &Value)> {
        self.items.iter().nth(index).map(|(k, v)| (k.as_str(), v))
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over entries in body order.
    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.items.iter()
    }

    /// Unwrap into the underlying map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.items
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = (&'a String, &'a Value);
    type IntoIter = serde_json::map::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// A response in its configured shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Unchanged response
    Raw(Response),
    /// Ordered key-value map
    Array(Map<String, Value>),
    /// Wrapped map
    Collection(Collection),
    /// Generic JSON value
    Object(Value),
    /// Body text
    Text(String),
}

impl Normalized {
    /// The map form, for `Array` and `Collection` results.
    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        match self {
            Normalized::Array(map) => Some(map),
            Normalized::Collection(collection) => Some(&collection.items),
            _ => None,
        }
    }

    /// Look up a top-level key in any keyed form.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Normalized::Object(value) => value.get(key),
            other => other.as_map().and_then(|map| map.get(key)),
        }
    }

    /// Convert to a JSON value. `Raw` and `Text` bodies are parsed.
    pub fn into_value(self) -> Result<Value> {
        match self {
            Normalized::Raw(response) => parse_body(&response),
            Normalized::Array(map) => Ok(Value::Object(map)),
            Normalized::Collection(collection) => Ok(Value::Object(collection.into_inner())),
            Normalized::Object(value) => Ok(value),
            Normalized::Text(text) => Ok(serde_json::from_str(&remove_control_characters(&text))?),
        }
    }
}

/// Strip C0 and C1 control characters, which some upstreams leave in
/// otherwise valid JSON.
pub fn remove_control_characters(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(*c, '\u{0}'..='\u{1F}' | '\u{80}'..='\u{9F}'))
        .collect()
}

/// Convert `response` into the shape selected by `response_type`.
///
/// # Errors
///
/// Returns [`Error::MalformedResponse`] when the body cannot take the
/// requested shape.
pub fn normalize(response: Response, response_type: ResponseType) -> Result<Normalized> {
    match response_type {
        ResponseType::Raw => Ok(Normalized::Raw(response)),
        ResponseType::String => Ok(Normalized::Text(response.text()?)),
        ResponseType::Object => Ok(Normalized::Object(parse_body(&response)?)),
        ResponseType::Array => Ok(Normalized::Array(to_map(parse_body(&response)?)?)),
        ResponseType::Collection => Ok(Normalized::Collection(Collection::new(to_map(
            parse_body(&response)?,
        )?))),
    }
}

fn parse_body(response: &Response) -> Result<Value> {
    let text = remove_control_characters(&response.text_lossy());
    serde_json::from_str(&text).map_err(|e| {
        Error::MalformedResponse(format!(
            "body of {} response is not JSON: {}",
            response.status().as_u16(),
            e
        ))
    })
}

fn to_map(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect()),
        other => Err(Error::MalformedResponse(format!(
            "expected a JSON object or array, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use http::{HeaderMap, StatusCode};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    fn response(body: &str) -> Response {
        Response::new(StatusCode::OK, HeaderMap::new(), body.to_string())
    }

    #[test]
    fn test_raw_is_identity() {
        let original = response("<xml>not json</xml>");
        let normalized = normalize(original.clone(), ResponseType::Raw).unwrap();
        assert_eq!(normalized, Normalized::Raw(original));
    }

    #[test]
    fn test_string_returns_body_text() {
        let normalized = normalize(response("{\"k\": 1}"), ResponseType::String).unwrap();
        assert_eq!(normalized, Normalized::Text("{\"k\": 1}".to_string()));
    }

    #[test]
    fn test_string_rejects_invalid_utf8() {
        let bad = Response::new(StatusCode::OK, HeaderMap::new(), vec![0xff, 0xfe]);
        assert_matches!(
            normalize(bad, ResponseType::String),
            Err(Error::MalformedResponse(_))
        );
    }

    #[test]
    fn test_array_keeps_body_order() {
        let normalized =
            normalize(response(r#"{"z":1,"a":2,"m":{"n":3}}"#), ResponseType::Array).unwrap();
        let map = normalized.as_map().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert_eq!(map["a"], json!(2));
        assert_eq!(normalized.get("m"), Some(&json!({"n": 3})));
    }

    #[test]
    fn test_array_indexes_top_level_list() {
        let normalized = normalize(response(r#"["x","y"]"#), ResponseType::Array).unwrap();
        let map = normalized.as_map().unwrap();
        assert_eq!(map["0"], json!("x"));
        assert_eq!(map["1"], json!("y"));
    }

    #[rstest]
    #[case::scalar("42")]
    #[case::null("null")]
    #[case::not_json("<xml/>")]
    #[case::empty("")]
    fn test_array_rejects_non_container(#[case] body: &str) {
        assert_matches!(
            normalize(response(body), ResponseType::Array),
            Err(Error::MalformedResponse(_))
        );
    }

    #[test]
    fn test_collection_access() {
        let normalized = normalize(
            response(r#"{"errcode":0,"errmsg":"ok"}"#),
            ResponseType::Collection,
        )
        .unwrap();
        let Normalized::Collection(collection) = normalized else {
            panic!("expected a collection");
        };
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.get("errmsg"), Some(&json!("ok")));
        assert_eq!(collection.nth(0), Some(("errcode", &json!(0))));
        assert!(collection.nth(2).is_none());
        assert!(collection.contains_key("errcode"));
    }

    #[test]
    fn test_object_accepts_scalars() {
        let normalized = normalize(response("true"), ResponseType::Object).unwrap();
        assert_eq!(normalized, Normalized::Object(json!(true)));
    }

    #[test]
    fn test_control_characters_are_ignored() {
        let normalized = normalize(response("{\"k\":\u{1}\"v\u{7}\"}"), ResponseType::Object).unwrap();
        assert_eq!(normalized.get("k"), Some(&json!("v")));
    }

    #[test]
    fn test_remove_control_characters() {
        assert_eq!(remove_control_characters("a\u{0}b\u{1f}c\u{85}d\te"), "abcde");
        assert_eq!(remove_control_characters("中文 ok"), "中文 ok");
    }

    #[rstest]
    #[case("raw", ResponseType::Raw)]
    #[case("Array", ResponseType::Array)]
    #[case(" collection ", ResponseType::Collection)]
    #[case("OBJECT", ResponseType::Object)]
    #[case("string", ResponseType::String)]
    fn test_response_type_from_str(#[case] input: &str, #[case] expected: ResponseType) {
        assert_eq!(input.parse::<ResponseType>().unwrap(), expected);
    }

    #[test]
    fn test_response_type_unknown() {
        assert_matches!("xml".parse::<ResponseType>(), Err(Error::Config(_)));
        assert_eq!(ResponseType::default(), ResponseType::Array);
    }

    #[test]
    fn test_into_value() {
        let value = normalize(response(r#"{"k":1}"#), ResponseType::Raw)
            .unwrap()
            .into_value()
            .unwrap();
        assert_eq!(value, json!({"k": 1}));
    }
}
