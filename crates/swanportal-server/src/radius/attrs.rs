//! RADIUS attribute dictionary model.
//!
//! The bridge serializes requests and replies as
//! `{ "<Attr>": { "type": "...", "value": [ ... ] } }`. Values are
//! inherently dynamic, so they are modeled as a tagged sum and known
//! attributes are extracted by name where needed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Float(f64),
    List(Vec<AttrValue>),
}

impl AttrValue {
    /// The value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer; floats are truncated as the bridge
    /// serializes counters as JSON numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(v) => Some(*v),
            AttrValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }
}

/// One attribute: a type label and a value list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusAttribute {
    #[serde(rename = "type")]
    pub attr_type: String,
    pub value: Vec<AttrValue>,
}

impl RadiusAttribute {
    /// A single-valued string attribute.
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            attr_type: "string".into(),
            value: vec![AttrValue::String(value.into())],
        }
    }
}

/// An attribute map as received from or sent to the bridge.
///
/// `BTreeMap` keeps serialization order deterministic for log records.
pub type AttributeMap = BTreeMap<String, RadiusAttribute>;

/// Extract a single-valued string attribute.
pub fn single_string<'a>(attrs: &'a AttributeMap, name: &str) -> Option<&'a str> {
    let attr = attrs.get(name)?;
    if attr.value.len() != 1 {
        return None;
    }
    attr.value[0].as_str()
}

/// Extract a single-valued numeric attribute.
pub fn single_i64(attrs: &AttributeMap, name: &str) -> Option<i64> {
    let attr = attrs.get(name)?;
    if attr.value.len() != 1 {
        return None;
    }
    attr.value[0].as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> AttributeMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_request_shape() {
        let attrs = parse(json!({
            "User-Name": {"type": "string", "value": ["alice@example.com"]},
            "Acct-Input-Octets": {"type": "integer", "value": [1234]},
            "Tmp-Cast": {"type": "octets", "value": [["a", "b"]]},
        }));

        assert_eq!(
            single_string(&attrs, "User-Name"),
            Some("alice@example.com")
        );
        assert_eq!(single_i64(&attrs, "Acct-Input-Octets"), Some(1234));
        assert!(matches!(
            attrs["Tmp-Cast"].value[0],
            AttrValue::List(ref items) if items.len() == 2
        ));
    }

    #[test]
    fn test_float_counter_truncates() {
        let attrs = parse(json!({
            "Acct-Output-Octets": {"type": "integer", "value": [99.0]},
        }));
        assert_eq!(single_i64(&attrs, "Acct-Output-Octets"), Some(99));
    }

    #[test]
    fn test_multi_value_is_not_single() {
        let attrs = parse(json!({
            "User-Name": {"type": "string", "value": ["a", "b"]},
        }));
        assert_eq!(single_string(&attrs, "User-Name"), None);
    }

    #[test]
    fn test_reply_serialization() {
        let mut reply = AttributeMap::new();
        reply.insert("reply:Class".into(), RadiusAttribute::string("staff"));

        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            encoded,
            json!({"reply:Class": {"type": "string", "value": ["staff"]}})
        );
    }
}
