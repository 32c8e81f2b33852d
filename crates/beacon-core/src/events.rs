use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EventId;

/// Attribute map carried by an event. Ordered so serialized batches are stable.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A scalar attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Short type tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A normalized telemetry event, ready to be queued and uploaded.
///
/// Fields are private: once built, an event is never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    name: String,
    attributes: Attributes,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(name: impl Into<String>, attributes: Attributes) -> Self {
        Self::at(name, attributes, Utc::now())
    }

    /// Build an event with an explicit timestamp.
    pub fn at(name: impl Into<String>, attributes: Attributes, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            name: name.into(),
            attributes,
            timestamp,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_is_stamped_now() {
        let before = Utc::now();
        let event = Event::new("level_start", Attributes::new());
        let after = Utc::now();
        assert!(event.timestamp() >= before && event.timestamp() <= after);
        assert_eq!(event.name(), "level_start");
        assert!(event.id().as_str().starts_with("evt_"));
    }

    #[test]
    fn attr_value_conversions() {
        assert_eq!(AttrValue::from(true), AttrValue::Bool(true));
        assert_eq!(AttrValue::from(7_i32), AttrValue::Int(7));
        assert_eq!(AttrValue::from(7_u32), AttrValue::Int(7));
        assert_eq!(AttrValue::from(1.5), AttrValue::Float(1.5));
        assert_eq!(AttrValue::from("x"), AttrValue::String("x".into()));
        assert_eq!(AttrValue::from(3_i64).as_i64(), Some(3));
        assert_eq!(AttrValue::from("hi").as_str(), Some("hi"));
        assert_eq!(AttrValue::from(false).kind(), "bool");
    }

    #[test]
    fn attr_value_serializes_untagged() {
        let mut attrs = Attributes::new();
        attrs.insert("level".into(), 3_i64.into());
        attrs.insert("mode".into(), "hard".into());
        attrs.insert("ratio".into(), 0.5.into());
        attrs.insert("won".into(), true.into());
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"level": 3, "mode": "hard", "ratio": 0.5, "won": true})
        );
    }

    #[test]
    fn event_serde_preserves_everything() {
        let mut attrs = Attributes::new();
        attrs.insert("score".into(), 1200_i64.into());
        let event = Event::new("level_complete", attrs);
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.attribute("score"), Some(&AttrValue::Int(1200)));
    }

    #[test]
    fn display_formats_scalars() {
        assert_eq!(AttrValue::from(2_i64).to_string(), "2");
        assert_eq!(AttrValue::from("menu").to_string(), "menu");
        assert_eq!(AttrValue::from(true).to_string(), "true");
    }
}
