//! Canonical form for event names and attributes.
//!
//! Names and keys: trimmed, lower-cased, anything outside `[a-z0-9_]` becomes
//! `_`, at most [`MAX_NAME_LEN`] characters. String values are cut to
//! [`MAX_VALUE_LEN`] characters. At most [`MAX_ATTRIBUTES`] attributes are
//! kept, in key order.

use beacon_core::events::{AttrValue, Attributes};
use tracing::debug;

pub const MAX_NAME_LEN: usize = 40;
pub const MAX_VALUE_LEN: usize = 100;
pub const MAX_ATTRIBUTES: usize = 25;

/// Normalize an event name or attribute key. May return an empty string.
pub fn normalize_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect()
}

pub fn normalize_value(value: AttrValue) -> Option<AttrValue> {
    match value {
        AttrValue::String(s) if s.chars().count() > MAX_VALUE_LEN => {
            Some(AttrValue::String(s.chars().take(MAX_VALUE_LEN).collect()))
        }
        AttrValue::Float(f) if !f.is_finite() => None,
        other => Some(other),
    }
}

/// Normalize every key and value. Keys that collapse to empty, keys that
/// collide with an earlier key, and non-finite floats are dropped.
pub fn normalize_attributes(attrs: Attributes) -> Attributes {
    let mut out = Attributes::new();
    for (key, value) in attrs {
        if out.len() == MAX_ATTRIBUTES {
            debug!(key = %key, "attribute limit reached, dropping");
            break;
        }
        let key = normalize_key(&key);
        if key.is_empty() || out.contains_key(&key) {
            continue;
        }
        match normalize_value(value) {
            Some(value) => {
                out.insert(key, value);
            }
            None => debug!(key = %key, "dropping non-finite attribute"),
        }
    }
    out
}

/// Fill in `defaults` for keys the event does not set, up to the attribute
/// limit. Both maps are expected to be normalized already.
pub fn merge_defaults(attrs: &mut Attributes, defaults: &Attributes) {
    for (key, value) in defaults {
        if attrs.len() >= MAX_ATTRIBUTES {
            break;
        }
        if !attrs.contains_key(key) {
            attrs.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_canonicalized() {
        assert_eq!(normalize_key("  Level Complete "), "level_complete");
        assert_eq!(normalize_key("screen-view/Main"), "screen_view_main");
        assert_eq!(normalize_key("ÉTAPE"), "_tape");
        assert_eq!(normalize_key("   "), "");
    }

    #[test]
    fn key_is_truncated() {
        let long = "a".repeat(100);
        assert_eq!(normalize_key(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn long_strings_are_cut_on_char_boundaries() {
        let long = "é".repeat(150);
        let value = normalize_value(AttrValue::String(long)).unwrap();
        assert_eq!(value.as_str().unwrap().chars().count(), MAX_VALUE_LEN);
    }

    #[test]
    fn non_finite_floats_dropped() {
        assert_eq!(normalize_value(AttrValue::Float(f64::NAN)), None);
        assert_eq!(
            normalize_value(AttrValue::Float(1.5)),
            Some(AttrValue::Float(1.5))
        );
    }

    #[test]
    fn attribute_limit_applies() {
        let attrs: Attributes = (0..40)
            .map(|i| (format!("k{i:02}"), AttrValue::Int(i)))
            .collect();
        let out = normalize_attributes(attrs);
        assert_eq!(out.len(), MAX_ATTRIBUTES);
        assert!(out.contains_key("k00"));
        assert!(!out.contains_key("k30"));
    }

    #[test]
    fn colliding_keys_keep_first() {
        let mut attrs = Attributes::new();
        attrs.insert("Score".into(), 1i64.into());
        attrs.insert("score".into(), 2i64.into());
        attrs.insert("  ".into(), 3i64.into());
        let out = normalize_attributes(attrs);
        assert_eq!(out.len(), 1);
        assert_eq!(out["score"], AttrValue::Int(1));
    }

    #[test]
    fn defaults_never_override() {
        let mut attrs = Attributes::new();
        attrs.insert("tier".into(), "event".into());
        let mut defaults = Attributes::new();
        defaults.insert("tier".into(), "profile".into());
        defaults.insert("locale".into(), "en".into());

        merge_defaults(&mut attrs, &defaults);
        assert_eq!(attrs["tier"], AttrValue::from("event"));
        assert_eq!(attrs["locale"], AttrValue::from("en"));
    }
}
