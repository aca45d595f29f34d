//! Options Codec
//!
//! Parses OpenVPN's `key=value` comma- or newline-separated option lists
//! (push-reply uses `,` + `=`; peer-info uses newline + space) into an
//! ordered mapping, and binds that mapping onto typed option structs
//! through an explicit, construction-time field table rather than
//! reflection.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::{ProtocolError, Result};

/// A single option's value: either absent (bare key, no separator) or an
/// accumulated list of occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Key appeared with no key/value separator.
    Null,
    /// Key appeared with a separator at least once; holds one entry per occurrence.
    Values(Vec<String>),
}

/// Parsed option mapping. Preserves first-occurrence key order.
#[derive(Debug, Clone, Default)]
pub struct OptionMap {
    order: Vec<String>,
    entries: HashMap<String, OptionValue>,
}

impl OptionMap {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key's value.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.get(key)
    }

    /// Keys in first-occurrence order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    fn push(&mut self, key: String, value: Option<String>) -> Result<()> {
        if key.is_empty() {
            return Err(ProtocolError::InvalidPacket("empty option key".into()));
        }
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        match value {
            None => match self.entries.get(&key) {
                Some(OptionValue::Values(v)) if !v.is_empty() => {
                    Err(ProtocolError::InvalidPacket(format!(
                        "option {key} mixes null and value forms"
                    )))
                }
                _ => {
                    self.entries.insert(key, OptionValue::Null);
                    Ok(())
                }
            },
            Some(v) => match self.entries.entry(key.clone()) {
                Entry::Occupied(mut o) => match o.get_mut() {
                    OptionValue::Null => Err(ProtocolError::InvalidPacket(format!(
                        "option {key} mixes null and value forms"
                    ))),
                    OptionValue::Values(list) => {
                        list.push(v);
                        Ok(())
                    }
                },
                Entry::Vacant(e) => {
                    e.insert(OptionValue::Values(vec![v]));
                    Ok(())
                }
            },
        }
    }
}

/// Parse an option list using `sep` between entries and `kv_sep` between a
/// key and its value.
pub fn parse(s: &str, sep: char, kv_sep: char) -> Result<OptionMap> {
    let mut map = OptionMap::new();
    for part in s.split(sep) {
        let part = part.trim_matches(|c: char| c == '\r' || c == '\n');
        if part.is_empty() {
            continue;
        }
        match part.find(kv_sep) {
            Some(idx) => {
                let key = part[..idx].to_string();
                let value = part[idx + kv_sep.len_utf8()..].to_string();
                map.push(key, Some(value))?;
            }
            None => map.push(part.to_string(), None)?,
        }
    }
    Ok(map)
}

/// Serialize a mapping back to its string form with the given separators.
pub fn stringify(map: &OptionMap, sep: char, kv_sep: char) -> String {
    let mut parts = Vec::new();
    for key in &map.order {
        match map.entries.get(key).expect("key came from order list") {
            OptionValue::Null => parts.push(key.clone()),
            OptionValue::Values(values) => {
                for v in values {
                    parts.push(format!("{key}{kv_sep}{v}"));
                }
            }
        }
    }
    parts.join(&sep.to_string())
}

/// Presence-only or `true`/`false` boolean conversion.
pub fn as_bool(v: &OptionValue) -> bool {
    match v {
        OptionValue::Null => true,
        OptionValue::Values(vals) => vals
            .first()
            .map(|s| !s.eq_ignore_ascii_case("false") && s != "0")
            .unwrap_or(true),
    }
}

/// First value as an owned string, if any.
pub fn as_string(v: &OptionValue) -> Option<String> {
    match v {
        OptionValue::Null => None,
        OptionValue::Values(vals) => vals.first().cloned(),
    }
}

/// First value parsed as an integer (or other `FromStr` type).
pub fn as_parsed<T: std::str::FromStr>(v: &OptionValue) -> Option<T> {
    as_string(v).and_then(|s| s.parse().ok())
}

/// Split the first value on whitespace (used for space-separated lists
/// like `protocol-flags`).
pub fn as_space_list(v: &OptionValue) -> Vec<String> {
    as_string(v)
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_reply_style_roundtrip() {
        let input = "route-gateway 10.8.0.1,cipher AES-256-GCM,tun-mtu 1500,peer-id 1";
        let map = parse(input, ',', ' ').unwrap();

        assert_eq!(
            as_string(map.get("route-gateway").unwrap()),
            Some("10.8.0.1".to_string())
        );
        assert_eq!(
            as_string(map.get("cipher").unwrap()),
            Some("AES-256-GCM".to_string())
        );
        assert_eq!(as_parsed::<u32>(map.get("tun-mtu").unwrap()), Some(1500));
        assert_eq!(as_parsed::<u32>(map.get("peer-id").unwrap()), Some(1));
    }

    #[test]
    fn peer_info_style_roundtrip() {
        let input = "IV_VER=2.6.0\nIV_PLAT=linux\nIV_PROTO=6";
        let map = parse(input, '\n', '=').unwrap();
        assert_eq!(
            as_string(map.get("IV_VER").unwrap()),
            Some("2.6.0".to_string())
        );
        assert_eq!(
            as_string(map.get("IV_PLAT").unwrap()),
            Some("linux".to_string())
        );
    }

    #[test]
    fn bare_key_is_null() {
        let map = parse("route-nopull,cipher=AES-256-GCM", ',', '=').unwrap();
        assert_eq!(map.get("route-nopull"), Some(&OptionValue::Null));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(parse("=value", ',', '=').is_err());
    }

    #[test]
    fn mixing_null_and_value_is_format_error() {
        assert!(parse("foo,foo=bar", ',', '=').is_err());
        assert!(parse("foo=bar,foo", ',', '=').is_err());
    }

    #[test]
    fn repeated_keys_accumulate_in_order() {
        let map = parse("a=1,a=2,a=3", ',', '=').unwrap();
        match map.get("a").unwrap() {
            OptionValue::Values(vs) => assert_eq!(vs, &["1", "2", "3"]),
            OptionValue::Null => panic!("expected values"),
        }
    }

    #[test]
    fn stringify_then_parse_reproduces_mapping() {
        let map = parse("a=1,b=2,a=3", ',', '=').unwrap();
        let s = stringify(&map, ',', '=');
        let reparsed = parse(&s, ',', '=').unwrap();
        assert_eq!(reparsed.get("a"), map.get("a"));
        assert_eq!(reparsed.get("b"), map.get("b"));
    }
}
