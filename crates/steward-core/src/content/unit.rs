//! Content units and per-call options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StewardError};

/// One piece of content to act on, e.g. `{"type_id": "rpm", "unit_key": {"name": "zsh"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub type_id: String,
    pub unit_key: Map<String, Value>,
}

impl ContentUnit {
    pub fn new(type_id: impl Into<String>, unit_key: Map<String, Value>) -> Self {
        Self {
            type_id: type_id.into(),
            unit_key,
        }
    }

    /// Shorthand for the common `{"name": ...}` key.
    pub fn named(type_id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut unit_key = Map::new();
        unit_key.insert("name".into(), Value::String(name.into()));
        Self::new(type_id, unit_key)
    }

    /// Validate a raw JSON batch. Rejects the whole batch on the first bad
    /// entry.
    pub fn parse_batch(raw: &Value) -> Result<Vec<ContentUnit>> {
        let entries = raw.as_array().ok_or_else(|| StewardError::MalformedUnit {
            index: 0,
            reason: "batch must be a JSON array".into(),
        })?;

        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let malformed = |reason: &str| StewardError::MalformedUnit {
                    index,
                    reason: reason.into(),
                };
                let obj = entry.as_object().ok_or_else(|| malformed("not an object"))?;
                let type_id = obj
                    .get("type_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("missing type_id"))?;
                let unit_key = obj
                    .get("unit_key")
                    .and_then(Value::as_object)
                    .ok_or_else(|| malformed("missing unit_key"))?;
                let unit = ContentUnit::new(type_id, unit_key.clone());
                unit.validate(index)?;
                Ok(unit)
            })
            .collect()
    }

    pub(crate) fn validate(&self, index: usize) -> Result<()> {
        if self.type_id.trim().is_empty() {
            return Err(StewardError::MalformedUnit {
                index,
                reason: "empty type_id".into(),
            });
        }
        Ok(())
    }
}

/// Options passed through to handlers. `reboot` asks for a reboot when
/// anything changed; other keys are handler-specific.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub reboot: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Options {
    pub fn with_reboot(mut self) -> Self {
        self.reboot = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn parses_well_formed_batch() {
        let raw = json!([
            { "type_id": "rpm", "unit_key": { "name": "zsh" } },
            { "type_id": "rpm", "unit_key": { "name": "ksh", "arch": "x86_64" } },
        ]);
        let units = ContentUnit::parse_batch(&raw).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], ContentUnit::named("rpm", "zsh"));
        assert_eq!(units[1].unit_key["arch"], "x86_64");
    }

    #[rstest]
    #[case::not_array(json!({ "type_id": "rpm" }), 0)]
    #[case::missing_type(json!([{ "unit_key": {} }]), 0)]
    #[case::empty_type(json!([{ "type_id": " ", "unit_key": {} }]), 0)]
    #[case::missing_key(json!([{ "type_id": "rpm", "unit_key": { "name": "a" } }, { "type_id": "rpm" }]), 1)]
    #[case::key_not_object(json!([{ "type_id": "rpm", "unit_key": "zsh" }]), 0)]
    fn rejects_malformed_batch(#[case] raw: Value, #[case] bad_index: usize) {
        let err = ContentUnit::parse_batch(&raw).unwrap_err();
        assert!(matches!(err, StewardError::MalformedUnit { index, .. } if index == bad_index));
    }

    #[test]
    fn options_keep_unknown_keys() {
        let options: Options =
            serde_json::from_value(json!({ "reboot": true, "importkeys": true })).unwrap();
        assert!(options.reboot);
        assert_eq!(options.extra["importkeys"], true);

        let empty: Options = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, Options::default());
    }
}
