//! Simulated physical state of a device
//!
//! A [`StateDocument`] is the flat JSON object a device publishes. It is owned
//! by exactly one device worker, so nothing in here is synchronized.

use crate::error::{Result, SimError};
use crate::types::ActuatorBehavior;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A single state value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
}

impl Scalar {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Number(_) => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(_) => None,
        }
    }

    fn same_type(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Bool(_), Self::Bool(_)) | (Self::Number(_), Self::Number(_))
        )
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            _ => None,
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Mapping from field name to scalar, serialized as one flat JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDocument {
    fields: BTreeMap<String, Scalar>,
}

impl StateDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert used when declaring initial state
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<Scalar> {
        self.fields.get(field).copied()
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Overwrites an existing field; returns false if the field is not declared
    pub fn set(&mut self, field: &str, value: Scalar) -> bool {
        match self.fields.get_mut(field) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Scalar)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serializes the document as a UTF-8 JSON object
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.fields)?)
    }

    /// Parses a published payload back into a document
    ///
    /// # Errors
    ///
    /// Returns [`SimError::MalformedCommandPayload`] if the payload is not a
    /// flat JSON object of scalars
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Applies an actuator command to this document
    ///
    /// Only the behavior's primary field and its dependents are considered;
    /// every other key in the command is ignored. Dependents are applied only
    /// when the command switches the primary field to `true`. The document is
    /// left untouched when the command is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::MalformedCommandPayload`] if the payload is not a
    /// JSON object, lacks the primary field, or carries a value whose type
    /// differs from the declared field
    pub fn apply_command(&mut self, behavior: &ActuatorBehavior, payload: &[u8]) -> Result<()> {
        let command: Map<String, Value> = serde_json::from_slice(payload)?;

        let primary = command
            .get(&behavior.primary)
            .ok_or_else(|| {
                SimError::MalformedCommandPayload(format!(
                    "missing field `{}`",
                    behavior.primary
                ))
            })
            .and_then(|v| self.checked_value(&behavior.primary, v))?;

        let mut updates = vec![(behavior.primary.as_str(), primary)];
        if primary.as_bool() == Some(true) {
            for dependent in &behavior.dependents {
                if let Some(value) = command.get(dependent) {
                    updates.push((dependent.as_str(), self.checked_value(dependent, value)?));
                }
            }
        }

        for (field, value) in updates {
            self.set(field, value);
        }
        Ok(())
    }

    fn checked_value(&self, field: &str, value: &Value) -> Result<Scalar> {
        let scalar = Scalar::from_json(value).ok_or_else(|| {
            SimError::MalformedCommandPayload(format!("field `{field}` is not a scalar"))
        })?;
        match self.get(field) {
            Some(current) if current.same_type(&scalar) => Ok(scalar),
            Some(_) => Err(SimError::MalformedCommandPayload(format!(
                "field `{field}` has the wrong type"
            ))),
            None => Err(SimError::MalformedCommandPayload(format!(
                "field `{field}` is not part of the device state"
            ))),
        }
    }
}

impl FromIterator<(String, Scalar)> for StateDocument {
    fn from_iter<I: IntoIterator<Item = (String, Scalar)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thermostat() -> (StateDocument, ActuatorBehavior) {
        let doc = StateDocument::new()
            .with("active", true)
            .with("state", 0.0)
            .with("battery", 0.0)
            .with("linkquality", 0.0);
        let behavior = ActuatorBehavior {
            primary: "active".to_string(),
            dependents: vec!["state".to_string()],
            reply_delay_ms: None,
        };
        (doc, behavior)
    }

    #[test]
    fn test_payload_is_flat_json_object() {
        let doc = StateDocument::new().with("open", true).with("battery", 90.5);
        let payload = doc.to_payload().unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["open"], Value::Bool(true));
        assert_eq!(value["battery"].as_f64(), Some(90.5));
        assert_eq!(StateDocument::from_payload(&payload).unwrap(), doc);
    }

    #[test]
    fn test_set_rejects_undeclared_field() {
        let mut doc = StateDocument::new().with("on", true);
        assert!(doc.set("on", Scalar::Bool(false)));
        assert!(!doc.set("brightness", Scalar::Number(1.0)));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_command_applies_primary_and_dependent() {
        let (mut doc, behavior) = thermostat();
        doc.apply_command(&behavior, br#"{"active": true, "state": 21.5}"#)
            .unwrap();

        assert_eq!(doc.get("active"), Some(Scalar::Bool(true)));
        assert_eq!(doc.get("state"), Some(Scalar::Number(21.5)));
    }

    #[test]
    fn test_dependent_ignored_when_primary_false() {
        let (mut doc, behavior) = thermostat();
        doc.apply_command(&behavior, br#"{"active": false, "state": 30}"#)
            .unwrap();

        assert_eq!(doc.get("active"), Some(Scalar::Bool(false)));
        assert_eq!(doc.get("state"), Some(Scalar::Number(0.0)));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let (mut doc, behavior) = thermostat();
        let before = doc.clone();
        doc.apply_command(
            &behavior,
            br#"{"active": true, "colour": "red", "battery": 5, "correlationId": "abc"}"#,
        )
        .unwrap();

        assert_eq!(doc, before);
    }

    #[test]
    fn test_malformed_commands_leave_state_untouched() {
        let (mut doc, behavior) = thermostat();
        let before = doc.clone();

        for payload in [
            &b"not json"[..],
            br#"["active"]"#,
            br#"{"state": 10}"#,
            br#"{"active": "yes"}"#,
            br#"{"active": true, "state": false}"#,
        ] {
            let err = doc.apply_command(&behavior, payload).unwrap_err();
            assert!(matches!(err, SimError::MalformedCommandPayload(_)));
            assert_eq!(doc, before);
        }
    }
}
