//! Best-effort conversion of declared numeric columns.
//!
//! Blank or malformed values fall back to the type's zero value so that a bad
//! cell never aborts ingestion of the row.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericKind {
    Float,
    Integer,
}

impl NumericKind {
    pub fn zero(self) -> Value {
        match self {
            NumericKind::Float => Value::from(0.0_f64),
            NumericKind::Integer => Value::from(0_i64),
        }
    }

    fn parse(self, raw: &str) -> Option<Value> {
        match self {
            NumericKind::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Value::from),
            NumericKind::Integer => raw.parse::<i64>().ok().map(Value::from),
        }
    }
}

/// A column that must be emitted as a number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericField {
    pub name: String,
    pub kind: NumericKind,
}

/// How a single value came out of coercion.
#[derive(Clone, Debug, PartialEq)]
pub enum Coercion {
    Parsed(Value),
    /// Absent or blank, replaced by zero.
    Defaulted(Value),
    /// Unparseable, replaced by zero; `warning` is what was logged.
    Invalid { value: Value, warning: String },
}

impl Coercion {
    pub fn into_value(self) -> Value {
        match self {
            Coercion::Parsed(value)
            | Coercion::Defaulted(value)
            | Coercion::Invalid { value, .. } => value,
        }
    }
}

impl NumericField {
    pub fn new(name: &str, kind: NumericKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    /// Coerce the raw cell of this field for the record identified by `record_id`.
    pub fn coerce(&self, raw: Option<&str>, record_id: &str) -> Coercion {
        let trimmed = raw.map(str::trim).unwrap_or_default();
        if trimmed.is_empty() {
            return Coercion::Defaulted(self.kind.zero());
        }

        match self.kind.parse(trimmed) {
            Some(value) => Coercion::Parsed(value),
            None => {
                let warning = format!(
                    "Invalid {} '{}' for id={} - replacing with 0",
                    self.name,
                    raw.unwrap_or_default(),
                    record_id
                );
                log::warn!("{warning}");
                Coercion::Invalid {
                    value: self.kind.zero(),
                    warning,
                }
            }
        }
    }
}
