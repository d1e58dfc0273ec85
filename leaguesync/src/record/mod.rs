//! Records, natural keys, and dataset kinds.
//!
//! A [`Record`] is a flat map of named attributes, deserialized straight
//! from collaborator output. Each [`DatasetKind`] declares the attribute
//! fields that form its natural key via a [`KeySpec`]; extracting those
//! fields from a record yields a [`NaturalKey`], the identity used for
//! upsert matching.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod dataset;

pub use dataset::{Dataset, DatasetSet};

/// A single data record: an ordered map of attribute names to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(serde_json::Map<String, Value>);

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of an attribute, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A short, deterministic description of the record for diagnostics.
    ///
    /// Renders up to three attributes in sorted order as `k=v` pairs.
    #[must_use]
    pub fn hint(&self) -> String {
        let sorted: BTreeMap<&String, &Value> = self.0.iter().collect();
        sorted
            .iter()
            .take(3)
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<serde_json::Map<String, Value>> for Record {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The extracted identity of a record under some [`KeySpec`].
///
/// Two records with equal natural keys describe the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey(Vec<String>);

impl NaturalKey {
    /// The canonical key parts, in key-spec field order.
    #[must_use]
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

/// The set of attribute fields that identify a record within a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    fields: Vec<String>,
}

impl KeySpec {
    /// Creates a key spec from an ordered list of field names.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// The key field names, in order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Extracts the natural key of a record.
    ///
    /// Every key field must be present and hold a scalar value; strings
    /// are taken verbatim, numbers and booleans use their canonical text
    /// form.
    pub fn key_of(&self, record: &Record) -> Result<NaturalKey, KeyError> {
        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = record.get(field).ok_or_else(|| KeyError::MissingField {
                field: field.clone(),
            })?;
            let part = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => {
                    return Err(KeyError::NullField {
                        field: field.clone(),
                    })
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(KeyError::NonScalarField {
                        field: field.clone(),
                    })
                }
            };
            parts.push(part);
        }
        Ok(NaturalKey(parts))
    }
}

/// Why a natural key could not be extracted from a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// A key field is absent from the record.
    #[error("Key field '{field}' is missing")]
    MissingField {
        /// The missing field name.
        field: String,
    },

    /// A key field holds an explicit null.
    #[error("Key field '{field}' is null")]
    NullField {
        /// The null field name.
        field: String,
    },

    /// A key field holds an array or object.
    #[error("Key field '{field}' is not a scalar")]
    NonScalarField {
        /// The non-scalar field name.
        field: String,
    },
}

impl KeyError {
    /// The field name the error refers to.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field } | Self::NullField { field } | Self::NonScalarField { field } => {
                field
            }
        }
    }
}

/// The datasets the pipeline manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// League standings, one row per team per season and competition.
    Standings,
    /// Match results, one row per fixture.
    Matches,
    /// In-match events, one row per player action.
    MatchEvents,
}

impl DatasetKind {
    /// All dataset kinds, in canonical order.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Standings, Self::Matches, Self::MatchEvents]
    }

    /// The natural-key spec for this dataset kind.
    #[must_use]
    pub fn key_spec(&self) -> KeySpec {
        match self {
            Self::Standings => KeySpec::new(["season", "competition", "team"]),
            Self::Matches => KeySpec::new(["match_url"]),
            Self::MatchEvents => KeySpec::new(["match_url", "player_name", "minute", "event_type"]),
        }
    }

    /// The snake_case name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standings => "standings",
            Self::Matches => "matches",
            Self::MatchEvents => "match_events",
        }
    }

    /// The file name this dataset is stored under.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn standings_record() -> Record {
        Record::new()
            .with("season", "2024-2025")
            .with("competition", "premier-league")
            .with("team", "arsenal")
            .with("points", 74)
    }

    #[test]
    fn test_key_extraction_in_field_order() {
        let spec = DatasetKind::Standings.key_spec();
        let key = spec.key_of(&standings_record()).unwrap();
        assert_eq!(key.parts(), ["2024-2025", "premier-league", "arsenal"]);
        assert_eq!(key.to_string(), "2024-2025|premier-league|arsenal");
    }

    #[test]
    fn test_numeric_key_fields_are_canonicalized() {
        let spec = KeySpec::new(["match_url", "minute"]);
        let record = Record::new().with("match_url", "/m/1").with("minute", 87);
        let key = spec.key_of(&record).unwrap();
        assert_eq!(key.parts(), ["/m/1", "87"]);
    }

    #[test]
    fn test_missing_key_field() {
        let spec = DatasetKind::Standings.key_spec();
        let record = Record::new().with("season", "2024-2025");
        let err = spec.key_of(&record).unwrap_err();
        assert!(matches!(err, KeyError::MissingField { .. }));
        assert_eq!(err.field(), "competition");
    }

    #[test]
    fn test_null_key_field() {
        let spec = KeySpec::new(["team"]);
        let record = Record::new().with("team", Value::Null);
        assert!(matches!(
            spec.key_of(&record),
            Err(KeyError::NullField { .. })
        ));
    }

    #[test]
    fn test_non_scalar_key_field() {
        let spec = KeySpec::new(["team"]);
        let record = Record::new().with("team", json!(["arsenal"]));
        assert!(matches!(
            spec.key_of(&record),
            Err(KeyError::NonScalarField { .. })
        ));
    }

    #[test]
    fn test_record_hint_is_deterministic() {
        let record = standings_record();
        let hint = record.hint();
        assert_eq!(
            hint,
            "competition=\"premier-league\", points=74, season=\"2024-2025\""
        );
    }

    #[test]
    fn test_record_serde_is_transparent() {
        let record = Record::new().with("team", "arsenal");
        let encoded = serde_json::to_string(&record).unwrap();
        assert_eq!(encoded, "{\"team\":\"arsenal\"}");
        let decoded: Record = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_dataset_kind_names() {
        assert_eq!(DatasetKind::Standings.as_str(), "standings");
        assert_eq!(DatasetKind::MatchEvents.file_name(), "match_events.json");
        let encoded = serde_json::to_string(&DatasetKind::MatchEvents).unwrap();
        assert_eq!(encoded, "\"match_events\"");
    }
}
