use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Condition
///
/// A single comparison applied to one field. Serialized in the CMS query shape,
/// e.g. `{"equals": "published"}` or `{"exists": false}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Equals(Value),
    /// `false` matches a missing or null field, `true` a present non-null one.
    Exists(bool),
}

impl Condition {
    fn holds(&self, field: Option<&Value>) -> bool {
        match self {
            Condition::Equals(expected) => field == Some(expected),
            Condition::Exists(should_exist) => {
                let present = !matches!(field, None | Some(Value::Null));
                present == *should_exist
            }
        }
    }
}

/// Where
///
/// A boolean combination of field clauses narrowing which documents an operation
/// may see or touch. The JSON form matches the CMS convention:
///
/// ```json
/// {"or": [{"_status": {"equals": "published"}}, {"_status": {"exists": false}}]}
/// ```
///
/// A `Fields` map with several entries requires all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Where {
    And { and: Vec<Where> },
    Or { or: Vec<Where> },
    Fields(BTreeMap<String, Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("field {0:?} cannot be used in a filter")]
    UnknownField(String),
    #[error("unsupported value for field {field:?}: {value}")]
    UnsupportedValue { field: String, value: String },
}

impl Where {
    pub fn field(name: impl Into<String>, condition: Condition) -> Self {
        Where::Fields(BTreeMap::from([(name.into(), condition)]))
    }

    pub fn equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(name, Condition::Equals(value.into()))
    }

    pub fn exists(name: impl Into<String>, exists: bool) -> Self {
        Self::field(name, Condition::Exists(exists))
    }

    pub fn any(clauses: Vec<Where>) -> Self {
        Where::Or { or: clauses }
    }

    pub fn all(clauses: Vec<Where>) -> Self {
        Where::And { and: clauses }
    }

    /// Combines a caller query with an access filter. Both must hold.
    pub fn and(self, other: Where) -> Self {
        match self {
            Where::And { mut and } => {
                and.push(other);
                Where::And { and }
            }
            first => Where::And {
                and: vec![first, other],
            },
        }
    }

    /// Evaluates the filter against a serialized document.
    /// Anything that is not a JSON object never matches.
    pub fn matches(&self, document: &Value) -> bool {
        let Some(object) = document.as_object() else {
            return false;
        };
        match self {
            Where::And { and } => and.iter().all(|w| w.matches(document)),
            Where::Or { or } => or.iter().any(|w| w.matches(document)),
            Where::Fields(fields) => fields
                .iter()
                .all(|(name, condition)| condition.holds(object.get(name))),
        }
    }
}
