//! Tagged variable values used by overlays and template contexts.
//!
//! Instance configuration values are heterogeneous: scalars, nested tables
//! and arrays. [`Value`] captures that shape explicitly so overlays can be
//! copied structurally and handed to the template engine without any dynamic
//! type inspection.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Deepest nesting accepted for configuration values.
pub const MAX_VALUE_DEPTH: usize = 32;

/// Errors raised while validating values.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ValueError {
    /// Raised when a value nests deeper than [`MAX_VALUE_DEPTH`].
    #[error("value `{key}` nests deeper than {limit} levels")]
    TooDeep {
        /// Top-level key holding the offending value.
        key: String,
        /// Maximum supported depth.
        limit: usize,
    },
}

/// Leaf value in a variable mapping.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    /// UTF-8 text.
    String(String),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Boolean flag.
    Boolean(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(text) => f.write_str(text),
            Self::Integer(number) => write!(f, "{number}"),
            Self::Float(number) => write!(f, "{number}"),
            Self::Boolean(flag) => write!(f, "{flag}"),
        }
    }
}

/// A scalar, nested mapping, or sequence.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Leaf value.
    Scalar(Scalar),
    /// Nested mapping keyed by name.
    Mapping(BTreeMap<String, Value>),
    /// Ordered list of values.
    Sequence(Vec<Value>),
}

impl Value {
    /// Convenience constructor for string scalars.
    #[must_use]
    pub fn string(text: impl Into<String>) -> Self {
        Self::Scalar(Scalar::String(text.into()))
    }

    /// Returns the nesting depth; scalars have depth one.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Mapping(entries) => 1 + entries.values().map(Self::depth).max().unwrap_or(0),
            Self::Sequence(items) => 1 + items.iter().map(Self::depth).max().unwrap_or(0),
        }
    }

    /// Produces an independent copy of the value, recursing through nested
    /// mappings and sequences.
    ///
    /// Values are depth-checked when they enter a [`crate::VariableOverlay`],
    /// so the recursion here is bounded by [`MAX_VALUE_DEPTH`].
    #[must_use]
    pub fn structural_copy(&self) -> Self {
        match self {
            Self::Scalar(scalar) => Self::Scalar(scalar.clone()),
            Self::Mapping(entries) => Self::Mapping(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.structural_copy()))
                    .collect(),
            ),
            Self::Sequence(items) => {
                Self::Sequence(items.iter().map(Self::structural_copy).collect())
            }
        }
    }

    /// Returns the textual form of a scalar, or `None` for collections.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Scalar(scalar) => Some(scalar.to_string()),
            Self::Mapping(_) | Self::Sequence(_) => None,
        }
    }

    /// Interprets the value as a flag.
    ///
    /// Strings are read the way INI-style booleans are: `false`, `no`, `off`,
    /// `0` and the empty string are false. Collections are true when
    /// non-empty.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Scalar(Scalar::Boolean(flag)) => *flag,
            Self::Scalar(Scalar::Integer(number)) => *number != 0,
            Self::Scalar(Scalar::Float(number)) => *number != 0.0,
            Self::Scalar(Scalar::String(text)) => !matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "" | "false" | "no" | "off" | "0"
            ),
            Self::Mapping(entries) => !entries.is_empty(),
            Self::Sequence(items) => !items.is_empty(),
        }
    }

    /// Looks up a dotted path (`a.b.c`) through nested mappings.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Self> {
        path.split('.').try_fold(self, |current, segment| match current {
            Self::Mapping(entries) => entries.get(segment),
            Self::Scalar(_) | Self::Sequence(_) => None,
        })
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Scalar(Scalar::Boolean(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Scalar(Scalar::Integer(value))
    }
}

/// Checks that every value in `entries` respects [`MAX_VALUE_DEPTH`].
///
/// # Errors
///
/// Returns [`ValueError::TooDeep`] naming the first offending key.
pub fn check_depth(entries: &BTreeMap<String, Value>) -> Result<(), ValueError> {
    match entries
        .iter()
        .find(|(_, value)| value.depth() > MAX_VALUE_DEPTH)
    {
        Some((key, _)) => Err(ValueError::TooDeep {
            key: key.clone(),
            limit: MAX_VALUE_DEPTH,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn nested(levels: usize) -> Value {
        (0..levels).fold(Value::string("leaf"), |inner, _| {
            Value::Sequence(vec![inner])
        })
    }

    #[test]
    fn structural_copy_is_independent() {
        let original = Value::Mapping(BTreeMap::from([(
            String::from("users"),
            Value::Sequence(vec![Value::string("alice")]),
        )]));
        let mut copy = original.structural_copy();

        if let Value::Mapping(entries) = &mut copy
            && let Some(Value::Sequence(users)) = entries.get_mut("users")
        {
            users.push(Value::string("bob"));
        }

        assert_ne!(original, copy);
        assert_eq!(
            original.get_path("users"),
            Some(&Value::Sequence(vec![Value::string("alice")]))
        );
    }

    #[test]
    fn depth_counts_nesting() {
        assert_eq!(Value::string("x").depth(), 1);
        assert_eq!(nested(3).depth(), 4);
    }

    #[test]
    fn check_depth_rejects_deep_values() {
        let entries = BTreeMap::from([(String::from("deep"), nested(MAX_VALUE_DEPTH))]);
        let err = check_depth(&entries).expect_err("depth should be rejected");
        assert_eq!(
            err,
            ValueError::TooDeep {
                key: String::from("deep"),
                limit: MAX_VALUE_DEPTH,
            }
        );
    }

    #[rstest]
    #[case(Value::from(true), true)]
    #[case(Value::from(false), false)]
    #[case(Value::from(0_i64), false)]
    #[case(Value::string("yes"), true)]
    #[case(Value::string("False"), false)]
    #[case(Value::string("off"), false)]
    #[case(Value::string(""), false)]
    #[case(Value::Sequence(Vec::new()), false)]
    fn truthiness_follows_ini_conventions(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.is_truthy(), expected);
    }

    #[test]
    fn get_path_walks_mappings() {
        let value = Value::Mapping(BTreeMap::from([(
            String::from("net"),
            Value::Mapping(BTreeMap::from([(String::from("dns"), Value::string("1.1.1.1"))])),
        )]));

        assert_eq!(value.get_path("net.dns"), Some(&Value::string("1.1.1.1")));
        assert_eq!(value.get_path("net.gateway"), None);
        assert_eq!(value.get_path("net.dns.extra"), None);
    }
}
