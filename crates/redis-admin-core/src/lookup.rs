//! Key lookups and their glob rewrite
//!
//! Redis can only match key names, and only with one glob per SCAN, so a
//! filter is exactly one condition on the `key` field.

use crate::{AdminError, Result};

/// Pattern used when no filter is active
pub const MATCH_ALL: &str = "*";

/// Lookup operator on the key name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOp {
    Exact,
    StartsWith,
    EndsWith,
    Contains,
}

impl LookupOp {
    /// Parse the suffix of a `key__<op>` lookup
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "exact" => Some(LookupOp::Exact),
            "startswith" => Some(LookupOp::StartsWith),
            "endswith" => Some(LookupOp::EndsWith),
            "contains" => Some(LookupOp::Contains),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LookupOp::Exact => "exact",
            LookupOp::StartsWith => "startswith",
            LookupOp::EndsWith => "endswith",
            LookupOp::Contains => "contains",
        }
    }
}

/// One condition on the key name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub op: LookupOp,
    pub value: String,
}

impl Lookup {
    pub fn new(op: LookupOp, value: impl Into<String>) -> Self {
        Self {
            op,
            value: value.into(),
        }
    }

    pub fn exact(value: impl Into<String>) -> Self {
        Self::new(LookupOp::Exact, value)
    }

    pub fn starts_with(value: impl Into<String>) -> Self {
        Self::new(LookupOp::StartsWith, value)
    }

    pub fn ends_with(value: impl Into<String>) -> Self {
        Self::new(LookupOp::EndsWith, value)
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self::new(LookupOp::Contains, value)
    }

    /// Parse a Django-style lookup such as `key`, `key__exact` or
    /// `key__startswith`.
    ///
    /// Only the `key` field can be searched.
    pub fn parse(field_lookup: &str, value: impl Into<String>) -> Result<Self> {
        let (field, suffix) = match field_lookup.split_once("__") {
            Some((field, suffix)) => (field, Some(suffix)),
            None => (field_lookup, None),
        };

        if field != "key" {
            return Err(AdminError::Lookup(format!(
                "{} is not supported, only the key can be searched",
                field_lookup
            )));
        }

        let op = match suffix {
            None => LookupOp::Exact,
            Some(suffix) => LookupOp::from_suffix(suffix).ok_or_else(|| {
                AdminError::Lookup(format!("{} is not supported", field_lookup))
            })?,
        };

        Ok(Self::new(op, value))
    }

    /// Parse `field__op=value`
    pub fn parse_assignment(expr: &str) -> Result<Self> {
        let (field_lookup, value) = expr.split_once('=').ok_or_else(|| {
            AdminError::Lookup(format!("expected <lookup>=<value>, got {:?}", expr))
        })?;
        Self::parse(field_lookup.trim(), value)
    }

    /// The SCAN MATCH glob for this condition.
    ///
    /// The value is used verbatim, so glob characters in it keep their
    /// meaning.
    pub fn to_pattern(&self) -> String {
        match self.op {
            LookupOp::Exact => self.value.clone(),
            LookupOp::StartsWith => format!("{}*", self.value),
            LookupOp::EndsWith => format!("*{}", self.value),
            LookupOp::Contains => format!("*{}*", self.value),
        }
    }
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key__{}={:?}", self.op.as_str(), self.value)
    }
}

/// Rewrite a set of conditions into one glob.
///
/// No conditions match everything; more than one is rejected rather than
/// combined, since a single SCAN cannot express it.
pub fn pattern_for(lookups: &[Lookup]) -> Result<Option<String>> {
    match lookups {
        [] => Ok(None),
        [lookup] => Ok(Some(lookup.to_pattern())),
        many => {
            let rendered: Vec<String> = many.iter().map(|l| l.to_string()).collect();
            Err(AdminError::Lookup(format!(
                "only one key condition can be applied at a time, got {}",
                rendered.join(", ")
            )))
        }
    }
}
