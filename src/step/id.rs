//! Namespace-qualified step identifiers.

use crate::errors::FlowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a step implementation, a dotted pair
/// `Namespace.Name` (e.g. `OpenROAD.Floorplan`).
///
/// Both segments must be non-empty and consist of ASCII alphanumerics,
/// `_` or `-`. Ids are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId {
    full: String,
    dot: usize,
}

impl StepId {
    /// Parse and validate a dotted step id.
    pub fn parse(id: &str) -> Result<Self, FlowError> {
        let invalid = |reason: &str| FlowError::InvalidStepId {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let dot = id.find('.').ok_or_else(|| invalid("expected 'Namespace.Name'"))?;
        let (namespace, name) = (&id[..dot], &id[dot + 1..]);
        if namespace.is_empty() || name.is_empty() {
            return Err(invalid("namespace and name must be non-empty"));
        }
        if name.contains('.') {
            return Err(invalid("expected exactly one '.'"));
        }
        let ok = |s: &str| {
            s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        if !ok(namespace) || !ok(name) {
            return Err(invalid("segments may only contain [A-Za-z0-9_-]"));
        }

        Ok(Self {
            full: id.to_string(),
            dot,
        })
    }

    /// The namespace segment, e.g. `OpenROAD`.
    pub fn namespace(&self) -> &str {
        &self.full[..self.dot]
    }

    /// The name segment, e.g. `Floorplan`.
    pub fn name(&self) -> &str {
        &self.full[self.dot + 1..]
    }

    /// Filesystem-friendly form: lowercased, `.` replaced by `-`.
    pub fn slug(&self) -> String {
        self.full.to_lowercase().replace('.', "-")
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl FromStr for StepId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StepId {
    type Error = FlowError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<StepId> for String {
    fn from(id: StepId) -> Self {
        id.full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let id = StepId::parse("OpenROAD.Floorplan").unwrap();
        assert_eq!(id.namespace(), "OpenROAD");
        assert_eq!(id.name(), "Floorplan");
        assert_eq!(id.to_string(), "OpenROAD.Floorplan");
    }

    #[test]
    fn test_parse_rejects_missing_dot() {
        assert!(StepId::parse("Floorplan").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(StepId::parse(".Floorplan").is_err());
        assert!(StepId::parse("OpenROAD.").is_err());
        assert!(StepId::parse(".").is_err());
    }

    #[test]
    fn test_parse_rejects_extra_dots() {
        assert!(StepId::parse("A.B.C").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_characters() {
        assert!(StepId::parse("Open ROAD.Floorplan").is_err());
        assert!(StepId::parse("OpenROAD.Floor*").is_err());
    }

    #[test]
    fn test_slug() {
        let id = StepId::parse("Magic.DRC").unwrap();
        assert_eq!(id.slug(), "magic-drc");
    }

    #[test]
    fn test_serde_round_trip() {
        let id = StepId::parse("Yosys.Synthesis").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"Yosys.Synthesis\"");
        let back: StepId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_serde_rejects_invalid() {
        assert!(serde_json::from_str::<StepId>("\"nodot\"").is_err());
    }
}
