//! Configuration schema entries: variable declarations, kinds and
//! constraints.

use crate::config::Value;
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a configuration variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    Bool,
    Int,
    Float,
    String,
    Path,
    /// Homogeneous list of the given element kind.
    List(Box<VariableKind>),
}

impl VariableKind {
    /// Check `value` against this kind, applying lenient coercions:
    /// integers widen to floats, strings become paths.
    ///
    /// Returns the (possibly coerced) value, or a type error naming the
    /// variable.
    pub fn check(&self, variable: &str, value: Value) -> Result<Value, ConfigError> {
        let mismatch = |value: &Value| ConfigError::TypeMismatch {
            variable: variable.to_string(),
            expected: self.to_string(),
            received: format!("{} ({})", value, value.kind_name()),
        };

        match (self, value) {
            (VariableKind::Bool, v @ Value::Bool(_)) => Ok(v),
            (VariableKind::Int, v @ Value::Int(_)) => Ok(v),
            (VariableKind::Float, v @ Value::Float(_)) => Ok(v),
            (VariableKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (VariableKind::String, v @ Value::String(_)) => Ok(v),
            (VariableKind::Path, v @ Value::Path(_)) => Ok(v),
            (VariableKind::Path, Value::String(s)) => Ok(Value::Path(s.into())),
            (VariableKind::List(elem), Value::List(items)) => {
                let items = items
                    .into_iter()
                    .map(|item| elem.check(variable, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(items))
            }
            (_, value) => Err(mismatch(&value)),
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKind::Bool => write!(f, "bool"),
            VariableKind::Int => write!(f, "int"),
            VariableKind::Float => write!(f, "float"),
            VariableKind::String => write!(f, "string"),
            VariableKind::Path => write!(f, "path"),
            VariableKind::List(elem) => write!(f, "list of {elem}"),
        }
    }
}

/// An optional validity constraint on a variable's resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    /// The value must equal one of the listed values.
    OneOf(Vec<Value>),
    /// The numeric value must lie in `[min, max]`.
    Range { min: f64, max: f64 },
}

impl Constraint {
    pub fn check(&self, variable: &str, value: &Value) -> Result<(), ConfigError> {
        let violation = |message: String| ConfigError::Constraint {
            variable: variable.to_string(),
            message,
        };

        match self {
            Constraint::OneOf(allowed) => {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err(violation(format!(
                        "'{value}' is not one of the allowed values {:?}",
                        allowed.iter().map(Value::to_string).collect::<Vec<_>>()
                    )))
                }
            }
            Constraint::Range { min, max } => {
                let n = value.as_float().ok_or_else(|| {
                    violation(format!("'{value}' is not numeric, cannot check range"))
                })?;
                if n < *min || n > *max {
                    Err(violation(format!("{n} is outside [{min}, {max}]")))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// A declared configuration variable.
///
/// Steps and flows declare the variables they consume as `Variable` values;
/// the union of those declarations forms the schema the resolver validates
/// sources against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub constraint: Option<Constraint>,
    /// Older names still accepted from sources, with a warning.
    #[serde(default)]
    pub deprecated_names: Vec<String>,
}

fn default_required() -> bool {
    true
}

impl Variable {
    pub fn new(name: &str, kind: VariableKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            default: None,
            required: true,
            constraint: None,
            deprecated_names: Vec::new(),
        }
    }

    /// Set a default value (implies the variable always resolves).
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Mark the variable optional: absence from every source is not an
    /// error, the variable is simply unset.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn with_deprecated_names(mut self, names: &[&str]) -> Self {
        self.deprecated_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Type-check, coerce and constraint-check a candidate value.
    pub fn validate(&self, value: Value) -> Result<Value, ConfigError> {
        let value = self.kind.check(&self.name, value)?;
        if let Some(constraint) = &self.constraint {
            constraint.check(&self.name, &value)?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_check_exact() {
        assert_eq!(
            VariableKind::Bool.check("X", Value::Bool(true)).unwrap(),
            Value::Bool(true)
        );
        assert!(VariableKind::Bool.check("X", Value::Int(1)).is_err());
    }

    #[test]
    fn test_kind_coerces_int_to_float() {
        assert_eq!(
            VariableKind::Float.check("X", Value::Int(3)).unwrap(),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_kind_coerces_string_to_path() {
        let v = VariableKind::Path.check("X", Value::from("a/b.lef")).unwrap();
        assert_eq!(v.as_path().unwrap(), std::path::Path::new("a/b.lef"));
    }

    #[test]
    fn test_kind_checks_list_elements() {
        let kind = VariableKind::List(Box::new(VariableKind::Int));
        assert!(kind
            .check("X", Value::List(vec![Value::Int(1), Value::Int(2)]))
            .is_ok());
        let err = kind
            .check("X", Value::List(vec![Value::Int(1), Value::from("a")]))
            .unwrap_err();
        assert!(err.to_string().contains("expected int"));
    }

    #[test]
    fn test_type_error_names_variable_and_types() {
        let err = VariableKind::Int.check("PL_TARGET_DENSITY", Value::from("high"));
        let msg = err.unwrap_err().to_string();
        assert!(msg.contains("PL_TARGET_DENSITY"));
        assert!(msg.contains("expected int"));
        assert!(msg.contains("high"));
    }

    #[test]
    fn test_constraint_one_of() {
        let c = Constraint::OneOf(vec![Value::from("min"), Value::from("max")]);
        assert!(c.check("CORNER", &Value::from("min")).is_ok());
        assert!(c.check("CORNER", &Value::from("typ")).is_err());
    }

    #[test]
    fn test_constraint_range() {
        let c = Constraint::Range { min: 0.0, max: 1.0 };
        assert!(c.check("UTIL", &Value::Float(0.4)).is_ok());
        assert!(c.check("UTIL", &Value::Int(1)).is_ok());
        assert!(c.check("UTIL", &Value::Float(1.5)).is_err());
        assert!(c.check("UTIL", &Value::from("half")).is_err());
    }

    #[test]
    fn test_variable_validate_runs_both_checks() {
        let var = Variable::new("UTIL", VariableKind::Float, "target utilization")
            .with_constraint(Constraint::Range { min: 0.0, max: 1.0 });
        assert_eq!(var.validate(Value::Int(1)).unwrap(), Value::Float(1.0));
        assert!(var.validate(Value::Float(3.0)).is_err());
        assert!(var.validate(Value::from("x")).is_err());
    }
}
