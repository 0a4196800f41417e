//! Layered, schema-validated configuration.
//!
//! Values flow in from ranked sources (run overrides, the design's config
//! document, the environment, PDK/SCL defaults), get merged per variable
//! with first-source-wins semantics, and come out as one immutable
//! [`Config`]. Steps and flows declare the [`Variable`]s they consume; the
//! union of those declarations is the schema everything is validated
//! against before any step runs.

mod resolver;
mod value;
mod variable;

pub use resolver::{Config, ConfigSource};
pub use value::Value;
pub use variable::{Constraint, Variable, VariableKind};

/// Variables every flow consumes regardless of its steps.
pub fn common_variables() -> Vec<Variable> {
    vec![
        Variable::new(
            "DESIGN_NAME",
            VariableKind::String,
            "Name of the design's top-level module.",
        ),
        Variable::new(
            "DESIGN_DIR",
            VariableKind::Path,
            "Directory containing the design's source files.",
        )
        .with_default(std::path::PathBuf::from(".")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_variables_include_design_name() {
        let vars = common_variables();
        let design_name = vars.iter().find(|v| v.name == "DESIGN_NAME").unwrap();
        assert!(design_name.required);
        assert_eq!(design_name.kind, VariableKind::String);
    }
}
