//! Declarative pipeline descriptions: base flows, explicit step lists and
//! the substitution algebra that edits them.
//!
//! A pipeline document selects a base flow by name (or gives an explicit
//! ordered list of step ids) and may attach a set of edits:
//!
//! ```toml
//! [meta]
//! version = 2
//! flow = "classic"
//!
//! [meta.substituting_steps]
//! "Verilator.Lint" = ""                    # remove
//! "Checker.Lint*" = ""                     # remove by prefix
//! "Yosys.Synthesis" = "Yosys.VHDLSynthesis" # replace in place
//! "OpenROAD.Floorplan" = "-Odb.Preparation" # insert before first match
//! "OpenROAD.CTS" = "+Checker.ClockSkew"      # insert after first match
//! ```
//!
//! Edits apply in document order; an edit whose pattern matches nothing is
//! a no-op. In JSON documents `null` is accepted as the removal directive
//! alongside the empty string.

use crate::config::{Value, Variable};
use crate::errors::FlowError;
use crate::step::StepId;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// The pipeline document schema version this build understands.
pub const PIPELINE_SCHEMA_VERSION: u64 = 2;

/// Either a named base flow or an explicit ordered list of step ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PipelineSteps {
    Named(String),
    Explicit(Vec<String>),
}

/// The `meta` table of a pipeline document.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineMeta {
    pub flow: PipelineSteps,
    #[serde(default)]
    pub substituting_steps: SubstitutionSet,
    #[serde(default = "default_version")]
    pub version: u64,
}

fn default_version() -> u64 {
    PIPELINE_SCHEMA_VERSION
}

impl PipelineMeta {
    pub fn check_version(&self) -> Result<(), FlowError> {
        if self.version != PIPELINE_SCHEMA_VERSION {
            return Err(FlowError::UnsupportedVersion {
                version: self.version,
                expected: PIPELINE_SCHEMA_VERSION,
            });
        }
        Ok(())
    }
}

/// An ordered set of pipeline edits.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionSet {
    edits: Vec<(String, Option<String>)>,
}

/// `true` when `pattern` matches `id`: exact match, or prefix match when
/// the pattern carries a trailing `*`.
pub fn pattern_matches(pattern: &str, id: &StepId) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => id.as_ref().starts_with(prefix),
        None => id.as_ref() == pattern,
    }
}

enum Edit {
    Remove,
    Replace(StepId),
    InsertBefore(StepId),
    InsertAfter(StepId),
}

impl SubstitutionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an edit. `None` (or an empty string) removes matching steps;
    /// `"New.Id"` replaces them; `"-New.Id"`/`"+New.Id"` insert before/after
    /// the first match.
    pub fn push(&mut self, target: &str, directive: Option<&str>) {
        self.edits
            .push((target.to_string(), directive.map(String::from)));
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Apply every edit, in order, to `steps`.
    pub fn apply(&self, mut steps: Vec<StepId>) -> Result<Vec<StepId>, FlowError> {
        for (target, directive) in &self.edits {
            validate_pattern(target)?;
            match parse_edit(target, directive.as_deref())? {
                Edit::Remove => steps.retain(|id| !pattern_matches(target, id)),
                Edit::Replace(new) => {
                    for id in steps.iter_mut() {
                        if pattern_matches(target, id) {
                            *id = new.clone();
                        }
                    }
                }
                Edit::InsertBefore(new) => {
                    if let Some(pos) = steps.iter().position(|id| pattern_matches(target, id)) {
                        steps.insert(pos, new);
                    }
                }
                Edit::InsertAfter(new) => {
                    if let Some(pos) = steps.iter().position(|id| pattern_matches(target, id)) {
                        steps.insert(pos + 1, new);
                    }
                }
            }
        }
        Ok(steps)
    }
}

fn validate_pattern(target: &str) -> Result<(), FlowError> {
    let invalid = |reason: &str| FlowError::InvalidSubstitution {
        target: target.to_string(),
        reason: reason.to_string(),
    };
    if target.is_empty() {
        return Err(invalid("pattern is empty"));
    }
    if let Some(star) = target.find('*')
        && star != target.len() - 1
    {
        return Err(invalid("'*' is only allowed as a trailing wildcard"));
    }
    Ok(())
}

fn parse_edit(target: &str, directive: Option<&str>) -> Result<Edit, FlowError> {
    let parse_id = |id: &str| {
        StepId::parse(id).map_err(|e| FlowError::InvalidSubstitution {
            target: target.to_string(),
            reason: e.to_string(),
        })
    };
    match directive {
        None | Some("") => Ok(Edit::Remove),
        Some(s) => {
            if let Some(rest) = s.strip_prefix('-') {
                Ok(Edit::InsertBefore(parse_id(rest)?))
            } else if let Some(rest) = s.strip_prefix('+') {
                Ok(Edit::InsertAfter(parse_id(rest)?))
            } else {
                Ok(Edit::Replace(parse_id(s)?))
            }
        }
    }
}

impl<'de> Deserialize<'de> for SubstitutionSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EditsVisitor;

        impl<'de> Visitor<'de> for EditsVisitor {
            type Value = SubstitutionSet;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of step patterns to substitution directives")
            }

            // Entries are visited in document order, which is the order the
            // edits must apply in.
            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut edits = Vec::new();
                while let Some(entry) = map.next_entry::<String, Option<String>>()? {
                    edits.push(entry);
                }
                Ok(SubstitutionSet { edits })
            }
        }

        deserializer.deserialize_map(EditsVisitor)
    }
}

/// A named, registrable base flow: an ordered step list plus the flow-level
/// variables it consumes and the gates that can switch steps off.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSpec {
    pub name: String,
    pub steps: Vec<StepId>,
    /// Flow-level configuration variables (gating variables live here).
    #[serde(default)]
    pub variables: Vec<Variable>,
    /// Step-id pattern to the boolean variables that must all be true for
    /// matching steps to run.
    #[serde(default)]
    pub gates: BTreeMap<String, Vec<String>>,
}

impl FlowSpec {
    pub fn new(name: &str, steps: &[&str]) -> Result<Self, FlowError> {
        let steps = steps
            .iter()
            .map(|s| StepId::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            steps,
            variables: Vec::new(),
            gates: BTreeMap::new(),
        })
    }

    pub fn with_variable(mut self, variable: Variable) -> Self {
        self.variables.push(variable);
        self
    }

    /// Gate steps matching `pattern` behind the given boolean variables.
    pub fn gated(mut self, pattern: &str, variables: &[&str]) -> Self {
        self.gates.insert(
            pattern.to_string(),
            variables.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

/// Named flow registration table, the flow-level mirror of
/// [`StepRegistry`](crate::step::StepRegistry).
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<String, FlowSpec>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: FlowSpec) -> Result<(), FlowError> {
        if self.flows.contains_key(&spec.name) {
            return Err(FlowError::DuplicateFlow { name: spec.name });
        }
        self.flows.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&FlowSpec> {
        self.flows.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&FlowSpec, FlowError> {
        self.get(name).ok_or_else(|| FlowError::UnknownFlow {
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.flows.keys().map(String::as_str)
    }
}

/// Resolve a pipeline description to its final ordered step-id list:
/// base list, then substitutions. Registry lookup of the resulting ids
/// happens at flow construction.
///
/// Returns the step ids and, when the base was a named flow, its spec.
pub fn resolve_pipeline<'a>(
    meta: &PipelineMeta,
    flows: &'a FlowRegistry,
) -> Result<(Vec<StepId>, Option<&'a FlowSpec>), FlowError> {
    meta.check_version()?;
    let (base, spec) = match &meta.flow {
        PipelineSteps::Named(name) => {
            let spec = flows.resolve(name)?;
            (spec.steps.clone(), Some(spec))
        }
        PipelineSteps::Explicit(ids) => {
            let ids = ids
                .iter()
                .map(|s| StepId::parse(s))
                .collect::<Result<Vec<_>, _>>()?;
            (ids, None)
        }
    };
    let steps = meta.substituting_steps.apply(base)?;
    Ok((steps, spec))
}

/// A full pipeline document: the `meta` table, optional command-step and
/// flow definitions, and every remaining top-level key as a configuration
/// variable (the "command-provided" source).
#[derive(Debug, Deserialize)]
pub struct PipelineDoc {
    pub meta: PipelineMeta,
    #[serde(default)]
    pub steps: Vec<crate::steps::CommandStepSpec>,
    #[serde(default)]
    pub flows: Vec<FlowSpec>,
    #[serde(flatten)]
    pub variables: BTreeMap<String, Value>,
}

impl PipelineDoc {
    /// Load a document from TOML (default) or JSON, selected by extension.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline document {}", path.display()))?;
        let doc = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            toml::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        };
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(steps: &[&str]) -> Vec<StepId> {
        steps.iter().map(|s| StepId::parse(s).unwrap()).collect()
    }

    fn names(steps: &[StepId]) -> Vec<&str> {
        steps.iter().map(|id| id.as_ref()).collect()
    }

    #[test]
    fn test_remove_exact() {
        let mut subs = SubstitutionSet::new();
        subs.push("B.Two", None);
        let out = subs.apply(ids(&["A.One", "B.Two", "C.Three"])).unwrap();
        assert_eq!(names(&out), vec!["A.One", "C.Three"]);
    }

    #[test]
    fn test_remove_by_prefix_preserves_order() {
        let mut subs = SubstitutionSet::new();
        subs.push("Checker.*", None);
        let out = subs
            .apply(ids(&[
                "Checker.LintErrors",
                "Yosys.Synthesis",
                "Checker.YosysChecks",
                "OpenROAD.Floorplan",
            ]))
            .unwrap();
        assert_eq!(names(&out), vec!["Yosys.Synthesis", "OpenROAD.Floorplan"]);
    }

    #[test]
    fn test_remove_zero_matches_is_noop() {
        let mut subs = SubstitutionSet::new();
        subs.push("Nope.*", None);
        let out = subs.apply(ids(&["A.One", "B.Two"])).unwrap();
        assert_eq!(names(&out), vec!["A.One", "B.Two"]);
    }

    #[test]
    fn test_replace_all_matches_in_place() {
        let mut subs = SubstitutionSet::new();
        subs.push("Yosys.Synthesis", Some("Yosys.VHDLSynthesis"));
        let out = subs
            .apply(ids(&["Verilator.Lint", "Yosys.Synthesis", "OpenROAD.Floorplan"]))
            .unwrap();
        assert_eq!(
            names(&out),
            vec!["Verilator.Lint", "Yosys.VHDLSynthesis", "OpenROAD.Floorplan"]
        );
    }

    #[test]
    fn test_insert_before_first_match() {
        let mut subs = SubstitutionSet::new();
        subs.push("B.Two", Some("-X.New"));
        let out = subs.apply(ids(&["A.One", "B.Two", "B.Two"])).unwrap();
        assert_eq!(names(&out), vec!["A.One", "X.New", "B.Two", "B.Two"]);
    }

    #[test]
    fn test_insert_after_first_match() {
        let mut subs = SubstitutionSet::new();
        subs.push("A.One", Some("+X.New"));
        let out = subs.apply(ids(&["A.One", "B.Two"])).unwrap();
        assert_eq!(names(&out), vec!["A.One", "X.New", "B.Two"]);
    }

    #[test]
    fn test_insert_at_pipeline_ends() {
        let mut subs = SubstitutionSet::new();
        subs.push("A.One", Some("-X.First"));
        subs.push("B.Two", Some("+X.Last"));
        let out = subs.apply(ids(&["A.One", "B.Two"])).unwrap();
        assert_eq!(names(&out), vec!["X.First", "A.One", "B.Two", "X.Last"]);
    }

    #[test]
    fn test_edits_apply_in_order() {
        let mut subs = SubstitutionSet::new();
        subs.push("A.One", Some("B.Two"));
        subs.push("B.*", None);
        let out = subs.apply(ids(&["A.One", "C.Three"])).unwrap();
        assert_eq!(names(&out), vec!["C.Three"]);
    }

    #[test]
    fn test_rejects_interior_wildcard() {
        let mut subs = SubstitutionSet::new();
        subs.push("A.*b", None);
        let err = subs.apply(ids(&["A.One"])).unwrap_err();
        assert!(matches!(err, FlowError::InvalidSubstitution { .. }));
    }

    #[test]
    fn test_rejects_bad_replacement_id() {
        let mut subs = SubstitutionSet::new();
        subs.push("A.One", Some("notdotted"));
        assert!(subs.apply(ids(&["A.One"])).is_err());
    }

    #[test]
    fn test_substitutions_deserialize_in_document_order() {
        let json = r#"{"Z.Last": null, "A.First": "B.New", "M.Mid": "+C.New"}"#;
        let subs: SubstitutionSet = serde_json::from_str(json).unwrap();
        let targets: Vec<&str> = subs.edits.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(targets, vec!["Z.Last", "A.First", "M.Mid"]);
        assert_eq!(subs.edits[0].1, None);
    }

    #[test]
    fn test_meta_version_check() {
        let meta: PipelineMeta =
            toml::from_str("flow = \"classic\"\nversion = 1\n").unwrap();
        assert!(matches!(
            meta.check_version(),
            Err(FlowError::UnsupportedVersion { version: 1, .. })
        ));

        let meta: PipelineMeta = toml::from_str("flow = \"classic\"\n").unwrap();
        assert!(meta.check_version().is_ok());
    }

    #[test]
    fn test_resolve_pipeline_explicit_list() {
        let meta: PipelineMeta = serde_json::from_str(
            r#"{"flow": ["Yosys.Synthesis", "OpenROAD.Floorplan"], "version": 2}"#,
        )
        .unwrap();
        let flows = FlowRegistry::new();
        let (steps, spec) = resolve_pipeline(&meta, &flows).unwrap();
        assert_eq!(names(&steps), vec!["Yosys.Synthesis", "OpenROAD.Floorplan"]);
        assert!(spec.is_none());
    }

    #[test]
    fn test_resolve_pipeline_named_flow_with_edits() {
        let mut flows = FlowRegistry::new();
        flows
            .register(
                FlowSpec::new("classic", &["Verilator.Lint", "Yosys.Synthesis", "Magic.DRC"])
                    .unwrap(),
            )
            .unwrap();

        let meta: PipelineMeta = serde_json::from_str(
            r#"{
                "flow": "classic",
                "substituting_steps": {"Verilator.Lint": null},
                "version": 2
            }"#,
        )
        .unwrap();
        let (steps, spec) = resolve_pipeline(&meta, &flows).unwrap();
        assert_eq!(names(&steps), vec!["Yosys.Synthesis", "Magic.DRC"]);
        assert_eq!(spec.unwrap().name, "classic");
    }

    #[test]
    fn test_resolve_pipeline_unknown_flow() {
        let meta: PipelineMeta =
            serde_json::from_str(r#"{"flow": "nope", "version": 2}"#).unwrap();
        let flows = FlowRegistry::new();
        assert!(matches!(
            resolve_pipeline(&meta, &flows),
            Err(FlowError::UnknownFlow { .. })
        ));
    }

    #[test]
    fn test_pipeline_doc_toml_with_flattened_variables() {
        let text = r#"
DESIGN_NAME = "cpu"
CLOCK_PERIOD = 10.0

[meta]
version = 2
flow = ["Mock.Synthesis"]
"#;
        let doc: PipelineDoc = toml::from_str(text).unwrap();
        assert_eq!(
            doc.variables.get("DESIGN_NAME"),
            Some(&Value::from("cpu"))
        );
        assert!(matches!(doc.meta.flow, PipelineSteps::Explicit(_)));
    }
}
