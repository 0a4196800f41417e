//! Immutable design state threaded between steps.
//!
//! A [`DesignState`] is a snapshot of the design's artifacts (one file path
//! per named view) plus the metrics accumulated so far. A state is produced
//! by exactly one step (or supplied as the flow's initial state) and may
//! feed arbitrarily many downstream steps; it is never mutated, every
//! transformation yields a new snapshot.

use crate::errors::StepError;
use crate::step::StepId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// The fixed set of named views a design state may carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DesignFormat {
    Netlist,
    PoweredNetlist,
    Def,
    Lef,
    Odb,
    Sdc,
    Sdf,
    Spef,
    Gds,
    Spice,
}

impl DesignFormat {
    /// Stable string id, used in documents and filenames.
    pub fn id(&self) -> &'static str {
        match self {
            DesignFormat::Netlist => "netlist",
            DesignFormat::PoweredNetlist => "powered_netlist",
            DesignFormat::Def => "def",
            DesignFormat::Lef => "lef",
            DesignFormat::Odb => "odb",
            DesignFormat::Sdc => "sdc",
            DesignFormat::Sdf => "sdf",
            DesignFormat::Spef => "spef",
            DesignFormat::Gds => "gds",
            DesignFormat::Spice => "spice",
        }
    }

    /// Conventional file extension for the view.
    pub fn extension(&self) -> &'static str {
        match self {
            DesignFormat::Netlist => "nl.v",
            DesignFormat::PoweredNetlist => "pnl.v",
            DesignFormat::Def => "def",
            DesignFormat::Lef => "lef",
            DesignFormat::Odb => "odb",
            DesignFormat::Sdc => "sdc",
            DesignFormat::Sdf => "sdf",
            DesignFormat::Spef => "spef",
            DesignFormat::Gds => "gds",
            DesignFormat::Spice => "spice",
        }
    }

    /// Look a format up by its string id.
    pub fn from_id(id: &str) -> Option<Self> {
        [
            DesignFormat::Netlist,
            DesignFormat::PoweredNetlist,
            DesignFormat::Def,
            DesignFormat::Lef,
            DesignFormat::Odb,
            DesignFormat::Sdc,
            DesignFormat::Sdf,
            DesignFormat::Spef,
            DesignFormat::Gds,
            DesignFormat::Spice,
        ]
        .into_iter()
        .find(|f| f.id() == id)
    }
}

impl fmt::Display for DesignFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// View changes produced by one step execution.
pub type ViewsUpdate = BTreeMap<DesignFormat, PathBuf>;

/// Metric changes produced by one step execution.
pub type MetricsUpdate = BTreeMap<String, serde_json::Value>;

/// An immutable snapshot of the design's artifacts and metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignState {
    views: BTreeMap<DesignFormat, PathBuf>,
    metrics: BTreeMap<String, serde_json::Value>,
}

impl DesignState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style view insertion, for constructing initial states.
    pub fn with_view(mut self, format: DesignFormat, path: impl Into<PathBuf>) -> Self {
        self.views.insert(format, path.into());
        self
    }

    /// Builder-style metric insertion.
    pub fn with_metric(mut self, name: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(name.to_string(), value.into());
        self
    }

    /// The only transformation: a new snapshot with `views` and `metrics`
    /// layered on top of this one. `self` is untouched.
    pub fn with_updates(&self, views: ViewsUpdate, metrics: MetricsUpdate) -> Self {
        let mut next = self.clone();
        next.views.extend(views);
        next.metrics.extend(metrics);
        next
    }

    pub fn view(&self, format: DesignFormat) -> Option<&Path> {
        self.views.get(&format).map(PathBuf::as_path)
    }

    pub fn views(&self) -> &BTreeMap<DesignFormat, PathBuf> {
        &self.views
    }

    pub fn metric(&self, name: &str) -> Option<&serde_json::Value> {
        self.metrics.get(name)
    }

    pub fn metrics(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metrics
    }

    /// Fail-fast check that every view a step declares as input is present.
    /// A missing view is a step fault, not a tool error.
    pub fn require_views(&self, step: &StepId, formats: &[DesignFormat]) -> Result<(), StepError> {
        for format in formats {
            if !self.views.contains_key(format) {
                return Err(StepError::fault(
                    step,
                    format!("input state is missing required view '{format}'"),
                ));
            }
        }
        Ok(())
    }

    /// Persist the snapshot as pretty JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load a snapshot previously written with [`DesignState::save`].
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(std::io::Error::other)
    }
}
