//! The step registration table.

use crate::errors::FlowError;
use crate::step::{Step, StepId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Explicit table mapping step ids to implementations.
///
/// Populated once at process initialization (or plugin-load time) and then
/// passed by reference to flow construction; nothing mutates it while a
/// flow is running.
#[derive(Default)]
pub struct StepRegistry {
    steps: BTreeMap<StepId, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step implementation. Duplicate ids are rejected; the
    /// table is append-only.
    pub fn register(&mut self, step: Arc<dyn Step>) -> Result<(), FlowError> {
        let id = step.id();
        if self.steps.contains_key(&id) {
            return Err(FlowError::DuplicateStep { id: id.to_string() });
        }
        self.steps.insert(id, step);
        Ok(())
    }

    pub fn get(&self, id: &StepId) -> Option<Arc<dyn Step>> {
        self.steps.get(id).cloned()
    }

    /// Look up an id, turning absence into a configuration-time error.
    pub fn resolve(&self, id: &StepId) -> Result<Arc<dyn Step>, FlowError> {
        self.get(id).ok_or_else(|| FlowError::UnknownStep {
            id: id.to_string(),
        })
    }

    /// All registered ids, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.keys()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("ids", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StepError;
    use crate::step::{StepContext, StepOutput};
    use async_trait::async_trait;

    struct Dummy(&'static str);

    #[async_trait]
    impl Step for Dummy {
        fn id(&self) -> StepId {
            self.0.parse().unwrap()
        }

        async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
            Ok(StepOutput::new())
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(Dummy("Yosys.Synthesis"))).unwrap();

        let id: StepId = "Yosys.Synthesis".parse().unwrap();
        assert!(registry.resolve(&id).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_id_is_configuration_error() {
        let registry = StepRegistry::new();
        let id: StepId = "Nope.Nothing".parse().unwrap();
        let err = registry.resolve(&id).unwrap_err();
        assert!(matches!(err, FlowError::UnknownStep { .. }));
        assert!(err.to_string().contains("Nope.Nothing"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(Dummy("Magic.DRC"))).unwrap();
        let err = registry.register(Arc::new(Dummy("Magic.DRC"))).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateStep { .. }));
    }

    #[test]
    fn test_ids_sorted() {
        let mut registry = StepRegistry::new();
        registry.register(Arc::new(Dummy("B.Two"))).unwrap();
        registry.register(Arc::new(Dummy("A.One"))).unwrap();
        let ids: Vec<String> = registry.ids().map(|id| id.to_string()).collect();
        assert_eq!(ids, vec!["A.One", "B.Two"]);
    }
}
