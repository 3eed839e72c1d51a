use std::collections::HashMap;
use std::sync::Arc;

use crate::logic::AgentLogic;

/// Maps agent keys to their logic, with an optional catch-all.
#[derive(Clone, Default)]
pub struct LogicRegistry {
    logics: HashMap<String, Arc<dyn AgentLogic>>,
    fallback: Option<Arc<dyn AgentLogic>>,
}

impl std::fmt::Debug for LogicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicRegistry")
            .field("keys", &self.keys())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl LogicRegistry {
    pub fn register<T>(&mut self, agent_key: impl Into<String>, logic: T)
    where
        T: AgentLogic + 'static,
    {
        self.logics.insert(agent_key.into(), Arc::new(logic));
    }

    pub fn with_fallback<T>(mut self, logic: T) -> Self
    where
        T: AgentLogic + 'static,
    {
        self.fallback = Some(Arc::new(logic));
        self
    }

    pub fn resolve(&self, agent_key: &str) -> Option<Arc<dyn AgentLogic>> {
        self.logics.get(agent_key).cloned().or_else(|| self.fallback.clone())
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys = self.logics.keys().map(String::as_str).collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.logics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::LogicRegistry;
    use crate::logic::EchoLogic;

    #[test]
    fn resolves_registered_keys_then_fallback() {
        let mut registry = LogicRegistry::default();
        registry.register("pr-reviewer", EchoLogic);

        assert!(registry.resolve("pr-reviewer").is_some());
        assert!(registry.resolve("forecaster").is_none());
        assert_eq!(registry.keys(), vec!["pr-reviewer"]);

        let registry = registry.with_fallback(EchoLogic);
        assert!(registry.resolve("forecaster").is_some());
        assert_eq!(registry.len(), 1);
    }
}
