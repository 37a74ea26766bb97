use std::collections::HashMap;

use tracing::warn;

use crate::config::RunConfig;
use crate::context::AppContext;
use crate::error::{EvalError, EvalResult};
use crate::evaluators::{BabelCodeEvaluator, Evaluator, HumanEvalEvaluator};
use crate::processor::{CodeLlamaHftProcessor, DataProcessor};

/// Constructor for an evaluator plugin, invoked once per round.
pub type EvaluatorFactory = fn(&RunConfig, &AppContext) -> EvalResult<Box<dyn Evaluator>>;

/// Constructor for a processor plugin.
pub type ProcessorFactory = fn(&RunConfig) -> Box<dyn DataProcessor>;

/// One plugin namespace mapping a string key to a constructor.
///
/// Registration is last-wins; re-registering a key shadows the previous
/// entry and logs a warning so accidental collisions stay visible.
pub struct Registry<F> {
    kind: &'static str,
    entries: HashMap<String, F>,
}

impl<F> Registry<F> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: &str, factory: F) -> EvalResult<()> {
        if key.is_empty() {
            return Err(EvalError::config(format!(
                "{} registry key must not be empty",
                self.kind
            )));
        }
        if self.entries.insert(key.to_string(), factory).is_some() {
            warn!(kind = self.kind, key, "plugin key re-registered, previous entry shadowed");
        }
        Ok(())
    }

    pub fn resolve(&self, key: &str) -> EvalResult<&F> {
        self.entries.get(key).ok_or_else(|| EvalError::PluginNotFound {
            kind: self.kind,
            key: key.to_string(),
        })
    }
}

/// The two independently-lived plugin namespaces.
///
/// Kept separate: the same key could legitimately appear in both with
/// different meanings.
pub struct Registries {
    pub evaluators: Registry<EvaluatorFactory>,
    pub processors: Registry<ProcessorFactory>,
}

fn codellama_hft_factory(_config: &RunConfig) -> Box<dyn DataProcessor> {
    Box::new(CodeLlamaHftProcessor::new())
}

impl Registries {
    /// Explicit registration list for the built-in plugins, applied once
    /// at context construction.
    pub fn builtin() -> EvalResult<Self> {
        let mut registries = Self {
            evaluators: Registry::new("evaluator"),
            processors: Registry::new("processor"),
        };
        registries
            .evaluators
            .register("HumanEval", HumanEvalEvaluator::factory)?;
        registries
            .evaluators
            .register("BabelCode", BabelCodeEvaluator::factory)?;
        registries
            .processors
            .register("codellama-34b-base-hft", codellama_hft_factory)?;
        Ok(registries)
    }

    /// Construct the processor plugin registered under `name`.
    pub fn build_processor(
        &self,
        name: &str,
        config: &RunConfig,
    ) -> EvalResult<Box<dyn DataProcessor>> {
        let factory = self.processors.resolve(name)?;
        Ok(factory(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_unregistered_key_names_kind_and_key() {
        let registry: Registry<u32> = Registry::new("evaluator");
        let err = registry.resolve("MBPP").unwrap_err();
        assert!(matches!(
            &err,
            EvalError::PluginNotFound { kind: "evaluator", key } if key == "MBPP"
        ));
        let message = err.to_string();
        assert!(message.contains("evaluator"));
        assert!(message.contains("MBPP"));
    }

    #[test]
    fn test_register_then_resolve() {
        let mut registry: Registry<u32> = Registry::new("processor");
        registry.register("alpha", 7).unwrap();
        assert_eq!(*registry.resolve("alpha").unwrap(), 7);
    }

    #[test]
    fn test_duplicate_registration_is_last_wins() {
        let mut registry: Registry<u32> = Registry::new("processor");
        registry.register("alpha", 1).unwrap();
        registry.register("alpha", 2).unwrap();
        assert_eq!(*registry.resolve("alpha").unwrap(), 2);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let mut registry: Registry<u32> = Registry::new("processor");
        let err = registry.register("", 1).unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[test]
    fn test_builtin_registrations() {
        let registries = Registries::builtin().unwrap();
        assert!(registries.evaluators.resolve("HumanEval").is_ok());
        assert!(registries.evaluators.resolve("BabelCode").is_ok());
        assert!(registries.processors.resolve("codellama-34b-base-hft").is_ok());
        assert!(registries.evaluators.resolve("codellama-34b-base-hft").is_err());
    }
}
