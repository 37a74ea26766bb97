use std::sync::Arc;

use crate::error::EvalResult;
use crate::inference::{ModelBackend, OpenAiBackend};
use crate::registry::Registries;

/// Process-wide collaborators: the plugin registries and the shared model
/// backend.
///
/// Created once at process start, passed by reference to every
/// constructor, torn down at process exit; never reinitialized mid-run.
/// The model backend is an expensive singleton reused across all items and
/// rounds.
pub struct AppContext {
    pub registries: Registries,
    pub model: Arc<dyn ModelBackend>,
}

impl AppContext {
    /// Production wiring: built-in plugin registrations plus the
    /// OpenAI-compatible backend configured from the environment.
    pub fn initialize() -> EvalResult<Self> {
        Ok(Self::new(
            Registries::builtin()?,
            Arc::new(OpenAiBackend::from_env()),
        ))
    }

    pub fn new(registries: Registries, model: Arc<dyn ModelBackend>) -> Self {
        Self { registries, model }
    }
}
