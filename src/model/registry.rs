use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::task;
use tracing::{error, info};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        GenerationRequest, GenerationResponse, ModelInfo, generation::LoadedModel,
        sampling::request_rng,
    },
};

/// Owns the model handle. Created empty, filled once at start-up and
/// read-only afterward; every query before that reports the model unavailable.
pub struct ModelRegistry {
    model_name: String,
    generation_seed: Option<u64>,
    loaded: OnceCell<Arc<LoadedModel>>,
}

impl ModelRegistry {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            model_name: config.model_name.clone(),
            generation_seed: config.generation_seed,
            loaded: OnceCell::new(),
        }
    }

    pub fn initialize(config: &AppConfig, model: LoadedModel) -> Result<Self, ServiceError> {
        let registry = Self::new(config);
        registry.install(model)?;
        Ok(registry)
    }

    pub fn install(&self, model: LoadedModel) -> Result<(), ServiceError> {
        self.loaded
            .set(Arc::new(model))
            .map_err(|_| ServiceError::ModelLoad("model already loaded".into()))?;
        info!(model = %self.model_name, "model installed");
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    fn loaded(&self) -> Result<Arc<LoadedModel>, ServiceError> {
        self.loaded.get().cloned().ok_or(ServiceError::ModelUnavailable)
    }

    pub fn info(&self) -> Result<ModelInfo, ServiceError> {
        let loaded = self.loaded()?;
        let metadata = loaded.metadata();
        Ok(ModelInfo {
            model_name: self.model_name.clone(),
            vocab_size: loaded.tokenizer().get_vocab_size(false),
            model_max_length: metadata.model_max_length,
            pad_token: metadata.pad_token.clone(),
            eos_token: metadata.eos_token.clone(),
        })
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ServiceError> {
        let loaded = self.loaded()?;
        let seed = self.generation_seed;

        let output = task::spawn_blocking(move || {
            let mut rng = request_rng(seed);
            loaded.generate(&request, &mut rng)
        })
        .await
        .map_err(|err| ServiceError::GenerationFailed(format!("inference task failed: {err}")))?
        .inspect_err(|err| error!(%err, "error generating text"))?;

        Ok(GenerationResponse {
            response: output.response,
            full_text: output.full_text,
            model: self.model_name.clone(),
            tokens_generated: output.tokens_generated,
        })
    }
}
