use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        generation::{CausalLm, LoadedModel},
        metadata::TokenizerMetadataSource,
    },
};

/// Files making up a model on disk. Only the tokenizer is mandatory; the
/// sidecar JSON files refine special tokens and the max length.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub tokenizer: PathBuf,
    pub tokenizer_config: Option<PathBuf>,
    pub special_tokens_map: Option<PathBuf>,
    pub model_config: Option<PathBuf>,
    pub module: PathBuf,
}

impl ModelArtifacts {
    pub fn resolve(config: &AppConfig) -> Result<Self, ServiceError> {
        match config.model_dir.as_deref() {
            Some(dir) => Self::from_dir(dir, &config.module_path),
            None => Self::from_hub(config),
        }
    }

    pub fn from_dir(dir: &Path, module: &Path) -> Result<Self, ServiceError> {
        let tokenizer = dir.join("tokenizer.json");
        if !tokenizer.exists() {
            return Err(ServiceError::ModelLoad(format!(
                "tokenizer missing: {}",
                tokenizer.display()
            )));
        }
        let optional = |name: &str| Some(dir.join(name)).filter(|path| path.exists());

        Ok(Self {
            tokenizer,
            tokenizer_config: optional("tokenizer_config.json"),
            special_tokens_map: optional("special_tokens_map.json"),
            model_config: optional("config.json"),
            module: module.to_path_buf(),
        })
    }

    fn from_hub(config: &AppConfig) -> Result<Self, ServiceError> {
        let api = Api::new().map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
        let repo = match config.revision.as_ref() {
            Some(revision) => api.repo(Repo::with_revision(
                config.model_name.clone(),
                RepoType::Model,
                revision.clone(),
            )),
            None => api.model(config.model_name.clone()),
        };

        let tokenizer = repo.get("tokenizer.json").map_err(|e| {
            ServiceError::ModelLoad(format!(
                "cannot fetch tokenizer for {}: {e}",
                config.model_name
            ))
        })?;
        let optional = |name: &str| match repo.get(name) {
            Ok(path) => Some(path),
            Err(err) => {
                debug!(file = name, %err, "optional model file unavailable");
                None
            }
        };

        Ok(Self {
            tokenizer,
            tokenizer_config: optional("tokenizer_config.json"),
            special_tokens_map: optional("special_tokens_map.json"),
            model_config: optional("config.json"),
            module: config.module_path.clone(),
        })
    }

    /// Builds the model handle from these artifacts and a ready generator.
    pub fn load_with(&self, model: Arc<dyn CausalLm>) -> Result<LoadedModel, ServiceError> {
        let tokenizer = Tokenizer::from_file(&self.tokenizer)
            .map_err(|e| ServiceError::ModelLoad(format!("invalid tokenizer: {e}")))?;
        let metadata = TokenizerMetadataSource::read(
            self.tokenizer_config.as_deref(),
            self.special_tokens_map.as_deref(),
            self.model_config.as_deref(),
        )?
        .resolve(&tokenizer);

        info!(
            vocab_size = tokenizer.get_vocab_size(false),
            model_max_length = metadata.model_max_length,
            eos_token = ?metadata.eos_token,
            pad_token = ?metadata.pad_token,
            "tokenizer ready"
        );
        Ok(LoadedModel::new(tokenizer, model, metadata))
    }
}

/// Resolves the configured model and loads it with the compiled-in backend.
pub fn load_model(config: &AppConfig) -> Result<LoadedModel, ServiceError> {
    let artifacts = ModelArtifacts::resolve(config)?;
    let backend = load_backend(&artifacts, config)?;
    artifacts.load_with(backend)
}

#[cfg(feature = "tch-backend")]
fn load_backend(
    artifacts: &ModelArtifacts,
    config: &AppConfig,
) -> Result<Arc<dyn CausalLm>, ServiceError> {
    let model = crate::model::tch_backend::TorchScriptLm::load(&artifacts.module, &config.device)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "tch-backend"))]
fn load_backend(
    _artifacts: &ModelArtifacts,
    _config: &AppConfig,
) -> Result<Arc<dyn CausalLm>, ServiceError> {
    Err(ServiceError::ModelLoad(
        "built without a model backend; enable the `tch-backend` feature".into(),
    ))
}
