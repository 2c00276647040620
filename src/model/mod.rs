pub mod generation;
mod loader;
pub mod metadata;
mod registry;
pub mod sampling;
mod types;
pub mod validation;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use generation::{CausalLm, LoadedModel, ModelInput};
pub use loader::{ModelArtifacts, load_model};
pub use registry::ModelRegistry;
pub use types::{GenerationRequest, GenerationResponse, HealthResponse, ModelInfo};
pub use validation::validate_generation_body;
