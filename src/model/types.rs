use serde::{Deserialize, Serialize};
use serde_json::Number;

/// A validated generation request: prompt present, token budget resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_new_tokens: i64,
    pub do_sample: bool,
    pub temperature: f64,
    pub top_p: f64,
}

/// Optional knobs of a `/generate` body, read after the prompt check.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerationOverrides {
    pub max_tokens: Option<Number>,
    pub do_sample: Option<bool>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub response: String,
    pub full_text: String,
    pub model: String,
    pub tokens_generated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub vocab_size: usize,
    pub model_max_length: usize,
    pub pad_token: Option<String>,
    pub eos_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub version: String,
}
