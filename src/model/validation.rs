//! Validation of raw `/generate` bodies into [`GenerationRequest`]s.

use serde_json::{Map, Number, Value};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::types::{GenerationOverrides, GenerationRequest},
};

pub const DEFAULT_DO_SAMPLE: bool = true;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 1.0;

/// Parses and validates a raw request body.
///
/// An empty, unparseable, `null`, non-object or empty-object body counts as
/// missing. The prompt must be a non-empty string. `max_tokens` defaults to
/// the configured default and is silently clamped to the configured limit.
/// Sampling parameters are passed through without range checks; values of
/// the wrong type surface as generation failures.
pub fn validate_generation_body(
    body: &[u8],
    config: &AppConfig,
) -> Result<GenerationRequest, ServiceError> {
    let fields = parse_object(body)?;

    let prompt = match fields.get("prompt") {
        Some(Value::String(prompt)) if !prompt.is_empty() => prompt.clone(),
        _ => return Err(ServiceError::MissingPrompt),
    };

    let overrides: GenerationOverrides =
        serde_json::from_value(Value::Object(fields)).map_err(ServiceError::generation)?;

    let max_new_tokens = token_budget(overrides.max_tokens.as_ref(), config)?;

    Ok(GenerationRequest {
        prompt,
        max_new_tokens,
        do_sample: overrides.do_sample.unwrap_or(DEFAULT_DO_SAMPLE),
        temperature: overrides.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        top_p: overrides.top_p.unwrap_or(DEFAULT_TOP_P),
    })
}

/// Any number above the limit clamps to it, including integers beyond `i64`
/// and floats. Non-integers within the limit cannot be a token count.
fn token_budget(raw: Option<&Number>, config: &AppConfig) -> Result<i64, ServiceError> {
    let limit = config.max_tokens_limit;
    let Some(number) = raw else {
        return Ok(config.max_tokens_default.min(limit));
    };
    if let Some(value) = number.as_i64() {
        return Ok(value.min(limit));
    }
    if number.is_u64() {
        return Ok(limit);
    }
    match number.as_f64() {
        Some(value) if value > limit as f64 => Ok(limit),
        _ => Err(ServiceError::GenerationFailed(format!(
            "max_tokens must be an integer, but is {number}"
        ))),
    }
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ServiceError::MissingBody);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) if !fields.is_empty() => Ok(fields),
        _ => Err(ServiceError::MissingBody),
    }
}
