use std::sync::Arc;

use rand::Rng;
use tokenizers::Tokenizer;
use tracing::debug;

use crate::{
    error::ServiceError,
    model::{GenerationRequest, metadata::TokenizerMetadata, sampling::Sampling},
};

/// One forward-pass input: a single unpadded sequence.
#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    pub input_ids: &'a [u32],
    pub attention_mask: Option<&'a [u32]>,
    pub pad_token_id: Option<u32>,
}

/// A causal language model reduced to the one call the decode loop needs.
pub trait CausalLm: Send + Sync {
    /// Logits over the vocabulary for the position following the last input token.
    fn next_token_logits(&self, input: &ModelInput<'_>) -> Result<Vec<f32>, ServiceError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptEncoding {
    pub input_ids: Vec<u32>,
    pub attention_mask: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub max_new_tokens: usize,
    pub sampling: Sampling,
    pub pad_token_id: Option<u32>,
    pub eos_token_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub response: String,
    pub full_text: String,
    pub tokens_generated: usize,
}

/// The tokenizer/generator pair plus the metadata resolved for them.
pub struct LoadedModel {
    tokenizer: Tokenizer,
    model: Arc<dyn CausalLm>,
    metadata: TokenizerMetadata,
}

impl LoadedModel {
    pub fn new(tokenizer: Tokenizer, model: Arc<dyn CausalLm>, metadata: TokenizerMetadata) -> Self {
        Self {
            tokenizer,
            model,
            metadata,
        }
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn metadata(&self) -> &TokenizerMetadata {
        &self.metadata
    }

    pub fn generate<R: Rng + ?Sized>(
        &self,
        request: &GenerationRequest,
        rng: &mut R,
    ) -> Result<GenerationOutput, ServiceError> {
        if request.max_new_tokens < 1 {
            return Err(ServiceError::GenerationFailed(format!(
                "max_new_tokens must be greater than 0, but is {}",
                request.max_new_tokens
            )));
        }
        let sampling = Sampling::new(request.do_sample, request.temperature, request.top_p)?;
        let options = GenerateOptions {
            max_new_tokens: usize::try_from(request.max_new_tokens).unwrap_or(usize::MAX),
            sampling,
            pad_token_id: self.metadata.pad_token_id,
            eos_token_id: self.metadata.eos_token_id,
        };

        let prompt = encode_prompt(&self.tokenizer, &request.prompt, self.metadata.model_max_length)?;
        let input_len = prompt.input_ids.len();
        debug!(input_len, max_new_tokens = options.max_new_tokens, ?sampling, "generating");

        let output_ids = generate_tokens(self.model.as_ref(), &prompt, &options, rng)?;

        let full_text = self
            .tokenizer
            .decode(&output_ids, true)
            .map_err(ServiceError::generation)?;
        let response = strip_prompt(&full_text, &request.prompt);

        Ok(GenerationOutput {
            response,
            full_text,
            tokens_generated: output_ids.len() - input_len,
        })
    }
}

/// Encodes a prompt, truncated to `max_length` tokens.
pub fn encode_prompt(
    tokenizer: &Tokenizer,
    prompt: &str,
    max_length: usize,
) -> Result<PromptEncoding, ServiceError> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(ServiceError::generation)?;

    let mut input_ids = encoding.get_ids().to_vec();
    let mut attention_mask = match encoding.get_attention_mask() {
        [] => None,
        mask => Some(mask.to_vec()),
    };
    input_ids.truncate(max_length);
    if let Some(mask) = attention_mask.as_mut() {
        mask.truncate(max_length);
    }

    if input_ids.is_empty() {
        return Err(ServiceError::generation(
            "prompt encodes to an empty token sequence",
        ));
    }

    Ok(PromptEncoding {
        input_ids,
        attention_mask,
    })
}

/// Autoregressive decode loop. Returns the prompt ids followed by every
/// generated id; an eos token ends the loop and is kept in the output.
pub fn generate_tokens<R: Rng + ?Sized>(
    model: &dyn CausalLm,
    prompt: &PromptEncoding,
    options: &GenerateOptions,
    rng: &mut R,
) -> Result<Vec<u32>, ServiceError> {
    let mut ids = prompt.input_ids.clone();
    let mut mask = prompt.attention_mask.clone();

    for _ in 0..options.max_new_tokens {
        let input = ModelInput {
            input_ids: &ids,
            attention_mask: mask.as_deref(),
            pad_token_id: options.pad_token_id,
        };
        let logits = model.next_token_logits(&input)?;
        let next = options.sampling.select(&logits, rng)?;

        ids.push(next);
        if let Some(mask) = mask.as_mut() {
            mask.push(1);
        }
        if options.eos_token_id == Some(next) {
            break;
        }
    }

    Ok(ids)
}

/// Drops as many leading characters from `decoded` as `prompt` has, then
/// trims. This assumes decoding reproduces the prompt verbatim; when it does
/// not, the cut lands at the same character offset regardless.
pub fn strip_prompt(decoded: &str, prompt: &str) -> String {
    let offset = prompt.chars().count();
    match decoded.char_indices().nth(offset) {
        Some((byte_idx, _)) => decoded[byte_idx..].trim().to_string(),
        None => String::new(),
    }
}
