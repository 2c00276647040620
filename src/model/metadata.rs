//! Special-token and length metadata that `tokenizer.json` alone does not
//! carry. Resolved from the sidecar JSON files shipped with hub models.

use std::{fs, path::Path};

use serde::Deserialize;
use serde_json::Value;
use tokenizers::Tokenizer;

use crate::error::ServiceError;

/// `model_max_length` values at or above this are placeholders for "unset".
const UNSET_MAX_LENGTH: f64 = 1e18;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizerMetadata {
    pub model_max_length: usize,
    pub pad_token: Option<String>,
    pub pad_token_id: Option<u32>,
    pub eos_token: Option<String>,
    pub eos_token_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenizerMetadataSource {
    pub tokenizer_config: Option<TokenizerConfigFile>,
    pub special_tokens_map: Option<TokenizerConfigFile>,
    pub model_config: Option<ModelConfigFile>,
}

/// Fields shared by `tokenizer_config.json` and `special_tokens_map.json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenizerConfigFile {
    #[serde(default)]
    pub model_max_length: Option<f64>,
    #[serde(default)]
    pub pad_token: Option<TokenField>,
    #[serde(default)]
    pub eos_token: Option<TokenField>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TokenField {
    Text(String),
    Added { content: String },
}

impl TokenField {
    fn content(&self) -> &str {
        match self {
            TokenField::Text(text) => text,
            TokenField::Added { content } => content,
        }
    }
}

/// The subset of `config.json` that describes special tokens and positions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelConfigFile {
    #[serde(default)]
    pub eos_token_id: Option<Value>,
    #[serde(default)]
    pub pad_token_id: Option<Value>,
    #[serde(default)]
    pub n_positions: Option<usize>,
    #[serde(default)]
    pub max_position_embeddings: Option<usize>,
}

impl TokenizerMetadataSource {
    pub fn read(
        tokenizer_config: Option<&Path>,
        special_tokens_map: Option<&Path>,
        model_config: Option<&Path>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            tokenizer_config: read_json(tokenizer_config)?,
            special_tokens_map: read_json(special_tokens_map)?,
            model_config: read_json(model_config)?,
        })
    }

    pub fn resolve(&self, tokenizer: &Tokenizer) -> TokenizerMetadata {
        let model_config = self.model_config.clone().unwrap_or_default();
        let token_for = |id: Option<u32>| id.and_then(|id| tokenizer.id_to_token(id));

        let eos_token = self
            .declared(|cfg| cfg.eos_token.as_ref())
            .or_else(|| token_for(first_id(model_config.eos_token_id.as_ref())));
        let eos_token_id = eos_token
            .as_deref()
            .and_then(|token| tokenizer.token_to_id(token))
            .or_else(|| first_id(model_config.eos_token_id.as_ref()));

        let declared_pad = self
            .declared(|cfg| cfg.pad_token.as_ref())
            .or_else(|| token_for(first_id(model_config.pad_token_id.as_ref())));
        let (pad_token, pad_token_id) = match declared_pad {
            Some(pad) => {
                let id = tokenizer
                    .token_to_id(&pad)
                    .or_else(|| first_id(model_config.pad_token_id.as_ref()));
                (Some(pad), id)
            }
            None => (eos_token.clone(), eos_token_id),
        };

        let model_max_length = self
            .tokenizer_config
            .as_ref()
            .and_then(|cfg| cfg.model_max_length)
            .filter(|len| *len >= 0.0 && *len < UNSET_MAX_LENGTH)
            .map(|len| len as usize)
            .or(model_config.n_positions)
            .or(model_config.max_position_embeddings)
            .unwrap_or(usize::MAX);

        TokenizerMetadata {
            model_max_length,
            pad_token,
            pad_token_id,
            eos_token,
            eos_token_id,
        }
    }

    fn declared<F>(&self, field: F) -> Option<String>
    where
        F: Fn(&TokenizerConfigFile) -> Option<&TokenField>,
    {
        [&self.tokenizer_config, &self.special_tokens_map]
            .into_iter()
            .flatten()
            .find_map(|cfg| field(cfg).map(|token| token.content().to_string()))
    }
}

/// `eos_token_id` may be a single id or a list of ids.
fn first_id(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|id| u32::try_from(id).ok()),
        Value::Array(items) => first_id(items.first()),
        _ => None,
    }
}

fn read_json<T>(path: Option<&Path>) -> Result<Option<T>, ServiceError>
where
    T: for<'de> Deserialize<'de>,
{
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| ServiceError::ModelLoad(format!("invalid {}: {e}", path.display())))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    /// Word-level tokenizer with `<|endoftext|>` as its only special token.
    pub(crate) fn word_tokenizer(words: &[&str]) -> Tokenizer {
        let mut vocab = serde_json::Map::new();
        vocab.insert("<|endoftext|>".into(), json!(0));
        vocab.insert("<unk>".into(), json!(1));
        for (idx, word) in words.iter().enumerate() {
            vocab.insert(word.to_string(), json!(idx + 2));
        }
        let spec = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [{
                "id": 0,
                "content": "<|endoftext|>",
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            }],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "<unk>"}
        });
        Tokenizer::from_str(&spec.to_string()).expect("valid tokenizer json")
    }

    fn source(
        tokenizer_config: Option<Value>,
        special_tokens_map: Option<Value>,
        model_config: Option<Value>,
    ) -> TokenizerMetadataSource {
        TokenizerMetadataSource {
            tokenizer_config: tokenizer_config.map(|v| serde_json::from_value(v).unwrap()),
            special_tokens_map: special_tokens_map.map(|v| serde_json::from_value(v).unwrap()),
            model_config: model_config.map(|v| serde_json::from_value(v).unwrap()),
        }
    }

    #[test]
    fn gpt2_style_config_falls_back_to_eos_for_padding() {
        let tokenizer = word_tokenizer(&["hello"]);
        let meta = source(
            Some(json!({"model_max_length": 1024})),
            None,
            Some(json!({"eos_token_id": 0, "n_positions": 1024})),
        )
        .resolve(&tokenizer);

        assert_eq!(meta.eos_token.as_deref(), Some("<|endoftext|>"));
        assert_eq!(meta.eos_token_id, Some(0));
        assert_eq!(meta.pad_token, meta.eos_token);
        assert_eq!(meta.pad_token_id, Some(0));
        assert_eq!(meta.model_max_length, 1024);
    }

    #[test]
    fn tokenizer_config_takes_precedence() {
        let tokenizer = word_tokenizer(&["hello", "[PAD]"]);
        let meta = source(
            Some(json!({
                "eos_token": {"content": "<|endoftext|>", "lstrip": false},
                "pad_token": "[PAD]"
            })),
            Some(json!({"eos_token": "hello", "pad_token": "hello"})),
            None,
        )
        .resolve(&tokenizer);

        assert_eq!(meta.eos_token.as_deref(), Some("<|endoftext|>"));
        assert_eq!(meta.pad_token.as_deref(), Some("[PAD]"));
        assert_eq!(meta.pad_token_id, Some(3));
    }

    #[test]
    fn special_tokens_map_fills_gaps() {
        let tokenizer = word_tokenizer(&["hello"]);
        let meta = source(
            Some(json!({"model_max_length": 512})),
            Some(json!({"eos_token": "<|endoftext|>"})),
            None,
        )
        .resolve(&tokenizer);
        assert_eq!(meta.eos_token_id, Some(0));
        assert_eq!(meta.model_max_length, 512);
    }

    #[test]
    fn placeholder_max_length_is_ignored() {
        let tokenizer = word_tokenizer(&[]);
        let meta = source(
            Some(json!({"model_max_length": 1e30})),
            None,
            Some(json!({"max_position_embeddings": 2048, "eos_token_id": [0, 1]})),
        )
        .resolve(&tokenizer);
        assert_eq!(meta.model_max_length, 2048);
        assert_eq!(meta.eos_token_id, Some(0));
    }

    #[test]
    fn nothing_known_leaves_tokens_unset() {
        let tokenizer = word_tokenizer(&[]);
        let meta = source(None, None, None).resolve(&tokenizer);
        assert_eq!(meta.eos_token, None);
        assert_eq!(meta.pad_token, None);
        assert_eq!(meta.pad_token_id, None);
        assert_eq!(meta.model_max_length, usize::MAX);
    }
}
