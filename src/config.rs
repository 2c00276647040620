use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_name: String,
    pub revision: Option<String>,
    pub host: String,
    pub port: u16,
    pub max_tokens_default: i64,
    pub max_tokens_limit: i64,
    pub model_dir: Option<PathBuf>,
    pub module_path: PathBuf,
    pub device: String,
    pub generation_seed: Option<u64>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, so callers other
    /// than the process environment (tests, embedding binaries) can supply it.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_name = lookup("MODEL_NAME")
            .or_else(|| lookup("model_name"))
            .unwrap_or_else(|| "gpt2".to_string());
        let revision = lookup("MODEL_REVISION");

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or(&lookup, "PORT", 5000)?;

        let max_tokens_default = parse_or(&lookup, "MAX_TOKENS_DEFAULT", 50)?;
        let max_tokens_limit = parse_or(&lookup, "MAX_TOKENS_LIMIT", 500)?;

        let model_dir = lookup("MODEL_DIR").map(PathBuf::from);
        let module_path = lookup("TORCHSCRIPT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_module_path(&model_name));

        let device = lookup("DEVICE").unwrap_or_else(|| "cpu".into());
        let generation_seed = lookup("GENERATION_SEED")
            .map(|raw| parse_value("GENERATION_SEED", &raw))
            .transpose()?;

        Ok(Self {
            model_name,
            revision,
            host,
            port,
            max_tokens_default,
            max_tokens_limit,
            model_dir,
            module_path,
            device,
            generation_seed,
        })
    }

    pub fn bind_address(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}

/// Loads `KEY=value` pairs from an environment file without overriding
/// variables already set. Returns `false` when the file does not exist.
pub fn load_env_file(path: &Path) -> anyhow::Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(err) if err.not_found() => Ok(false),
        Err(err) => Err(err).with_context(|| format!("cannot read {}", path.display())),
    }
}

fn default_module_path(model_name: &str) -> PathBuf {
    PathBuf::from(format!("models/{}.ts", model_name.replace('/', "_")))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {raw:?}"))
}
