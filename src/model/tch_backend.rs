//! TorchScript-backed [`CausalLm`] executed through libtorch.
//!
//! The module is expected to be a traced causal LM taking `input_ids`
//! (and `attention_mask` when one is supplied) shaped `[1, seq_len]` and
//! returning logits shaped `[1, seq_len, vocab]`, either bare or as the first
//! element of a tuple.

use std::path::Path;

use parking_lot::Mutex;
use tch::{Device, IValue, Kind, Tensor, no_grad};

use crate::{
    error::ServiceError,
    model::generation::{CausalLm, ModelInput},
};

pub struct TorchScriptLm {
    device: Device,
    module: Mutex<tch::CModule>,
}

impl TorchScriptLm {
    pub fn load(module_path: &Path, device: &str) -> Result<Self, ServiceError> {
        if !module_path.exists() {
            return Err(ServiceError::ModelLoad(format!(
                "model artifact missing: {}",
                module_path.display()
            )));
        }
        let device = parse_device(device);
        let mut module = tch::CModule::load_on_device(module_path, device)
            .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
        module.set_eval();

        Ok(Self {
            device,
            module: Mutex::new(module),
        })
    }

    fn sequence_tensor(&self, values: impl Iterator<Item = i64>) -> Tensor {
        let values: Vec<i64> = values.collect();
        Tensor::from_slice(&values)
            .reshape([1, values.len() as i64])
            .to(self.device)
    }
}

impl CausalLm for TorchScriptLm {
    fn next_token_logits(&self, input: &ModelInput<'_>) -> Result<Vec<f32>, ServiceError> {
        // Masked-out positions carry the pad id.
        let ids = input.input_ids.iter().enumerate().map(|(pos, &id)| {
            let masked = input
                .attention_mask
                .is_some_and(|mask| mask.get(pos) == Some(&0));
            match (masked, input.pad_token_id) {
                (true, Some(pad)) => pad as i64,
                _ => id as i64,
            }
        });

        let mut args = vec![IValue::Tensor(self.sequence_tensor(ids))];
        if let Some(mask) = input.attention_mask {
            args.push(IValue::Tensor(
                self.sequence_tensor(mask.iter().map(|&m| m as i64)),
            ));
        }

        no_grad(|| {
            let output = self
                .module
                .lock()
                .forward_is(&args)
                .map_err(ServiceError::generation)?;

            let logits = match output {
                IValue::Tensor(t) => t,
                IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                    IValue::Tensor(t) => t.shallow_clone(),
                    _ => {
                        return Err(ServiceError::generation(
                            "expected tensor as first tuple element",
                        ));
                    }
                },
                _ => return Err(ServiceError::generation("unexpected model output format")),
            };

            // [1, seq_len, vocab] -> [vocab]
            let last = logits
                .select(1, -1)
                .squeeze()
                .to_kind(Kind::Float)
                .to(Device::Cpu);
            Vec::<f32>::try_from(&last).map_err(ServiceError::generation)
        })
    }
}

fn parse_device(raw: &str) -> Device {
    let lower = raw.to_lowercase();
    if lower == "cpu" {
        Device::Cpu
    } else if lower.starts_with("cuda") {
        let idx = lower
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if tch::Cuda::is_available() {
            Device::Cuda(idx)
        } else {
            tracing::warn!(requested = raw, "CUDA unavailable, falling back to CPU");
            Device::Cpu
        }
    } else {
        Device::Cpu
    }
}
