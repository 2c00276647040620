//! Next-token selection: greedy argmax or temperature + nucleus sampling.

use std::cmp::Ordering;

use rand::{
    Rng, SeedableRng,
    distr::{Distribution, weighted::WeightedIndex},
    rngs::StdRng,
};

use crate::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    Greedy,
    Nucleus { temperature: f64, top_p: f64 },
}

impl Sampling {
    /// Temperature and top_p are only checked when sampling is requested;
    /// greedy selection ignores them.
    pub fn new(do_sample: bool, temperature: f64, top_p: f64) -> Result<Self, ServiceError> {
        if !do_sample {
            return Ok(Sampling::Greedy);
        }
        if temperature.is_nan() || temperature <= 0.0 {
            return Err(ServiceError::GenerationFailed(format!(
                "temperature has to be a strictly positive float, but is {temperature}"
            )));
        }
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ServiceError::GenerationFailed(format!(
                "top_p has to be a float between 0 and 1, but is {top_p}"
            )));
        }
        Ok(Sampling::Nucleus { temperature, top_p })
    }

    pub fn select<R: Rng + ?Sized>(&self, logits: &[f32], rng: &mut R) -> Result<u32, ServiceError> {
        match *self {
            Sampling::Greedy => argmax(logits)
                .map(|idx| idx as u32)
                .ok_or_else(|| ServiceError::generation("model returned no logits")),
            Sampling::Nucleus { temperature, top_p } => {
                let mut probs = softmax(logits, temperature)?;
                if top_p < 1.0 {
                    retain_nucleus(&mut probs, top_p);
                }
                let dist = WeightedIndex::new(&probs).map_err(|e| {
                    ServiceError::GenerationFailed(format!("invalid token distribution: {e}"))
                })?;
                Ok(dist.sample(rng) as u32)
            }
        }
    }
}

/// Per-request RNG: reproducible when a seed is configured.
pub fn request_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Index of the largest logit, first one on ties. NaNs never win.
pub fn argmax(logits: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &logit) in logits.iter().enumerate() {
        if logit.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if logit <= top => {}
            _ => best = Some((idx, logit)),
        }
    }
    best.map(|(idx, _)| idx)
}

fn softmax(logits: &[f32], temperature: f64) -> Result<Vec<f64>, ServiceError> {
    if logits.is_empty() {
        return Err(ServiceError::generation("model returned no logits"));
    }
    let scaled: Vec<f64> = if temperature == 1.0 {
        logits.iter().map(|&l| l as f64).collect()
    } else {
        logits.iter().map(|&l| l as f64 / temperature).collect()
    };

    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(ServiceError::generation(
            "probability tensor contains either inf, nan or element < 0",
        ));
    }

    let exps: Vec<f64> = scaled.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 || exps.iter().any(|p| p.is_nan()) {
        return Err(ServiceError::generation(
            "probability tensor contains either inf, nan or element < 0",
        ));
    }
    Ok(exps.into_iter().map(|e| e / sum).collect())
}

/// Zeroes every probability outside the smallest top set whose cumulative
/// mass reaches `top_p`. The most likely token is always kept.
fn retain_nucleus(probs: &mut [f64], top_p: f64) {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(Ordering::Equal));

    let mut cumulative = 0.0;
    let mut keep = 0;
    for &idx in &order {
        if keep > 0 && cumulative >= top_p {
            break;
        }
        cumulative += probs[idx];
        keep += 1;
    }

    for &idx in &order[keep..] {
        probs[idx] = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_ignores_sampling_values() {
        assert_eq!(Sampling::new(false, -1.0, 9.0).unwrap(), Sampling::Greedy);
    }

    #[test]
    fn sampling_rejects_bad_temperature() {
        for temperature in [0.0, -0.5, f64::NAN] {
            let err = Sampling::new(true, temperature, 1.0).unwrap_err();
            assert!(err.to_string().contains("temperature"), "{err}");
        }
    }

    #[test]
    fn sampling_rejects_bad_top_p() {
        for top_p in [-0.1, 1.5] {
            let err = Sampling::new(true, 1.0, top_p).unwrap_err();
            assert!(err.to_string().contains("top_p"), "{err}");
        }
    }

    #[test]
    fn argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 3.0, 3.0, -1.0]), Some(1));
        assert_eq!(argmax(&[f32::NAN, -2.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn greedy_select_is_deterministic() {
        let mut rng = request_rng(None);
        let logits = [0.5, 2.0, 1.0];
        for _ in 0..10 {
            assert_eq!(Sampling::Greedy.select(&logits, &mut rng).unwrap(), 1);
        }
    }

    #[test]
    fn nucleus_keeps_smallest_covering_set() {
        let mut probs = vec![0.05, 0.5, 0.3, 0.15];
        retain_nucleus(&mut probs, 0.7);
        assert_eq!(probs, vec![0.0, 0.5, 0.3, 0.0]);

        let mut probs = vec![0.2, 0.8];
        retain_nucleus(&mut probs, 0.0);
        assert_eq!(probs, vec![0.0, 0.8]);
    }

    #[test]
    fn nucleus_sampling_never_leaves_the_nucleus() {
        let sampling = Sampling::new(true, 1.0, 0.5).unwrap();
        let logits = [5.0, 1.0, 0.0, 4.5];
        let mut rng = request_rng(Some(3));
        for _ in 0..200 {
            let token = sampling.select(&logits, &mut rng).unwrap();
            assert!(token == 0 || token == 3, "sampled {token}");
        }
    }

    #[test]
    fn masked_logits_are_never_sampled() {
        let sampling = Sampling::new(true, 0.7, 1.0).unwrap();
        let logits = [f32::NEG_INFINITY, 1.0, f32::NEG_INFINITY];
        let mut rng = request_rng(None);
        for _ in 0..50 {
            assert_eq!(sampling.select(&logits, &mut rng).unwrap(), 1);
        }
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let sampling = Sampling::new(true, 1.0, 1.0).unwrap();
        let logits = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let draw = |seed| {
            let mut rng = request_rng(Some(seed));
            (0..20)
                .map(|_| sampling.select(&logits, &mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }

    #[test]
    fn degenerate_logits_fail() {
        let sampling = Sampling::new(true, 1.0, 1.0).unwrap();
        let mut rng = request_rng(None);
        let err = sampling
            .select(&[f32::NEG_INFINITY, f32::NEG_INFINITY], &mut rng)
            .unwrap_err();
        assert!(matches!(err, ServiceError::GenerationFailed(_)));
        assert!(sampling.select(&[], &mut rng).is_err());
    }
}
