//! Stochastic decoding policies
//!
//! Two policies are used by the decode loop:
//!
//! - **line start** (previous token is a line break): temperature scaling
//!   followed by nucleus ("top-p") filtering with a permissive threshold;
//! - **continuation** (inside a line): a min-p filter on the untempered
//!   distribution that drops every candidate whose probability is below
//!   `max_prob.powf(min_p_pow) * min_p_ratio`, then temperature scaling of
//!   the survivors.

use crate::vocab::TokenId;
use quill_common::config::SamplingConfig;
use quill_common::{QuillError, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// A single decoding policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingPolicy {
    /// Nucleus sampling
    LineStart { temperature: f32, top_p: f32 },

    /// Min-p sampling
    Continuation {
        temperature: f32,
        min_p_ratio: f32,
        min_p_pow: f32,
    },
}

/// The pair of policies the decode loop chooses between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPolicies {
    pub line_start: SamplingPolicy,
    pub continuation: SamplingPolicy,
}

impl SamplingPolicies {
    /// Pick the policy for the next step given whether the previous token was a line break
    pub fn select(&self, after_line_break: bool) -> SamplingPolicy {
        if after_line_break {
            self.line_start
        } else {
            self.continuation
        }
    }
}

impl From<&SamplingConfig> for SamplingPolicies {
    fn from(config: &SamplingConfig) -> Self {
        Self {
            line_start: SamplingPolicy::LineStart {
                temperature: config.line_start.temperature,
                top_p: config.line_start.top_p,
            },
            continuation: SamplingPolicy::Continuation {
                temperature: config.continuation.temperature,
                min_p_ratio: config.continuation.min_p_ratio,
                min_p_pow: config.continuation.min_p_pow,
            },
        }
    }
}

/// Numerically stable softmax; `-inf` logits get probability zero
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; logits.len()];
    }

    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Set to `-inf` every logit whose probability is under the min-p limit
pub fn apply_min_p(logits: &mut [f32], min_p_ratio: f32, min_p_pow: f32) {
    let probs = softmax(logits);
    let max_prob = probs.iter().copied().fold(0.0f32, f32::max);
    let limit = max_prob.powf(min_p_pow) * min_p_ratio;

    for (logit, prob) in logits.iter_mut().zip(probs) {
        if prob < limit {
            *logit = f32::NEG_INFINITY;
        }
    }
}

/// Zero every probability outside the nucleus.
///
/// Candidates are ranked by probability; a candidate is dropped once the
/// cumulative probability of the candidates ranked above it exceeds `top_p`.
/// The most likely candidate is always kept.
pub fn apply_top_p(probs: &mut [f32], top_p: f32) {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0f32;
    for (rank, &index) in order.iter().enumerate() {
        let exceeded = cumulative > top_p;
        cumulative += probs[index];
        if rank > 0 && exceeded {
            probs[index] = 0.0;
        }
    }
}

/// Token sampler owning its random source
#[derive(Debug)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    /// Seeded sampler for reproducible output, entropy-seeded otherwise
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Draw one token id from `logits` under `policy`
    pub fn sample(&mut self, logits: &[f32], policy: SamplingPolicy) -> Result<TokenId> {
        let probs = match policy {
            SamplingPolicy::LineStart { temperature, top_p } => {
                let scaled: Vec<f32> = logits.iter().map(|l| l / temperature).collect();
                let mut probs = softmax(&scaled);
                apply_top_p(&mut probs, top_p);
                probs
            }
            SamplingPolicy::Continuation {
                temperature,
                min_p_ratio,
                min_p_pow,
            } => {
                let mut filtered = logits.to_vec();
                apply_min_p(&mut filtered, min_p_ratio, min_p_pow);
                let scaled: Vec<f32> = filtered.iter().map(|l| l / temperature).collect();
                softmax(&scaled)
            }
        };

        let dist = WeightedIndex::new(&probs)
            .map_err(|e| QuillError::model(format!("No token can be sampled: {}", e)))?;
        Ok(dist.sample(&mut self.rng) as TokenId)
    }
}
