//! Quill Worker
//!
//! Single-consumer text generation: vocabulary lookup, input normalization, the
//! model collaborator, stochastic sampling policies and the fixed-length
//! autoregressive decode loop, run on one dedicated thread.

pub mod generation;
pub mod model;
pub mod normalize;
pub mod sampling;
pub mod service;
pub mod vocab;

pub use generation::{GenerationOutcome, GenerationSettings, Generator};
pub use model::{CandleBigramModel, LanguageModel};
pub use normalize::normalize;
pub use sampling::{Sampler, SamplingPolicies, SamplingPolicy};
pub use service::WorkerService;
pub use vocab::{TokenId, Vocabulary};

use quill_common::config::WorkerConfig;
use quill_common::Result;

/// Load the vocabulary and model named in `config` and assemble a generator
pub fn load_generator(config: &WorkerConfig) -> Result<Generator<CandleBigramModel>> {
    let vocab = Vocabulary::load(&config.vocab_path, &config.unknown_symbol)?;
    let model = CandleBigramModel::load(&config.weights_path, config.device)?;
    Generator::new(
        model,
        vocab,
        GenerationSettings::from(config),
        Sampler::new(config.seed),
    )
}
