//! Autoregressive decode loop
//!
//! Each request is normalized, tokenized and extended by a fixed number of
//! sampled tokens. The model only ever sees the trailing `context_window`
//! tokens; older context is cut off, not summarized.

use crate::model::LanguageModel;
use crate::normalize::normalize;
use crate::sampling::{Sampler, SamplingPolicies};
use crate::vocab::{TokenId, Vocabulary};
use quill_common::config::WorkerConfig;
use quill_common::metrics::LatencyTimer;
use quill_common::{QuillError, Result, METRICS};
use std::time::Instant;
use tracing::{debug, trace};

/// Result of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Decoded continuation
    pub text: String,

    /// Sampled token ids, in order
    pub tokens: Vec<TokenId>,

    /// Number of tokens in the normalized context
    pub context_tokens: usize,
}

/// Decode loop parameters
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub context_window: usize,
    pub tokens_per_request: usize,
    pub policies: SamplingPolicies,
}

impl From<&WorkerConfig> for GenerationSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            context_window: config.context_window,
            tokens_per_request: config.tokens_per_request,
            policies: SamplingPolicies::from(&config.sampling),
        }
    }
}

/// Overwrite the logit of `token` with `-inf`
pub fn mask_token(logits: &mut [f32], token: TokenId) {
    if let Some(logit) = logits.get_mut(token as usize) {
        *logit = f32::NEG_INFINITY;
    }
}

/// The trailing `window` tokens of `tokens`
pub fn context_window(tokens: &[TokenId], window: usize) -> &[TokenId] {
    &tokens[tokens.len().saturating_sub(window)..]
}

/// Sequential text generator owning the model, vocabulary and sampler
pub struct Generator<M> {
    model: M,
    vocab: Vocabulary,
    settings: GenerationSettings,
    sampler: Sampler,
    line_break: Option<TokenId>,
}

impl<M: LanguageModel> Generator<M> {
    pub fn new(model: M, vocab: Vocabulary, settings: GenerationSettings, sampler: Sampler) -> Result<Self> {
        // Every table id must index into the logits, or the first request using it fails
        if vocab.logits_len() > model.vocab_size() {
            return Err(QuillError::model(format!(
                "Vocabulary ids reach {} but the model only scores {} tokens",
                vocab.logits_len() - 1,
                model.vocab_size()
            )));
        }

        let line_break = vocab.id_of("\n");
        Ok(Self {
            model,
            vocab,
            settings,
            sampler,
            line_break,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Generate the continuation of `text`.
    ///
    /// Always runs the full configured length; there is no stop token.
    pub fn generate(&mut self, text: &str) -> Result<GenerationOutcome> {
        let start = Instant::now();
        let context = normalize(text);
        let mut tokens = self.vocab.encode(&context);
        let context_tokens = tokens.len();

        if context_tokens > self.settings.context_window {
            debug!(
                "Context has {} tokens, model only sees the last {}",
                context_tokens, self.settings.context_window
            );
        }

        let unknown = self.vocab.unknown_id();
        let mut output = String::new();
        let mut emitted = context_tokens;

        for step in 0..self.settings.tokens_per_request {
            let window = context_window(&tokens, self.settings.context_window);
            let model = &mut self.model;
            let mut logits = METRICS
                .worker
                .forward_duration
                .time(|| model.next_token_logits(window))?;

            mask_token(&mut logits, unknown);

            let previous = tokens[tokens.len() - 1];
            let after_line_break = Some(previous) == self.line_break;
            let policy = self.settings.policies.select(after_line_break);
            let next = self.sampler.sample(&logits, policy)?;

            trace!(step, previous, next, after_line_break, "Sampled token");
            tokens.push(next);

            output.push_str(&self.vocab.decode(&tokens[emitted..]));
            emitted = tokens.len();
        }

        let generated = tokens.split_off(context_tokens);
        METRICS
            .worker
            .tokens_generated_total
            .inc_by(generated.len() as u64);
        METRICS
            .worker
            .generation_duration
            .observe(start.elapsed().as_secs_f64());

        Ok(GenerationOutcome {
            text: output,
            tokens: generated,
            context_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::SamplingPolicy;
    use quill_common::config::SamplingConfig;

    const UNKNOWN: &str = "\u{e083}";

    fn scenario_vocab() -> Vocabulary {
        Vocabulary::from_pairs(vec![(0, "\n"), (1, "a"), (2, "b"), (99, UNKNOWN)], UNKNOWN).unwrap()
    }

    fn settings(context_window: usize, tokens_per_request: usize) -> GenerationSettings {
        GenerationSettings {
            context_window,
            tokens_per_request,
            policies: SamplingPolicies::from(&SamplingConfig::default()),
        }
    }

    /// Records every window and returns fixed logits
    struct ScriptedModel {
        logits: Vec<f32>,
        max_window: usize,
        windows: Vec<Vec<TokenId>>,
    }

    impl ScriptedModel {
        fn new(logits: Vec<f32>, max_window: usize) -> Self {
            Self {
                logits,
                max_window,
                windows: Vec::new(),
            }
        }
    }

    impl LanguageModel for ScriptedModel {
        fn vocab_size(&self) -> usize {
            self.logits.len()
        }

        fn next_token_logits(&mut self, window: &[TokenId]) -> Result<Vec<f32>> {
            assert!(window.len() <= self.max_window, "window of {} tokens", window.len());
            self.windows.push(window.to_vec());
            Ok(self.logits.clone())
        }
    }

    /// Only `favored` and the unknown id are viable; unknown dominates before masking
    fn logits_favoring(favored: TokenId) -> Vec<f32> {
        let mut logits = vec![f32::NEG_INFINITY; 100];
        logits[favored as usize] = 0.0;
        logits[99] = 50.0;
        logits
    }

    #[test]
    fn test_scenario_windows() {
        let model = ScriptedModel::new(logits_favoring(1), 4);
        let mut generator =
            Generator::new(model, scenario_vocab(), settings(4, 2), Sampler::new(Some(3))).unwrap();

        let outcome = generator.generate("ab").unwrap();

        assert_eq!(outcome.context_tokens, 3);
        assert_eq!(outcome.tokens, vec![1, 1]);
        assert_eq!(outcome.text, "aa");
        assert_eq!(generator.model().windows, vec![vec![0, 1, 2], vec![0, 1, 2, 1]]);
    }

    #[test]
    fn test_window_is_truncated() {
        let model = ScriptedModel::new(logits_favoring(2), 4);
        let mut generator =
            Generator::new(model, scenario_vocab(), settings(4, 5), Sampler::new(Some(3))).unwrap();

        let outcome = generator.generate("abababab").unwrap();

        assert_eq!(outcome.tokens.len(), 5);
        for window in &generator.model().windows {
            assert_eq!(window.len(), 4);
        }
        assert_eq!(generator.model().windows.last().unwrap(), &vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_unknown_is_never_sampled() {
        // Uniform over the table, unknown strongly preferred before masking
        let mut logits = vec![f32::NEG_INFINITY; 100];
        for id in [0, 1, 2] {
            logits[id] = 0.0;
        }
        logits[99] = 100.0;
        let model = ScriptedModel::new(logits, 512);
        let mut generator =
            Generator::new(model, scenario_vocab(), settings(512, 200), Sampler::new(None)).unwrap();

        let outcome = generator.generate("a?b").unwrap();

        assert_eq!(outcome.tokens.len(), 200);
        assert!(outcome.tokens.iter().all(|&t| t != 99));
    }

    #[test]
    fn test_empty_input_still_generates() {
        let model = ScriptedModel::new(logits_favoring(2), 4);
        let mut generator =
            Generator::new(model, scenario_vocab(), settings(4, 3), Sampler::new(Some(0))).unwrap();

        let outcome = generator.generate("   ").unwrap();

        assert_eq!(outcome.context_tokens, 1);
        assert_eq!(generator.model().windows[0], vec![0]);
        assert_eq!(outcome.text, "bbb");
    }

    #[test]
    fn test_branch_follows_previous_token() {
        // Nearly flat logits: min-p with a ratio of 1.0 keeps only the best
        // candidate ('a'), top-p of 1.0 keeps every candidate.
        let mut logits = vec![0.0f32; 100];
        logits[1] = 0.1;
        let policies = SamplingPolicies {
            line_start: SamplingPolicy::LineStart {
                temperature: 1.0,
                top_p: 1.0,
            },
            continuation: SamplingPolicy::Continuation {
                temperature: 1.0,
                min_p_ratio: 1.0,
                min_p_pow: 1.0,
            },
        };
        let settings = GenerationSettings {
            context_window: 8,
            tokens_per_request: 1,
            policies,
        };
        let first_token = |input: &str, seed: u64| {
            let model = ScriptedModel::new(logits.clone(), 8);
            let mut generator =
                Generator::new(model, scenario_vocab(), settings, Sampler::new(Some(seed))).unwrap();
            generator.generate(input).unwrap().tokens[0]
        };

        // After 'b' the continuation policy always applies
        assert!((0..20).all(|seed| first_token("b", seed) == 1));

        // After the leading line break the nucleus policy spreads over the table
        assert!((0..20).any(|seed| first_token("", seed) != 1));
    }

    #[test]
    fn test_rejects_model_smaller_than_vocabulary() {
        let model = ScriptedModel::new(vec![0.0; 10], 4);
        assert!(Generator::new(model, scenario_vocab(), settings(4, 2), Sampler::new(None)).is_err());
    }

    #[test]
    fn test_rejects_table_ids_beyond_model() {
        // Unknown id fits, but 'z' at 7 would be fed to a model scoring only 4 tokens
        let vocab = Vocabulary::from_pairs(vec![(0, "\n"), (1, "a"), (3, UNKNOWN), (7, "z")], UNKNOWN).unwrap();
        let model = ScriptedModel::new(vec![0.0; 4], 4);

        let result = Generator::new(model, vocab, settings(4, 2), Sampler::new(None));
        assert!(matches!(result, Err(QuillError::Model(_))));
    }

    #[test]
    fn test_accepts_model_covering_vocabulary() {
        let model = ScriptedModel::new(vec![0.0; 120], 4);
        assert!(Generator::new(model, scenario_vocab(), settings(4, 2), Sampler::new(None)).is_ok());
    }

    #[test]
    fn test_helpers() {
        let mut logits = vec![1.0, 2.0];
        mask_token(&mut logits, 1);
        mask_token(&mut logits, 7);
        assert_eq!(logits, vec![1.0, f32::NEG_INFINITY]);

        assert_eq!(context_window(&[1, 2, 3, 4, 5], 3), &[3, 4, 5]);
        assert_eq!(context_window(&[1, 2], 3), &[1, 2]);
    }
}
