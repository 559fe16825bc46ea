//! Model collaborator
//!
//! The decode loop only needs one operation from a model: given a bounded
//! window of token ids, return logits for the token that follows. Models are
//! treated as stateless between calls; every step re-runs the full window.

use crate::vocab::TokenId;
use candle_core::{DType, Device, Tensor};
use memmap2::Mmap;
use quill_common::config::DeviceSpec;
use quill_common::{QuillError, Result};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Next-token predictor
pub trait LanguageModel: Send {
    /// Length of the logits vector returned by [`next_token_logits`](Self::next_token_logits)
    fn vocab_size(&self) -> usize;

    /// Logits for the token following the last position of `window`
    fn next_token_logits(&mut self, window: &[TokenId]) -> Result<Vec<f32>>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn next_token_logits(&mut self, window: &[TokenId]) -> Result<Vec<f32>> {
        (**self).next_token_logits(window)
    }
}

fn model_err(e: candle_core::Error) -> QuillError {
    QuillError::model(e.to_string())
}

/// Resolve a configured device
pub fn select_device(spec: DeviceSpec) -> Result<Device> {
    match spec {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda(ordinal) => Device::new_cuda(ordinal).map_err(|e| {
            QuillError::config(format!("CUDA device {} unavailable: {}", ordinal, e))
        }),
    }
}

/// Bigram language model on candle tensors.
///
/// Weights are `token_embedding [vocab, dim]` and `lm_head [dim, vocab]`; the
/// logits for the next token are the embedding of the last window token
/// projected through the head.
pub struct CandleBigramModel {
    token_embedding: Tensor,
    lm_head: Tensor,
    vocab_size: usize,
}

impl CandleBigramModel {
    pub const EMBEDDING: &'static str = "token_embedding";
    pub const LM_HEAD: &'static str = "lm_head";

    /// Memory-map a safetensors file and load the weights onto `device`
    pub fn load<P: AsRef<Path>>(weights_path: P, device: DeviceSpec) -> Result<Self> {
        let weights_path = weights_path.as_ref();
        info!("Loading model weights from {} on {}", weights_path.display(), device);

        let device = select_device(device)?;
        let file = File::open(weights_path).map_err(|e| {
            QuillError::model(format!("Failed to open {}: {}", weights_path.display(), e))
        })?;
        // SAFETY: the weights file is opened read-only and not modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };

        let mut tensors = candle_core::safetensors::load_buffer(&mmap[..], &device).map_err(model_err)?;
        let mut take = |name: &str| {
            tensors
                .remove(name)
                .ok_or_else(|| QuillError::model(format!("Missing tensor {}", name)))?
                .to_dtype(DType::F32)
                .map_err(model_err)
        };
        let token_embedding = take(Self::EMBEDDING)?;
        let lm_head = take(Self::LM_HEAD)?;

        let model = Self::new(token_embedding, lm_head)?;
        info!("Model loaded: vocabulary of {} tokens", model.vocab_size);
        Ok(model)
    }

    /// Build a model from already materialized tensors
    pub fn new(token_embedding: Tensor, lm_head: Tensor) -> Result<Self> {
        let (vocab_size, dim) = token_embedding.dims2().map_err(model_err)?;
        let (head_dim, head_vocab) = lm_head.dims2().map_err(model_err)?;

        if dim != head_dim || vocab_size != head_vocab {
            return Err(QuillError::model(format!(
                "Shape mismatch: embedding ({}, {}), head ({}, {})",
                vocab_size, dim, head_dim, head_vocab
            )));
        }

        Ok(Self {
            token_embedding,
            lm_head,
            vocab_size,
        })
    }
}

impl LanguageModel for CandleBigramModel {
    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn next_token_logits(&mut self, window: &[TokenId]) -> Result<Vec<f32>> {
        let last = *window
            .last()
            .ok_or_else(|| QuillError::model("Empty input window"))? as usize;
        if last >= self.vocab_size {
            return Err(QuillError::model(format!(
                "Token {} outside model vocabulary of {}",
                last, self.vocab_size
            )));
        }

        debug!("Forward pass over {} tokens", window.len());
        self.token_embedding
            .narrow(0, last, 1)
            .and_then(|row| row.matmul(&self.lm_head))
            .and_then(|logits| logits.squeeze(0))
            .and_then(|logits| logits.to_vec1::<f32>())
            .map_err(model_err)
    }
}
