//! # Sequence Labeler
//!
//! The assembled model: word and character embeddings, the character CNN,
//! input dropout, the masked bidirectional encoder and the label
//! projection, with the masked loss on top.
//!
//! The per-position feature vector is the word embedding concatenated with
//! the pooled character features, word features first. Scores come out as
//! `[batch, length, num_labels]`; callers mask them when evaluating, the
//! loss does so internally.

use std::path::Path;

use candle_core::{D, DType, Device, Tensor};
use candle_nn::{Dropout, Embedding, Linear, Module, VarBuilder};
use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::ModelConfig;
use crate::error::{Result, ShirushiError};
use crate::loss::{LossResult, masked_nll};
use crate::nn::{BiRnnEncoder, CharCnn};

/// Variable name of the word embedding table.
///
/// Seed a pretrained matrix under this name with
/// [`crate::nn::seed_embedding`] before construction.
pub const WORD_EMBEDDING: &str = "word_embed.weight";
/// Variable name of the character embedding table.
pub const CHAR_EMBEDDING: &str = "char_embed.weight";

/// Neural sequence labeler scoring one label per token.
#[derive(Debug, Clone)]
pub struct SequenceLabeler {
    word_embed: Embedding,
    char_embed: Embedding,
    char_cnn: CharCnn,
    dropout_in: Dropout,
    encoder: BiRnnEncoder,
    dense: Linear,
    config: ModelConfig,
}

impl SequenceLabeler {
    /// Build the model under `vb`. Variables already present in the
    /// builder's backing store (seeded embeddings, loaded checkpoints) are
    /// reused; everything else is freshly initialized.
    pub fn new(vb: VarBuilder, config: &ModelConfig) -> Result<Self> {
        config.validate()?;

        let word_embed =
            candle_nn::embedding(config.num_words, config.word_dim, vb.pp("word_embed"))?;
        let char_embed =
            candle_nn::embedding(config.num_chars, config.char_dim, vb.pp("char_embed"))?;
        let char_cnn = CharCnn::new(
            config.char_dim,
            config.num_filters,
            config.kernel_size,
            vb.pp("char_cnn"),
        )?;
        let encoder = BiRnnEncoder::new(
            config.feature_dim(),
            config.hidden_size,
            config.num_layers,
            config.cell,
            config.merge,
            config.p_rnn,
            vb.pp("rnn"),
        )?;
        let dense = candle_nn::linear(config.hidden_size, config.num_labels, vb.pp("dense"))?;

        debug!(
            cell = %config.cell,
            hidden_size = config.hidden_size,
            num_layers = config.num_layers,
            num_labels = config.num_labels,
            "built sequence labeler"
        );

        Ok(Self {
            word_embed,
            char_embed,
            char_cnn,
            dropout_in: Dropout::new(config.p_in),
            encoder,
            dense,
            config: config.clone(),
        })
    }

    /// Build the model from a safetensors checkpoint.
    pub fn from_safetensors(
        path: impl AsRef<Path>,
        config: &ModelConfig,
        device: &Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        let model = Self::new(vb, config)?;
        info!(path = %path.display(), "loaded sequence labeler weights");
        Ok(model)
    }

    /// The configuration the model was built with.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of output labels.
    pub fn num_labels(&self) -> usize {
        self.config.num_labels
    }

    /// Score every position, returning `[batch, length, num_labels]`.
    ///
    /// `train` enables the dropout layers; pass `false` for evaluation.
    pub fn forward(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        // [batch, length, word_dim]
        let word = self.word_embed.forward(batch.input_word())?;
        // [batch, length, chars, char_dim] -> [batch, length, num_filters]
        let char = self.char_embed.forward(batch.input_char())?;
        let char = self.char_cnn.forward(&char)?;

        // Word features first, then the pooled character features.
        let features = Tensor::cat(&[&word, &char], D::Minus1)?;
        let features = self.dropout_in.forward(&features, train)?;

        let hidden = self.encoder.forward(&features, batch.mask(), train)?;
        Ok(self.dense.forward(&hidden)?)
    }

    /// Masked loss and accuracy counts for a batch that carries targets.
    pub fn loss(&self, batch: &Batch, train: bool) -> Result<LossResult> {
        let target = batch.target().ok_or(ShirushiError::MissingTarget)?;
        let scores = self.forward(batch, train)?;
        masked_nll(&scores, target, batch.mask())
    }

    /// Argmax label per position with dropout disabled, `[batch, length]`
    /// `U32`. Padded positions get a label too; apply the mask downstream.
    pub fn predict(&self, batch: &Batch) -> Result<Tensor> {
        let scores = self.forward(batch, false)?;
        Ok(scores.argmax(D::Minus1)?)
    }
}
