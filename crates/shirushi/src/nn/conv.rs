//! # Character Convolution
//!
//! Per-token character feature extractor: a 1-D convolution over each
//! token's characters followed by a max pool over the whole (padded) time
//! axis, producing one fixed-width vector per token.

use candle_core::{D, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, Module, VarBuilder};

use crate::error::{Result, ShirushiError};

/// Character-level CNN, `[batch, length, chars, char_dim]` embedded
/// characters in, `[batch, length, num_filters]` token features out.
#[derive(Debug, Clone)]
pub struct CharCnn {
    conv: Conv1d,
    num_filters: usize,
}

impl CharCnn {
    /// Build the convolution with `padding = kernel_size - 1`, so even a
    /// single-character token yields a positive output length.
    pub fn new(
        char_dim: usize,
        num_filters: usize,
        kernel_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if kernel_size == 0 {
            return Err(ShirushiError::InvalidConfig(
                "kernel_size must be at least 1".to_string(),
            ));
        }
        let config = Conv1dConfig {
            padding: kernel_size - 1,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(char_dim, num_filters, kernel_size, config, vb.pp("conv"))?;
        Ok(Self { conv, num_filters })
    }

    /// Number of filters, the per-token output width.
    pub fn num_filters(&self) -> usize {
        self.num_filters
    }

    pub fn forward(&self, chars: &Tensor) -> Result<Tensor> {
        let (batch, length, char_len, char_dim) =
            chars.dims4().map_err(|_| ShirushiError::ShapeMismatch {
                what: "char features",
                expected: "[batch, length, chars, char_dim]".to_string(),
                actual: format!("{:?}", chars.shape()),
            })?;

        // Fold batch and length together so the convolution runs per token:
        // [batch * length, char_dim, chars]
        let x = chars
            .reshape((batch * length, char_len, char_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        // [batch * length, num_filters, chars + kernel_size - 1]
        let x = self.conv.forward(&x)?;
        // Max over the padded time axis: [batch * length, num_filters]
        let x = x.max(D::Minus1)?;
        Ok(x.reshape((batch, length, self.num_filters))?)
    }
}
