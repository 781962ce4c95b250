//! # Input Batches
//!
//! Bundles the word ids, character ids, padding mask and optional target
//! labels for one batch, validating shapes and dtypes up front so the model
//! never sees disagreeing tensors.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, ShirushiError};

fn expect_dims2(t: &Tensor, what: &'static str, expected: &str) -> Result<(usize, usize)> {
    t.dims2().map_err(|_| ShirushiError::ShapeMismatch {
        what,
        expected: expected.to_string(),
        actual: format!("{:?}", t.shape()),
    })
}

fn expect_dims3(t: &Tensor, what: &'static str, expected: &str) -> Result<(usize, usize, usize)> {
    t.dims3().map_err(|_| ShirushiError::ShapeMismatch {
        what,
        expected: expected.to_string(),
        actual: format!("{:?}", t.shape()),
    })
}

fn expect_ids(t: &Tensor, what: &'static str) -> Result<()> {
    match t.dtype() {
        DType::U8 | DType::U32 | DType::I64 => Ok(()),
        dtype => Err(ShirushiError::InvalidDType { what, dtype }),
    }
}

/// One batch of padded sequences.
///
/// Sequences are left-aligned: real tokens first, padding after, with the
/// mask holding `1.0` at real tokens and `0.0` at padding. Id tensors are
/// normalized to `U32` and the mask to `F32` on construction.
#[derive(Debug, Clone)]
pub struct Batch {
    input_word: Tensor,
    input_char: Tensor,
    mask: Tensor,
    target: Option<Tensor>,
}

impl Batch {
    /// Build a batch from word ids `[batch, length]`, character ids
    /// `[batch, length, chars]` and a mask `[batch, length]`.
    ///
    /// Fails with [`ShirushiError::ShapeMismatch`] if the tensors disagree on
    /// the batch or length axes, and with [`ShirushiError::InvalidDType`] if
    /// an id tensor carries a floating-point dtype.
    pub fn new(input_word: Tensor, input_char: Tensor, mask: Tensor) -> Result<Self> {
        let (batch, length) = expect_dims2(&input_word, "input_word", "[batch, length]")?;
        let (char_batch, char_length, _chars) =
            expect_dims3(&input_char, "input_char", "[batch, length, chars]")?;
        if (char_batch, char_length) != (batch, length) {
            return Err(ShirushiError::ShapeMismatch {
                what: "input_char",
                expected: format!("[{batch}, {length}, chars]"),
                actual: format!("{:?}", input_char.shape()),
            });
        }

        let mask_dims = expect_dims2(&mask, "mask", "[batch, length]")?;
        if mask_dims != (batch, length) {
            return Err(ShirushiError::ShapeMismatch {
                what: "mask",
                expected: format!("[{batch}, {length}]"),
                actual: format!("{:?}", mask.shape()),
            });
        }

        expect_ids(&input_word, "input_word")?;
        expect_ids(&input_char, "input_char")?;

        Ok(Self {
            input_word: input_word.to_dtype(DType::U32)?,
            input_char: input_char.to_dtype(DType::U32)?,
            mask: mask.to_dtype(DType::F32)?,
            target: None,
        })
    }

    /// Attach target labels `[batch, length]` for loss computation.
    ///
    /// Target values at masked positions are irrelevant but must still be
    /// valid label ids.
    pub fn with_target(mut self, target: Tensor) -> Result<Self> {
        let dims = expect_dims2(&target, "target", "[batch, length]")?;
        if dims != (self.batch_size(), self.seq_len()) {
            return Err(ShirushiError::ShapeMismatch {
                what: "target",
                expected: format!("[{}, {}]", self.batch_size(), self.seq_len()),
                actual: format!("{:?}", target.shape()),
            });
        }
        expect_ids(&target, "target")?;
        self.target = Some(target.to_dtype(DType::U32)?);
        Ok(self)
    }

    /// Word ids, `[batch, length]` `U32`.
    pub fn input_word(&self) -> &Tensor {
        &self.input_word
    }

    /// Character ids, `[batch, length, chars]` `U32`.
    pub fn input_char(&self) -> &Tensor {
        &self.input_char
    }

    /// Padding mask, `[batch, length]` `F32`.
    pub fn mask(&self) -> &Tensor {
        &self.mask
    }

    /// Target labels if attached, `[batch, length]` `U32`.
    pub fn target(&self) -> Option<&Tensor> {
        self.target.as_ref()
    }

    /// Number of sequences in the batch.
    pub fn batch_size(&self) -> usize {
        self.input_word.dims()[0]
    }

    /// Padded sequence length.
    pub fn seq_len(&self) -> usize {
        self.input_word.dims()[1]
    }

    /// Padded character length per token.
    pub fn char_len(&self) -> usize {
        self.input_char.dims()[2]
    }
}

/// Build a left-aligned `F32` mask `[lengths.len(), max_len]` from sequence
/// lengths, `1.0` for the first `lengths[i]` positions of row `i` and `0.0`
/// after.
pub fn length_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = Vec::with_capacity(lengths.len() * max_len);
    for (row, &len) in lengths.iter().enumerate() {
        if len > max_len {
            return Err(ShirushiError::ShapeMismatch {
                what: "lengths",
                expected: format!("lengths <= {max_len}"),
                actual: format!("length {len} at row {row}"),
            });
        }
        for t in 0..max_len {
            data.push(if t < len { 1f32 } else { 0f32 });
        }
    }
    Ok(Tensor::from_vec(data, (lengths.len(), max_len), device)?)
}
