//! # Masked Bidirectional Encoder
//!
//! Stacked bidirectional recurrent encoder that respects a padding mask.
//! At each step the cell state is blended as `m * next + (1 - m) * prev`,
//! so state never advances across padding, and the per-step output is
//! multiplied by the mask so padded positions read as exact zeros. The
//! backward direction scans from the end and carries its zero start state
//! across trailing padding.

use candle_core::{D, DType, IndexOp, Tensor};
use candle_nn::{Dropout, VarBuilder};

use crate::config::{CellType, DirectionMerge};
use crate::error::{Result, ShirushiError};
use crate::nn::cell::{CellState, RecurrentCell};

#[derive(Debug, Clone)]
struct EncoderLayer {
    fwd: RecurrentCell,
    bwd: RecurrentCell,
}

/// Bidirectional masked recurrent encoder.
///
/// The output width equals `hidden_size` regardless of the direction merge:
/// `Sum` runs both directions at `hidden_size` and adds them, `Concat` runs
/// both at `hidden_size / 2` and concatenates.
#[derive(Debug, Clone)]
pub struct BiRnnEncoder {
    layers: Vec<EncoderLayer>,
    dropout: Dropout,
    merge: DirectionMerge,
    hidden_size: usize,
}

impl BiRnnEncoder {
    /// Build an encoder of `num_layers` stacked bidirectional layers.
    ///
    /// # Arguments
    /// * `input_size` - feature width of the first layer's input
    /// * `hidden_size` - output width per position
    /// * `num_layers` - number of stacked layers, at least 1
    /// * `cell` - recurrent cell variant shared by every direction
    /// * `merge` - how the two directions are combined
    /// * `p_rnn` - dropout probability applied between layers in training
    pub fn new(
        input_size: usize,
        hidden_size: usize,
        num_layers: usize,
        cell: CellType,
        merge: DirectionMerge,
        p_rnn: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_layers == 0 {
            return Err(ShirushiError::InvalidConfig(
                "encoder needs at least one layer".to_string(),
            ));
        }
        let direction_size = match merge {
            DirectionMerge::Sum => hidden_size,
            DirectionMerge::Concat => {
                if hidden_size % 2 != 0 {
                    return Err(ShirushiError::InvalidConfig(format!(
                        "concat merge needs an even hidden_size, got {hidden_size}"
                    )));
                }
                hidden_size / 2
            }
        };

        let mut layers = Vec::with_capacity(num_layers);
        for idx in 0..num_layers {
            let layer_input = if idx == 0 { input_size } else { hidden_size };
            let lvb = vb.pp(format!("l{idx}"));
            layers.push(EncoderLayer {
                fwd: RecurrentCell::new(cell, layer_input, direction_size, lvb.pp("fwd"))?,
                bwd: RecurrentCell::new(cell, layer_input, direction_size, lvb.pp("bwd"))?,
            });
        }

        Ok(Self {
            layers,
            dropout: Dropout::new(p_rnn),
            merge,
            hidden_size,
        })
    }

    /// Output width per position.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Encode `input` `[batch, length, features]` under `mask`
    /// `[batch, length]`, returning `[batch, length, hidden_size]`.
    pub fn forward(&self, input: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, length, _features) =
            input.dims3().map_err(|_| ShirushiError::ShapeMismatch {
                what: "encoder input",
                expected: "[batch, length, features]".to_string(),
                actual: format!("{:?}", input.shape()),
            })?;
        let mask_dims = mask.dims2().map_err(|_| ShirushiError::ShapeMismatch {
            what: "mask",
            expected: format!("[{batch}, {length}]"),
            actual: format!("{:?}", mask.shape()),
        })?;
        if mask_dims != (batch, length) {
            return Err(ShirushiError::ShapeMismatch {
                what: "mask",
                expected: format!("[{batch}, {length}]"),
                actual: format!("{:?}", mask.shape()),
            });
        }
        let mask = mask.to_dtype(DType::F32)?;

        let mut x = input.clone();
        for (idx, layer) in self.layers.iter().enumerate() {
            // Matches the stacked-RNN convention: dropout sits between
            // layers, not after the last one.
            if idx > 0 {
                x = self.dropout.forward(&x, train)?;
            }
            let forward = scan(&layer.fwd, &x, &mask, false)?;
            let backward = scan(&layer.bwd, &x, &mask, true)?;
            x = match self.merge {
                DirectionMerge::Sum => (forward + backward)?,
                DirectionMerge::Concat => Tensor::cat(&[&forward, &backward], D::Minus1)?,
            };
        }
        Ok(x)
    }
}

/// Run one direction over the full sequence, returning `[batch, length,
/// direction_size]` with outputs already zeroed at masked positions.
fn scan(cell: &RecurrentCell, input: &Tensor, mask: &Tensor, reverse: bool) -> Result<Tensor> {
    let (batch, length, _) = input.dims3()?;
    let mut state = cell.zero_state(batch)?;
    let mut steps = Vec::with_capacity(length);

    for i in 0..length {
        let t = if reverse { length - 1 - i } else { i };
        // [batch, features] at step t
        let x = input.i((.., t, ..))?.contiguous()?;
        // [batch, 1]
        let m = mask.narrow(1, t, 1)?;

        let next = cell.step(&x, &state)?;
        state = blend(&next, &state, &m)?;
        steps.push(state.h.broadcast_mul(&m)?);
    }

    if reverse {
        steps.reverse();
    }
    Ok(Tensor::stack(&steps, 1)?)
}

/// Keep the candidate state where the mask is 1 and the previous state
/// where it is 0, for both the hidden output and the cell memory.
fn blend(next: &CellState, prev: &CellState, m: &Tensor) -> Result<CellState> {
    let keep = m.affine(-1.0, 1.0)?;
    let h = (next.h.broadcast_mul(m)? + prev.h.broadcast_mul(&keep)?)?;
    let c = match (&next.c, &prev.c) {
        (Some(next_c), Some(prev_c)) => {
            Some((next_c.broadcast_mul(m)? + prev_c.broadcast_mul(&keep)?)?)
        }
        _ => None,
    };
    Ok(CellState { h, c })
}
