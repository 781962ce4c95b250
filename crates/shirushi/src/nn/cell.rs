//! # Recurrent Cells
//!
//! Single-step recurrent cells (Elman, LSTM, GRU) built on raw affine maps,
//! so the encoder can blend hidden state with the padding mask between
//! steps. Gates live in one packed block per map: LSTM rows in
//! input/forget/cell/output order, GRU rows in reset/update/candidate order.

use candle_core::{DType, Device, Tensor};
use candle_nn::init::DEFAULT_KAIMING_NORMAL;
use candle_nn::{ops, Init, VarBuilder};

use crate::config::CellType;
use crate::error::{Result, ShirushiError};

/// Hidden state carried between steps.
#[derive(Debug, Clone)]
pub struct CellState {
    /// Hidden output, `[batch, hidden]`.
    pub h: Tensor,
    /// LSTM cell memory, `[batch, hidden]`; `None` for cells without one.
    pub c: Option<Tensor>,
}

/// The four affine-map parameters every cell variant shares. `gates` is the
/// number of packed gate rows per hidden unit (1, 3 or 4).
#[derive(Debug, Clone)]
struct CellParams {
    w_ih: Tensor,
    w_hh: Tensor,
    b_ih: Tensor,
    b_hh: Tensor,
}

impl CellParams {
    fn new(gates: usize, input_size: usize, hidden_size: usize, vb: &VarBuilder) -> Result<Self> {
        let rows = gates * hidden_size;
        Ok(Self {
            w_ih: vb.get_with_hints((rows, input_size), "weight_ih", DEFAULT_KAIMING_NORMAL)?,
            w_hh: vb.get_with_hints((rows, hidden_size), "weight_hh", DEFAULT_KAIMING_NORMAL)?,
            b_ih: vb.get_with_hints(rows, "bias_ih", Init::Const(0.))?,
            b_hh: vb.get_with_hints(rows, "bias_hh", Init::Const(0.))?,
        })
    }

    /// `x W_ih^T + b_ih`, `[batch, gates * hidden]`.
    fn input_map(&self, x: &Tensor) -> Result<Tensor> {
        Ok(x.matmul(&self.w_ih.t()?)?.broadcast_add(&self.b_ih)?)
    }

    /// `h W_hh^T + b_hh`, `[batch, gates * hidden]`.
    fn hidden_map(&self, h: &Tensor) -> Result<Tensor> {
        Ok(h.matmul(&self.w_hh.t()?)?.broadcast_add(&self.b_hh)?)
    }
}

/// Elman cell, `h' = tanh(x W_ih^T + b_ih + h W_hh^T + b_hh)`.
#[derive(Debug, Clone)]
pub struct SimpleCell {
    params: CellParams,
    hidden_size: usize,
}

impl SimpleCell {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            params: CellParams::new(1, input_size, hidden_size, &vb)?,
            hidden_size,
        })
    }

    pub fn step(&self, x: &Tensor, state: &CellState) -> Result<CellState> {
        let h = (self.params.input_map(x)? + self.params.hidden_map(&state.h)?)?.tanh()?;
        Ok(CellState { h, c: None })
    }
}

/// Long short-term memory cell with a separate cell memory.
#[derive(Debug, Clone)]
pub struct LstmCell {
    params: CellParams,
    hidden_size: usize,
}

impl LstmCell {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            params: CellParams::new(4, input_size, hidden_size, &vb)?,
            hidden_size,
        })
    }

    pub fn step(&self, x: &Tensor, state: &CellState) -> Result<CellState> {
        let c = state.c.as_ref().ok_or_else(|| {
            ShirushiError::InvalidConfig("LSTM step requires a cell memory state".to_string())
        })?;

        let gates = (self.params.input_map(x)? + self.params.hidden_map(&state.h)?)?;
        let gates = gates.chunk(4, 1)?;
        let i = ops::sigmoid(&gates[0])?;
        let f = ops::sigmoid(&gates[1])?;
        let g = gates[2].tanh()?;
        let o = ops::sigmoid(&gates[3])?;

        let c_next = ((f * c)? + (i * g)?)?;
        let h_next = (o * c_next.tanh()?)?;
        Ok(CellState {
            h: h_next,
            c: Some(c_next),
        })
    }
}

/// Gated recurrent unit cell.
#[derive(Debug, Clone)]
pub struct GruCell {
    params: CellParams,
    hidden_size: usize,
}

impl GruCell {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            params: CellParams::new(3, input_size, hidden_size, &vb)?,
            hidden_size,
        })
    }

    pub fn step(&self, x: &Tensor, state: &CellState) -> Result<CellState> {
        let gi = self.params.input_map(x)?;
        let gh = self.params.hidden_map(&state.h)?;
        let gi = gi.chunk(3, 1)?;
        let gh = gh.chunk(3, 1)?;

        let r = ops::sigmoid(&(&gi[0] + &gh[0])?)?;
        let z = ops::sigmoid(&(&gi[1] + &gh[1])?)?;
        // The candidate applies the reset gate to the hidden map only.
        let n = (&gi[2] + (r * &gh[2])?)?.tanh()?;
        // h' = n + z * (h - n)
        let h = (&n + (z * (&state.h - &n)?)?)?;
        Ok(CellState { h, c: None })
    }
}

/// A single-direction recurrent cell with the variant fixed at construction.
#[derive(Debug, Clone)]
pub enum RecurrentCell {
    Simple(SimpleCell),
    Lstm(LstmCell),
    Gru(GruCell),
}

impl RecurrentCell {
    /// Build a cell of the given variant under the `VarBuilder` prefix.
    pub fn new(
        kind: CellType,
        input_size: usize,
        hidden_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(match kind {
            CellType::Simple => Self::Simple(SimpleCell::new(input_size, hidden_size, vb)?),
            CellType::Lstm => Self::Lstm(LstmCell::new(input_size, hidden_size, vb)?),
            CellType::Gru => Self::Gru(GruCell::new(input_size, hidden_size, vb)?),
        })
    }

    /// Hidden width produced per step.
    pub fn hidden_size(&self) -> usize {
        match self {
            Self::Simple(c) => c.hidden_size,
            Self::Lstm(c) => c.hidden_size,
            Self::Gru(c) => c.hidden_size,
        }
    }

    /// Start-of-sequence state: zero hidden output, plus a zero cell memory
    /// for the LSTM.
    pub fn zero_state(&self, batch_size: usize) -> Result<CellState> {
        let (device, dtype) = self.device_dtype();
        let h = Tensor::zeros((batch_size, self.hidden_size()), dtype, device)?;
        let c = match self {
            Self::Lstm(_) => Some(h.zeros_like()?),
            _ => None,
        };
        Ok(CellState { h, c })
    }

    /// Advance one time step, `x` is `[batch, input]`.
    pub fn step(&self, x: &Tensor, state: &CellState) -> Result<CellState> {
        match self {
            Self::Simple(c) => c.step(x, state),
            Self::Lstm(c) => c.step(x, state),
            Self::Gru(c) => c.step(x, state),
        }
    }

    fn device_dtype(&self) -> (&Device, DType) {
        let w = match self {
            Self::Simple(c) => &c.params.w_hh,
            Self::Lstm(c) => &c.params.w_hh,
            Self::Gru(c) => &c.params.w_hh,
        };
        (w.device(), w.dtype())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;
    use std::collections::HashMap;

    #[test]
    fn zero_state_matches_variant() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let lstm = RecurrentCell::new(CellType::Lstm, 6, 4, vb.pp("lstm")).unwrap();
        let state = lstm.zero_state(3).unwrap();
        assert_eq!(state.h.dims(), &[3, 4]);
        assert_eq!(state.c.as_ref().unwrap().dims(), &[3, 4]);

        let gru = RecurrentCell::new(CellType::Gru, 6, 4, vb.pp("gru")).unwrap();
        assert!(gru.zero_state(3).unwrap().c.is_none());

        let simple = RecurrentCell::new(CellType::Simple, 6, 4, vb.pp("simple")).unwrap();
        assert!(simple.zero_state(3).unwrap().c.is_none());
    }

    #[test]
    fn step_output_shapes() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        for kind in [CellType::Simple, CellType::Lstm, CellType::Gru] {
            let cell = RecurrentCell::new(kind, 6, 4, vb.pp(kind.to_string())).unwrap();
            assert_eq!(cell.hidden_size(), 4);

            let x = Tensor::randn(0f32, 1., (2, 6), &device).unwrap();
            let state = cell.zero_state(2).unwrap();
            let next = cell.step(&x, &state).unwrap();
            assert_eq!(next.h.dims(), &[2, 4]);
        }
    }

    #[test]
    fn simple_cell_matches_hand_computation() {
        let device = Device::Cpu;
        let mut weights = HashMap::new();
        weights.insert(
            "weight_ih".to_string(),
            Tensor::new(&[[1f32]], &device).unwrap(),
        );
        weights.insert(
            "weight_hh".to_string(),
            Tensor::new(&[[0f32]], &device).unwrap(),
        );
        weights.insert("bias_ih".to_string(), Tensor::new(&[0f32], &device).unwrap());
        weights.insert("bias_hh".to_string(), Tensor::new(&[0f32], &device).unwrap());
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);

        let cell = RecurrentCell::new(CellType::Simple, 1, 1, vb).unwrap();
        let x = Tensor::new(&[[0.5f32]], &device).unwrap();
        let state = cell.zero_state(1).unwrap();
        let next = cell.step(&x, &state).unwrap();

        let h = next.h.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((h[0] - 0.5f32.tanh()).abs() < 1e-6);

        // With w_hh = 0 a second identical step gives the same output.
        let again = cell.step(&x, &next).unwrap();
        let h2 = again.h.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((h2[0] - h[0]).abs() < 1e-6);
    }

    fn zero_weights(device: &Device, gates: usize, input: usize, hidden: usize) -> VarBuilder<'_> {
        let rows = gates * hidden;
        let mut weights = HashMap::new();
        weights.insert(
            "weight_ih".to_string(),
            Tensor::zeros((rows, input), DType::F32, device).unwrap(),
        );
        weights.insert(
            "weight_hh".to_string(),
            Tensor::zeros((rows, hidden), DType::F32, device).unwrap(),
        );
        weights.insert(
            "bias_ih".to_string(),
            Tensor::zeros(rows, DType::F32, device).unwrap(),
        );
        weights.insert(
            "bias_hh".to_string(),
            Tensor::zeros(rows, DType::F32, device).unwrap(),
        );
        VarBuilder::from_tensors(weights, DType::F32, device)
    }

    #[test]
    fn gru_zero_weights_keep_zero_state() {
        let device = Device::Cpu;
        let cell = RecurrentCell::new(CellType::Gru, 2, 1, zero_weights(&device, 3, 2, 1)).unwrap();

        let x = Tensor::new(&[[1f32, -2.0]], &device).unwrap();
        let state = cell.zero_state(1).unwrap();
        let next = cell.step(&x, &state).unwrap();

        let h = next.h.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(h[0], 0.0);
    }

    #[test]
    fn lstm_zero_weights_keep_zero_state() {
        let device = Device::Cpu;
        let cell =
            RecurrentCell::new(CellType::Lstm, 2, 1, zero_weights(&device, 4, 2, 1)).unwrap();

        let x = Tensor::new(&[[1f32, -2.0]], &device).unwrap();
        let state = cell.zero_state(1).unwrap();
        let next = cell.step(&x, &state).unwrap();

        let h = next.h.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let c = next
            .c
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(h[0], 0.0);
        assert_eq!(c[0], 0.0);
    }
}
