//! # Pretrained Embeddings
//!
//! Loading an embedding matrix from a safetensors file and seeding it into
//! a [`VarMap`] so that a model built from the same map starts from the
//! pretrained values while keeping the table trainable.

use std::path::Path;

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use tracing::info;

use crate::error::{Result, ShirushiError};

/// Read the tensor stored under `name` from a safetensors file and check it
/// is a `[vocab, dim]` matrix.
pub fn load_embedding(path: impl AsRef<Path>, name: &str, device: &Device) -> Result<Tensor> {
    let path = path.as_ref();
    let mut tensors = candle_core::safetensors::load(path, device)?;
    let embedding = tensors.remove(name).ok_or_else(|| {
        ShirushiError::InvalidConfig(format!("no tensor named {name:?} in {}", path.display()))
    })?;
    check_matrix(&embedding)?;
    info!(name, path = %path.display(), "loaded pretrained embedding");
    Ok(embedding)
}

/// Install `weights` as a trainable variable under `name`.
///
/// Seed before building the model: construction looks names up in the map
/// first and only falls back to random init for absent ones. The names the
/// model uses are [`crate::model::WORD_EMBEDDING`] and
/// [`crate::model::CHAR_EMBEDDING`]. A seed whose shape disagrees with the
/// configured vocabulary fails at construction time.
pub fn seed_embedding(varmap: &VarMap, name: &str, weights: &Tensor) -> Result<()> {
    check_matrix(weights)?;
    let var = Var::from_tensor(weights)?;
    varmap
        .data()
        .lock()
        .expect("varmap mutex poisoned")
        .insert(name.to_string(), var);
    Ok(())
}

fn check_matrix(weights: &Tensor) -> Result<()> {
    weights.dims2().map_err(|_| ShirushiError::ShapeMismatch {
        what: "embedding matrix",
        expected: "[vocab, dim]".to_string(),
        actual: format!("{:?}", weights.shape()),
    })?;
    Ok(())
}
