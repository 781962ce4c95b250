//! # Shirushi
//!
//! Neural sequence labeling on [candle](https://github.com/huggingface/candle).
//! Word embeddings and pooled character-CNN features feed a masked
//! bidirectional recurrent encoder (plain RNN, LSTM or GRU), and a linear
//! projection scores every token against the label set. Padding never
//! influences real positions: recurrent state is frozen across masked
//! steps, encoder outputs are zeroed there, and the loss averages over
//! unmasked positions only.
//!
//! The crate covers the forward pass, the masked negative log-likelihood
//! and checkpoint loading. Optimizers, data loading and training loops
//! live with the callers.
//!
//! ## Quick Start
//!
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use shirushi::{Batch, CellType, ModelConfig, SequenceLabeler};
//!
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//!
//! let config = ModelConfig::new(50, 20, 4)
//!     .with_cell(CellType::Lstm)
//!     .with_word_dim(16)
//!     .with_char_dim(8)
//!     .with_num_filters(8)
//!     .with_hidden_size(32);
//! let model = SequenceLabeler::new(vb, &config).unwrap();
//!
//! // One sentence of three tokens, two characters per token.
//! let words = Tensor::new(&[[1u32, 7, 3]], &device).unwrap();
//! let chars = Tensor::new(&[[[2u32, 4], [5, 0], [9, 9]]], &device).unwrap();
//! let mask = Tensor::new(&[[1f32, 1., 1.]], &device).unwrap();
//! let batch = Batch::new(words, chars, mask).unwrap();
//!
//! let scores = model.forward(&batch, false).unwrap();
//! assert_eq!(scores.dims(), &[1, 3, 4]);
//! ```
pub mod batch;
pub mod config;
pub mod error;
pub mod loss;
pub mod model;
pub mod nn;

// Re-export primary API
pub use batch::{Batch, length_mask};
pub use config::{CellType, DirectionMerge, ModelConfig};
pub use error::{Result, ShirushiError};
pub use loss::{LossResult, masked_nll};
pub use model::{CHAR_EMBEDDING, SequenceLabeler, WORD_EMBEDDING};
pub use nn::{BiRnnEncoder, CharCnn};
