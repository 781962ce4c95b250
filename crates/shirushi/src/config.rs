//! # Model Configuration
//!
//! Hyperparameters for the sequence labeler, with builder-style setters and
//! JSON loading for configs exported by the training side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShirushiError};

/// Recurrent cell variant used by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    /// Elman cell with a tanh nonlinearity.
    #[serde(rename = "RNN", alias = "rnn", alias = "simple", alias = "SIMPLE")]
    Simple,
    /// Long short-term memory cell.
    #[serde(rename = "LSTM", alias = "lstm")]
    Lstm,
    /// Gated recurrent unit cell.
    #[serde(rename = "GRU", alias = "gru")]
    Gru,
}

impl FromStr for CellType {
    type Err = ShirushiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "RNN" | "SIMPLE" => Ok(CellType::Simple),
            "LSTM" => Ok(CellType::Lstm),
            "GRU" => Ok(CellType::Gru),
            _ => Err(ShirushiError::UnknownCellType(s.to_string())),
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "RNN"),
            Self::Lstm => write!(f, "LSTM"),
            Self::Gru => write!(f, "GRU"),
        }
    }
}

/// How the two directions of the bidirectional encoder are reconciled.
///
/// Either way the encoder output has `hidden_size` features, so the
/// projection layer sees the width the config declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionMerge {
    /// Run each direction at `hidden_size` and sum the outputs.
    Sum,
    /// Run each direction at `hidden_size / 2` and concatenate the outputs.
    /// Requires an even `hidden_size`.
    Concat,
}

impl fmt::Display for DirectionMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Concat => write!(f, "concat"),
        }
    }
}

/// Configuration for the sequence labeler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Word vocabulary size.
    pub num_words: usize,
    /// Character vocabulary size.
    pub num_chars: usize,
    /// Number of output labels.
    pub num_labels: usize,
    /// Word embedding dimension.
    #[serde(default = "default_word_dim")]
    pub word_dim: usize,
    /// Character embedding dimension.
    #[serde(default = "default_char_dim")]
    pub char_dim: usize,
    /// Number of character convolution filters.
    #[serde(default = "default_num_filters")]
    pub num_filters: usize,
    /// Character convolution kernel width.
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
    /// Recurrent cell variant.
    #[serde(default = "default_cell")]
    pub cell: CellType,
    /// Encoder output width per position.
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    /// Number of stacked encoder layers.
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// How the two encoder directions are combined.
    #[serde(default = "default_merge")]
    pub merge: DirectionMerge,
    /// Dropout probability on the concatenated input features.
    #[serde(default = "default_p_in")]
    pub p_in: f32,
    /// Dropout probability between encoder layers.
    #[serde(default = "default_p_rnn")]
    pub p_rnn: f32,
}

fn default_word_dim() -> usize {
    100
}

fn default_char_dim() -> usize {
    30
}

fn default_num_filters() -> usize {
    30
}

fn default_kernel_size() -> usize {
    3
}

fn default_cell() -> CellType {
    CellType::Lstm
}

fn default_hidden_size() -> usize {
    256
}

fn default_num_layers() -> usize {
    1
}

fn default_merge() -> DirectionMerge {
    DirectionMerge::Sum
}

fn default_p_in() -> f32 {
    0.2
}

fn default_p_rnn() -> f32 {
    0.5
}

impl ModelConfig {
    /// Create a configuration with default hyperparameters for the given
    /// vocabulary and label sizes.
    pub fn new(num_words: usize, num_chars: usize, num_labels: usize) -> Self {
        Self {
            num_words,
            num_chars,
            num_labels,
            word_dim: default_word_dim(),
            char_dim: default_char_dim(),
            num_filters: default_num_filters(),
            kernel_size: default_kernel_size(),
            cell: default_cell(),
            hidden_size: default_hidden_size(),
            num_layers: default_num_layers(),
            merge: default_merge(),
            p_in: default_p_in(),
            p_rnn: default_p_rnn(),
        }
    }

    /// Set the word embedding dimension.
    pub fn with_word_dim(mut self, word_dim: usize) -> Self {
        self.word_dim = word_dim;
        self
    }

    /// Set the character embedding dimension.
    pub fn with_char_dim(mut self, char_dim: usize) -> Self {
        self.char_dim = char_dim;
        self
    }

    /// Set the number of character convolution filters.
    pub fn with_num_filters(mut self, num_filters: usize) -> Self {
        self.num_filters = num_filters;
        self
    }

    /// Set the character convolution kernel width.
    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Set the recurrent cell variant.
    pub fn with_cell(mut self, cell: CellType) -> Self {
        self.cell = cell;
        self
    }

    /// Set the encoder output width.
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Set the number of stacked encoder layers.
    pub fn with_num_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Set how the two encoder directions are combined.
    pub fn with_merge(mut self, merge: DirectionMerge) -> Self {
        self.merge = merge;
        self
    }

    /// Set the input dropout probability.
    pub fn with_p_in(mut self, p_in: f32) -> Self {
        self.p_in = p_in;
        self
    }

    /// Set the inter-layer dropout probability.
    pub fn with_p_rnn(mut self, p_rnn: f32) -> Self {
        self.p_rnn = p_rnn;
        self
    }

    /// Width of the per-token feature vector fed to the encoder.
    pub fn feature_dim(&self) -> usize {
        self.word_dim + self.num_filters
    }

    /// Check every configuration invariant, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("num_words", self.num_words),
            ("num_chars", self.num_chars),
            ("num_labels", self.num_labels),
            ("word_dim", self.word_dim),
            ("char_dim", self.char_dim),
            ("num_filters", self.num_filters),
            ("kernel_size", self.kernel_size),
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ShirushiError::InvalidConfig(format!(
                    "{name} must be at least 1"
                )));
            }
        }

        for (name, p) in [("p_in", self.p_in), ("p_rnn", self.p_rnn)] {
            if !(0.0..1.0).contains(&p) {
                return Err(ShirushiError::InvalidConfig(format!(
                    "{name} must be in [0, 1), got {p}"
                )));
            }
        }

        if self.merge == DirectionMerge::Concat && self.hidden_size % 2 != 0 {
            return Err(ShirushiError::InvalidConfig(format!(
                "concat merge needs an even hidden_size, got {}",
                self.hidden_size
            )));
        }

        Ok(())
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ShirushiError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ShirushiError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}
