//! # Neural Building Blocks
//!
//! The layers the sequence labeler is assembled from: recurrent cells, the
//! masked bidirectional encoder, the character CNN and embedding helpers.

pub mod cell;
pub mod conv;
pub mod embedding;
pub mod encoder;

pub use cell::{CellState, RecurrentCell};
pub use conv::CharCnn;
pub use embedding::{load_embedding, seed_embedding};
pub use encoder::BiRnnEncoder;
