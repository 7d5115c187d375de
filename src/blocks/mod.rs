mod block;
mod processing_layer;

pub use block::{Block, BlockCore, SetupState};
pub use processing_layer::{Layer, LayerOutputs, LayerScope, Processing, ProcessingLayer};
