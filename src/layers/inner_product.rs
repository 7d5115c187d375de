use graph::{Init, Tensor};

use crate::{
    Result,
    blocks::{Layer, LayerOutputs, LayerScope},
};

/// A fully connected layer: `x * weights + biases`.
#[derive(Debug, Clone, Copy)]
pub struct InnerProduct {
    out_channels: usize,
    init: Init,
}

impl InnerProduct {
    /// Creates a new `InnerProduct` with Xavier initialized weights.
    ///
    /// # Arguments
    /// * `out_channels` - The amount of output units.
    pub fn new(out_channels: usize) -> Self {
        Self::with_init(out_channels, Init::XavierUniform)
    }

    pub fn with_init(out_channels: usize, init: Init) -> Self {
        Self { out_channels, init }
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl Layer for InnerProduct {
    fn build(&mut self, scope: &mut LayerScope<'_>, inputs: &[Tensor]) -> Result<LayerOutputs> {
        scope.expect_inputs(inputs, 1)?;

        let x = inputs[0];
        let in_channels = scope.graph().shape(x).cols;
        let shape = (in_channels, self.out_channels);

        let weights = scope.variable("weights", shape, self.init)?;
        let biases = scope.variable("biases", (1, self.out_channels), Init::Const(0.))?;

        let graph = scope.graph();
        let z = graph.matmul(x, weights)?;
        let data = graph.bias_add(z, biases)?;
        Ok(LayerOutputs::data(data))
    }
}
