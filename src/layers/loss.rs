use graph::Tensor;

use crate::{
    Result,
    blocks::{Layer, LayerOutputs, LayerScope},
};

/// Softmax over the incoming logits, trained with the cross entropy against
/// one hot labels and evaluated by accuracy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxWithLoss;

impl SoftmaxWithLoss {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for SoftmaxWithLoss {
    fn build(&mut self, scope: &mut LayerScope<'_>, inputs: &[Tensor]) -> Result<LayerOutputs> {
        scope.expect_inputs(inputs, 2)?;
        let (logits, labels) = (inputs[0], inputs[1]);

        let graph = scope.graph();
        let data = graph.softmax(logits)?;
        let loss = graph.softmax_cross_entropy(logits, labels)?;
        let eval = graph.accuracy(data, labels)?;

        Ok(LayerOutputs {
            data,
            loss: Some(loss),
            eval: Some(eval),
        })
    }
}

/// Mean squared error against regression targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss;

impl MseLoss {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for MseLoss {
    fn build(&mut self, scope: &mut LayerScope<'_>, inputs: &[Tensor]) -> Result<LayerOutputs> {
        scope.expect_inputs(inputs, 2)?;
        let (predictions, targets) = (inputs[0], inputs[1]);
        let loss = scope.graph().mse(predictions, targets)?;

        Ok(LayerOutputs {
            data: predictions,
            loss: Some(loss),
            eval: None,
        })
    }
}
