use graph::Tensor;
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    blocks::{Layer, LayerOutputs, LayerScope},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActFn {
    Relu,
    Sigmoid,
}

/// An element wise non linearity. Owns no parameters.
#[derive(Debug, Clone, Copy)]
pub struct Activation {
    act_fn: ActFn,
}

impl Activation {
    pub fn new(act_fn: ActFn) -> Self {
        Self { act_fn }
    }

    pub fn relu() -> Self {
        Self::new(ActFn::Relu)
    }

    pub fn sigmoid() -> Self {
        Self::new(ActFn::Sigmoid)
    }
}

impl Layer for Activation {
    fn build(&mut self, scope: &mut LayerScope<'_>, inputs: &[Tensor]) -> Result<LayerOutputs> {
        scope.expect_inputs(inputs, 1)?;

        let graph = scope.graph();
        let data = match self.act_fn {
            ActFn::Relu => graph.relu(inputs[0])?,
            ActFn::Sigmoid => graph.sigmoid(inputs[0])?,
        };

        Ok(LayerOutputs::data(data))
    }
}
