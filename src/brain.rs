use graph::{ParamId, Tensor};
use log::debug;

use crate::{
    AkidErr, Context, Result,
    blocks::{Block, BlockCore, Processing},
};

/// A network: processing blocks wired one after the other.
///
/// Each block receives the previous block's data and, when given, the labels.
/// The brain's loss is the sum of the losses of its blocks, its evaluation
/// metric the one of the last block producing any.
pub struct Brain {
    core: BlockCore,
    blocks: Vec<Box<dyn Processing>>,
    is_val: bool,
    data: Option<Tensor>,
    loss: Option<Tensor>,
    eval: Option<Tensor>,
}

impl Brain {
    /// Creates a new, empty `Brain`.
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            core: BlockCore::new(name)?,
            blocks: Vec::new(),
            is_val: false,
            data: None,
            loss: None,
            eval: None,
        })
    }

    /// Appends `block` to the end of the network.
    pub fn attach<P: Processing + 'static>(&mut self, block: P) -> &mut Self {
        self.blocks.push(Box::new(block));
        self
    }

    pub fn blocks(&self) -> &[Box<dyn Processing>] {
        &self.blocks
    }

    /// Derives a validation view of the whole network, made of the validation
    /// views of its blocks.
    pub fn get_val_copy(&self) -> Self {
        Self {
            core: self.core.view(),
            blocks: self.blocks.iter().map(|block| block.val_copy()).collect(),
            is_val: true,
            data: None,
            loss: None,
            eval: None,
        }
    }
}

impl Block for Brain {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn build(&mut self, ctx: &mut Context, inputs: &[Tensor]) -> Result<()> {
        let Some(&first) = inputs.first() else {
            return Err(AkidErr::MissingInput {
                block: self.core.name().to_string(),
                expected: 1,
                got: 0,
            });
        };

        let labels = inputs.get(1).copied();
        let mut data = first;
        let mut loss: Option<Tensor> = None;
        let mut eval = None;

        for block in &mut self.blocks {
            let block_inputs: Vec<Tensor> = std::iter::once(data).chain(labels).collect();
            block.setup(ctx, &block_inputs)?;

            data = block.data().ok_or_else(|| AkidErr::NoData {
                block: block.name().to_string(),
            })?;

            if let Some(block_loss) = block.loss() {
                loss = Some(match loss {
                    Some(total) => ctx.graph.add(total, block_loss)?,
                    None => block_loss,
                });
            }

            eval = block.eval().or(eval);
        }

        debug!(
            block = self.core.name(), blocks = self.blocks.len(), has_loss = loss.is_some();
            "wired brain"
        );

        self.data = Some(data);
        self.loss = loss;
        self.eval = eval;
        Ok(())
    }

    fn data(&self) -> Option<Tensor> {
        self.data
    }
}

impl Processing for Brain {
    fn loss(&self) -> Option<Tensor> {
        self.loss
    }

    fn eval(&self) -> Option<Tensor> {
        self.eval
    }

    fn var_list(&self) -> Vec<ParamId> {
        self.blocks.iter().flat_map(|block| block.var_list()).collect()
    }

    fn is_val(&self) -> bool {
        self.is_val
    }

    fn val_copy(&self) -> Box<dyn Processing> {
        Box::new(self.get_val_copy())
    }
}

#[cfg(test)]
mod tests {
    use graph::Shape;

    use super::*;
    use crate::{
        blocks::ProcessingLayer,
        layers::{Activation, InnerProduct, SoftmaxWithLoss},
    };

    fn brain(decay: Option<f32>) -> Brain {
        let mut brain = Brain::new("brain").unwrap();
        brain
            .attach(ProcessingLayer::new("ip1", InnerProduct::new(8), decay).unwrap())
            .attach(ProcessingLayer::new("relu1", Activation::relu(), None).unwrap())
            .attach(ProcessingLayer::new("ip2", InnerProduct::new(3), decay).unwrap())
            .attach(ProcessingLayer::new("loss", SoftmaxWithLoss::new(), None).unwrap());
        brain
    }

    fn inputs(ctx: &mut Context) -> [Tensor; 2] {
        [
            ctx.graph.placeholder("x", Shape::batch(4)),
            ctx.graph.placeholder("y", Shape::batch(3)),
        ]
    }

    #[test]
    fn wires_blocks_in_order() {
        let mut ctx = Context::seeded(42).unwrap();
        let inputs = inputs(&mut ctx);
        let mut brain = brain(None);
        assert_eq!(brain.data(), None);
        assert_eq!(brain.loss(), None);

        brain.setup(&mut ctx, &inputs).unwrap();

        let names: Vec<&str> = brain
            .var_list()
            .into_iter()
            .map(|p| ctx.graph.variable_name(p))
            .collect();
        assert_eq!(
            names,
            [
                "brain/ip1/weights",
                "brain/ip1/biases",
                "brain/ip2/weights",
                "brain/ip2/biases"
            ]
        );
        assert!(brain.loss().is_some());
        assert!(brain.eval().is_some());
        assert_eq!(ctx.graph.shape(brain.data().unwrap()), Shape::batch(3));
    }

    #[test]
    fn val_copy_reuses_every_parameter() {
        let mut ctx = Context::seeded(42).unwrap();
        let [x, y] = inputs(&mut ctx);
        let mut brain = brain(Some(0.9));
        brain.setup(&mut ctx, &[x, y]).unwrap();

        let mut val = brain.get_val_copy();
        assert!(val.is_val());
        assert!(!brain.is_val());

        let [val_x, val_y] = inputs(&mut ctx);
        val.setup(&mut ctx, &[val_x, val_y]).unwrap();

        assert_eq!(val.var_list(), brain.var_list());
        assert!(val.loss().is_some());
        assert_ne!(val.loss(), brain.loss());
    }

    #[test]
    fn missing_input_fails() {
        let mut ctx = Context::seeded(0).unwrap();
        let mut brain = brain(None);
        assert!(matches!(
            brain.setup(&mut ctx, &[]),
            Err(AkidErr::MissingInput { .. })
        ));
        assert_eq!(ctx.graph.scope(), "");
    }
}
