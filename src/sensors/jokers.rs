use graph::Tensor;

use crate::{
    AkidErr, Context, Result,
    blocks::{Block, BlockCore},
};

/// A joker rescaling the data it is attached to: `x * scale + offset`.
#[derive(Debug, Clone)]
pub struct RescaleJoker {
    core: BlockCore,
    scale: f32,
    offset: f32,
    data: Option<Tensor>,
}

impl RescaleJoker {
    /// Creates a new `RescaleJoker`.
    ///
    /// # Arguments
    /// * `name` - The joker name.
    /// * `scale` - The factor every value is multiplied by.
    /// * `offset` - The amount added after scaling.
    pub fn new(name: &str, scale: f32, offset: f32) -> Result<Self> {
        Ok(Self {
            core: BlockCore::new(name)?,
            scale,
            offset,
            data: None,
        })
    }

    /// A joker mapping the interval `from` linearly onto `to`, for instance
    /// pixels from `(0, 255)` to `(0, 1)`.
    ///
    /// # Returns
    /// The joker, or a configuration error if `from` is empty.
    pub fn from_range(name: &str, from: (f32, f32), to: (f32, f32)) -> Result<Self> {
        let width = from.1 - from.0;
        if width == 0. || !width.is_finite() {
            return Err(AkidErr::Config(format!(
                "joker {name} cannot rescale from [{}, {}]",
                from.0, from.1
            ))
            .logged());
        }

        let scale = (to.1 - to.0) / width;
        Self::new(name, scale, to.0 - from.0 * scale)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }
}

impl Block for RescaleJoker {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn build(&mut self, ctx: &mut Context, inputs: &[Tensor]) -> Result<()> {
        let Some(&x) = inputs.first() else {
            return Err(AkidErr::MissingInput {
                block: self.core.name().to_string(),
                expected: 1,
                got: 0,
            });
        };

        self.data = Some(ctx.graph.rescale(x, self.scale, self.offset)?);
        Ok(())
    }

    fn data(&self) -> Option<Tensor> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use graph::{Feed, Shape};
    use ndarray::array;

    use super::*;

    #[test]
    fn maps_one_range_onto_another() {
        let joker = RescaleJoker::from_range("rescale", (0., 255.), (-1., 1.)).unwrap();
        assert!((joker.scale() - 2. / 255.).abs() < 1e-7);
        assert_eq!(joker.offset(), -1.);

        assert!(matches!(
            RescaleJoker::from_range("rescale", (3., 3.), (0., 1.)),
            Err(AkidErr::Config(_))
        ));
    }

    #[test]
    fn rescales_its_input() {
        let mut ctx = Context::seeded(0).unwrap();
        let x = ctx.graph.placeholder("x", Shape::batch(2));
        let mut joker = RescaleJoker::from_range("rescale", (0., 255.), (0., 1.)).unwrap();

        assert!(matches!(
            joker.setup(&mut ctx, &[]),
            Err(AkidErr::MissingInput { .. })
        ));
        joker.setup(&mut ctx, &[x]).unwrap();

        let data = joker.data().unwrap();
        assert_eq!(ctx.graph.name(data), "rescale/Rescale");

        let feed = Feed::from([(x, array![[0., 255.], [51., 102.]])]);
        let out = ctx.graph.run(&[data], &[], &feed).unwrap();
        for (got, want) in out[0].iter().zip([0., 1., 0.2, 0.4]) {
            assert!((got - want).abs() < 1e-6);
        }
    }
}
