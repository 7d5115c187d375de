use graph::{
    Feed, OpId, ParamId, SummaryKind, Tensor,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
};
use log::info;
use serde::{Deserialize, Serialize};

use super::{LearningRateScheduler, LrScheme};
use crate::{
    AkidErr, Context, Result,
    blocks::{Block, BlockCore},
    summary::TRAIN_SUMMARIES,
};

/// The base update rule applied to every parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRule {
    GradientDescent,
    Momentum { momentum: f32 },
    Adam { beta1: f32, beta2: f32, epsilon: f32 },
}

impl UpdateRule {
    pub fn momentum() -> Self {
        UpdateRule::Momentum { momentum: 0.9 }
    }

    pub fn adam() -> Self {
        UpdateRule::Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }

    /// A fresh optimizer for a parameter of `len` elements.
    fn optimizer(&self, len: usize) -> Box<dyn Optimizer> {
        match *self {
            UpdateRule::GradientDescent => Box::new(GradientDescent::new()),
            UpdateRule::Momentum { momentum } => {
                Box::new(GradientDescentWithMomentum::new(len, momentum))
            }
            UpdateRule::Adam {
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(len, beta1, beta2, epsilon)),
        }
    }
}

/// The specification for the `KongFu` struct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KongFuSpec {
    pub rule: UpdateRule,
    #[serde(default)]
    pub lr_scheme: LrScheme,
}

/// The optimizer: minimizes a loss with respect to a list of parameters,
/// scaling a base update rule by a scheduled learning rate.
///
/// Set up with the loss as its only input once `minimize` was given the
/// parameters. The update operation is built once and incrementing the global
/// step is part of it.
pub struct KongFu {
    core: BlockCore,
    rule: UpdateRule,
    scheduler: LearningRateScheduler,
    var_list: Vec<ParamId>,
    train_op: Option<OpId>,
}

impl KongFu {
    /// Creates a new `KongFu`.
    ///
    /// # Arguments
    /// * `name` - The block name.
    /// * `spec` - The update rule and learning rate scheme.
    pub fn new(name: &str, spec: KongFuSpec) -> Result<Self> {
        Ok(Self {
            core: BlockCore::new(name)?,
            rule: spec.rule,
            scheduler: LearningRateScheduler::new(spec.lr_scheme),
            var_list: Vec::new(),
            train_op: None,
        })
    }

    pub fn gradient_descent(lr_scheme: LrScheme) -> Result<Self> {
        Self::with_rule(UpdateRule::GradientDescent, lr_scheme)
    }

    /// Momentum with the customary `0.9`.
    pub fn momentum(lr_scheme: LrScheme) -> Result<Self> {
        Self::with_rule(UpdateRule::momentum(), lr_scheme)
    }

    pub fn adam(lr_scheme: LrScheme) -> Result<Self> {
        Self::with_rule(UpdateRule::adam(), lr_scheme)
    }

    fn with_rule(rule: UpdateRule, lr_scheme: LrScheme) -> Result<Self> {
        Self::new("kongfu", KongFuSpec { rule, lr_scheme })
    }

    pub fn rule(&self) -> UpdateRule {
        self.rule
    }

    pub fn scheduler(&self) -> &LearningRateScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut LearningRateScheduler {
        &mut self.scheduler
    }

    /// The rate last assigned under the placeholder scheme.
    pub fn lr_value(&self) -> Option<f32> {
        self.scheduler.lr_value()
    }

    /// Assigns the rate used from the next step on under the placeholder scheme.
    pub fn set_lr_value(&mut self, lr_value: f32) {
        self.scheduler.set_lr_value(lr_value);
    }

    /// The scalar learning rate tensor, `None` before setup.
    pub fn learning_rate(&self) -> Option<Tensor> {
        self.scheduler.learning_rate()
    }

    /// The update operation, `None` before setup.
    pub fn train_op(&self) -> Option<OpId> {
        self.train_op
    }

    /// Builds the update operation minimizing `loss` with respect to `var_list`.
    ///
    /// # Arguments
    /// * `ctx` - The context to build into.
    /// * `loss` - A scalar tensor.
    /// * `var_list` - The parameters to update.
    ///
    /// # Returns
    /// The update operation, or an error if this optimizer was already set up
    /// or its learning rate scheme is invalid.
    pub fn minimize(&mut self, ctx: &mut Context, loss: Tensor, var_list: &[ParamId]) -> Result<OpId> {
        if self.train_op.is_some() {
            return Err(AkidErr::InvalidState {
                block: self.core.name().to_string(),
                expected: "pending",
                got: self.core.state().as_str(),
            });
        }

        self.var_list = var_list.to_vec();
        self.setup(ctx, &[loss])?;

        self.train_op.ok_or_else(|| AkidErr::NoData {
            block: self.core.name().to_string(),
        })
    }

    /// Feeds whatever the learning rate needs for the next run.
    pub fn fill_feed(&self, feed: &mut Feed) {
        self.scheduler.fill_feed(feed);
    }
}

impl Block for KongFu {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn build(&mut self, ctx: &mut Context, inputs: &[Tensor]) -> Result<()> {
        let Some(&loss) = inputs.first() else {
            return Err(AkidErr::MissingInput {
                block: self.core.name().to_string(),
                expected: 1,
                got: 0,
            });
        };

        let learning_rate = self.scheduler.build(ctx, self.core.name())?;
        let rule = self.rule;
        let step = ctx.global_step();
        let train_op = ctx.graph.minimize(loss, &self.var_list, learning_rate, step, |len| {
            rule.optimizer(len)
        })?;

        info!(
            block = self.core.name(), variables = self.var_list.len();
            "built update operation with {rule:?} and {:?}", self.scheduler.scheme()
        );

        self.train_op = Some(train_op);
        Ok(())
    }

    fn post_setup(&mut self, ctx: &mut Context) -> Result<()> {
        if let (true, Some(lr)) = (self.core.do_summary, self.learning_rate()) {
            ctx.graph
                .add_summary("learning_rate", lr, SummaryKind::Scalar, TRAIN_SUMMARIES);
        }

        Ok(())
    }

    /// The learning rate.
    fn data(&self) -> Option<Tensor> {
        self.learning_rate()
    }
}

#[cfg(test)]
mod tests {
    use graph::{Acquire, Init, Shape};
    use ndarray::array;

    use super::*;

    fn problem(ctx: &mut Context) -> (Tensor, Tensor, Tensor, ParamId) {
        let x = ctx.graph.placeholder("x", Shape::batch(1));
        let y = ctx.graph.placeholder("y", Shape::batch(1));
        let w = ctx
            .graph
            .get_variable("w", (1, 1), Init::Const(0.), Acquire::Create)
            .unwrap();
        let read = ctx.graph.read(w);
        let pred = ctx.graph.matmul(x, read).unwrap();
        let loss = ctx.graph.mse(pred, y).unwrap();
        (x, y, loss, w)
    }

    #[test]
    fn parses_spec() {
        let spec: KongFuSpec = serde_json::from_str(
            r#"{"rule": {"momentum": {"momentum": 0.5}}, "lr_scheme": {"name": "placeholder"}}"#,
        )
        .unwrap();
        assert_eq!(spec.rule, UpdateRule::Momentum { momentum: 0.5 });
        assert_eq!(spec.lr_scheme, LrScheme::Placeholder);

        let spec: KongFuSpec = serde_json::from_str(r#"{"rule": "gradient_descent"}"#).unwrap();
        assert_eq!(spec.lr_scheme, LrScheme::default());
    }

    #[test]
    fn shorthands_pick_their_rule() {
        let scheme = LrScheme::default();
        assert_eq!(
            KongFu::gradient_descent(scheme).unwrap().rule(),
            UpdateRule::GradientDescent
        );
        assert_eq!(
            KongFu::momentum(scheme).unwrap().rule(),
            UpdateRule::Momentum { momentum: 0.9 }
        );
        assert_eq!(KongFu::adam(scheme).unwrap().rule(), UpdateRule::adam());
    }

    #[test]
    fn each_update_advances_the_global_step_once() {
        for rule in [UpdateRule::GradientDescent, UpdateRule::momentum(), UpdateRule::adam()] {
            let mut ctx = Context::seeded(0).unwrap();
            let (x, y, loss, w) = problem(&mut ctx);
            let scheme = LrScheme::ExpDecay {
                base_lr: 0.05,
                decay_rate: 1.,
                num_batches_per_epoch: Some(1),
                decay_epoch_num: 1,
            };
            let mut kongfu = KongFu::new("kongfu", KongFuSpec { rule, lr_scheme: scheme }).unwrap();
            assert_eq!(kongfu.rule(), rule);
            let train_op = kongfu.minimize(&mut ctx, loss, &[w]).unwrap();

            let feed = Feed::from([(x, array![[1.]]), (y, array![[1.]])]);
            for _ in 0..3 {
                ctx.graph.run(&[], &[train_op], &feed).unwrap();
            }

            assert_eq!(ctx.step(), 3);
            assert!(ctx.graph.variable_value(w)[[0, 0]] > 0.);
        }
    }

    #[test]
    fn minimize_twice_fails() {
        let mut ctx = Context::seeded(0).unwrap();
        let (_, _, loss, w) = problem(&mut ctx);
        let mut kongfu = KongFu::gradient_descent(LrScheme::Placeholder).unwrap();

        kongfu.minimize(&mut ctx, loss, &[w]).unwrap();
        assert!(matches!(
            kongfu.minimize(&mut ctx, loss, &[w]),
            Err(AkidErr::InvalidState { .. })
        ));
    }

    #[test]
    fn learning_rate_reads_back() {
        let mut ctx = Context::seeded(0).unwrap();
        let (x, y, loss, w) = problem(&mut ctx);
        let mut kongfu = KongFu::momentum(LrScheme::Placeholder).unwrap();
        let train_op = kongfu.minimize(&mut ctx, loss, &[w]).unwrap();
        let lr = kongfu.learning_rate().unwrap();
        assert_eq!(ctx.graph.name(lr), "kongfu/learning_rate");

        kongfu.set_lr_value(0.25);
        let mut feed = Feed::from([(x, array![[1.]]), (y, array![[1.]])]);
        kongfu.fill_feed(&mut feed);

        let out = ctx.graph.run(&[lr], &[train_op], &feed).unwrap();
        assert_eq!(out[0][[0, 0]], 0.25);
        assert_eq!(ctx.step(), 1);
    }
}
