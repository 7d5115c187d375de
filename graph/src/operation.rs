use crate::{
    node::{CounterId, ParamId, Tensor},
    optimization::Optimizer,
};

/// A side-effecting operation, executed at most once per `run`.
pub(crate) enum Operation {
    Update {
        loss: Tensor,
        learning_rate: Tensor,
        step: CounterId,
        slots: Vec<(ParamId, Box<dyn Optimizer>)>,
    },
    MovingAverage {
        decay: f32,
        num_updates: Option<CounterId>,
        /// (variable, shadow) pairs.
        pairs: Vec<(ParamId, ParamId)>,
    },
}
