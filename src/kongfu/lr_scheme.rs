use graph::{Feed, Shape, Tensor};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AkidErr, Context, Result};

fn default_decay_epoch_num() -> usize {
    1
}

/// How the learning rate evolves with the global step.
///
/// Deserialized from objects tagged by `name`, for instance
/// `{"name": "exp_decay", "base_lr": 0.01, "decay_rate": 0.95}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum LrScheme {
    /// The rate is whatever was last assigned from outside, typically by a hook.
    Placeholder,
    /// `base_lr * decay_rate ^ floor(step / (num_batches_per_epoch * decay_epoch_num))`.
    ExpDecay {
        base_lr: f32,
        decay_rate: f32,
        /// Taken from the sensor when omitted.
        #[serde(default)]
        num_batches_per_epoch: Option<usize>,
        #[serde(default = "default_decay_epoch_num")]
        decay_epoch_num: usize,
    },
}

impl Default for LrScheme {
    fn default() -> Self {
        LrScheme::ExpDecay {
            base_lr: 0.01,
            decay_rate: 0.95,
            num_batches_per_epoch: None,
            decay_epoch_num: 1,
        }
    }
}

impl LrScheme {
    /// Parses a scheme from its JSON form.
    ///
    /// # Returns
    /// The scheme, or a configuration error naming the problem, unknown scheme
    /// names included.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| AkidErr::from(e).logged())
    }

    /// The amount of steps between two decays, `None` for schemes that do not
    /// decay, whose period is not known yet or does not fit in a `u64`.
    pub fn decay_period(&self) -> Option<u64> {
        match *self {
            LrScheme::Placeholder => None,
            LrScheme::ExpDecay {
                num_batches_per_epoch,
                decay_epoch_num,
                ..
            } => num_batches_per_epoch
                .and_then(|n| n.checked_mul(decay_epoch_num))
                .and_then(|period| u64::try_from(period).ok()),
        }
    }

    /// Checks the scheme can produce a rate.
    ///
    /// # Arguments
    /// * `block` - The block the scheme belongs to, for error reporting.
    pub fn validate(&self, block: &str) -> Result<()> {
        let LrScheme::ExpDecay {
            base_lr,
            decay_rate,
            num_batches_per_epoch,
            decay_epoch_num,
        } = *self
        else {
            return Ok(());
        };

        let reason = if base_lr <= 0. {
            Some(format!("base_lr should be positive, got {base_lr}"))
        } else if !(decay_rate > 0. && decay_rate <= 1.) {
            Some(format!("decay_rate should be in (0, 1], got {decay_rate}"))
        } else {
            match (num_batches_per_epoch, self.decay_period()) {
                (None, _) => Some("num_batches_per_epoch is unknown".to_string()),
                (Some(n), None) => Some(format!(
                    "the decay period of {n} batches times {decay_epoch_num} epochs overflows"
                )),
                (_, Some(0)) => Some("the decay period is zero steps".to_string()),
                (_, Some(_)) => None,
            }
        };

        match reason {
            Some(reason) => Err(AkidErr::InvalidLrScheme {
                block: block.to_string(),
                reason,
            }
            .logged()),
            None => Ok(()),
        }
    }
}

/// Computes the learning rate of every step following a `LrScheme`.
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    scheme: LrScheme,
    lr_value: Option<f32>,
    learning_rate: Option<Tensor>,
}

impl LearningRateScheduler {
    pub fn new(scheme: LrScheme) -> Self {
        Self {
            scheme,
            lr_value: None,
            learning_rate: None,
        }
    }

    pub fn scheme(&self) -> &LrScheme {
        &self.scheme
    }

    /// Fills the epoch length of an exponential decay that left it out.
    pub fn fill_num_batches_per_epoch(&mut self, n: usize) {
        if let LrScheme::ExpDecay {
            num_batches_per_epoch,
            ..
        } = &mut self.scheme
        {
            num_batches_per_epoch.get_or_insert(n);
        }
    }

    /// The rate last assigned under the placeholder scheme.
    pub fn lr_value(&self) -> Option<f32> {
        self.lr_value
    }

    pub fn set_lr_value(&mut self, lr_value: f32) {
        self.lr_value = Some(lr_value);
    }

    /// The rate in use at `step`, computed outside the graph.
    ///
    /// # Returns
    /// `None` under the placeholder scheme before any assignment, or when the
    /// decay period is unknown.
    pub fn current_rate(&self, step: u64) -> Option<f32> {
        match self.scheme {
            LrScheme::Placeholder => self.lr_value,
            LrScheme::ExpDecay {
                base_lr,
                decay_rate,
                ..
            } => {
                let period = self.scheme.decay_period().filter(|&p| p > 0)?;
                let exponent = i32::try_from(step / period).unwrap_or(i32::MAX);
                Some(base_lr * decay_rate.powi(exponent))
            }
        }
    }

    /// The scalar learning rate tensor, `None` before `build`.
    pub fn learning_rate(&self) -> Option<Tensor> {
        self.learning_rate
    }

    /// Builds the learning rate tensor bound to the global step.
    ///
    /// # Arguments
    /// * `ctx` - The context to build into.
    /// * `block` - The owning block, for error reporting.
    ///
    /// # Returns
    /// The tensor, or a configuration error if the scheme is invalid.
    pub fn build(&mut self, ctx: &mut Context, block: &str) -> Result<Tensor> {
        self.scheme.validate(block)?;

        let tensor = match self.scheme {
            LrScheme::Placeholder => ctx.graph.placeholder("learning_rate", Shape::scalar()),
            LrScheme::ExpDecay {
                base_lr,
                decay_rate,
                ..
            } => {
                let period = self.scheme.decay_period().unwrap_or(1);
                ctx.graph
                    .exponential_decay(ctx.global_step(), base_lr, decay_rate, period)
            }
        };

        self.learning_rate = Some(tensor);
        Ok(tensor)
    }

    /// Feeds the externally assigned rate under the placeholder scheme.
    pub fn fill_feed(&self, feed: &mut Feed) {
        if let (LrScheme::Placeholder, Some(tensor), Some(lr)) =
            (self.scheme, self.learning_rate, self.lr_value)
        {
            feed.insert(tensor, Array2::from_elem((1, 1), lr));
        }
    }
}
