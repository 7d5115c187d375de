mod lr_scheme;
mod optimizer;

pub use lr_scheme::{LearningRateScheduler, LrScheme};
pub use optimizer::{KongFu, KongFuSpec, UpdateRule};
