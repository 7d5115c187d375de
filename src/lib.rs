pub mod blocks;
pub mod brain;
pub mod builder;
mod context;
pub mod error;
pub mod kid;
pub mod kongfu;
pub mod layers;
pub mod sensors;
pub mod summary;

pub use context::{Context, GLOBAL_STEP};
pub use error::{AkidErr, Result};
