mod error;
mod graph;
mod init;
mod moving_average;
mod node;
mod operation;
pub mod optimization;
mod session;
mod summary;

pub use error::{GraphErr, Result};
pub use graph::{Acquire, Graph};
pub use init::Init;
pub use moving_average::ExponentialMovingAverage;
pub use node::{CounterId, OpId, ParamId, Shape, Tensor};
pub use session::Feed;
pub use summary::{Summary, SummaryKind};
