mod feed_sensor;
mod jokers;
mod source;

pub use feed_sensor::FeedSensor;
pub use jokers::RescaleJoker;
pub use source::Source;

use graph::{Feed, Tensor};

use crate::{Result, blocks::Block};

/// Which half of a source a batch is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
}

/// The input block of a network: it exposes data and label tensors for each
/// split and fills them with a new batch before every run.
///
/// A sensor is set up like any other block, with no inputs.
pub trait Sensor: Block {
    /// The data tensor of `split`, after any transformation the sensor
    /// applies, `None` before setup.
    fn data_of(&self, split: Split) -> Option<Tensor>;

    /// The label tensor of `split`, `None` before setup.
    fn labels_of(&self, split: Split) -> Option<Tensor>;

    /// Draws the next batch of `split`.
    ///
    /// # Returns
    /// The values of the data and label tensors of `split`.
    fn fill_feed(&mut self, split: Split) -> Result<Feed>;

    fn num_batches_per_epoch(&self) -> usize;

    /// Amount of batches covering the whole validation split once.
    fn num_val_batches(&self) -> usize;
}
