use std::collections::HashMap;

use graph::{Feed, Shape, Tensor};
use log::debug;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{Sensor, Source, Split};
use crate::{
    AkidErr, Context, Result,
    blocks::{Block, BlockCore, SetupState},
};

/// A sensor feeding batches of an in memory `Source` through placeholders.
///
/// Training batches are drawn from a permutation of the training split that is
/// shuffled again at the start of every epoch, incomplete trailing batches
/// being skipped. Validation batches walk the validation split in order.
///
/// Jokers attached to a split transform its data tensor, in attachment order.
/// The placeholders stay the feed targets.
pub struct FeedSensor {
    core: BlockCore,
    source: Source,
    batch_size: usize,
    val_batch_size: usize,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
    val_cursor: usize,
    epoch: usize,
    tensors: HashMap<Split, (Tensor, Tensor)>,
    jokers: HashMap<Split, Vec<Box<dyn Block>>>,
    outputs: HashMap<Split, Tensor>,
}

impl FeedSensor {
    /// Creates a new `FeedSensor`.
    ///
    /// # Arguments
    /// * `name` - The sensor name.
    /// * `source` - The dataset to draw batches from.
    /// * `batch_size` - The size of training batches.
    /// * `val_batch_size` - The size of validation batches.
    /// * `seed` - The seed of the shuffling, entropy from the OS if `None`.
    ///
    /// # Returns
    /// The sensor, or a configuration error if a batch size is zero.
    pub fn new(
        name: &str,
        source: Source,
        batch_size: usize,
        val_batch_size: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        let core = BlockCore::new(name)?;

        if batch_size == 0 || val_batch_size == 0 {
            return Err(AkidErr::Config(format!("sensor {name} needs non zero batch sizes")).logged());
        }

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut order: Vec<usize> = (0..source.num_examples(Split::Train)).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            core,
            batch_size: batch_size.min(order.len()),
            val_batch_size: val_batch_size.min(source.num_examples(Split::Val)),
            source,
            rng,
            order,
            cursor: 0,
            val_cursor: 0,
            epoch: 0,
            tensors: HashMap::new(),
            jokers: HashMap::new(),
            outputs: HashMap::new(),
        })
    }

    /// Attaches `joker` to the training data, or to the validation data when
    /// `to_val` is set. Takes effect at the next setup.
    pub fn attach<B: Block + 'static>(&mut self, joker: B, to_val: bool) -> &mut Self {
        let split = if to_val { Split::Val } else { Split::Train };
        self.jokers.entry(split).or_default().push(Box::new(joker));
        self
    }

    pub fn jokers(&self, split: Split) -> &[Box<dyn Block>] {
        self.jokers
            .get(&split)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Amount of full passes over the training split started so far, minus one.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn next_indices(&mut self, split: Split) -> Vec<usize> {
        match split {
            Split::Train => {
                if self.cursor + self.batch_size > self.order.len() {
                    self.order.shuffle(&mut self.rng);
                    self.cursor = 0;
                    self.epoch += 1;
                    debug!(sensor = self.core.name(), epoch = self.epoch; "starting a new epoch");
                }

                let indices = self.order[self.cursor..self.cursor + self.batch_size].to_vec();
                self.cursor += self.batch_size;
                indices
            }
            Split::Val => {
                let rows = self.source.num_examples(Split::Val);
                let end = (self.val_cursor + self.val_batch_size).min(rows);
                let indices = (self.val_cursor..end).collect();
                self.val_cursor = if end == rows { 0 } else { end };
                indices
            }
        }
    }
}

impl Block for FeedSensor {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn build(&mut self, ctx: &mut Context, _inputs: &[Tensor]) -> Result<()> {
        let data_shape = Shape::batch(self.source.data_dim());
        let label_shape = Shape::batch(self.source.label_dim());

        for (split, prefix) in [(Split::Train, ""), (Split::Val, "val_")] {
            let data = ctx.graph.placeholder(&format!("{prefix}data"), data_shape);
            let labels = ctx.graph.placeholder(&format!("{prefix}labels"), label_shape);
            self.tensors.insert(split, (data, labels));

            let mut output = data;
            for joker in self.jokers.entry(split).or_default() {
                joker.setup(ctx, &[output])?;
                output = joker.data().ok_or_else(|| AkidErr::NoData {
                    block: joker.name().to_string(),
                })?;
                debug!(
                    sensor = self.core.name(), joker = joker.name(), split:? = split;
                    "attached joker"
                );
            }
            self.outputs.insert(split, output);
        }

        Ok(())
    }

    fn data(&self) -> Option<Tensor> {
        self.data_of(Split::Train)
    }
}

impl Sensor for FeedSensor {
    fn data_of(&self, split: Split) -> Option<Tensor> {
        self.outputs.get(&split).copied()
    }

    fn labels_of(&self, split: Split) -> Option<Tensor> {
        self.tensors.get(&split).map(|&(_, labels)| labels)
    }

    fn fill_feed(&mut self, split: Split) -> Result<Feed> {
        let Some(&(data, labels)) = self.tensors.get(&split) else {
            return Err(AkidErr::InvalidState {
                block: self.core.name().to_string(),
                expected: SetupState::Live.as_str(),
                got: self.core.state().as_str(),
            });
        };

        let indices = self.next_indices(split);
        let (x, y) = self.source.batch(split, &indices);
        Ok(Feed::from([(data, x), (labels, y)]))
    }

    fn num_batches_per_epoch(&self) -> usize {
        (self.order.len() / self.batch_size).max(1)
    }

    fn num_val_batches(&self) -> usize {
        self.source
            .num_examples(Split::Val)
            .div_ceil(self.val_batch_size)
    }
}
