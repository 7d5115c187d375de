use ndarray::{Array2, Axis};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use super::Split;
use crate::{AkidErr, Result};

/// An in memory dataset: data and label rows for training and validation.
#[derive(Debug, Clone)]
pub struct Source {
    train: (Array2<f32>, Array2<f32>),
    val: (Array2<f32>, Array2<f32>),
}

impl Source {
    /// Creates a new `Source`.
    ///
    /// # Arguments
    /// * `train` - The training data and labels, one example per row.
    /// * `val` - The validation data and labels, one example per row.
    ///
    /// # Returns
    /// The source, or an error if a split is empty, its data and labels
    /// disagree on the amount of rows or both splits disagree on the amount
    /// of columns.
    pub fn new(train: (Array2<f32>, Array2<f32>), val: (Array2<f32>, Array2<f32>)) -> Result<Self> {
        for (what, (x, y)) in [("train", &train), ("val", &val)] {
            if x.nrows() == 0 || x.nrows() != y.nrows() {
                return Err(AkidErr::Config(format!(
                    "the {what} split has {} data rows and {} label rows",
                    x.nrows(),
                    y.nrows()
                )));
            }
        }

        if train.0.ncols() != val.0.ncols() || train.1.ncols() != val.1.ncols() {
            return Err(AkidErr::Config(
                "the train and val splits have different widths".to_string(),
            ));
        }

        Ok(Self { train, val })
    }

    /// Samples a classification problem made of gaussian blobs, one per class,
    /// with one hot labels.
    ///
    /// # Arguments
    /// * `num_classes` - The amount of classes.
    /// * `dim` - The width of each example.
    /// * `num_train` - The amount of training examples.
    /// * `num_val` - The amount of validation examples.
    /// * `seed` - The seed of the sampling.
    pub fn gaussian_blobs(
        num_classes: usize,
        dim: usize,
        num_train: usize,
        num_val: usize,
        seed: u64,
    ) -> Result<Self> {
        if num_classes == 0 {
            return Err(AkidErr::Config("a source needs at least one class".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let spread = Normal::<f32>::new(0., 3.).map_err(|e| AkidErr::Config(e.to_string()))?;
        let noise = Normal::<f32>::new(0., 1.).map_err(|e| AkidErr::Config(e.to_string()))?;

        let centers = Array2::from_shape_fn((num_classes, dim), |_| {
            spread.sample(&mut rng)
        });

        let mut sample = |rows: usize| {
            let x = Array2::from_shape_fn((rows, dim), |(i, j)| {
                centers[[i % num_classes, j]] + noise.sample(&mut rng)
            });
            let y = Array2::from_shape_fn((rows, num_classes), |(i, k)| {
                if i % num_classes == k { 1. } else { 0. }
            });
            (x, y)
        };

        let train = sample(num_train);
        let val = sample(num_val);
        Self::new(train, val)
    }

    /// The data and labels of `split`.
    pub fn split(&self, split: Split) -> (&Array2<f32>, &Array2<f32>) {
        let (x, y) = match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
        };

        (x, y)
    }

    pub fn num_examples(&self, split: Split) -> usize {
        self.split(split).0.nrows()
    }

    pub fn data_dim(&self) -> usize {
        self.train.0.ncols()
    }

    pub fn label_dim(&self) -> usize {
        self.train.1.ncols()
    }

    /// The rows `indices` of `split`.
    pub fn batch(&self, split: Split, indices: &[usize]) -> (Array2<f32>, Array2<f32>) {
        let (x, y) = self.split(split);
        (x.select(Axis(0), indices), y.select(Axis(0), indices))
    }
}
