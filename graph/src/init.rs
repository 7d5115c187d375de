use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::{GraphErr, Result};

/// Describes how the initial value of a parameter is sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Init {
    Const(f32),
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    /// A normal distribution whose samples further than two standard deviations
    /// from the mean are redrawn.
    TruncatedNormal { mean: f32, std_dev: f32 },
    XavierUniform,
}

impl Init {
    /// Samples an `(rows, cols)` array following this initializer.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `dim` - The shape of the parameter, `cols` being the fan out.
    ///
    /// # Returns
    /// An error if the distribution parameters are invalid.
    pub fn sample<R: Rng>(&self, rng: &mut R, dim: (usize, usize)) -> Result<Array2<f32>> {
        let n = dim.0 * dim.1;

        let values = match *self {
            Init::Const(value) => vec![value; n],
            Init::Uniform { low, high } => sample_n(rng, Uniform::new(low, high)?, n),
            Init::Normal { mean, std_dev } => sample_n(rng, Normal::new(mean, std_dev)?, n),
            Init::TruncatedNormal { mean, std_dev } => {
                let normal = Normal::new(mean, std_dev)?;
                let bound = 2. * std_dev;
                (0..n)
                    .map(|_| loop {
                        let x: f32 = normal.sample(rng);
                        if (x - mean).abs() <= bound {
                            break x;
                        }
                    })
                    .collect()
            }
            Init::XavierUniform => {
                let (fan_in, fan_out) = dim;
                let range = (6. / (fan_in + fan_out).max(1) as f32).sqrt();
                sample_n(rng, Uniform::new_inclusive(-range, range)?, n)
            }
        };

        Array2::from_shape_vec(dim, values).map_err(|e| GraphErr::InvalidInit(e.to_string()))
    }
}

fn sample_n<R: Rng, D: Distribution<f32>>(rng: &mut R, distribution: D, n: usize) -> Vec<f32> {
    (0..n).map(|_| distribution.sample(rng)).collect()
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn constant() {
        let mut rng = StdRng::seed_from_u64(42);
        let value = Init::Const(0.5).sample(&mut rng, (2, 3)).unwrap();
        assert_eq!(value.dim(), (2, 3));
        assert!(value.iter().all(|&x| x == 0.5));
    }

    #[test]
    fn truncated_normal_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        let init = Init::TruncatedNormal {
            mean: 0.,
            std_dev: 0.1,
        };
        let value = init.sample(&mut rng, (20, 20)).unwrap();
        assert!(value.iter().all(|x| x.abs() <= 0.2));
    }

    #[test]
    fn xavier_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let value = Init::XavierUniform.sample(&mut rng, (4, 2)).unwrap();
        let range = 1.0f32;
        assert!(value.iter().all(|x| x.abs() <= range));
    }

    #[test]
    fn invalid_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let init = Init::Uniform { low: 1., high: 0. };
        assert!(matches!(
            init.sample(&mut rng, (1, 1)),
            Err(GraphErr::InvalidInit(_))
        ));
    }
}
