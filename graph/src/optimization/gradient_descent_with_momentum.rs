use super::Optimizer;

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    momentum: f32,
    velocity: Box<[f32]>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    pub fn new(len: usize, momentum: f32) -> Self {
        Self {
            momentum,
            velocity: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update_weights(&mut self, learning_rate: f32, grad: &[f32], weights: &mut [f32]) {
        let mu = self.momentum;

        weights
            .iter_mut()
            .zip(grad)
            .zip(self.velocity.iter_mut())
            .for_each(|((w, g), v)| {
                *v = (mu * *v) + g;
                *w -= learning_rate * *v;
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn velocity_accumulates() {
        let mut optimizer = GradientDescentWithMomentum::new(1, 0.9);
        let mut weights = [0.0];

        optimizer.update_weights(1.0, &[1.0], &mut weights);
        assert_eq!(weights, [-1.0]);

        optimizer.update_weights(1.0, &[1.0], &mut weights);
        assert!((weights[0] + 2.9).abs() < 1e-6);
    }
}
