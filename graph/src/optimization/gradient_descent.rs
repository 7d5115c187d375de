use super::Optimizer;

/// Plain gradient descent.
#[derive(Debug, Default)]
pub struct GradientDescent;

impl GradientDescent {
    pub fn new() -> Self {
        Self
    }
}

impl Optimizer for GradientDescent {
    fn update_weights(&mut self, learning_rate: f32, grad: &[f32], weights: &mut [f32]) {
        for (w, g) in weights.iter_mut().zip(grad) {
            *w -= learning_rate * g;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_against_the_gradient() {
        let mut weights = [1.0, 2.0];
        GradientDescent::new().update_weights(0.5, &[1.0, -2.0], &mut weights);
        assert_eq!(weights, [0.5, 3.0]);
    }
}
