/// Defines the rule for updating a parameter based on its gradient.
///
/// One instance is bound to exactly one parameter, so implementations may keep
/// per-element state (velocities, moments) sized to it.
pub trait Optimizer: Send {
    /// Updates the provided slice of weights using its gradient.
    ///
    /// # Arguments
    /// * `learning_rate` - The rate scheduled for the current step.
    /// * `grad` - The gradient corresponding to the `weights` slice.
    /// * `weights` - A mutable slice of the current parameter values.
    fn update_weights(&mut self, learning_rate: f32, grad: &[f32], weights: &mut [f32]);
}

impl<T: Optimizer + ?Sized> Optimizer for Box<T> {
    fn update_weights(&mut self, learning_rate: f32, grad: &[f32], weights: &mut [f32]) {
        (**self).update_weights(learning_rate, grad, weights)
    }
}
