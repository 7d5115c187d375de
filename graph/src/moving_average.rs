use std::collections::HashMap;

use crate::{
    Graph, GraphErr, Result,
    node::{CounterId, OpId, ParamId},
    operation::Operation,
};

/// Maintains exponentially smoothed shadow copies of parameters.
///
/// Every execution of the operation returned by `apply` updates each shadow as
/// `shadow -= (1 - decay) * (shadow - variable)`. When bound to a counter, the
/// effective decay is `min(decay, (1 + n) / (10 + n))` so that averages warm up
/// quickly at the start of training.
#[derive(Debug, Clone)]
pub struct ExponentialMovingAverage {
    decay: f32,
    num_updates: Option<CounterId>,
    averages: HashMap<ParamId, ParamId>,
}

impl ExponentialMovingAverage {
    /// Creates a new `ExponentialMovingAverage`.
    ///
    /// # Arguments
    /// * `decay` - The smoothing factor.
    /// * `num_updates` - An optional counter moderating the decay.
    pub fn new(decay: f32, num_updates: Option<CounterId>) -> Self {
        Self {
            decay,
            num_updates,
            averages: HashMap::new(),
        }
    }

    pub fn decay(&self) -> f32 {
        self.decay
    }

    /// Creates one shadow per parameter, initialized to the parameter's value,
    /// and the operation that updates them.
    ///
    /// # Arguments
    /// * `graph` - The graph the parameters live in.
    /// * `params` - The parameters to track.
    ///
    /// # Returns
    /// The update operation, or an error if a parameter is already tracked.
    pub fn apply(&mut self, graph: &mut Graph, params: &[ParamId]) -> Result<OpId> {
        let mut pairs = Vec::with_capacity(params.len());

        for &param in params {
            let name = format!("{}/ExponentialMovingAverage", graph.variable_name(param));
            if self.averages.contains_key(&param) || graph.param_exists(&name) {
                return Err(GraphErr::VariableExists { name });
            }

            let value = graph.variable_value(param).clone();
            let shadow = graph.insert_param(name, value);
            self.averages.insert(param, shadow);
            pairs.push((param, shadow));
        }

        Ok(graph.push_op(Operation::MovingAverage {
            decay: self.decay,
            num_updates: self.num_updates,
            pairs,
        }))
    }

    /// The shadow of `param`, if it is tracked.
    pub fn average(&self, param: ParamId) -> Option<ParamId> {
        self.averages.get(&param).copied()
    }
}

/// The decay actually applied given the amount of updates seen so far.
pub(crate) fn effective_decay(decay: f32, num_updates: Option<u64>) -> f32 {
    match num_updates {
        Some(n) => decay.min((1. + n as f32) / (10. + n as f32)),
        None => decay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Acquire, Init};

    #[test]
    fn warm_up_decay() {
        assert_eq!(effective_decay(0.99, None), 0.99);
        assert!((effective_decay(0.99, Some(0)) - 0.1).abs() < 1e-6);
        assert_eq!(effective_decay(0.99, Some(1_000_000)), 0.99);
    }

    #[test]
    fn shadows_start_at_the_variable_value() {
        let mut graph = Graph::seeded(0);
        let w = graph
            .get_variable("w", (1, 2), Init::Const(3.), Acquire::Create)
            .unwrap();

        let mut ema = ExponentialMovingAverage::new(0.9, None);
        ema.apply(&mut graph, &[w]).unwrap();

        let shadow = ema.average(w).unwrap();
        assert_ne!(shadow, w);
        assert_eq!(graph.variable_name(shadow), "w/ExponentialMovingAverage");
        assert_eq!(graph.variable_value(shadow), graph.variable_value(w));
    }

    #[test]
    fn apply_twice_fails() {
        let mut graph = Graph::seeded(0);
        let w = graph
            .get_variable("w", (1, 1), Init::Const(0.), Acquire::Create)
            .unwrap();

        let mut ema = ExponentialMovingAverage::new(0.9, None);
        ema.apply(&mut graph, &[w]).unwrap();
        assert!(ema.apply(&mut graph, &[w]).is_err());
    }
}
