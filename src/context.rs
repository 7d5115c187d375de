use graph::{CounterId, Graph};

use crate::Result;

pub const GLOBAL_STEP: &str = "global_step";

/// Everything blocks build into: the computation graph and the global step
/// counter shared by the optimizer and the moving averages.
pub struct Context {
    pub graph: Graph,
    global_step: CounterId,
}

impl Context {
    /// Creates a new `Context` around `graph`, registering its global step.
    ///
    /// # Arguments
    /// * `graph` - An empty graph.
    ///
    /// # Returns
    /// The context, or an error if `graph` already holds a global step.
    pub fn new(mut graph: Graph) -> Result<Self> {
        let global_step = graph.create_counter(GLOBAL_STEP)?;
        Ok(Self { graph, global_step })
    }

    /// A context whose parameter initialization is deterministic.
    pub fn seeded(seed: u64) -> Result<Self> {
        Self::new(Graph::seeded(seed))
    }

    pub fn global_step(&self) -> CounterId {
        self.global_step
    }

    /// Amount of optimizer updates executed so far.
    pub fn step(&self) -> u64 {
        self.graph.counter_value(self.global_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_step_zero() {
        let ctx = Context::seeded(0).unwrap();
        assert_eq!(ctx.step(), 0);
        assert_eq!(ctx.graph.counter(GLOBAL_STEP), Some(ctx.global_step()));
    }
}
