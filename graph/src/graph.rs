use std::collections::HashMap;

use log::debug;
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    GraphErr, Init, Result,
    node::{CounterId, Node, NodeEntry, OpId, ParamId, Shape, Tensor},
    operation::Operation,
    optimization::Optimizer,
    summary::{Summary, SummaryKind},
};

/// How a parameter acquisition resolves its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Allocates a new parameter, failing if the name is already taken.
    Create,
    /// Looks up an existing parameter, failing if there is none.
    Reuse,
}

#[derive(Debug)]
pub(crate) struct Param {
    pub name: String,
    pub shape: Shape,
    pub value: Array2<f32>,
}

#[derive(Debug)]
pub(crate) struct Counter {
    pub name: String,
    pub value: u64,
}

/// A computation graph: named parameter slots, counters, pure nodes built on
/// top of them and side-effecting operations, all evaluated through `run`.
pub struct Graph {
    pub(crate) nodes: Vec<NodeEntry>,
    pub(crate) params: Vec<Param>,
    pub(crate) counters: Vec<Counter>,
    pub(crate) ops: Vec<Option<Operation>>,
    pub(crate) summaries: Vec<Summary>,
    param_names: HashMap<String, ParamId>,
    node_names: HashMap<String, usize>,
    scopes: Vec<String>,
    rng: StdRng,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph whose initializers draw from the OS entropy source.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Creates an empty graph whose initializers are deterministic.
    ///
    /// # Arguments
    /// * `seed` - The seed of the graph level random number generator.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            nodes: Vec::new(),
            params: Vec::new(),
            counters: Vec::new(),
            ops: Vec::new(),
            summaries: Vec::new(),
            param_names: HashMap::new(),
            node_names: HashMap::new(),
            scopes: Vec::new(),
            rng,
        }
    }

    /// Enters the scope `name`. Entering the same scope twice yields the same
    /// parameter names, which is what makes lookups in `Acquire::Reuse` mode work.
    pub fn push_scope(&mut self, name: &str) {
        self.scopes.push(name.to_string());
    }

    /// Leaves the innermost scope.
    pub fn pop_scope(&mut self) -> Result<()> {
        self.scopes.pop().map(|_| ()).ok_or(GraphErr::ScopeUnderflow)
    }

    /// The `/` joined path of the current scopes.
    pub fn scope(&self) -> String {
        self.scopes.join("/")
    }

    fn scoped(&self, name: &str) -> String {
        if self.scopes.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.scope())
        }
    }

    /// Creates or retrieves a parameter in the current scope.
    ///
    /// # Arguments
    /// * `name` - The parameter name, relative to the current scope.
    /// * `shape` - The parameter shape.
    /// * `init` - How its initial value is sampled when created.
    /// * `acquire` - Whether the parameter is allocated or looked up.
    ///
    /// # Returns
    /// The handle of the parameter, or an error if `acquire` cannot be honored.
    pub fn get_variable(
        &mut self,
        name: &str,
        shape: (usize, usize),
        init: Init,
        acquire: Acquire,
    ) -> Result<ParamId> {
        let full_name = self.scoped(name);

        match (acquire, self.param_names.get(&full_name)) {
            (Acquire::Reuse, Some(&id)) => {
                let expected = self.params[id.0].shape;
                if expected != Shape::new(shape.0, shape.1) {
                    return Err(GraphErr::ShapeMismatch {
                        op: full_name,
                        lhs: expected,
                        rhs: Shape::new(shape.0, shape.1),
                    });
                }

                debug!(name = full_name.as_str(); "reusing variable");
                Ok(id)
            }
            (Acquire::Reuse, None) => Err(GraphErr::VariableMissing { name: full_name }),
            (Acquire::Create, Some(_)) => Err(GraphErr::VariableExists { name: full_name }),
            (Acquire::Create, None) => {
                let value = init.sample(&mut self.rng, shape)?;
                Ok(self.insert_param(full_name, value))
            }
        }
    }

    pub(crate) fn insert_param(&mut self, name: String, value: Array2<f32>) -> ParamId {
        debug!(name = name.as_str(); "creating variable");

        let id = ParamId(self.params.len());
        let (rows, cols) = value.dim();
        self.param_names.insert(name.clone(), id);
        self.params.push(Param {
            name,
            shape: Shape::new(rows, cols),
            value: value.as_standard_layout().into_owned(),
        });
        id
    }

    pub(crate) fn param_exists(&self, name: &str) -> bool {
        self.param_names.contains_key(name)
    }

    /// Looks up a parameter by its full name.
    pub fn find_variable(&self, full_name: &str) -> Option<ParamId> {
        self.param_names.get(full_name).copied()
    }

    /// The full name of a parameter.
    pub fn variable_name(&self, param: ParamId) -> &str {
        &self.params[param.0].name
    }

    pub fn variable_shape(&self, param: ParamId) -> Shape {
        self.params[param.0].shape
    }

    /// The current value of a parameter.
    pub fn variable_value(&self, param: ParamId) -> &Array2<f32> {
        &self.params[param.0].value
    }

    /// Overwrites the value of a parameter.
    pub fn assign(&mut self, param: ParamId, value: Array2<f32>) -> Result<()> {
        let slot = &mut self.params[param.0];
        if !slot.shape.accepts(value.dim()) {
            return Err(GraphErr::FeedShapeMismatch {
                name: slot.name.clone(),
                expected: slot.shape,
                got: value.dim(),
            });
        }

        slot.value = value.as_standard_layout().into_owned();
        Ok(())
    }

    /// Creates a counter starting at zero.
    pub fn create_counter(&mut self, name: &str) -> Result<CounterId> {
        if self.counter(name).is_some() {
            return Err(GraphErr::CounterExists {
                name: name.to_string(),
            });
        }

        self.counters.push(Counter {
            name: name.to_string(),
            value: 0,
        });
        Ok(CounterId(self.counters.len() - 1))
    }

    /// Looks up a counter by name.
    pub fn counter(&self, name: &str) -> Option<CounterId> {
        self.counters
            .iter()
            .position(|c| c.name == name)
            .map(CounterId)
    }

    pub fn counter_value(&self, counter: CounterId) -> u64 {
        self.counters[counter.0].value
    }

    pub fn increment_counter(&mut self, counter: CounterId) -> u64 {
        let counter = &mut self.counters[counter.0];
        counter.value += 1;
        counter.value
    }

    /// The full name of the node producing `tensor`.
    pub fn name(&self, tensor: Tensor) -> &str {
        &self.nodes[tensor.0].name
    }

    /// The static shape of `tensor`.
    pub fn shape(&self, tensor: Tensor) -> Shape {
        self.nodes[tensor.0].shape
    }

    fn entry(&self, tensor: Tensor) -> Result<&NodeEntry> {
        self.nodes
            .get(tensor.0)
            .ok_or(GraphErr::UnknownTensor(tensor.0))
    }

    fn push(&mut self, op_name: &str, node: Node, shape: Shape) -> Tensor {
        let base = self.scoped(op_name);
        let count = self.node_names.entry(base.clone()).or_insert(0);
        let name = if *count == 0 {
            base
        } else {
            format!("{base}_{count}")
        };
        *count += 1;

        self.nodes.push(NodeEntry { name, node, shape });
        Tensor(self.nodes.len() - 1)
    }

    /// A value supplied through the feed of every `run` that needs it.
    pub fn placeholder(&mut self, name: &str, shape: Shape) -> Tensor {
        self.push(name, Node::Placeholder, shape)
    }

    /// Reads the current value of a parameter.
    pub fn read(&mut self, param: ParamId) -> Tensor {
        let Param { name, shape, .. } = &self.params[param.0];
        let op_name = format!("{}/read", name.rsplit('/').next().unwrap_or(name));
        let shape = *shape;
        self.push(&op_name, Node::Read(param), shape)
    }

    /// Reads the current value of a counter as a scalar.
    pub fn read_counter(&mut self, counter: CounterId) -> Tensor {
        let name = self.counters[counter.0].name.clone();
        self.push(&name, Node::Counter(counter), Shape::scalar())
    }

    pub fn matmul(&mut self, a: Tensor, b: Tensor) -> Result<Tensor> {
        let (lhs, rhs) = (self.entry(a)?.shape, self.entry(b)?.shape);
        if rhs.rows.is_some_and(|rows| rows != lhs.cols) {
            return Err(self.mismatch("MatMul", lhs, rhs));
        }

        let shape = Shape {
            rows: lhs.rows,
            cols: rhs.cols,
        };
        Ok(self.push("MatMul", Node::MatMul(a, b), shape))
    }

    /// Adds a `[1, n]` bias to every row of `x`.
    pub fn bias_add(&mut self, x: Tensor, bias: Tensor) -> Result<Tensor> {
        let (lhs, rhs) = (self.entry(x)?.shape, self.entry(bias)?.shape);
        if rhs.rows != Some(1) || rhs.cols != lhs.cols {
            return Err(self.mismatch("BiasAdd", lhs, rhs));
        }

        Ok(self.push("BiasAdd", Node::BiasAdd(x, bias), lhs))
    }

    pub fn add(&mut self, a: Tensor, b: Tensor) -> Result<Tensor> {
        let (lhs, rhs) = (self.entry(a)?.shape, self.entry(b)?.shape);
        let rows_differ = matches!((lhs.rows, rhs.rows), (Some(x), Some(y)) if x != y);
        if lhs.cols != rhs.cols || rows_differ {
            return Err(self.mismatch("Add", lhs, rhs));
        }

        let shape = Shape {
            rows: lhs.rows.or(rhs.rows),
            cols: lhs.cols,
        };
        Ok(self.push("Add", Node::Add(a, b), shape))
    }

    pub fn relu(&mut self, x: Tensor) -> Result<Tensor> {
        let shape = self.entry(x)?.shape;
        Ok(self.push("Relu", Node::Relu(x), shape))
    }

    pub fn sigmoid(&mut self, x: Tensor) -> Result<Tensor> {
        let shape = self.entry(x)?.shape;
        Ok(self.push("Sigmoid", Node::Sigmoid(x), shape))
    }

    /// Row-wise softmax.
    pub fn softmax(&mut self, x: Tensor) -> Result<Tensor> {
        let shape = self.entry(x)?.shape;
        Ok(self.push("Softmax", Node::Softmax(x), shape))
    }

    /// `x * scale + offset`, element wise.
    pub fn rescale(&mut self, x: Tensor, scale: f32, offset: f32) -> Result<Tensor> {
        let shape = self.entry(x)?.shape;
        let node = Node::Rescale {
            input: x,
            scale,
            offset,
        };
        Ok(self.push("Rescale", node, shape))
    }

    /// Mean squared error between `predictions` and `targets`, as a scalar.
    pub fn mse(&mut self, predictions: Tensor, targets: Tensor) -> Result<Tensor> {
        self.check_same_cols("Mse", predictions, targets)?;
        let node = Node::Mse {
            predictions,
            targets,
        };
        Ok(self.push("Mse", node, Shape::scalar()))
    }

    /// Mean over the batch of the cross entropy between `softmax(logits)` and
    /// one hot `labels`, as a scalar.
    pub fn softmax_cross_entropy(&mut self, logits: Tensor, labels: Tensor) -> Result<Tensor> {
        self.check_same_cols("SoftmaxCrossEntropy", logits, labels)?;
        let node = Node::SoftmaxCrossEntropy { logits, labels };
        Ok(self.push("SoftmaxCrossEntropy", node, Shape::scalar()))
    }

    /// Fraction of rows whose prediction matches the label. One hot rows are
    /// compared by arg max, single column rows by rounding to `0` or `1`.
    pub fn accuracy(&mut self, predictions: Tensor, labels: Tensor) -> Result<Tensor> {
        self.check_same_cols("Accuracy", predictions, labels)?;
        let node = Node::Accuracy {
            predictions,
            labels,
        };
        Ok(self.push("Accuracy", node, Shape::scalar()))
    }

    /// Forwards `input` unchanged after executing every operation in `deps`.
    pub fn identity(&mut self, input: Tensor, deps: &[OpId], name: &str) -> Result<Tensor> {
        let shape = self.entry(input)?.shape;
        if let Some(op) = deps.iter().find(|op| op.0 >= self.ops.len()) {
            return Err(GraphErr::UnknownOperation(op.0));
        }

        let node = Node::Identity {
            input,
            deps: deps.to_vec(),
        };
        Ok(self.push(name, node, shape))
    }

    /// `base * rate ^ floor(step / period)`, evaluated against the counter at run time.
    pub fn exponential_decay(
        &mut self,
        step: CounterId,
        base: f32,
        rate: f32,
        period: u64,
    ) -> Tensor {
        let node = Node::ExpDecay {
            step,
            base,
            rate,
            period: period.max(1),
        };
        self.push("ExponentialDecay", node, Shape::scalar())
    }

    /// Builds the operation minimizing `loss` with respect to `params`.
    ///
    /// Each execution computes the gradients, applies one optimizer per
    /// parameter scaled by the value of `learning_rate` and increments `step`.
    ///
    /// # Arguments
    /// * `loss` - A scalar tensor.
    /// * `params` - The parameters to update.
    /// * `learning_rate` - A scalar tensor.
    /// * `step` - The counter advanced once per execution.
    /// * `factory` - An `Optimizer` factory closure, given each parameter's length.
    pub fn minimize<F>(
        &mut self,
        loss: Tensor,
        params: &[ParamId],
        learning_rate: Tensor,
        step: CounterId,
        mut factory: F,
    ) -> Result<OpId>
    where
        F: FnMut(usize) -> Box<dyn Optimizer>,
    {
        for (tensor, what) in [(loss, "loss"), (learning_rate, "learning rate")] {
            let shape = self.entry(tensor)?.shape;
            if !shape.is_scalar() {
                return Err(self.mismatch(what, shape, Shape::scalar()));
            }
        }

        let slots = params
            .iter()
            .map(|&param| {
                let len = self.params[param.0].value.len();
                (param, factory(len))
            })
            .collect();

        Ok(self.push_op(Operation::Update {
            loss,
            learning_rate,
            step,
            slots,
        }))
    }

    pub(crate) fn push_op(&mut self, op: Operation) -> OpId {
        self.ops.push(Some(op));
        OpId(self.ops.len() - 1)
    }

    /// Registers `tensor` to be reported under `tag` whenever `collection` is flushed.
    pub fn add_summary(&mut self, tag: &str, tensor: Tensor, kind: SummaryKind, collection: &str) {
        self.summaries.push(Summary {
            tag: tag.to_string(),
            tensor,
            kind,
            collection: collection.to_string(),
        });
    }

    /// The summaries registered in `collection`, in registration order.
    pub fn summaries(&self, collection: &str) -> Vec<&Summary> {
        self.summaries
            .iter()
            .filter(|s| s.collection == collection)
            .collect()
    }

    fn check_same_cols(&self, op: &str, a: Tensor, b: Tensor) -> Result<()> {
        let (lhs, rhs) = (self.entry(a)?.shape, self.entry(b)?.shape);
        if lhs.cols != rhs.cols {
            return Err(self.mismatch(op, lhs, rhs));
        }

        Ok(())
    }

    fn mismatch(&self, op: &str, lhs: Shape, rhs: Shape) -> GraphErr {
        GraphErr::ShapeMismatch {
            op: self.scoped(op),
            lhs,
            rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_prefix_parameter_names() {
        let mut graph = Graph::seeded(0);
        graph.push_scope("brain");
        graph.push_scope("ip1");
        let w = graph
            .get_variable("weights", (2, 3), Init::Const(0.), Acquire::Create)
            .unwrap();
        graph.pop_scope().unwrap();
        graph.pop_scope().unwrap();

        assert_eq!(graph.variable_name(w), "brain/ip1/weights");
        assert_eq!(graph.find_variable("brain/ip1/weights"), Some(w));
        assert!(matches!(graph.pop_scope(), Err(GraphErr::ScopeUnderflow)));
    }

    #[test]
    fn create_twice_fails() {
        let mut graph = Graph::seeded(0);
        graph
            .get_variable("w", (1, 1), Init::Const(0.), Acquire::Create)
            .unwrap();
        let err = graph.get_variable("w", (1, 1), Init::Const(0.), Acquire::Create);
        assert!(matches!(err, Err(GraphErr::VariableExists { .. })));
    }

    #[test]
    fn reuse_missing_fails() {
        let mut graph = Graph::seeded(0);
        let err = graph.get_variable("w", (1, 1), Init::Const(0.), Acquire::Reuse);
        assert!(matches!(err, Err(GraphErr::VariableMissing { .. })));
    }

    #[test]
    fn reuse_resolves_to_the_same_slot() {
        let mut graph = Graph::seeded(0);
        graph.push_scope("layer");
        let created = graph
            .get_variable("w", (2, 2), Init::Const(1.), Acquire::Create)
            .unwrap();
        graph.pop_scope().unwrap();

        graph.push_scope("layer");
        let reused = graph
            .get_variable("w", (2, 2), Init::Const(7.), Acquire::Reuse)
            .unwrap();
        graph.pop_scope().unwrap();

        assert_eq!(created, reused);
        assert_eq!(graph.variable_value(reused)[[0, 0]], 1.);
    }

    #[test]
    fn node_names_are_unique_per_scope() {
        let mut graph = Graph::seeded(0);
        graph.push_scope("layer");
        let x = graph.placeholder("x", Shape::batch(2));
        let a = graph.relu(x).unwrap();
        let b = graph.relu(x).unwrap();
        graph.pop_scope().unwrap();

        assert_eq!(graph.name(a), "layer/Relu");
        assert_eq!(graph.name(b), "layer/Relu_1");
    }

    #[test]
    fn matmul_checks_inner_dimension() {
        let mut graph = Graph::seeded(0);
        let x = graph.placeholder("x", Shape::batch(3));
        let w = graph
            .get_variable("w", (2, 4), Init::Const(0.), Acquire::Create)
            .unwrap();
        let w = graph.read(w);

        assert!(matches!(
            graph.matmul(x, w),
            Err(GraphErr::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn counters() {
        let mut graph = Graph::seeded(0);
        let step = graph.create_counter("global_step").unwrap();
        assert!(graph.create_counter("global_step").is_err());
        assert_eq!(graph.counter("global_step"), Some(step));
        assert_eq!(graph.increment_counter(step), 1);
        assert_eq!(graph.counter_value(step), 1);
    }
}
