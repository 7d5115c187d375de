use std::collections::HashMap;

use log::debug;
use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::{
    Graph, GraphErr, Result, Shape,
    moving_average::effective_decay,
    node::{Node, OpId, ParamId, Tensor},
    operation::Operation,
};

/// The values fed to placeholders for one `run`.
pub type Feed = HashMap<Tensor, Array2<f32>>;

impl Graph {
    /// Evaluates `tensors` and executes `ops`.
    ///
    /// Every node is evaluated at most once per call and every operation is
    /// executed at most once per call, whether requested directly or reached
    /// through a control dependency. Tensors are evaluated before operations, so
    /// the values returned reflect the parameters as they were before any update
    /// requested in the same call.
    ///
    /// # Arguments
    /// * `tensors` - The tensors whose values are returned.
    /// * `ops` - The operations to execute.
    /// * `feed` - The values of the placeholders the evaluation reaches.
    ///
    /// # Returns
    /// The values of `tensors`, in order.
    pub fn run(&mut self, tensors: &[Tensor], ops: &[OpId], feed: &Feed) -> Result<Vec<Array2<f32>>> {
        let mut execution = Execution::new(self, feed);

        for &tensor in tensors {
            execution.eval(tensor)?;
        }

        for &op in ops {
            execution.execute(op)?;
        }

        tensors
            .iter()
            .map(|&tensor| execution.value(tensor).cloned())
            .collect()
    }
}

struct Execution<'g, 'f> {
    graph: &'g mut Graph,
    feed: &'f Feed,
    values: Vec<Option<Array2<f32>>>,
    executed: Vec<bool>,
}

impl<'g, 'f> Execution<'g, 'f> {
    fn new(graph: &'g mut Graph, feed: &'f Feed) -> Self {
        Self {
            values: vec![None; graph.nodes.len()],
            executed: vec![false; graph.ops.len()],
            graph,
            feed,
        }
    }

    fn value(&self, tensor: Tensor) -> Result<&Array2<f32>> {
        self.values
            .get(tensor.0)
            .and_then(Option::as_ref)
            .ok_or(GraphErr::UnknownTensor(tensor.0))
    }

    fn eval(&mut self, tensor: Tensor) -> Result<()> {
        let Some(entry) = self.graph.nodes.get(tensor.0) else {
            return Err(GraphErr::UnknownTensor(tensor.0));
        };

        if self.values[tensor.0].is_some() {
            return Ok(());
        }

        let inputs = entry.node.inputs();
        let deps = match &entry.node {
            Node::Identity { deps, .. } => deps.clone(),
            _ => Vec::new(),
        };

        for input in inputs {
            self.eval(input)?;
        }

        for op in deps {
            self.execute(op)?;
        }

        let value = self.compute(tensor)?;
        self.values[tensor.0] = Some(value);
        Ok(())
    }

    fn compute(&self, tensor: Tensor) -> Result<Array2<f32>> {
        let entry = &self.graph.nodes[tensor.0];
        let mismatch = |lhs: &Array2<f32>, rhs: &Array2<f32>| GraphErr::ShapeMismatch {
            op: entry.name.clone(),
            lhs: Shape::new(lhs.nrows(), lhs.ncols()),
            rhs: Shape::new(rhs.nrows(), rhs.ncols()),
        };

        let value = match &entry.node {
            Node::Placeholder => {
                let value = self.feed.get(&tensor).ok_or_else(|| GraphErr::MissingFeed {
                    name: entry.name.clone(),
                })?;

                if !entry.shape.accepts(value.dim()) {
                    return Err(GraphErr::FeedShapeMismatch {
                        name: entry.name.clone(),
                        expected: entry.shape,
                        got: value.dim(),
                    });
                }

                value.clone()
            }
            Node::Read(param) => self.graph.params[param.0].value.clone(),
            Node::Counter(counter) => scalar(self.graph.counters[counter.0].value as f32),
            Node::MatMul(a, b) => {
                let (a, b) = (self.value(*a)?, self.value(*b)?);
                if a.ncols() != b.nrows() {
                    return Err(mismatch(a, b));
                }

                a.dot(b)
            }
            Node::BiasAdd(x, bias) => {
                let (x, bias) = (self.value(*x)?, self.value(*bias)?);
                if bias.nrows() != 1 || x.ncols() != bias.ncols() {
                    return Err(mismatch(x, bias));
                }

                x + bias
            }
            Node::Add(a, b) => {
                let (a, b) = (self.value(*a)?, self.value(*b)?);
                if a.dim() != b.dim() {
                    return Err(mismatch(a, b));
                }

                a + b
            }
            Node::Relu(x) => self.value(*x)?.mapv(|x| x.max(0.)),
            Node::Sigmoid(x) => self.value(*x)?.mapv(sigmoid),
            Node::Softmax(x) => softmax(self.value(*x)?),
            Node::Rescale {
                input,
                scale,
                offset,
            } => self.value(*input)?.mapv(|x| x * scale + offset),
            Node::Mse {
                predictions,
                targets,
            } => {
                let (p, y) = (self.value(*predictions)?, self.value(*targets)?);
                if p.dim() != y.dim() {
                    return Err(mismatch(p, y));
                }

                scalar((p - y).mapv(|d| d * d).mean().unwrap_or_default())
            }
            Node::SoftmaxCrossEntropy { logits, labels } => {
                let (logits, labels) = (self.value(*logits)?, self.value(*labels)?);
                if logits.dim() != labels.dim() {
                    return Err(mismatch(logits, labels));
                }

                let rows = logits.nrows().max(1) as f32;
                scalar(-(log_softmax(logits) * labels).sum() / rows)
            }
            Node::Accuracy {
                predictions,
                labels,
            } => {
                let (p, y) = (self.value(*predictions)?, self.value(*labels)?);
                if p.dim() != y.dim() {
                    return Err(mismatch(p, y));
                }

                scalar(accuracy(p, y))
            }
            Node::Identity { input, .. } => self.value(*input)?.clone(),
            Node::ExpDecay {
                step,
                base,
                rate,
                period,
            } => {
                let step = self.graph.counters[step.0].value;
                let exponent = i32::try_from(step / period).unwrap_or(i32::MAX);
                scalar(base * rate.powi(exponent))
            }
        };

        Ok(value)
    }

    fn execute(&mut self, op: OpId) -> Result<()> {
        if op.0 >= self.graph.ops.len() {
            return Err(GraphErr::UnknownOperation(op.0));
        }

        if self.executed[op.0] {
            return Ok(());
        }

        let Some(mut operation) = self.graph.ops[op.0].take() else {
            return Err(GraphErr::CyclicOperation { op: op.0 });
        };

        let result = self.apply(&mut operation);
        self.graph.ops[op.0] = Some(operation);
        self.executed[op.0] = true;
        result
    }

    fn apply(&mut self, operation: &mut Operation) -> Result<()> {
        match operation {
            Operation::Update {
                loss,
                learning_rate,
                step,
                slots,
            } => {
                self.eval(*loss)?;
                self.eval(*learning_rate)?;

                let lr = self.value(*learning_rate)?[[0, 0]];
                let mut grads = self.gradients(*loss)?;

                let mut work = Vec::with_capacity(slots.len());
                for (param, optimizer) in slots.iter_mut() {
                    let param = *param;
                    let Some(grad) = grads.remove(&param) else {
                        debug!(
                            variable = self.graph.params[param.0].name.as_str();
                            "no gradient flows to variable, skipping its update"
                        );
                        continue;
                    };

                    let slot = &mut self.graph.params[param.0].value;
                    let weights = std::mem::replace(slot, Array2::zeros((0, 0)));
                    work.push((param, optimizer, weights, grad));
                }

                work.par_iter_mut()
                    .for_each(|(_, optimizer, weights, grad)| {
                        if let (Some(w), Some(g)) = (weights.as_slice_mut(), grad.as_slice()) {
                            optimizer.update_weights(lr, g, w);
                        }
                    });

                for (param, _, weights, _) in work {
                    self.graph.params[param.0].value = weights;
                }

                self.graph.increment_counter(*step);
            }
            Operation::MovingAverage {
                decay,
                num_updates,
                pairs,
            } => {
                let n = num_updates.map(|counter| self.graph.counter_value(counter));
                let decay = effective_decay(*decay, n);

                for &(variable, shadow) in pairs.iter() {
                    let value = self.graph.params[variable.0].value.clone();
                    self.graph.params[shadow.0]
                        .value
                        .zip_mut_with(&value, |s, &v| *s -= (1. - decay) * (*s - v));
                }
            }
        }

        Ok(())
    }

    /// Back-propagates from the scalar `loss` through every evaluated node.
    fn gradients(&self, loss: Tensor) -> Result<HashMap<ParamId, Array2<f32>>> {
        let mut grads: Vec<Option<Array2<f32>>> = vec![None; loss.0 + 1];
        grads[loss.0] = Some(Array2::ones(self.value(loss)?.dim()));
        let mut params: HashMap<ParamId, Array2<f32>> = HashMap::new();

        for id in (0..=loss.0).rev() {
            let Some(mut g) = grads[id].take() else {
                continue;
            };

            match &self.graph.nodes[id].node {
                Node::Read(param) => {
                    let g = g.as_standard_layout().into_owned();
                    match params.get_mut(param) {
                        Some(acc) => *acc += &g,
                        None => {
                            params.insert(*param, g);
                        }
                    }
                }
                Node::MatMul(a, b) => {
                    let (av, bv) = (self.value(*a)?, self.value(*b)?);
                    accumulate(&mut grads, *a, g.dot(&bv.t()));
                    accumulate(&mut grads, *b, av.t().dot(&g));
                }
                Node::BiasAdd(x, bias) => {
                    accumulate(&mut grads, *bias, g.sum_axis(Axis(0)).insert_axis(Axis(0)));
                    accumulate(&mut grads, *x, g);
                }
                Node::Add(a, b) => {
                    accumulate(&mut grads, *a, g.clone());
                    accumulate(&mut grads, *b, g);
                }
                Node::Relu(x) => {
                    g.zip_mut_with(self.value(*x)?, |d, &x| {
                        if x <= 0. {
                            *d = 0.;
                        }
                    });
                    accumulate(&mut grads, *x, g);
                }
                Node::Sigmoid(x) => {
                    g.zip_mut_with(self.value(Tensor(id))?, |d, &y| *d *= y * (1. - y));
                    accumulate(&mut grads, *x, g);
                }
                Node::Softmax(x) => {
                    let y = self.value(Tensor(id))?;
                    let dot = (&g * y).sum_axis(Axis(1)).insert_axis(Axis(1));
                    accumulate(&mut grads, *x, y * &(&g - &dot));
                }
                Node::Mse {
                    predictions,
                    targets,
                } => {
                    let (p, y) = (self.value(*predictions)?, self.value(*targets)?);
                    let scale = g[[0, 0]] * 2. / p.len().max(1) as f32;
                    let d = (p - y) * scale;
                    accumulate(&mut grads, *targets, d.mapv(|x| -x));
                    accumulate(&mut grads, *predictions, d);
                }
                Node::SoftmaxCrossEntropy { logits, labels } => {
                    let (l, y) = (self.value(*logits)?, self.value(*labels)?);
                    let scale = g[[0, 0]] / l.nrows().max(1) as f32;
                    accumulate(&mut grads, *logits, (softmax(l) - y) * scale);
                }
                Node::Identity { input, .. } => accumulate(&mut grads, *input, g),
                Node::Rescale { input, scale, .. } => {
                    g.mapv_inplace(|d| d * scale);
                    accumulate(&mut grads, *input, g);
                }
                Node::Placeholder
                | Node::Counter(_)
                | Node::Accuracy { .. }
                | Node::ExpDecay { .. } => {}
            }
        }

        Ok(params)
    }
}

fn accumulate(grads: &mut [Option<Array2<f32>>], tensor: Tensor, g: Array2<f32>) {
    match &mut grads[tensor.0] {
        Some(acc) => *acc += &g,
        slot @ None => *slot = Some(g),
    }
}

fn scalar(value: f32) -> Array2<f32> {
    Array2::from_elem((1, 1), value)
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

fn softmax(x: &Array2<f32>) -> Array2<f32> {
    let mut y = log_softmax(x);
    y.mapv_inplace(f32::exp);
    y
}

fn log_softmax(x: &Array2<f32>) -> Array2<f32> {
    let mut y = x.clone();

    for mut row in y.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = row.fold(0., |acc, &v| acc + (v - max).exp()).ln();
        row.mapv_inplace(|v| v - max - log_sum);
    }

    y
}

fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &v)| {
            if v > max { (i, v) } else { (best, max) }
        })
        .0
}

fn accuracy(predictions: &Array2<f32>, labels: &Array2<f32>) -> f32 {
    if predictions.nrows() == 0 {
        return 0.;
    }

    let hits = predictions
        .rows()
        .into_iter()
        .zip(labels.rows())
        .filter(|(p, y)| match p.len() {
            1 => (p[0] >= 0.5) == (y[0] >= 0.5),
            _ => argmax(p.view()) == argmax(y.view()),
        })
        .count();

    hits as f32 / predictions.nrows() as f32
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{Acquire, Init, optimization::GradientDescent};

    #[test]
    fn missing_feed() {
        let mut graph = Graph::seeded(0);
        let x = graph.placeholder("x", Shape::batch(2));
        let err = graph.run(&[x], &[], &Feed::new());
        assert!(matches!(err, Err(GraphErr::MissingFeed { name }) if name == "x"));
    }

    #[test]
    fn feed_shape_is_checked() {
        let mut graph = Graph::seeded(0);
        let x = graph.placeholder("x", Shape::batch(2));
        let feed = Feed::from([(x, Array2::zeros((4, 3)))]);
        assert!(matches!(
            graph.run(&[x], &[], &feed),
            Err(GraphErr::FeedShapeMismatch { .. })
        ));
    }

    #[test]
    fn dense_forward() {
        let mut graph = Graph::seeded(0);
        let x = graph.placeholder("x", Shape::batch(2));
        let w = graph
            .get_variable("w", (2, 1), Init::Const(1.), Acquire::Create)
            .unwrap();
        let b = graph
            .get_variable("b", (1, 1), Init::Const(0.5), Acquire::Create)
            .unwrap();
        let (w, b) = (graph.read(w), graph.read(b));
        let z = graph.matmul(x, w).unwrap();
        let y = graph.bias_add(z, b).unwrap();

        let feed = Feed::from([(x, array![[1., 2.], [3., 4.]])]);
        let out = graph.run(&[y], &[], &feed).unwrap();
        assert_eq!(out[0], array![[3.5], [7.5]]);
    }

    #[test]
    fn rescale_forward_and_backward() {
        let mut graph = Graph::seeded(0);
        let step = graph.create_counter("global_step").unwrap();
        let x = graph.placeholder("x", Shape::batch(1));
        let w = graph
            .get_variable("w", (1, 1), Init::Const(1.), Acquire::Create)
            .unwrap();
        let read = graph.read(w);
        let z = graph.matmul(x, read).unwrap();
        let y = graph.rescale(z, 0.5, 1.).unwrap();
        assert_eq!(graph.name(y), "Rescale");

        let feed = Feed::from([(x, array![[2.], [4.]])]);
        let out = graph.run(&[y], &[], &feed).unwrap();
        assert_eq!(out[0], array![[2.], [3.]]);

        let zeros = graph.placeholder("zeros", Shape::batch(1));
        let loss = graph.mse(y, zeros).unwrap();
        let lr = graph.exponential_decay(step, 1., 1., 1);
        let train = graph
            .minimize(loss, &[w], lr, step, |_| Box::new(GradientDescent::new()))
            .unwrap();

        let mut feed = feed;
        feed.insert(zeros, array![[0.], [0.]]);
        graph.run(&[], &[train], &feed).unwrap();

        // The loss gradient [2, 3] is halved on its way back to w: 2 * 1 + 4 * 1.5.
        assert!((graph.variable_value(w)[[0, 0]] - (1. - 8.)).abs() < 1e-5);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let y = softmax(&array![[1., 2., 3.], [0., 0., 1000.]]);
        for row in y.rows() {
            assert!((row.sum() - 1.).abs() < 1e-5);
        }
        assert!((y[[1, 2]] - 1.).abs() < 1e-5);
    }

    #[test]
    fn accuracy_by_argmax_and_threshold() {
        let p = array![[0.1, 0.9], [0.8, 0.2]];
        let y = array![[0., 1.], [0., 1.]];
        assert_eq!(accuracy(&p, &y), 0.5);

        let p = array![[0.7], [0.2], [0.4]];
        let y = array![[1.], [0.], [1.]];
        assert!((accuracy(&p, &y) - 2. / 3.).abs() < 1e-6);
    }

    #[test]
    fn update_descends_and_counts() {
        let mut graph = Graph::seeded(0);
        let step = graph.create_counter("global_step").unwrap();
        let x = graph.placeholder("x", Shape::batch(1));
        let y = graph.placeholder("y", Shape::batch(1));
        let w = graph
            .get_variable("w", (1, 1), Init::Const(0.), Acquire::Create)
            .unwrap();
        let read = graph.read(w);
        let pred = graph.matmul(x, read).unwrap();
        let loss = graph.mse(pred, y).unwrap();
        let lr = graph.exponential_decay(step, 0.1, 1., 1);
        let train = graph
            .minimize(loss, &[w], lr, step, |_| Box::new(GradientDescent::new()))
            .unwrap();

        let feed = Feed::from([(x, array![[1.], [2.]]), (y, array![[2.], [4.]])]);
        let mut last = f32::INFINITY;
        for _ in 0..50 {
            let out = graph.run(&[loss], &[train], &feed).unwrap();
            assert!(out[0][[0, 0]] <= last);
            last = out[0][[0, 0]];
        }

        assert_eq!(graph.counter_value(step), 50);
        assert!((graph.variable_value(w)[[0, 0]] - 2.).abs() < 1e-3);
    }

    #[test]
    fn control_dependencies_run_once() {
        let mut graph = Graph::seeded(0);
        let step = graph.create_counter("global_step").unwrap();
        let w = graph
            .get_variable("w", (1, 1), Init::Const(1.), Acquire::Create)
            .unwrap();

        let mut ema = crate::ExponentialMovingAverage::new(0.5, None);
        let apply = ema.apply(&mut graph, &[w]).unwrap();
        let read = graph.read(w);
        let a = graph.identity(read, &[apply], "a").unwrap();
        let b = graph.identity(read, &[apply], "b").unwrap();

        graph.assign(w, array![[3.]]).unwrap();
        graph.run(&[a, b], &[apply], &Feed::new()).unwrap();

        let shadow = ema.average(w).unwrap();
        assert_eq!(graph.variable_value(shadow)[[0, 0]], 2.);
        assert_eq!(graph.counter_value(step), 0);
    }
}
