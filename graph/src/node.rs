use std::fmt::{self, Display};

/// A handle to a value produced by a node of a `Graph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tensor(pub(crate) usize);

/// A handle to a named mutable parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) usize);

/// A handle to a named monotonic counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterId(pub(crate) usize);

/// A handle to a side-effecting operation (parameter updates, moving averages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub(crate) usize);

/// The static shape of a rank 2 value. The row count may be unknown until a
/// value is fed, the column count never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub rows: Option<usize>,
    pub cols: usize,
}

impl Shape {
    /// A fully known shape.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows: Some(rows),
            cols,
        }
    }

    /// A shape whose row (batch) dimension is only known at run time.
    pub fn batch(cols: usize) -> Self {
        Self { rows: None, cols }
    }

    /// The `[1, 1]` shape used for scalars.
    pub fn scalar() -> Self {
        Self::new(1, 1)
    }

    pub fn is_scalar(&self) -> bool {
        self.rows == Some(1) && self.cols == 1
    }

    /// Whether a concrete `(rows, cols)` value fits in this shape.
    pub fn accepts(&self, dim: (usize, usize)) -> bool {
        self.cols == dim.1 && self.rows.is_none_or(|rows| rows == dim.0)
    }

    /// Amount of elements, if the shape is fully known.
    pub fn len(&self) -> Option<usize> {
        self.rows.map(|rows| rows * self.cols)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rows {
            Some(rows) => write!(f, "[{rows}, {}]", self.cols),
            None => write!(f, "[?, {}]", self.cols),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Node {
    Placeholder,
    Read(ParamId),
    Counter(CounterId),
    MatMul(Tensor, Tensor),
    BiasAdd(Tensor, Tensor),
    Add(Tensor, Tensor),
    Relu(Tensor),
    Sigmoid(Tensor),
    Softmax(Tensor),
    Rescale {
        input: Tensor,
        scale: f32,
        offset: f32,
    },
    Mse {
        predictions: Tensor,
        targets: Tensor,
    },
    SoftmaxCrossEntropy {
        logits: Tensor,
        labels: Tensor,
    },
    Accuracy {
        predictions: Tensor,
        labels: Tensor,
    },
    Identity {
        input: Tensor,
        deps: Vec<OpId>,
    },
    ExpDecay {
        step: CounterId,
        base: f32,
        rate: f32,
        period: u64,
    },
}

impl Node {
    /// The tensors this node reads.
    pub(crate) fn inputs(&self) -> Vec<Tensor> {
        match self {
            Node::Placeholder | Node::Read(_) | Node::Counter(_) | Node::ExpDecay { .. } => {
                Vec::new()
            }
            Node::MatMul(a, b) | Node::BiasAdd(a, b) | Node::Add(a, b) => vec![*a, *b],
            Node::Relu(x) | Node::Sigmoid(x) | Node::Softmax(x) => vec![*x],
            Node::Mse {
                predictions: a,
                targets: b,
            }
            | Node::SoftmaxCrossEntropy {
                logits: a,
                labels: b,
            }
            | Node::Accuracy {
                predictions: a,
                labels: b,
            } => vec![*a, *b],
            Node::Identity { input, .. } | Node::Rescale { input, .. } => vec![*input],
        }
    }
}

#[derive(Debug)]
pub(crate) struct NodeEntry {
    pub name: String,
    pub node: Node,
    pub shape: Shape,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_shape_accepts_any_rows() {
        let shape = Shape::batch(3);
        assert!(shape.accepts((1, 3)));
        assert!(shape.accepts((128, 3)));
        assert!(!shape.accepts((128, 2)));
        assert_eq!(shape.len(), None);
    }

    #[test]
    fn display() {
        assert_eq!(Shape::new(2, 3).to_string(), "[2, 3]");
        assert_eq!(Shape::batch(3).to_string(), "[?, 3]");
        assert!(Shape::scalar().is_scalar());
    }
}
