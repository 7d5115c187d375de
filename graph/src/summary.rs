use crate::node::Tensor;

/// How a summarized tensor is reduced before reaching a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    /// The first element of the value.
    Scalar,
    /// Every element of the value.
    Histogram,
    /// The fraction of zero elements.
    Sparsity,
}

/// A tensor registered for monitoring.
#[derive(Debug, Clone)]
pub struct Summary {
    pub tag: String,
    pub tensor: Tensor,
    pub kind: SummaryKind,
    pub collection: String,
}
