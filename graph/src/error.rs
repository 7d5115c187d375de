use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

use crate::Shape;

/// The result type used in the entire graph module.
pub type Result<T> = std::result::Result<T, GraphErr>;

/// The graph module's error type.
#[derive(Debug)]
pub enum GraphErr {
    VariableExists {
        name: String,
    },
    VariableMissing {
        name: String,
    },
    CounterExists {
        name: String,
    },
    ShapeMismatch {
        op: String,
        lhs: Shape,
        rhs: Shape,
    },
    FeedShapeMismatch {
        name: String,
        expected: Shape,
        got: (usize, usize),
    },
    MissingFeed {
        name: String,
    },
    UnknownTensor(usize),
    UnknownOperation(usize),
    CyclicOperation {
        op: usize,
    },
    ScopeUnderflow,
    InvalidInit(String),
}

impl Display for GraphErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphErr::VariableExists { name } => {
                format!("variable {name} already exists, acquire it in reuse mode to share it")
            }
            GraphErr::VariableMissing { name } => {
                format!("variable {name} does not exist, it cannot be acquired in reuse mode")
            }
            GraphErr::CounterExists { name } => format!("counter {name} already exists"),
            GraphErr::ShapeMismatch { op, lhs, rhs } => {
                format!("incompatible shapes for {op}: {lhs} and {rhs}")
            }
            GraphErr::FeedShapeMismatch {
                name,
                expected,
                got: (rows, cols),
            } => format!("value fed to {name} has shape [{rows}, {cols}], expected {expected}"),
            GraphErr::MissingFeed { name } => format!("placeholder {name} must be fed a value"),
            GraphErr::UnknownTensor(id) => format!("tensor {id} does not belong to this graph"),
            GraphErr::UnknownOperation(id) => {
                format!("operation {id} does not belong to this graph")
            }
            GraphErr::CyclicOperation { op } => {
                format!("operation {op} depends on its own execution")
            }
            GraphErr::ScopeUnderflow => "popped a scope that was never pushed".to_string(),
            GraphErr::InvalidInit(msg) => format!("invalid initializer: {msg}"),
        };

        write!(f, "{s}")
    }
}

impl Error for GraphErr {}

impl From<NormalError> for GraphErr {
    fn from(value: NormalError) -> Self {
        Self::InvalidInit(value.to_string())
    }
}

impl From<UniformError> for GraphErr {
    fn from(value: UniformError) -> Self {
        Self::InvalidInit(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_what_went_wrong() {
        let err = GraphErr::VariableExists {
            name: "ip1/weights".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "variable ip1/weights already exists, acquire it in reuse mode to share it"
        );

        let err = GraphErr::FeedShapeMismatch {
            name: "x".to_string(),
            expected: Shape::batch(2),
            got: (4, 3),
        };
        assert_eq!(err.to_string(), "value fed to x has shape [4, 3], expected [?, 2]");
        assert_eq!(
            GraphErr::ScopeUnderflow.to_string(),
            "popped a scope that was never pushed"
        );
    }
}
