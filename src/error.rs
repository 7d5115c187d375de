use std::{
    error::Error,
    fmt::{self, Display},
};

use graph::GraphErr;
use log::error;

/// The result type used in the entire akid crate.
pub type Result<T> = std::result::Result<T, AkidErr>;

/// The akid crate's error type.
#[derive(Debug)]
pub enum AkidErr {
    MissingName,
    InvalidMovingAverageDecay {
        block: String,
        decay: f32,
    },
    InvalidLrScheme {
        block: String,
        reason: String,
    },
    NoLoss {
        block: String,
    },
    NoData {
        block: String,
    },
    MissingInput {
        block: String,
        expected: usize,
        got: usize,
    },
    InvalidState {
        block: String,
        expected: &'static str,
        got: &'static str,
    },
    Config(String),
    Graph(GraphErr),
}

impl AkidErr {
    /// Reports a configuration error before handing it back to the caller.
    pub(crate) fn logged(self) -> Self {
        error!("{self}");
        self
    }
}

impl Display for AkidErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AkidErr::MissingName => "A block must be given a non empty name".to_string(),
            AkidErr::InvalidMovingAverageDecay { block, decay } => format!(
                "Block {block}: moving average decay should be in [0.5, 1), got {decay}"
            ),
            AkidErr::InvalidLrScheme { block, reason } => {
                format!("Block {block}: invalid learning rate scheme, {reason}")
            }
            AkidErr::NoLoss { block } => {
                format!("Block {block} did not produce a loss, there is nothing to train")
            }
            AkidErr::NoData { block } => format!("Block {block} did not produce any data"),
            AkidErr::MissingInput {
                block,
                expected,
                got,
            } => format!("Block {block} expected at least {expected} inputs, got {got}"),
            AkidErr::InvalidState {
                block,
                expected,
                got,
            } => format!("Block {block} should be {expected}, but it is {got}"),
            AkidErr::Config(reason) => format!("Invalid configuration: {reason}"),
            AkidErr::Graph(e) => format!("Graph error: {e}"),
        };

        write!(f, "{s}")
    }
}

impl Error for AkidErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AkidErr::Graph(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GraphErr> for AkidErr {
    fn from(value: GraphErr) -> Self {
        Self::Graph(value)
    }
}

impl From<serde_json::Error> for AkidErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}
