use std::sync::Arc;

use graph::{Summary, SummaryKind};
use log::{debug, info};
use ndarray::Array2;
use parking_lot::Mutex;

/// The collection of summaries reported while training.
pub const TRAIN_SUMMARIES: &str = "train";
/// The collection of summaries reported while validating.
pub const VALID_SUMMARIES: &str = "valid";

/// Receives the values of summarized tensors.
pub trait SummarySink {
    fn record_scalar(&mut self, tag: &str, value: f32, collection: &str, step: u64);

    fn record_histogram(&mut self, tag: &str, values: &[f32], collection: &str, step: u64);
}

/// Writes summaries to the log: scalars at info level, histograms as
/// min/mean/max at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl SummarySink for LogSink {
    fn record_scalar(&mut self, tag: &str, value: f32, collection: &str, step: u64) {
        info!(collection = collection, step = step; "{tag} = {value}");
    }

    fn record_histogram(&mut self, tag: &str, values: &[f32], collection: &str, step: u64) {
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let mean = values.iter().sum::<f32>() / values.len().max(1) as f32;
        debug!(collection = collection, step = step; "{tag}: min {min} mean {mean} max {max}");
    }
}

/// A recorded summary value.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Scalar {
        tag: String,
        value: f32,
        collection: String,
        step: u64,
    },
    Histogram {
        tag: String,
        values: Vec<f32>,
        collection: String,
        step: u64,
    },
}

impl Record {
    pub fn tag(&self) -> &str {
        match self {
            Record::Scalar { tag, .. } | Record::Histogram { tag, .. } => tag,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Record::Scalar { collection, .. } | Record::Histogram { collection, .. } => collection,
        }
    }
}

/// Keeps every record in memory. Clones share the same records, so a clone
/// can be handed to a `Kid` while another one is inspected.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// The scalars recorded under `tag`, in recording order.
    pub fn scalars(&self, tag: &str) -> Vec<f32> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| match record {
                Record::Scalar { tag: t, value, .. } if t == tag => Some(*value),
                _ => None,
            })
            .collect()
    }
}

impl SummarySink for MemorySink {
    fn record_scalar(&mut self, tag: &str, value: f32, collection: &str, step: u64) {
        self.records.lock().push(Record::Scalar {
            tag: tag.to_string(),
            value,
            collection: collection.to_string(),
            step,
        });
    }

    fn record_histogram(&mut self, tag: &str, values: &[f32], collection: &str, step: u64) {
        self.records.lock().push(Record::Histogram {
            tag: tag.to_string(),
            values: values.to_vec(),
            collection: collection.to_string(),
            step,
        });
    }
}

/// Reduces the evaluated summaries as their kind says and hands them to `sink`.
///
/// # Arguments
/// * `sink` - The destination.
/// * `summaries` - The summaries, all from the same collection.
/// * `values` - The value of each summary's tensor, in the same order.
/// * `step` - The global step the values were observed at.
pub fn flush(sink: &mut dyn SummarySink, summaries: &[Summary], values: &[Array2<f32>], step: u64) {
    for (summary, value) in summaries.iter().zip(values) {
        let Summary {
            tag,
            kind,
            collection,
            ..
        } = summary;

        match kind {
            SummaryKind::Scalar => {
                let scalar = value.iter().next().copied().unwrap_or_default();
                sink.record_scalar(tag, scalar, collection, step);
            }
            SummaryKind::Histogram => {
                let values: Vec<f32> = value.iter().copied().collect();
                sink.record_histogram(tag, &values, collection, step);
            }
            SummaryKind::Sparsity => {
                let zeros = value.iter().filter(|&&v| v == 0.).count();
                let fraction = zeros as f32 / value.len().max(1) as f32;
                sink.record_scalar(tag, fraction, collection, step);
            }
        }
    }
}
