use serde::{Deserialize, Serialize};

use crate::{
    AkidErr, Result,
    blocks::ProcessingLayer,
    brain::Brain,
    kid::{Kid, KidSpec},
    kongfu::{KongFu, KongFuSpec, LrScheme, UpdateRule},
    layers::{ActFn, Activation, InnerProduct, MseLoss, SoftmaxWithLoss},
    sensors::{FeedSensor, Source},
};

/// The specification of a processing layer of the brain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    InnerProduct {
        out_channels: usize,
        #[serde(default)]
        moving_average_decay: Option<f32>,
    },
    Activation {
        act_fn: ActFn,
    },
    SoftmaxWithLoss,
    MseLoss,
}

/// Where the sensor's examples come from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    GaussianBlobs {
        num_classes: usize,
        dim: usize,
        num_train: usize,
        num_val: usize,
        seed: u64,
    },
}

/// The specification for the `FeedSensor` struct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    pub source: SourceSpec,
    pub batch_size: usize,
    pub val_batch_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Everything needed to build a `Kid`, loadable from JSON. Omitted fields
/// take the values of a small classifier of synthetic blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSpec {
    pub kid: KidSpec,
    pub kongfu: KongFuSpec,
    pub sensor: SensorSpec,
    pub brain: Vec<LayerSpec>,
}

impl Default for ExperimentSpec {
    fn default() -> Self {
        Self {
            kid: KidSpec {
                max_steps: 900,
                train_log_step: 100,
                val_log_step: 300,
                seed: Some(42),
            },
            kongfu: KongFuSpec {
                rule: UpdateRule::momentum(),
                lr_scheme: LrScheme::default(),
            },
            sensor: SensorSpec {
                source: SourceSpec::GaussianBlobs {
                    num_classes: 3,
                    dim: 4,
                    num_train: 600,
                    num_val: 150,
                    seed: 7,
                },
                batch_size: 32,
                val_batch_size: 50,
                seed: Some(7),
            },
            brain: vec![
                LayerSpec::InnerProduct {
                    out_channels: 16,
                    moving_average_decay: Some(0.9),
                },
                LayerSpec::Activation { act_fn: ActFn::Relu },
                LayerSpec::InnerProduct {
                    out_channels: 3,
                    moving_average_decay: Some(0.9),
                },
                LayerSpec::SoftmaxWithLoss,
            ],
        }
    }
}

impl ExperimentSpec {
    /// Parses a spec from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| AkidErr::from(e).logged())
    }
}

/// Builds `Kid`s given a specification.
#[derive(Default)]
pub struct KidBuilder;

impl KidBuilder {
    /// Creates a new `KidBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new `Kid` following a spec. The kid still has to be set up.
    ///
    /// # Arguments
    /// * `spec` - The specification for the experiment.
    ///
    /// # Returns
    /// The kid, or the first configuration error found.
    pub fn build(&self, spec: &ExperimentSpec) -> Result<Kid> {
        let sensor = self.resolve_sensor(&spec.sensor)?;
        let brain = self.resolve_brain(&spec.brain)?;
        let kongfu = KongFu::new("kongfu", spec.kongfu)?;
        Kid::new(sensor, brain, kongfu, spec.kid)
    }

    fn resolve_sensor(&self, spec: &SensorSpec) -> Result<FeedSensor> {
        let source = match spec.source {
            SourceSpec::GaussianBlobs {
                num_classes,
                dim,
                num_train,
                num_val,
                seed,
            } => Source::gaussian_blobs(num_classes, dim, num_train, num_val, seed)?,
        };

        FeedSensor::new(
            "sensor",
            source,
            spec.batch_size,
            spec.val_batch_size,
            spec.seed,
        )
    }

    fn resolve_brain(&self, specs: &[LayerSpec]) -> Result<Brain> {
        if specs.is_empty() {
            return Err(AkidErr::Config("the brain needs at least one layer".to_string()).logged());
        }

        let mut brain = Brain::new("brain")?;
        for (i, &spec) in specs.iter().enumerate() {
            self.resolve_layer(&mut brain, i + 1, spec)?;
        }

        Ok(brain)
    }

    fn resolve_layer(&self, brain: &mut Brain, position: usize, spec: LayerSpec) -> Result<()> {
        match spec {
            LayerSpec::InnerProduct {
                out_channels,
                moving_average_decay,
            } => {
                let name = format!("ip{position}");
                let layer = InnerProduct::new(out_channels);
                brain.attach(ProcessingLayer::new(&name, layer, moving_average_decay)?);
            }
            LayerSpec::Activation { act_fn } => {
                let name = format!("act{position}");
                brain.attach(ProcessingLayer::new(&name, Activation::new(act_fn), None)?);
            }
            LayerSpec::SoftmaxWithLoss => {
                brain.attach(ProcessingLayer::new("loss", SoftmaxWithLoss::new(), None)?);
            }
            LayerSpec::MseLoss => {
                brain.attach(ProcessingLayer::new("loss", MseLoss::new(), None)?);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Processing;

    #[test]
    fn empty_json_is_the_default_experiment() {
        let spec = ExperimentSpec::from_json("{}").unwrap();
        assert_eq!(spec.brain, ExperimentSpec::default().brain);
        assert_eq!(spec.kid, ExperimentSpec::default().kid);
    }

    #[test]
    fn parses_layers_and_schemes() {
        let spec = ExperimentSpec::from_json(
            r#"{
                "kongfu": {
                    "rule": "gradient_descent",
                    "lr_scheme": { "name": "placeholder" }
                },
                "brain": [
                    { "type": "inner_product", "out_channels": 1 },
                    { "type": "activation", "act_fn": "sigmoid" },
                    { "type": "mse_loss" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.kongfu.rule, UpdateRule::GradientDescent);
        assert_eq!(spec.kongfu.lr_scheme, LrScheme::Placeholder);
        assert_eq!(
            spec.brain[0],
            LayerSpec::InnerProduct {
                out_channels: 1,
                moving_average_decay: None
            }
        );
        assert_eq!(spec.brain[1], LayerSpec::Activation { act_fn: ActFn::Sigmoid });
    }

    #[test]
    fn unknown_layer_is_a_config_error() {
        let err = ExperimentSpec::from_json(r#"{ "brain": [{ "type": "conv" }] }"#);
        assert!(matches!(err, Err(AkidErr::Config(_))));
    }

    #[test]
    fn builds_the_layers_in_order() {
        let mut kid = KidBuilder::new().build(&ExperimentSpec::default()).unwrap();
        kid.setup().unwrap();

        let ctx = kid.context();
        let names: Vec<&str> = kid
            .brain()
            .var_list()
            .into_iter()
            .map(|p| ctx.graph.variable_name(p))
            .collect();
        assert_eq!(
            names,
            [
                "brain/ip1/weights",
                "brain/ip1/biases",
                "brain/ip3/weights",
                "brain/ip3/biases"
            ]
        );
    }

    #[test]
    fn empty_brain_is_rejected() {
        let spec = ExperimentSpec {
            brain: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(KidBuilder::new().build(&spec), Err(AkidErr::Config(_))));
    }
}
