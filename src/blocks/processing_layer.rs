use std::sync::Arc;

use graph::{Acquire, ExponentialMovingAverage, Graph, Init, OpId, ParamId, SummaryKind, Tensor};
use log::{debug, info};
use parking_lot::RwLock;

use super::{Block, BlockCore, SetupState};
use crate::{
    AkidErr, Context, Result,
    summary::{TRAIN_SUMMARIES, VALID_SUMMARIES},
};

/// What a `Layer` produces when built.
#[derive(Debug, Clone, Copy)]
pub struct LayerOutputs {
    pub data: Tensor,
    pub loss: Option<Tensor>,
    pub eval: Option<Tensor>,
}

impl LayerOutputs {
    pub fn data(data: Tensor) -> Self {
        Self {
            data,
            loss: None,
            eval: None,
        }
    }
}

/// The computation specific to a kind of layer.
///
/// Implementations hold configuration only: everything a layer allocates goes
/// through `LayerScope::variable` so that it is shared with validation views.
pub trait Layer: Clone {
    /// Builds the layer on `inputs`, the first one being the data flowing
    /// through the network and the second one, when present, the labels.
    fn build(&mut self, scope: &mut LayerScope<'_>, inputs: &[Tensor]) -> Result<LayerOutputs>;
}

/// State shared by a layer and every validation view derived from it.
#[derive(Debug, Default)]
struct Shared {
    var_list: Vec<ParamId>,
    ema: Option<ExponentialMovingAverage>,
    ema_op: Option<OpId>,
}

/// The handle through which a `Layer` reaches the graph while being built.
pub struct LayerScope<'a> {
    ctx: &'a mut Context,
    block: &'a str,
    state: SetupState,
    shared: &'a RwLock<Shared>,
}

impl LayerScope<'_> {
    pub fn graph(&mut self) -> &mut Graph {
        &mut self.ctx.graph
    }

    /// Acquires an owned parameter and reads it.
    ///
    /// On the first setup of a layer the parameter is created and registered in
    /// the layer's `var_list`. Any later setup, and every setup of a view, looks
    /// it up instead and reads its moving average when one is tracked.
    ///
    /// # Arguments
    /// * `name` - The parameter name, relative to the layer scope.
    /// * `shape` - The parameter shape.
    /// * `init` - How the parameter is initialized when created.
    ///
    /// # Returns
    /// A tensor reading the resolved parameter.
    pub fn variable(&mut self, name: &str, shape: (usize, usize), init: Init) -> Result<Tensor> {
        let graph = &mut self.ctx.graph;

        if self.state == SetupState::Pending {
            let param = graph.get_variable(name, shape, init, Acquire::Create)?;
            self.shared.write().var_list.push(param);
            return Ok(graph.read(param));
        }

        let param = graph.get_variable(name, shape, init, Acquire::Reuse)?;
        let source = self
            .shared
            .read()
            .ema
            .as_ref()
            .and_then(|ema| ema.average(param))
            .unwrap_or(param);

        Ok(graph.read(source))
    }

    /// Fails with the error of a layer missing some of its inputs.
    pub fn expect_inputs(&self, inputs: &[Tensor], expected: usize) -> Result<()> {
        if inputs.len() < expected {
            return Err(AkidErr::MissingInput {
                block: self.block.to_string(),
                expected,
                got: inputs.len(),
            });
        }

        Ok(())
    }
}

/// A block producing a loss and an evaluation metric from learnable
/// parameters, able to derive validation views of itself.
pub trait Processing: Block {
    /// The loss, `None` before setup or if the block has none.
    fn loss(&self) -> Option<Tensor>;

    /// The evaluation metric, `None` before setup or if the block has none.
    fn eval(&self) -> Option<Tensor>;

    /// The owned parameters, in creation order.
    fn var_list(&self) -> Vec<ParamId>;

    fn is_val(&self) -> bool;

    /// A validation view sharing this block's parameters.
    fn val_copy(&self) -> Box<dyn Processing>;
}

/// A block owning learnable parameters, optionally producing a loss and an
/// evaluation metric.
///
/// Parameters are tracked in a `var_list` shared with every validation view
/// obtained through `get_val_copy`. When a moving average decay is configured,
/// each training evaluation of the layer output also updates a smoothed shadow
/// of every parameter, which is what the views read.
pub struct ProcessingLayer<L> {
    core: BlockCore,
    layer: L,
    moving_average_decay: Option<f32>,
    is_val: bool,
    shared: Arc<RwLock<Shared>>,
    data: Option<Tensor>,
    loss: Option<Tensor>,
    eval: Option<Tensor>,
}

impl<L: Layer> ProcessingLayer<L> {
    /// Creates a new `ProcessingLayer`.
    ///
    /// # Arguments
    /// * `name` - The layer name.
    /// * `layer` - The computation the layer performs.
    /// * `moving_average_decay` - The decay of the parameters' moving averages,
    ///   if they should be tracked.
    ///
    /// # Returns
    /// The layer, or a configuration error if the name is empty or the decay
    /// falls outside `[0.5, 1)`.
    pub fn new(name: &str, layer: L, moving_average_decay: Option<f32>) -> Result<Self> {
        let core = BlockCore::new(name)?;

        if let Some(decay) = moving_average_decay
            && !(0.5..1.).contains(&decay)
        {
            return Err(AkidErr::InvalidMovingAverageDecay {
                block: name.to_string(),
                decay,
            }
            .logged());
        }

        Ok(Self {
            core,
            layer,
            moving_average_decay,
            is_val: false,
            shared: Arc::new(RwLock::new(Shared::default())),
            data: None,
            loss: None,
            eval: None,
        })
    }

    /// Turns summary reporting on or off.
    pub fn with_summary(mut self, do_summary: bool) -> Self {
        self.core.do_summary = do_summary;
        self
    }

    /// Derives a validation view of this layer.
    ///
    /// The view shares the `var_list` and the moving averages of this layer,
    /// starts with no outputs and must be set up on its own inputs. It resolves
    /// every parameter by lookup and never allocates.
    pub fn get_val_copy(&self) -> Self {
        Self {
            core: self.core.view(),
            layer: self.layer.clone(),
            moving_average_decay: self.moving_average_decay,
            is_val: true,
            shared: Arc::clone(&self.shared),
            data: None,
            loss: None,
            eval: None,
        }
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn moving_average_decay(&self) -> Option<f32> {
        self.moving_average_decay
    }

    /// Whether `other` shares this layer's parameter bookkeeping.
    pub fn shares_var_list_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// The moving average shadow of `param`, if it is tracked.
    pub fn average_of(&self, param: ParamId) -> Option<ParamId> {
        self.shared.read().ema.as_ref()?.average(param)
    }

    fn collection(&self) -> &'static str {
        if self.is_val {
            VALID_SUMMARIES
        } else {
            TRAIN_SUMMARIES
        }
    }

    /// Makes evaluating the training output also update the moving averages.
    fn attach_average_update(&mut self, graph: &mut Graph, op: OpId) -> Result<()> {
        if let Some(data) = self.data {
            self.data = Some(graph.identity(data, &[op], "Identity")?);
        }

        Ok(())
    }
}

impl<L: Layer> Block for ProcessingLayer<L> {
    fn core(&self) -> &BlockCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BlockCore {
        &mut self.core
    }

    fn pre_setup_shared(&mut self, ctx: &mut Context) -> Result<()> {
        if let Some(decay) = self.moving_average_decay {
            let ema = ExponentialMovingAverage::new(decay, Some(ctx.global_step()));
            self.shared.write().ema = Some(ema);
        }

        Ok(())
    }

    /// A failed first build drops the parameters it registered from the
    /// `var_list`. They stay in the graph, so retrying fails with
    /// `VariableExists`.
    fn build(&mut self, ctx: &mut Context, inputs: &[Tensor]) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let registered = shared.read().var_list.len();
        let mut scope = LayerScope {
            ctx,
            block: self.core.name(),
            state: self.core.state(),
            shared: &shared,
        };

        let outputs = match self.layer.build(&mut scope, inputs) {
            Ok(outputs) => outputs,
            Err(e) => {
                if self.core.state() == SetupState::Pending {
                    shared.write().var_list.truncate(registered);
                }
                return Err(e);
            }
        };
        self.data = Some(outputs.data);
        self.loss = outputs.loss;
        self.eval = outputs.eval;
        Ok(())
    }

    fn post_setup(&mut self, ctx: &mut Context) -> Result<()> {
        let ema_op = self.shared.read().ema_op;
        if let (false, Some(op)) = (self.is_val, ema_op) {
            self.attach_average_update(&mut ctx.graph, op)?;
        }

        if !self.core.do_summary {
            return Ok(());
        }

        let name = self.core.name();
        let collection = self.collection();
        let graph = &mut ctx.graph;

        if let Some(data) = self.data {
            graph.add_summary(
                &format!("{name}/activations"),
                data,
                SummaryKind::Histogram,
                collection,
            );
            graph.add_summary(
                &format!("{name}/sparsity"),
                data,
                SummaryKind::Sparsity,
                collection,
            );
        }

        if let Some(loss) = self.loss {
            graph.add_summary(&format!("{name}/loss"), loss, SummaryKind::Scalar, collection);
        }

        Ok(())
    }

    fn post_setup_shared(&mut self, ctx: &mut Context) -> Result<()> {
        let graph = &mut ctx.graph;
        let mut guard = self.shared.write();
        let shared = &mut *guard;
        let var_list = shared.var_list.clone();

        if let Some(ema) = shared.ema.as_mut() {
            shared.ema_op = Some(ema.apply(graph, &var_list)?);
            info!(
                block = self.core.name(), decay = ema.decay(), variables = var_list.len();
                "tracking moving averages"
            );
        }

        let ema_op = shared.ema_op;
        let averages: Vec<Option<ParamId>> = var_list
            .iter()
            .map(|&param| shared.ema.as_ref().and_then(|ema| ema.average(param)))
            .collect();
        drop(guard);

        if let Some(op) = ema_op {
            self.attach_average_update(graph, op)?;
        }

        if !self.core.do_summary {
            return Ok(());
        }

        for (&param, average) in var_list.iter().zip(averages) {
            let tag = graph.variable_name(param).to_string();
            let kind = if graph.variable_shape(param).is_scalar() {
                SummaryKind::Scalar
            } else {
                SummaryKind::Histogram
            };

            let read = graph.read(param);
            graph.add_summary(&tag, read, kind, TRAIN_SUMMARIES);

            if let Some(average) = average {
                let read = graph.read(average);
                graph.add_summary(&format!("{tag}_average"), read, kind, TRAIN_SUMMARIES);
            }
        }

        debug!(block = self.core.name(); "registered variable summaries");
        Ok(())
    }

    fn data(&self) -> Option<Tensor> {
        self.data
    }
}

impl<L: Layer + 'static> Processing for ProcessingLayer<L> {
    fn loss(&self) -> Option<Tensor> {
        self.loss
    }

    fn eval(&self) -> Option<Tensor> {
        self.eval
    }

    fn var_list(&self) -> Vec<ParamId> {
        self.shared.read().var_list.clone()
    }

    fn is_val(&self) -> bool {
        self.is_val
    }

    fn val_copy(&self) -> Box<dyn Processing> {
        Box::new(self.get_val_copy())
    }
}
