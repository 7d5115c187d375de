use graph::{Feed, Graph, OpId, Summary, Tensor};
use log::{debug, info};

use super::{Event, Hook, KidSpec, hooks::Hooks};
use crate::{
    AkidErr, Context, Result,
    blocks::{Block, Processing},
    kongfu::KongFu,
    sensors::{Sensor, Split},
    summary::{self, LogSink, SummarySink, TRAIN_SUMMARIES, VALID_SUMMARIES},
};

const KID: &str = "kid";

/// Where a `Kid` is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KidState {
    Created,
    SetUp,
    Running,
    Stopped,
}

impl KidState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KidState::Created => "created",
            KidState::SetUp => "set up",
            KidState::Running => "running",
            KidState::Stopped => "stopped",
        }
    }
}

/// The tensors and operation a step runs, known once set up.
#[derive(Clone, Copy)]
struct TrainTargets {
    loss: Tensor,
    lr: Tensor,
    train_op: OpId,
}

/// The training loop: wires a sensor, a brain and an optimizer together and
/// practices until enough steps were taken or a hook asks to stop.
pub struct Kid {
    ctx: Context,
    sensor: Box<dyn Sensor>,
    brain: Box<dyn Processing>,
    val_brain: Option<Box<dyn Processing>>,
    kongfu: KongFu,
    spec: KidSpec,
    hooks: Hooks,
    sink: Box<dyn SummarySink>,
    state: KidState,
    targets: Option<TrainTargets>,
    step: u64,
    validated_at: Option<u64>,
    stop_requested: bool,
    loss: Option<f32>,
    lr: Option<f32>,
    precision: Option<f32>,
}

impl Kid {
    /// Creates a new `Kid`.
    ///
    /// # Arguments
    /// * `sensor` - Feeds the training and validation data.
    /// * `brain` - The network to train, it must produce a loss.
    /// * `kongfu` - The optimizer, not set up yet.
    /// * `spec` - The loop's configuration.
    ///
    /// # Returns
    /// The kid, or a configuration error if `spec` is invalid.
    pub fn new<S, P>(sensor: S, brain: P, kongfu: KongFu, spec: KidSpec) -> Result<Self>
    where
        S: Sensor + 'static,
        P: Processing + 'static,
    {
        spec.validate()?;

        let graph = match spec.seed {
            Some(seed) => Graph::seeded(seed),
            None => Graph::new(),
        };

        Ok(Self {
            ctx: Context::new(graph)?,
            sensor: Box::new(sensor),
            brain: Box::new(brain),
            val_brain: None,
            kongfu,
            spec,
            hooks: Hooks::default(),
            sink: Box::new(LogSink::new()),
            state: KidState::Created,
            targets: None,
            step: 0,
            validated_at: None,
            stop_requested: false,
            loss: None,
            lr: None,
            precision: None,
        })
    }

    /// Replaces the sink summaries are reported to, the log by default.
    pub fn with_sink<K: SummarySink + 'static>(mut self, sink: K) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Registers `hook` to run at every `event`, after the ones already there.
    pub fn register(&mut self, event: Event, hook: Hook) {
        self.hooks.register(event, hook);
    }

    pub fn state(&self) -> KidState {
        self.state
    }

    pub fn spec(&self) -> &KidSpec {
        &self.spec
    }

    /// Amount of updates done so far, mirroring the global step.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn brain(&self) -> &dyn Processing {
        self.brain.as_ref()
    }

    pub fn val_brain(&self) -> Option<&dyn Processing> {
        self.val_brain.as_deref()
    }

    pub fn kongfu(&self) -> &KongFu {
        &self.kongfu
    }

    pub fn kongfu_mut(&mut self) -> &mut KongFu {
        &mut self.kongfu
    }

    /// The training loss of the last step.
    pub fn loss(&self) -> Option<f32> {
        self.loss
    }

    /// The learning rate the last step used.
    pub fn lr(&self) -> Option<f32> {
        self.lr
    }

    /// The precision of the last validation.
    pub fn precision(&self) -> Option<f32> {
        self.precision
    }

    /// Asks the loop to stop before its next step.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Sets everything up for practicing: the sensor, the brain on the
    /// training data, its validation view on the validation data and the
    /// optimizer on the brain's loss. Runs the `TrainBegin` hooks last.
    ///
    /// # Returns
    /// An error if a block fails to set up or the brain produces no loss.
    pub fn setup(&mut self) -> Result<()> {
        self.expect_state(KidState::Created)?;

        self.sensor.setup(&mut self.ctx, &[])?;
        let num_batches = self.sensor.num_batches_per_epoch();
        self.kongfu
            .scheduler_mut()
            .fill_num_batches_per_epoch(num_batches);

        let inputs = self.sensor_outputs(Split::Train)?;
        self.brain.setup(&mut self.ctx, &inputs)?;
        let Some(loss) = self.brain.loss() else {
            return Err(AkidErr::NoLoss {
                block: self.brain.name().to_string(),
            }
            .logged());
        };

        let mut val_brain = self.brain.val_copy();
        let val_inputs = self.sensor_outputs(Split::Val)?;
        val_brain.setup(&mut self.ctx, &val_inputs)?;
        self.val_brain = Some(val_brain);

        let var_list = self.brain.var_list();
        let train_op = self.kongfu.minimize(&mut self.ctx, loss, &var_list)?;
        let lr = self.kongfu.learning_rate().ok_or_else(|| AkidErr::NoData {
            block: self.kongfu.name().to_string(),
        })?;

        self.targets = Some(TrainTargets { loss, lr, train_op });
        self.step = self.ctx.step();
        self.state = KidState::SetUp;
        info!(
            variables = var_list.len(), batches_per_epoch = num_batches;
            "kid is set up"
        );

        self.fire(Event::TrainBegin);
        Ok(())
    }

    /// Practices until `max_steps` updates were done or a stop was requested,
    /// validating along the way and once at the end.
    ///
    /// # Returns
    /// The precision of the last validation, `None` if the brain has no
    /// evaluation output, or the first error a step runs into.
    pub fn practice(&mut self) -> Result<Option<f32>> {
        self.expect_state(KidState::SetUp)?;
        let Some(TrainTargets { loss, lr, train_op }) = self.targets else {
            return Err(self.state_error(KidState::SetUp));
        };

        self.state = KidState::Running;
        info!(step = self.step, max_steps = self.spec.max_steps; "start practicing");

        while self.step < self.spec.max_steps && !self.stop_requested {
            self.fire(Event::BatchBegin);

            let mut feed = self.sensor.fill_feed(Split::Train)?;
            self.kongfu.fill_feed(&mut feed);

            let log_step = (self.step + 1) % self.spec.train_log_step == 0;
            let summaries = if log_step {
                collection(&self.ctx, TRAIN_SUMMARIES)
            } else {
                Vec::new()
            };

            let mut tensors = vec![loss, lr];
            tensors.extend(summaries.iter().map(|s| s.tensor));
            let values = self.ctx.graph.run(&tensors, &[train_op], &feed)?;

            self.step = self.ctx.step();
            self.loss = Some(values[0][[0, 0]]);
            self.lr = Some(values[1][[0, 0]]);

            if log_step {
                info!(step = self.step; "loss {:.6} lr {:.6}", values[0][[0, 0]], values[1][[0, 0]]);
                summary::flush(self.sink.as_mut(), &summaries, &values[2..], self.step);
            }

            self.fire(Event::BatchEnd);

            if self.step % self.spec.val_log_step == 0 {
                self.validate()?;
            }
        }

        if self.stop_requested {
            info!(step = self.step; "stop requested");
        }

        if self.validated_at != Some(self.step) {
            self.validate()?;
        }

        self.fire(Event::TrainEnd);
        self.state = KidState::Stopped;
        info!(step = self.step, precision:? = self.precision; "done practicing");
        Ok(self.precision)
    }

    /// Evaluates the validation brain over one pass of the validation data,
    /// without updating anything, then runs the `ValLog` hooks.
    ///
    /// Batch values are weighted by their amount of rows, so a short last
    /// batch counts for what it holds.
    ///
    /// # Returns
    /// The average precision, `None` if the brain has no evaluation output.
    pub fn validate(&mut self) -> Result<Option<f32>> {
        let Some(val_brain) = &self.val_brain else {
            return Err(self.state_error(KidState::SetUp));
        };

        let fetched: Vec<Tensor> = val_brain.loss().into_iter().chain(val_brain.eval()).collect();
        let has_loss = val_brain.loss().is_some();
        let has_eval = val_brain.eval().is_some();
        let summaries = collection(&self.ctx, VALID_SUMMARIES);
        let batches = self.sensor.num_val_batches().max(1);
        let labels = self.sensor.labels_of(Split::Val);

        let mut sums = vec![0.; fetched.len()];
        let mut rows = 0;
        for batch in 0..batches {
            let feed = self.sensor.fill_feed(Split::Val)?;
            let last = batch + 1 == batches;
            let batch_rows = labels.and_then(|y| feed.get(&y)).map_or(1, |y| y.nrows());
            rows += batch_rows;

            let mut tensors = fetched.clone();
            if last {
                tensors.extend(summaries.iter().map(|s| s.tensor));
            }

            let values = self.ctx.graph.run(&tensors, &[], &feed)?;
            for (sum, value) in sums.iter_mut().zip(&values) {
                *sum += value[[0, 0]] * batch_rows as f32;
            }

            if last {
                summary::flush(self.sink.as_mut(), &summaries, &values[fetched.len()..], self.step);
            }
        }

        let mut averages = sums.into_iter().map(|sum| sum / rows.max(1) as f32);
        let loss = if has_loss { averages.next() } else { None };
        let precision = if has_eval { averages.next() } else { None };

        if let Some(loss) = loss {
            self.sink.record_scalar("loss", loss, VALID_SUMMARIES, self.step);
        }
        if let Some(precision) = precision {
            self.sink
                .record_scalar("precision", precision, VALID_SUMMARIES, self.step);
        }
        info!(step = self.step, loss:? = loss, precision:? = precision; "validated");

        self.precision = precision;
        self.validated_at = Some(self.step);
        self.fire(Event::ValLog);
        Ok(precision)
    }

    /// Evaluates the learning rate tensor at the current global step.
    ///
    /// # Returns
    /// The rate, or an error before setup or if a placeholder rate was never
    /// assigned.
    pub fn current_lr(&mut self) -> Result<f32> {
        let Some(TrainTargets { lr, .. }) = self.targets else {
            return Err(self.state_error(KidState::SetUp));
        };

        let mut feed = Feed::new();
        self.kongfu.fill_feed(&mut feed);
        let values = self.ctx.graph.run(&[lr], &[], &feed)?;
        Ok(values[0][[0, 0]])
    }

    fn sensor_outputs(&self, split: Split) -> Result<[Tensor; 2]> {
        match (self.sensor.data_of(split), self.sensor.labels_of(split)) {
            (Some(data), Some(labels)) => Ok([data, labels]),
            _ => Err(AkidErr::NoData {
                block: self.sensor.name().to_string(),
            }),
        }
    }

    fn fire(&mut self, event: Event) {
        let mut hooks = self.hooks.take(event);
        debug!(event:? = event, hooks = hooks.len(); "running hooks");

        for hook in hooks.iter_mut() {
            hook(self);
        }

        self.hooks.restore(event, hooks);
    }

    fn expect_state(&self, expected: KidState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.state_error(expected))
        }
    }

    fn state_error(&self, expected: KidState) -> AkidErr {
        AkidErr::InvalidState {
            block: KID.to_string(),
            expected: expected.as_str(),
            got: self.state.as_str(),
        }
    }
}

fn collection(ctx: &Context, name: &str) -> Vec<Summary> {
    ctx.graph.summaries(name).into_iter().cloned().collect()
}
