use graph::Tensor;
use log::debug;
use serde_json::Value;

use crate::{AkidErr, Context, Result};

/// Where a block stands in its setup lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    /// Never set up. The next setup runs the shared phases and allocates.
    Pending,
    /// Set up at least once. Later setups look their parameters up.
    Live,
    /// A read only view over another block's shared state. It never runs the
    /// shared phases and never allocates.
    View,
}

impl SetupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupState::Pending => "pending",
            SetupState::Live => "live",
            SetupState::View => "a view",
        }
    }
}

/// The state every block carries.
#[derive(Debug, Clone)]
pub struct BlockCore {
    name: String,
    state: SetupState,
    pub do_summary: bool,
    /// Side channel metadata, free for users to fill.
    pub bag: Option<Value>,
}

impl BlockCore {
    /// Creates a new `BlockCore`.
    ///
    /// # Arguments
    /// * `name` - The block name, also the graph scope it builds in.
    ///
    /// # Returns
    /// A pending core, or an error if `name` is empty.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(AkidErr::MissingName.logged());
        }

        Ok(Self {
            name: name.to_string(),
            state: SetupState::Pending,
            do_summary: true,
            bag: None,
        })
    }

    /// A core in the `View` state sharing this one's identity.
    pub fn view(&self) -> Self {
        Self {
            state: SetupState::View,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    pub fn is_setup(&self) -> bool {
        self.state != SetupState::Pending
    }
}

/// A unit of graph construction with a two phase setup protocol.
///
/// `setup` drives the phases in order inside the scope named after the block:
/// 1. `pre_setup`
/// 2. `pre_setup_shared`, only on the first setup of a non view block
/// 3. `build`
/// 4. `post_setup`
/// 5. `post_setup_shared`, only on the first setup of a non view block
///
/// Only the per call phases run on later setups, so one time bookkeeping
/// (parameters, moving averages, parameter summaries) happens once.
pub trait Block {
    fn core(&self) -> &BlockCore;

    fn core_mut(&mut self) -> &mut BlockCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn pre_setup(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn pre_setup_shared(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// Builds the block on `inputs`. Must leave `data` defined.
    fn build(&mut self, ctx: &mut Context, inputs: &[Tensor]) -> Result<()>;

    fn post_setup(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    fn post_setup_shared(&mut self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }

    /// The main output, `None` until the first successful setup.
    fn data(&self) -> Option<Tensor>;

    /// Runs the setup phases on `inputs`.
    ///
    /// # Arguments
    /// * `ctx` - The context to build into.
    /// * `inputs` - The tensors this block consumes.
    ///
    /// # Returns
    /// An error if any phase failed. The block scope is left in every case.
    fn setup(&mut self, ctx: &mut Context, inputs: &[Tensor]) -> Result<()> {
        let first = self.core().state() == SetupState::Pending;
        debug!(block = self.name(), first = first; "setting up");

        ctx.graph.push_scope(self.core().name());
        let result = run_phases(self, ctx, inputs, first);
        ctx.graph.pop_scope()?;
        result?;

        if first {
            self.core_mut().state = SetupState::Live;
        }

        Ok(())
    }
}

fn run_phases<B: Block + ?Sized>(
    block: &mut B,
    ctx: &mut Context,
    inputs: &[Tensor],
    first: bool,
) -> Result<()> {
    block.pre_setup(ctx)?;
    if first {
        block.pre_setup_shared(ctx)?;
    }

    block.build(ctx, inputs)?;

    block.post_setup(ctx)?;
    if first {
        block.post_setup_shared(ctx)?;
    }

    Ok(())
}
