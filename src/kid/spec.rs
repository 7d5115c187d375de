use serde::{Deserialize, Serialize};

use crate::{AkidErr, Result};

/// The specification for the `Kid` struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KidSpec {
    /// Amount of updates after which practicing stops.
    pub max_steps: u64,
    /// Training loss and summaries are reported every this many steps.
    pub train_log_step: u64,
    /// The validation brain is evaluated every this many steps.
    pub val_log_step: u64,
    /// Seeds parameter initialization, entropy from the OS if `None`.
    pub seed: Option<u64>,
}

impl Default for KidSpec {
    fn default() -> Self {
        Self {
            max_steps: 20_000,
            train_log_step: 20,
            val_log_step: 1_000,
            seed: None,
        }
    }
}

impl KidSpec {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.train_log_step == 0 || self.val_log_step == 0 {
            return Err(AkidErr::Config(format!(
                "logging periods should be positive, got train_log_step {} and val_log_step {}",
                self.train_log_step, self.val_log_step
            ))
            .logged());
        }

        Ok(())
    }
}
