use tracing::trace;

use crate::{
    circuit::NoisyCircuit,
    config::{ExecutionConfig, ExecutionMode},
    error::SimulationError,
    simulate::Baseline,
};

#[cfg(feature = "gpu")]
use crate::simulate_gpu::{Accelerated, PendingExpectation};

/// Runs circuits in the execution mode chosen by an [`ExecutionConfig`].
pub enum Executor {
    Baseline(Baseline),
    #[cfg(feature = "gpu")]
    Accelerated(Accelerated),
}
impl Executor {
    pub fn new(config: &ExecutionConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        match config.mode {
            ExecutionMode::Baseline => Ok(Executor::Baseline(Baseline::new(config)?)),
            #[cfg(feature = "gpu")]
            ExecutionMode::Accelerated => Ok(Executor::Accelerated(Accelerated::new(config)?)),
            #[cfg(not(feature = "gpu"))]
            ExecutionMode::Accelerated => unreachable!("rejected by ExecutionConfig::validate"),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Executor::Baseline(_) => ExecutionMode::Baseline,
            #[cfg(feature = "gpu")]
            Executor::Accelerated(_) => ExecutionMode::Accelerated,
        }
    }

    /// Start executing `circuit`.
    ///
    /// The returned result may still be computing, see [`Pending::block_until_ready`].
    pub fn invoke(&mut self, circuit: &NoisyCircuit) -> Result<Pending, SimulationError> {
        trace!(mode = ?self.mode(), "invoking circuit");
        match self {
            Executor::Baseline(baseline) => Ok(Pending::Ready(baseline.invoke(circuit)?)),
            #[cfg(feature = "gpu")]
            Executor::Accelerated(accelerated) => {
                Ok(Pending::Device(accelerated.invoke(circuit)?))
            }
        }
    }
}

/// The result of an invocation, possibly still being computed on a device.
pub enum Pending {
    Ready(f64),
    #[cfg(feature = "gpu")]
    Device(PendingExpectation),
}
impl Pending {
    /// Wait for all outstanding work and return the expectation value.
    pub fn block_until_ready(self) -> Result<f64, SimulationError> {
        match self {
            Pending::Ready(value) => Ok(value),
            #[cfg(feature = "gpu")]
            Pending::Device(pending) => pending.block_until_ready(),
        }
    }
}
