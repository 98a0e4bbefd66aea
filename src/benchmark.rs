//! Timing of circuit invocations.
//!
//! The first invocation of an executor pays for any one-time setup such as acquiring the GPU
//! and compiling the program, so it is reported separately from the ones that follow.

use std::{
    fmt::Display,
    time::{Duration, Instant},
};

use tracing::info;

use crate::{
    circuit::NoisyCircuit,
    config::{ExecutionConfig, ExecutionMode},
    error::SimulationError,
    executor::Executor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The first invocation.
    Cold,
    /// Any later invocation.
    Warm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub mode: ExecutionMode,
    /// 1-based number of the invocation on its executor.
    pub invocation: usize,
    pub elapsed: Duration,
    pub expectation: f64,
}
impl BenchmarkResult {
    pub fn phase(&self) -> Phase {
        if self.invocation <= 1 {
            Phase::Cold
        } else {
            Phase::Warm
        }
    }
}
impl Display for BenchmarkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Duration: {:.4} seconds", self.elapsed.as_secs_f64())?;
        write!(f, "Expectation value: {}", self.expectation)
    }
}

/// Time a single invocation of `circuit`, including the wait for any deferred device work.
pub fn time_invocation(
    executor: &mut Executor,
    circuit: &NoisyCircuit,
) -> Result<(Duration, f64), SimulationError> {
    let start = Instant::now();
    let pending = executor.invoke(circuit)?;
    let expectation = pending.block_until_ready()?;
    Ok((start.elapsed(), expectation))
}

/// Run `circuit` `invocations` times in a row on a single executor built from `config`.
pub fn run_benchmark(
    config: &ExecutionConfig,
    circuit: &NoisyCircuit,
    invocations: usize,
) -> Result<Vec<BenchmarkResult>, SimulationError> {
    let mut executor = Executor::new(config)?;
    (1..=invocations)
        .map(|invocation| {
            let (elapsed, expectation) = time_invocation(&mut executor, circuit)?;
            let result = BenchmarkResult {
                mode: executor.mode(),
                invocation,
                elapsed,
                expectation,
            };
            info!(
                mode = ?result.mode,
                invocation,
                phase = ?result.phase(),
                elapsed_s = elapsed.as_secs_f64(),
                expectation,
                "invocation finished"
            );
            Ok(result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_two_lines() {
        let result = BenchmarkResult {
            mode: ExecutionMode::Baseline,
            invocation: 2,
            elapsed: Duration::from_micros(1_234_567),
            expectation: -0.0132,
        };
        assert_eq!(
            result.to_string(),
            "Duration: 1.2346 seconds\nExpectation value: -0.0132"
        );
        assert_eq!(result.phase(), Phase::Warm);
    }
}
