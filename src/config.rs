use std::num::NonZeroU32;

use crate::error::SimulationError;

/// Where and how a circuit is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Interpreted on the CPU, re-executed from scratch on every invocation.
    Baseline,
    /// Compiled into GPU compute pipelines.
    Accelerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compilation {
    /// Build everything needed for an invocation from scratch every time.
    None,
    /// Compile on the first invocation of a circuit shape and reuse the result afterwards.
    JustInTime,
}

/// Floating point precision of the accelerated engine.
/// The CPU engine always uses `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    Single,
    Double,
}
impl Precision {
    /// Size of a single real number in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Precision::Single => size_of::<f32>() as u64,
            Precision::Double => size_of::<f64>() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// The number of wires on the device.
    pub qubits: u32,
    /// The number of samples to estimate expectation values from.
    /// `None` computes them exactly.
    pub shots: Option<NonZeroU32>,
    /// Case-insensitive substring of the GPU adapter name to use.
    /// `None` picks the default adapter.
    pub device: Option<String>,
    pub mode: ExecutionMode,
    pub compilation: Compilation,
    pub precision: Precision,
    /// Seed of the shot sampler. Seeded from the OS when `None`.
    pub seed: Option<u64>,
}
impl ExecutionConfig {
    pub fn baseline(qubits: u32, shots: Option<NonZeroU32>) -> Self {
        ExecutionConfig {
            qubits,
            shots,
            device: None,
            mode: ExecutionMode::Baseline,
            compilation: Compilation::None,
            precision: Precision::Double,
            seed: None,
        }
    }

    pub fn accelerated(qubits: u32, shots: Option<NonZeroU32>) -> Self {
        ExecutionConfig {
            qubits,
            shots,
            device: None,
            mode: ExecutionMode::Accelerated,
            compilation: Compilation::JustInTime,
            precision: Precision::Double,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_compilation(mut self, compilation: Compilation) -> Self {
        self.compilation = compilation;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Reject combinations that no engine can run.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.qubits == 0 {
            return Err(SimulationError::UnsupportedConfiguration(
                "the device needs at least one wire".to_string(),
            ));
        }
        match (self.mode, self.compilation) {
            (ExecutionMode::Baseline, Compilation::JustInTime) => {
                Err(SimulationError::UnsupportedConfiguration(
                    "the baseline engine has no compiled form".to_string(),
                ))
            }
            (ExecutionMode::Accelerated, _) if !cfg!(feature = "gpu") => {
                Err(SimulationError::UnsupportedConfiguration(
                    "built without the `gpu` feature".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_cannot_compile() {
        let config = ExecutionConfig::baseline(4, None).with_compilation(Compilation::JustInTime);
        assert!(matches!(
            config.validate(),
            Err(SimulationError::UnsupportedConfiguration(_))
        ));
        assert!(ExecutionConfig::baseline(4, None).validate().is_ok());
    }

    #[test]
    fn zero_wires() {
        assert!(ExecutionConfig::baseline(0, None).validate().is_err());
    }
}
