pub mod benchmark;
mod circuit;
mod config;
mod density_matrix;
mod error;
mod executor;
mod simulate;
#[cfg(feature = "gpu")]
mod simulate_gpu;

pub use circuit::{
    benchmark_circuit, CircuitCreationError, CircuitShape, NoisyCircuit, Observable, Operation,
    OperationShape,
};
pub use config::{Compilation, ExecutionConfig, ExecutionMode, Precision};
pub use density_matrix::DensityMatrix;
pub use error::SimulationError;
pub use executor::{Executor, Pending};
pub use simulate::{
    expectation_value, pauli_z_expectation, simulate_circuit, Baseline, MAX_CPU_QUBITS,
};

#[cfg(feature = "gpu")]
pub use simulate_gpu::{
    best_precision, initialize_gpu, Accelerated, PendingExpectation, MAX_GPU_QUBITS,
};
