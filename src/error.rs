use thiserror::Error;

use crate::{circuit::CircuitCreationError, config::Precision};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    InvalidCircuit(#[from] CircuitCreationError),

    #[error("Circuit uses {circuit} qubits but the device only has {device} wires")]
    WireCountMismatch { circuit: u32, device: u32 },

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("No GPU available: {0}")]
    GpuUnavailable(String),

    #[error("Requested device {requested:?} but the GPU context is already bound to {active:?}")]
    DeviceConflict { requested: String, active: String },

    #[error("Adapter {adapter:?} does not support {precision:?} precision")]
    PrecisionUnsupported {
        adapter: String,
        precision: Precision,
    },

    #[error("A density matrix of {qubits} qubits does not fit on the device (at most {max} qubits)")]
    TooManyQubits { qubits: u32, max: u32 },

    #[error("Failed to read back results from the device: {0}")]
    Readback(String),
}
