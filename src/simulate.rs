use std::num::NonZeroU32;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::debug;

use crate::{
    circuit::{CircuitCreationError, NoisyCircuit},
    config::ExecutionConfig,
    density_matrix::DensityMatrix,
    error::SimulationError,
};

/// The largest number of qubits the CPU engine accepts.
/// A density matrix of this size takes up 1 GiB.
pub const MAX_CPU_QUBITS: u32 = 13;

/// Apply every operation of `circuit` to the zero state.
///
/// This implementation runs exclusively on the CPU making no use of GPU acceleration.
pub fn simulate_circuit(circuit: &NoisyCircuit) -> Result<DensityMatrix, SimulationError> {
    let n = circuit.qubits();
    if n > MAX_CPU_QUBITS {
        return Err(SimulationError::TooManyQubits {
            qubits: n,
            max: MAX_CPU_QUBITS,
        });
    }
    let mut rho = DensityMatrix::zero(n);
    for &operation in circuit.operations() {
        rho.apply_operation(operation);
    }
    Ok(rho)
}

/// The exact expectation value of the circuit's observable.
pub fn expectation_value(circuit: &NoisyCircuit) -> Result<f64, SimulationError> {
    let observable = circuit.observable();
    simulate_circuit(circuit)?.expectation(observable).ok_or_else(|| {
        CircuitCreationError::InvalidQubitIndex {
            index: observable.qubit(),
            qubits: circuit.qubits(),
        }
        .into()
    })
}

/// Turn the measured probabilities of a Pauli Z observable into an expectation value.
///
/// With `shots`, the value is estimated from that many samples of the measured qubit,
/// otherwise it is exact.
pub fn pauli_z_expectation(
    trace: f64,
    probability_one: f64,
    shots: Option<NonZeroU32>,
    rng: &mut impl Rng,
) -> f64 {
    match shots {
        None => trace - 2.0 * probability_one,
        Some(shots) => {
            let shots = shots.get();
            // Rounding errors may push the probability slightly outside of [0, 1].
            let p = (probability_one / trace).clamp(0.0, 1.0);
            let ones = (0..shots).filter(|_| rng.random_bool(p)).count() as f64;
            (f64::from(shots) - 2.0 * ones) / f64::from(shots)
        }
    }
}

pub(crate) fn sampler(seed: Option<u64>) -> SmallRng {
    match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    }
}

/// Executes circuits by interpreting them on the CPU.
///
/// Nothing is kept between invocations: every call starts from a freshly allocated zero state.
pub struct Baseline {
    qubits: u32,
    shots: Option<NonZeroU32>,
    rng: SmallRng,
}
impl Baseline {
    pub fn new(config: &ExecutionConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Baseline {
            qubits: config.qubits,
            shots: config.shots,
            rng: sampler(config.seed),
        })
    }

    pub fn invoke(&mut self, circuit: &NoisyCircuit) -> Result<f64, SimulationError> {
        check_wires(circuit, self.qubits)?;
        debug!(qubits = circuit.qubits(), "interpreting circuit on the CPU");
        let rho = simulate_circuit(circuit)?;
        let observable = circuit.observable();
        Ok(pauli_z_expectation(
            rho.trace(),
            rho.probability_one(observable.qubit()),
            self.shots,
            &mut self.rng,
        ))
    }
}

pub(crate) fn check_wires(circuit: &NoisyCircuit, wires: u32) -> Result<(), SimulationError> {
    if circuit.qubits() > wires {
        return Err(SimulationError::WireCountMismatch {
            circuit: circuit.qubits(),
            device: wires,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_expectation() {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(pauli_z_expectation(1.0, 0.25, None, &mut rng), 0.5);
    }

    #[test]
    fn certain_outcomes() {
        let mut rng = SmallRng::seed_from_u64(1);
        let shots = NonZeroU32::new(100);
        assert_eq!(pauli_z_expectation(1.0, 0.0, shots, &mut rng), 1.0);
        assert_eq!(pauli_z_expectation(1.0, 1.0, shots, &mut rng), -1.0);
        assert_eq!(pauli_z_expectation(1.0, 1.0 + 1e-9, shots, &mut rng), -1.0);
    }
}
