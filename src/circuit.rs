use thiserror::Error;

/// A single step of a noisy circuit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    H(u32),
    X(u32),

    /// `Cnot(control, target)`
    Cnot(u32, u32),

    /// Phase damping on a qubit with the given probability, γ.
    ///
    /// Uses the Kraus operators
    /// ```text
    /// K0 = [[1, 0], [0, √(1-γ)]]
    /// K1 = [[0, 0], [0, √γ]]
    /// ```
    PhaseDamping(u32, f64),
}

/// The quantity measured at the end of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Observable {
    PauliZ(u32),
}
impl Observable {
    pub fn qubit(&self) -> u32 {
        match *self {
            Observable::PauliZ(a) => a,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoisyCircuit {
    /// The number of qubits in the circuit.
    qubits: u32,
    /// The ordered list of operations in the circuit.
    operations: Vec<Operation>,
    observable: Observable,
}
impl NoisyCircuit {
    pub fn new(
        qubits: u32,
        operations: impl IntoIterator<Item = Operation>,
        observable: Observable,
    ) -> Result<Self, CircuitCreationError> {
        if qubits == 0 {
            return Err(CircuitCreationError::NoQubits);
        }
        let operations: Vec<Operation> = operations.into_iter().collect();
        let check_index = |a| {
            if a >= qubits {
                return Err(CircuitCreationError::InvalidQubitIndex { index: a, qubits });
            }
            Ok(())
        };
        for &operation in &operations {
            match operation {
                Operation::H(a) => check_index(a)?,
                Operation::X(a) => check_index(a)?,
                Operation::Cnot(a, b) => {
                    check_index(a)?;
                    check_index(b)?;
                    if a == b {
                        return Err(CircuitCreationError::DuplicateQubit { index: a });
                    }
                }
                Operation::PhaseDamping(a, probability) => {
                    check_index(a)?;
                    if !(0.0..=1.0).contains(&probability) {
                        return Err(CircuitCreationError::InvalidProbability { probability });
                    }
                }
            }
        }
        check_index(observable.qubit())?;
        Ok(NoisyCircuit {
            qubits,
            operations,
            observable,
        })
    }

    /// The number of qubits in the circuit.
    pub fn qubits(&self) -> u32 {
        self.qubits
    }

    /// The operations in the circuit, in the order that they are applied.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn observable(&self) -> Observable {
        self.observable
    }

    /// The `(control, target)` pairs of every entangling gate, in order.
    pub fn entangling_gates(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.operations.iter().filter_map(|op| match *op {
            Operation::Cnot(a, b) => Some((a, b)),
            _ => None,
        })
    }

    /// The damping probabilities of the circuit, in order.
    pub fn damping_probabilities(&self) -> impl Iterator<Item = f64> + '_ {
        self.operations.iter().filter_map(|op| match *op {
            Operation::PhaseDamping(_, p) => Some(p),
            _ => None,
        })
    }

    /// The structure of the circuit with all continuous parameters removed.
    pub fn shape(&self) -> CircuitShape {
        CircuitShape {
            qubits: self.qubits,
            operations: self
                .operations
                .iter()
                .map(|&op| match op {
                    Operation::H(a) => OperationShape::H(a),
                    Operation::X(a) => OperationShape::X(a),
                    Operation::Cnot(a, b) => OperationShape::Cnot(a, b),
                    Operation::PhaseDamping(a, _) => OperationShape::PhaseDamping(a),
                })
                .collect(),
            observable: self.observable,
        }
    }
}

/// Everything about a circuit that a compiled program depends on.
///
/// Two circuits that only differ in their damping probabilities have the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CircuitShape {
    pub qubits: u32,
    pub operations: Vec<OperationShape>,
    pub observable: Observable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationShape {
    H(u32),
    X(u32),
    Cnot(u32, u32),
    PhaseDamping(u32),
}

/// Create the benchmark circuit on `qubits` qubits:
/// a Hadamard on qubit 0, a linear chain of CNOTs from qubit 0 to the last qubit,
/// and phase damping with the given `probability` on qubit 0.
/// The Pauli Z expectation value is measured on the last qubit.
pub fn benchmark_circuit(
    qubits: u32,
    probability: f64,
) -> Result<NoisyCircuit, CircuitCreationError> {
    if qubits == 0 {
        return Err(CircuitCreationError::NoQubits);
    }
    let chain = (0..qubits - 1).map(|i| Operation::Cnot(i, i + 1));
    NoisyCircuit::new(
        qubits,
        std::iter::once(Operation::H(0))
            .chain(chain)
            .chain([Operation::PhaseDamping(0, probability)]),
        Observable::PauliZ(qubits - 1),
    )
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CircuitCreationError {
    #[error("A circuit needs at least one qubit")]
    NoQubits,
    #[error("Invalid qubit index {index} for circuit of {qubits} qubits")]
    InvalidQubitIndex { index: u32, qubits: u32 },
    #[error("Qubit {index} is used twice by the same gate")]
    DuplicateQubit { index: u32 },
    #[error("Invalid probability {probability}, expected a value in [0, 1]")]
    InvalidProbability { probability: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_ignores_probability() {
        let a = benchmark_circuit(4, 0.1).unwrap();
        let b = benchmark_circuit(4, 0.7).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.shape(), b.shape());
        assert_ne!(a.shape(), benchmark_circuit(5, 0.1).unwrap().shape());
    }

    #[test]
    fn single_qubit_benchmark() {
        let circuit = benchmark_circuit(1, 0.5).unwrap();
        assert_eq!(circuit.entangling_gates().count(), 0);
        assert_eq!(circuit.observable(), Observable::PauliZ(0));
    }

    #[test]
    fn nan_probability() {
        assert!(matches!(
            benchmark_circuit(3, f64::NAN),
            Err(CircuitCreationError::InvalidProbability { .. })
        ));
    }
}
