use std::num::NonZeroU32;

use divan::{black_box, Bencher};
use dmsim::{benchmark_circuit, ExecutionConfig, Executor, NoisyCircuit};

fn main() {
    divan::main();
}

const SHOTS: Option<NonZeroU32> = NonZeroU32::new(10000);

fn setup(qubits: u32) -> NoisyCircuit {
    benchmark_circuit(qubits, 0.2).unwrap()
}

fn invoke(executor: &mut Executor, circuit: &NoisyCircuit) -> f64 {
    executor
        .invoke(circuit)
        .unwrap()
        .block_until_ready()
        .unwrap()
}

mod cpu {
    use super::*;

    #[divan::bench(args = [4, 8, 10])]
    fn baseline(bencher: Bencher, qubits: u32) {
        let circuit = setup(qubits);
        let mut executor = Executor::new(&ExecutionConfig::baseline(qubits, SHOTS)).unwrap();
        bencher.bench_local(move || invoke(&mut executor, black_box(&circuit)));
    }
}

#[cfg(feature = "gpu")]
mod gpu {
    use super::*;
    use dmsim::{initialize_gpu, Compilation, Precision};

    fn config(qubits: u32) -> ExecutionConfig {
        ExecutionConfig::accelerated(qubits, SHOTS).with_precision(Precision::Single)
    }

    /// Every invocation compiles the program from scratch.
    #[divan::bench(args = [4, 8, 10])]
    fn cold(bencher: Bencher, qubits: u32) {
        initialize_gpu(None).unwrap();
        let circuit = setup(qubits);
        let config = config(qubits).with_compilation(Compilation::None);
        let mut executor = Executor::new(&config).unwrap();
        bencher.bench_local(move || invoke(&mut executor, black_box(&circuit)));
    }

    #[divan::bench(args = [4, 8, 10])]
    fn warm(bencher: Bencher, qubits: u32) {
        initialize_gpu(None).unwrap();
        let circuit = setup(qubits);
        let mut executor = Executor::new(&config(qubits)).unwrap();
        invoke(&mut executor, &circuit);
        bencher.bench_local(move || invoke(&mut executor, black_box(&circuit)));
    }
}
