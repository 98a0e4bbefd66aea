//! Runs a noisy GHZ-style circuit twice on the CPU and twice on the GPU,
//! printing how long each invocation took and the expectation value it produced.

use std::num::NonZeroU32;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dmsim::{
    benchmark::{run_benchmark, Phase},
    benchmark_circuit, Compilation, ExecutionConfig, ExecutionMode, NoisyCircuit, Precision,
};

/// Compare interpreted and GPU-compiled execution of a noisy circuit.
#[derive(Parser, Debug)]
#[command(name = "dmsim-bench")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of qubits
    #[arg(long, env = "DMSIM_QUBITS", default_value_t = 10)]
    qubits: u32,

    /// Number of shots to estimate the expectation value from
    #[arg(long, env = "DMSIM_SHOTS", default_value_t = 10000)]
    shots: u32,

    /// Compute exact expectation values instead of sampling
    #[arg(long, env = "DMSIM_ANALYTIC")]
    analytic: bool,

    /// Probability of the phase damping channel
    #[arg(long, env = "DMSIM_PROBABILITY", default_value_t = 0.2)]
    probability: f64,

    /// Invocations per execution mode
    #[arg(long, env = "DMSIM_INVOCATIONS", default_value_t = 2)]
    invocations: usize,

    /// Which execution modes to run
    #[arg(long, env = "DMSIM_MODE", value_enum, default_value_t = ModeArg::Both)]
    mode: ModeArg,

    /// Recompile the GPU program on every invocation
    #[arg(long, env = "DMSIM_NO_JIT")]
    no_jit: bool,

    /// Floating point precision on the GPU, `auto` picks double when the adapter supports it
    #[arg(long, env = "DMSIM_PRECISION", value_enum, default_value_t = PrecisionArg::Auto)]
    precision: PrecisionArg,

    /// Substring of the GPU adapter name to run on
    #[arg(long, env = "DMSIM_DEVICE")]
    device: Option<String>,

    /// Seed for shot sampling
    #[arg(long, env = "DMSIM_SEED")]
    seed: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Both,
    Baseline,
    Accelerated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrecisionArg {
    Auto,
    Single,
    Double,
}

fn gpu_precision(args: &Args) -> Result<Precision> {
    match args.precision {
        PrecisionArg::Single => Ok(Precision::Single),
        PrecisionArg::Double => Ok(Precision::Double),
        #[cfg(feature = "gpu")]
        PrecisionArg::Auto => Ok(dmsim::best_precision(args.device.as_deref())?),
        #[cfg(not(feature = "gpu"))]
        PrecisionArg::Auto => Ok(Precision::Double),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let shots = if args.analytic {
        None
    } else {
        Some(NonZeroU32::new(args.shots).ok_or_else(|| {
            anyhow::anyhow!("--shots must be positive, use --analytic for exact values")
        })?)
    };
    let circuit = benchmark_circuit(args.qubits, args.probability)?;
    info!(
        qubits = args.qubits,
        shots = ?shots,
        probability = args.probability,
        "benchmark circuit ready"
    );

    println!("Noisy circuit benchmark");
    println!(
        "  H on qubit 0, {} CNOTs in a chain, phase damping (p = {}) on qubit 0",
        circuit.entangling_gates().count(),
        args.probability
    );
    println!("  Measuring <Z> on qubit {}", args.qubits - 1);

    let mut config = ExecutionConfig::baseline(args.qubits, shots);
    config.seed = args.seed;

    if args.mode != ModeArg::Accelerated {
        println!();
        println!("== Baseline: interpreted on the CPU ==");
        run_mode(&config, &circuit, args.invocations)?;
    }

    if args.mode != ModeArg::Baseline {
        // Double precision matches the CPU engine, but not every adapter has it.
        let precision = gpu_precision(&args)?;
        let config = ExecutionConfig {
            mode: ExecutionMode::Accelerated,
            compilation: if args.no_jit {
                Compilation::None
            } else {
                Compilation::JustInTime
            },
            precision,
            device: args.device.clone(),
            ..config.clone()
        };
        if config.precision == Precision::Single {
            warn!("running the GPU in single precision, results may differ from the CPU");
        }

        println!();
        println!("== Accelerated: compiled for the GPU ==");
        run_mode(&config, &circuit, args.invocations)?;
    }

    Ok(())
}

fn run_mode(config: &ExecutionConfig, circuit: &NoisyCircuit, invocations: usize) -> Result<()> {
    for result in run_benchmark(config, circuit, invocations)? {
        let phase = match result.phase() {
            Phase::Cold => "first run",
            Phase::Warm => "repeat run",
        };
        println!("-- Invocation {} ({phase}) --", result.invocation);
        println!("{result}");
    }
    Ok(())
}
