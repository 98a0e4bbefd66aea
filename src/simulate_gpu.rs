use std::{
    cmp::min,
    collections::{hash_map::Entry, HashMap},
    f64::consts::FRAC_1_SQRT_2,
    num::NonZeroU32,
    sync::{mpsc, Arc, OnceLock},
};

use rand::{rngs::SmallRng, SeedableRng};
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use crate::{
    circuit::{CircuitShape, NoisyCircuit, OperationShape},
    config::{Compilation, ExecutionConfig, Precision},
    error::SimulationError,
    simulate::{check_wires, pauli_z_expectation, sampler},
};

const WORKGROUP_SIZE: u32 = 64;
/// The largest workgroup count guaranteed to be accepted in a single dimension.
const MAX_WORKGROUPS: u32 = 65535;
const U32_SIZE: u64 = size_of::<u32>() as u64;

const SHADER_SOURCE: &str = include_str!("simulate_gpu.wgsl");
const SINGLE_PRECISION_ALIAS: &str = "alias Real = f32;";
const DOUBLE_PRECISION_ALIAS: &str = "alias Real = f64;";

/// Density matrix entries are addressed with a `u32` on the GPU.
pub const MAX_GPU_QUBITS: u32 = 15;

/// Initialize the global GPU context.
///
/// This will happen automatically the first time it's needed,
/// but this can be called to pre-empt that work at a more appropriate time.
///
/// `device` selects the adapter whose name contains the given string.
pub fn initialize_gpu(device: Option<&str>) -> Result<(), SimulationError> {
    get_gpu(device).map(|_| ())
}
fn get_gpu(device: Option<&str>) -> Result<&'static GpuContext, SimulationError> {
    let gpu = GPU_CONTEXT
        .get_or_init(|| pollster::block_on(GpuContext::new(device)))
        .as_ref()
        .map_err(|e| SimulationError::GpuUnavailable(e.clone()))?;
    if let Some(requested) = device {
        if !adapter_matches(&gpu.adapter_info, requested) {
            return Err(SimulationError::DeviceConflict {
                requested: requested.to_string(),
                active: gpu.adapter_info.name.clone(),
            });
        }
    }
    Ok(gpu)
}

/// The most precise [`Precision`] the GPU supports.
///
/// Acquires the GPU like [`initialize_gpu`].
pub fn best_precision(device: Option<&str>) -> Result<Precision, SimulationError> {
    let gpu = get_gpu(device)?;
    if gpu.supports(Precision::Double) {
        Ok(Precision::Double)
    } else {
        Ok(Precision::Single)
    }
}

fn adapter_matches(info: &wgpu::AdapterInfo, requested: &str) -> bool {
    info.name
        .to_lowercase()
        .contains(&requested.to_lowercase())
}

/// The global GPU context.
/// Includes the initialized device and the layouts shared by every compiled program.
static GPU_CONTEXT: OnceLock<Result<GpuContext, String>> = OnceLock::new();
struct GpuContext {
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,

    global_bind_group_layout: wgpu::BindGroupLayout,
    op_bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}
impl GpuContext {
    async fn new(selection: Option<&str>) -> Result<GpuContext, String> {
        let instance = wgpu::Instance::new(&Default::default());
        let adapter = match selection {
            Some(name) => instance
                .enumerate_adapters(wgpu::Backends::all())
                .into_iter()
                .find(|adapter| adapter_matches(&adapter.get_info(), name))
                .ok_or_else(|| format!("no adapter matches {name:?}"))?,
            None => instance
                .request_adapter(&Default::default())
                .await
                .ok_or_else(|| "no adapter found".to_string())?,
        };
        let adapter_info = adapter.get_info();
        info!(adapter = ?adapter_info, "using wgpu adapter");

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("dmsim"),
                    // Double precision is only requested when available,
                    // programs needing it check for it when they are compiled.
                    required_features: adapter.features() & wgpu::Features::SHADER_F64,
                    required_limits: adapter.limits(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| e.to_string())?;

        let global_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Global"),
                entries: &[
                    // dims
                    layout_entry(0, wgpu::BufferBindingType::Uniform),
                    // rho_re
                    layout_entry(1, wgpu::BufferBindingType::Storage { read_only: false }),
                    // rho_im
                    layout_entry(2, wgpu::BufferBindingType::Storage { read_only: false }),
                    // params
                    layout_entry(3, wgpu::BufferBindingType::Storage { read_only: true }),
                    // output
                    layout_entry(4, wgpu::BufferBindingType::Storage { read_only: false }),
                ],
            });
        let op_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Op"),
                entries: &[layout_entry(0, wgpu::BufferBindingType::Uniform)],
            });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Density Matrix"),
            bind_group_layouts: &[&global_bind_group_layout, &op_bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(GpuContext {
            adapter_info,
            device,
            queue,
            global_bind_group_layout,
            op_bind_group_layout,
            pipeline_layout,
        })
    }

    fn supports(&self, precision: Precision) -> bool {
        match precision {
            Precision::Single => true,
            Precision::Double => self.device.features().contains(wgpu::Features::SHADER_F64),
        }
    }
}

fn layout_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// The entry points of `simulate_gpu.wgsl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    Zero,
    Hadamard,
    PauliX,
    Cnot,
    PhaseDamping,
    Expectation,
}
impl Kernel {
    const ALL: [Kernel; 6] = [
        Kernel::Zero,
        Kernel::Hadamard,
        Kernel::PauliX,
        Kernel::Cnot,
        Kernel::PhaseDamping,
        Kernel::Expectation,
    ];

    fn entry_point(&self) -> &'static str {
        match self {
            Kernel::Zero => "zero",
            Kernel::Hadamard => "hadamard",
            Kernel::PauliX => "pauli_x",
            Kernel::Cnot => "cnot",
            Kernel::PhaseDamping => "phase_damping",
            Kernel::Expectation => "expectation",
        }
    }
}

/// A single recorded dispatch.
struct Step {
    kernel: Kernel,
    bind_group: wgpu::BindGroup,
    workgroups: u32,
}

/// The device-resident density matrix of a fixed number of qubits.
///
/// Every program reinitializes it before use,
/// so it is shared by all programs of the same width.
struct DeviceState {
    qubits: u32,
    dims_buf: wgpu::Buffer,
    rho_re_buf: wgpu::Buffer,
    rho_im_buf: wgpu::Buffer,
}
impl DeviceState {
    fn allocate(gpu: &GpuContext, n: u32, precision: Precision) -> Result<Self, SimulationError> {
        let limits = gpu.device.limits();
        let max_bytes = min(
            u64::from(limits.max_storage_buffer_binding_size),
            limits.max_buffer_size,
        );
        let matrix_bytes = |n: u32| (1u64 << (2 * n)) * precision.size();
        if n > MAX_GPU_QUBITS || matrix_bytes(n) > max_bytes {
            let max = (0..=MAX_GPU_QUBITS)
                .rev()
                .find(|&m| matrix_bytes(m) <= max_bytes)
                .unwrap_or(0);
            return Err(SimulationError::TooManyQubits { qubits: n, max });
        }
        debug!(qubits = n, bytes = 2 * matrix_bytes(n), "allocating density matrix");

        let dim: u32 = 1 << n;
        let entries: u32 = 1 << (2 * n);
        let dims_buf = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("dims"),
                contents: &encode_u32s(&[dim, entries, 0, 0]),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let rho_re_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rho_re"),
            size: matrix_bytes(n),
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let rho_im_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rho_im"),
            size: matrix_bytes(n),
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        Ok(DeviceState {
            qubits: n,
            dims_buf,
            rho_re_buf,
            rho_im_buf,
        })
    }
}

/// Everything needed to run circuits of a single shape on the GPU:
/// compiled pipelines, the parameter buffers and the bind groups of every dispatch.
///
/// Only the damping factors are uploaded on each run.
struct CompiledProgram {
    precision: Precision,
    /// Kept alive for the global bind group.
    _state: Arc<DeviceState>,
    pipelines: Vec<wgpu::ComputePipeline>,
    params_buf: wgpu::Buffer,
    params_len: usize,
    output_buf: wgpu::Buffer,
    global_bind_group: wgpu::BindGroup,
    steps: Vec<Step>,
}
impl CompiledProgram {
    fn compile(
        gpu: &GpuContext,
        shape: &CircuitShape,
        precision: Precision,
        state: Arc<DeviceState>,
    ) -> Self {
        let n = shape.qubits;
        debug_assert_eq!(n, state.qubits);
        debug!(qubits = n, ?precision, "compiling density matrix program");

        let source = match precision {
            Precision::Single => SHADER_SOURCE.to_string(),
            Precision::Double => {
                SHADER_SOURCE.replace(SINGLE_PRECISION_ALIAS, DOUBLE_PRECISION_ALIAS)
            }
        };
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Density Matrix"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let pipelines = Kernel::ALL
            .iter()
            .map(|kernel| {
                gpu.device
                    .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(kernel.entry_point()),
                        layout: Some(&gpu.pipeline_layout),
                        module: &module,
                        entry_point: Some(kernel.entry_point()),
                        compilation_options: Default::default(),
                        cache: None,
                    })
            })
            .collect();

        let dim: u32 = 1 << n;
        let entries: u32 = 1 << (2 * n);
        // 1/√2 followed by a damping factor per channel.
        let params_len = 1 + shape
            .operations
            .iter()
            .filter(|op| matches!(op, OperationShape::PhaseDamping(_)))
            .count();
        let params_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params"),
            size: params_len as u64 * precision.size(),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let output_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("output"),
            size: 2 * precision.size(),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let global_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Global"),
            layout: &gpu.global_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: state.dims_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: state.rho_re_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: state.rho_im_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: output_buf.as_entire_binding(),
                },
            ],
        });

        let row_bit = |a: u32| 2 * n - 1 - a;
        let col_bit = |a: u32| n - 1 - a;
        let pairs = entries / 2;
        let mut steps = vec![Self::step(gpu, Kernel::Zero, [0, 0, 0, entries])];
        let mut param = 1;
        for &op in &shape.operations {
            match op {
                OperationShape::H(a) => {
                    steps.push(Self::step(gpu, Kernel::Hadamard, [row_bit(a), 0, 0, pairs]));
                    steps.push(Self::step(gpu, Kernel::Hadamard, [col_bit(a), 0, 0, pairs]));
                }
                OperationShape::X(a) => {
                    steps.push(Self::step(gpu, Kernel::PauliX, [row_bit(a), 0, 0, pairs]));
                    steps.push(Self::step(gpu, Kernel::PauliX, [col_bit(a), 0, 0, pairs]));
                }
                OperationShape::Cnot(a, b) => {
                    steps.push(Self::step(
                        gpu,
                        Kernel::Cnot,
                        [row_bit(a), row_bit(b), 0, pairs],
                    ));
                    steps.push(Self::step(
                        gpu,
                        Kernel::Cnot,
                        [col_bit(a), col_bit(b), 0, pairs],
                    ));
                }
                OperationShape::PhaseDamping(a) => {
                    steps.push(Self::step(
                        gpu,
                        Kernel::PhaseDamping,
                        [row_bit(a), col_bit(a), param, entries],
                    ));
                    param += 1;
                }
            }
        }
        // The diagonal is indexed by a single n-bit index, so the column bit doubles as its bit.
        steps.push(Self::step(
            gpu,
            Kernel::Expectation,
            [col_bit(shape.observable.qubit()), 0, 0, dim],
        ));

        CompiledProgram {
            precision,
            _state: state,
            pipelines,
            params_buf,
            params_len,
            output_buf,
            global_bind_group,
            steps,
        }
    }

    /// Record the parameters `[a, b, param, count]` of a single dispatch.
    fn step(gpu: &GpuContext, kernel: Kernel, op: [u32; 4]) -> Step {
        let op_buf = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("op"),
                contents: &encode_u32s(&op),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.entry_point()),
            layout: &gpu.op_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: op_buf.as_entire_binding(),
            }],
        });
        let workgroups = match kernel {
            // The reduction runs in a single workgroup.
            Kernel::Expectation => 1,
            // Every kernel strides over its work items, so the count can be capped.
            _ => op[3].div_ceil(WORKGROUP_SIZE).clamp(1, MAX_WORKGROUPS),
        };
        Step {
            kernel,
            bind_group,
            workgroups,
        }
    }

    /// Submit a run of the program without waiting for it to finish.
    fn submit(
        &self,
        gpu: &'static GpuContext,
        probabilities: impl Iterator<Item = f64>,
    ) -> (wgpu::Buffer, wgpu::SubmissionIndex) {
        let params: Vec<f64> = std::iter::once(FRAC_1_SQRT_2)
            .chain(probabilities.map(|p| (1.0 - p).sqrt()))
            .collect();
        debug_assert_eq!(params.len(), self.params_len);
        gpu.queue
            .write_buffer(&self.params_buf, 0, &encode_reals(&params, self.precision));

        let mut encoder = gpu.device.create_command_encoder(&Default::default());
        for step in &self.steps {
            let mut pass = encoder.begin_compute_pass(&Default::default());
            pass.set_pipeline(&self.pipelines[step.kernel as usize]);
            pass.set_bind_group(0, &self.global_bind_group, &[]);
            pass.set_bind_group(1, &step.bind_group, &[]);
            pass.dispatch_workgroups(step.workgroups, 1, 1);
        }
        let output_size = 2 * self.precision.size();
        let output_read_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("output (Read)"),
            size: output_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&self.output_buf, 0, &output_read_buf, 0, output_size);
        let submission = gpu.queue.submit([encoder.finish()]);
        (output_read_buf, submission)
    }
}

/// Executes circuits as compiled GPU programs.
///
/// With [`Compilation::JustInTime`], a program is compiled the first time a circuit shape is seen
/// and reused for every later invocation of the same shape.
/// Programs of the same number of qubits share a single density matrix on the device,
/// so device memory grows with the number of distinct widths rather than shapes.
/// Both are released when the executor is dropped.
pub struct Accelerated {
    qubits: u32,
    shots: Option<NonZeroU32>,
    device: Option<String>,
    compilation: Compilation,
    precision: Precision,
    rng: SmallRng,
    cache: HashMap<CircuitShape, CompiledProgram>,
    states: HashMap<u32, Arc<DeviceState>>,
    compilations: usize,
}
impl Accelerated {
    /// The GPU itself is only acquired by the first invocation.
    pub fn new(config: &ExecutionConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        Ok(Accelerated {
            qubits: config.qubits,
            shots: config.shots,
            device: config.device.clone(),
            compilation: config.compilation,
            precision: config.precision,
            rng: sampler(config.seed),
            cache: HashMap::new(),
            states: HashMap::new(),
            compilations: 0,
        })
    }

    /// Start executing `circuit` on the GPU.
    ///
    /// This returns as soon as the work has been submitted,
    /// use [`PendingExpectation::block_until_ready`] to get the result.
    pub fn invoke(&mut self, circuit: &NoisyCircuit) -> Result<PendingExpectation, SimulationError> {
        check_wires(circuit, self.qubits)?;
        let gpu = get_gpu(self.device.as_deref())?;
        if !gpu.supports(self.precision) {
            return Err(SimulationError::PrecisionUnsupported {
                adapter: gpu.adapter_info.name.clone(),
                precision: self.precision,
            });
        }

        let uncached;
        let program = match self.compilation {
            Compilation::JustInTime => match self.cache.entry(circuit.shape()) {
                Entry::Occupied(entry) => {
                    debug!("reusing compiled program");
                    &*entry.into_mut()
                }
                Entry::Vacant(entry) => {
                    let state = match self.states.entry(circuit.qubits()) {
                        Entry::Occupied(state) => Arc::clone(state.get()),
                        Entry::Vacant(state) => Arc::clone(state.insert(Arc::new(
                            DeviceState::allocate(gpu, circuit.qubits(), self.precision)?,
                        ))),
                    };
                    let program = CompiledProgram::compile(gpu, entry.key(), self.precision, state);
                    self.compilations += 1;
                    &*entry.insert(program)
                }
            },
            Compilation::None => {
                let state = DeviceState::allocate(gpu, circuit.qubits(), self.precision)?;
                uncached =
                    CompiledProgram::compile(gpu, &circuit.shape(), self.precision, Arc::new(state));
                self.compilations += 1;
                &uncached
            }
        };

        let (output_read_buf, submission) = program.submit(gpu, circuit.damping_probabilities());
        let (sender, receiver) = mpsc::channel();
        output_read_buf
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                // The receiver is gone if the pending result was dropped.
                let _ = sender.send(result);
            });

        Ok(PendingExpectation {
            gpu,
            output_read_buf,
            submission,
            mapped: receiver,
            precision: self.precision,
            shots: self.shots,
            rng: SmallRng::from_rng(&mut self.rng),
        })
    }

    /// The number of programs compiled so far.
    pub fn compilations(&self) -> usize {
        self.compilations
    }

    /// The number of programs kept for reuse.
    pub fn cached_programs(&self) -> usize {
        self.cache.len()
    }

    /// The number of density matrices kept on the device, one per circuit width.
    pub fn device_states(&self) -> usize {
        self.states.len()
    }
}

/// An expectation value that is still being computed on the GPU.
pub struct PendingExpectation {
    gpu: &'static GpuContext,
    output_read_buf: wgpu::Buffer,
    submission: wgpu::SubmissionIndex,
    mapped: mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
    precision: Precision,
    shots: Option<NonZeroU32>,
    rng: SmallRng,
}
impl PendingExpectation {
    /// Wait for the device to finish and read back the result.
    pub fn block_until_ready(mut self) -> Result<f64, SimulationError> {
        self.gpu
            .device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(self.submission));
        let mapped = loop {
            match self.mapped.try_recv() {
                Ok(result) => break result,
                Err(mpsc::TryRecvError::Empty) => {
                    // The mapping callback only fires during a poll,
                    // which may not have happened yet if the submission finished early.
                    self.gpu.device.poll(wgpu::Maintain::Wait);
                }
                Err(mpsc::TryRecvError::Disconnected) => {
                    return Err(SimulationError::Readback(
                        "mapping callback was dropped".to_string(),
                    ))
                }
            }
        };
        mapped.map_err(|e| SimulationError::Readback(e.to_string()))?;

        let (trace, probability_one) = {
            let output_data = self.output_read_buf.slice(..).get_mapped_range();
            let output = bytes_to_reals(&output_data, self.precision);
            (output[0], output[1])
        };
        self.output_read_buf.unmap();
        Ok(pauli_z_expectation(
            trace,
            probability_one,
            self.shots,
            &mut self.rng,
        ))
    }
}

fn encode_u32s(values: &[u32]) -> Vec<u8> {
    debug_assert_eq!(values.len() as u64 * U32_SIZE % 16, 0);
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn encode_reals(values: &[f64], precision: Precision) -> Vec<u8> {
    match precision {
        Precision::Single => values
            .iter()
            .flat_map(|&v| (v as f32).to_ne_bytes())
            .collect(),
        Precision::Double => values.iter().flat_map(|v| v.to_ne_bytes()).collect(),
    }
}

/// Convert the contents of a slice of bytes into reals using native endianness.
/// Single precision values are widened to `f64` for convenience.
fn bytes_to_reals(bytes: &[u8], precision: Precision) -> Vec<f64> {
    match precision {
        Precision::Single => bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]).into())
            .collect(),
        Precision::Double => bytes
            .chunks_exact(8)
            .map(|b| {
                let mut a = [0; 8];
                a.copy_from_slice(b);
                f64::from_ne_bytes(a)
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reals_survive_encoding() {
        let values = [0.5, -0.25, FRAC_1_SQRT_2];
        for precision in [Precision::Single, Precision::Double] {
            let decoded = bytes_to_reals(&encode_reals(&values, precision), precision);
            for (d, v) in decoded.iter().zip(values) {
                assert!((d - v).abs() < 1e-7, "{precision:?}: {d} != {v}");
            }
        }
    }

    #[test]
    fn double_precision_alias_is_replaced() {
        assert!(SHADER_SOURCE.contains(SINGLE_PRECISION_ALIAS));
        let double = SHADER_SOURCE.replace(SINGLE_PRECISION_ALIAS, DOUBLE_PRECISION_ALIAS);
        assert!(!double.contains("f32"));
    }
}
