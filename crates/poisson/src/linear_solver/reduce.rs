//! Parallel tree reductions over device arrays.
//!
//! A reduction of `n` elements runs as a chain of dispatches, each folding
//! 512 elements per workgroup, until a single value is left. The
//! intermediate buffers are sized once at construction.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use crate::error::Result;
use crate::gpu::{kernels, Access, Bound, Buffer, ComputeSize, GpuContext, Kernel, MemoryUsage, Work};
use crate::gpu::{CommandEncoder, GenericBuffer};

/// Linear and angular impulse accumulated by rigid-body coupling.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct J {
    pub linear: Vec2,
    pub angular: f32,
    pub _pad: f32,
}

/// Lengths of the intermediate buffers reducing `n` elements to one.
pub fn chain_sizes(n: u32) -> Vec<u32> {
    let mut sizes = Vec::new();
    let mut work = ComputeSize::reduction(n).work_size();
    while work > 1 {
        sizes.push(work);
        work = ComputeSize::reduction(work).work_size();
    }
    sizes
}

/// A reduction kernel plus its chain of scratch buffers.
pub struct Reduce<T> {
    size: u32,
    work: Work,
    buffers: Vec<Buffer<T>>,
}

impl<T: Pod> Reduce<T> {
    fn with_kernel(gpu: &GpuContext, size: u32, kernel: &'static Kernel) -> Result<Self> {
        let work = Work::new(gpu, ComputeSize::reduction(size), kernel)?;
        let buffers = chain_sizes(size)
            .into_iter()
            .enumerate()
            .map(|(i, len)| {
                Buffer::new(
                    gpu,
                    &format!("{} Stage {}", kernel.name, i),
                    len as usize,
                    MemoryUsage::Gpu,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { size, work, buffers })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Bind `input` (length `size`) to a one-element `output`.
    pub fn bind(&self, input: &Buffer<T>, output: &Buffer<T>) -> Result<ReduceBound> {
        input.check_len(self.size as usize)?;

        let mut stages: Vec<&Buffer<T>> = Vec::with_capacity(self.buffers.len() + 2);
        stages.push(input);
        stages.extend(self.buffers.iter());
        stages.push(output);

        let mut bounds = Vec::with_capacity(stages.len() - 1);
        let mut length = self.size;
        for pair in stages.windows(2) {
            let compute_size = ComputeSize::reduction(length);
            bounds.push(self.work.bind_with(
                compute_size,
                &[pair[0] as &dyn GenericBuffer, pair[1]],
                0.0,
                0,
            )?);
            length = compute_size.work_size();
        }

        Ok(ReduceBound {
            bounds,
            outputs: stages[1..].iter().map(|b| b.label().to_owned()).collect(),
        })
    }
}

/// A bound reduction chain.
pub struct ReduceBound {
    bounds: Vec<Bound>,
    outputs: Vec<String>,
}

impl ReduceBound {
    /// Record every stage, each followed by a write-to-read barrier on its
    /// output.
    pub fn record(&self, command: &mut CommandEncoder) {
        for (bound, output) in self.bounds.iter().zip(&self.outputs) {
            bound.record(command);
            command.barrier(output, Access::Write, Access::Read);
        }
    }

    pub fn stage_count(&self) -> usize {
        self.bounds.len()
    }
}

/// Sum of `f32` values.
pub struct ReduceSum(Reduce<f32>);

impl ReduceSum {
    pub fn new(gpu: &GpuContext, size: u32) -> Result<Self> {
        Reduce::with_kernel(gpu, size, &kernels::REDUCE_SUM).map(Self)
    }

    pub fn bind(&self, input: &Buffer<f32>, output: &Buffer<f32>) -> Result<ReduceBound> {
        self.0.bind(input, output)
    }
}

/// Maximum absolute value of `f32` values.
pub struct ReduceMax(Reduce<f32>);

impl ReduceMax {
    pub fn new(gpu: &GpuContext, size: u32) -> Result<Self> {
        Reduce::with_kernel(gpu, size, &kernels::REDUCE_MAX).map(Self)
    }

    pub fn bind(&self, input: &Buffer<f32>, output: &Buffer<f32>) -> Result<ReduceBound> {
        self.0.bind(input, output)
    }
}

/// Component-wise sum of [`J`] records.
pub struct ReduceJ(Reduce<J>);

impl ReduceJ {
    pub fn new(gpu: &GpuContext, size: u32) -> Result<Self> {
        Reduce::with_kernel(gpu, size, &kernels::REDUCE_J).map(Self)
    }

    pub fn bind(&self, input: &Buffer<J>, output: &Buffer<J>) -> Result<ReduceBound> {
        self.0.bind(input, output)
    }
}
