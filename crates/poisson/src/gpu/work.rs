//! Compiled kernels ([`Work`]) and their bound instances ([`Bound`]).

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::UVec2;
use wgpu::util::DeviceExt;

use super::command::{Command, CommandEncoder};
use super::kernels::{Binding, Kernel};
use super::{GenericBuffer, GpuContext};
use crate::error::{Result, SolverError};

/// Dispatch geometry: the domain a kernel covers and the workgroup grid
/// launched for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ComputeSize {
    pub domain: UVec2,
    pub workgroups: UVec2,
}

impl ComputeSize {
    /// Workgroup shape of every grid kernel.
    pub const LOCAL_SIZE_2D: UVec2 = UVec2::new(16, 16);
    /// Workgroup width of the reduction and scan kernels.
    pub const LOCAL_SIZE_1D: u32 = 256;
    /// Elements folded by one reduction workgroup (two per thread).
    pub const REDUCTION_FACTOR: u32 = 2 * Self::LOCAL_SIZE_1D;

    /// One thread per cell.
    pub fn grid(size: UVec2) -> Self {
        Self {
            domain: size,
            workgroups: UVec2::new(
                size.x.div_ceil(Self::LOCAL_SIZE_2D.x),
                size.y.div_ceil(Self::LOCAL_SIZE_2D.y),
            ),
        }
    }

    /// One thread per cell of a single colour of a red/black ordering.
    pub fn checkerboard(size: UVec2) -> Self {
        Self {
            domain: size,
            workgroups: UVec2::new(
                size.x.div_ceil(2).div_ceil(Self::LOCAL_SIZE_2D.x),
                size.y.div_ceil(Self::LOCAL_SIZE_2D.y),
            ),
        }
    }

    /// A single workgroup that strides over the whole domain.
    pub fn single_workgroup(size: UVec2) -> Self {
        Self {
            domain: size,
            workgroups: UVec2::ONE,
        }
    }

    /// One thread per pair of elements of a length-`n` array.
    pub fn reduction(n: u32) -> Self {
        Self {
            domain: UVec2::new(n, 1),
            workgroups: UVec2::new(n.max(1).div_ceil(Self::REDUCTION_FACTOR), 1),
        }
    }

    /// A single scalar.
    pub fn scalar() -> Self {
        Self {
            domain: UVec2::ONE,
            workgroups: UVec2::ONE,
        }
    }

    pub fn work_size(&self) -> u32 {
        self.workgroups.x * self.workgroups.y
    }

    pub fn dispatch(&self) -> [u32; 3] {
        [self.workgroups.x, self.workgroups.y, 1]
    }
}

/// Uniform at binding 0 of every kernel: the domain size plus one scalar and
/// one flag, fixed per bound dispatch.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct KernelConstants {
    pub width: u32,
    pub height: u32,
    pub value: f32,
    pub flag: u32,
}

impl KernelConstants {
    pub fn new(size: UVec2, value: f32, flag: u32) -> Self {
        Self {
            width: size.x,
            height: size.y,
            value,
            flag,
        }
    }
}

/// A validated compute pipeline with its bind group layout.
pub struct Work {
    kernel: &'static Kernel,
    compute_size: ComputeSize,
    pipeline: Arc<wgpu::ComputePipeline>,
    layout: Arc<wgpu::BindGroupLayout>,
    device: Arc<wgpu::Device>,
}

impl Work {
    /// Compile `kernel`. Shader or layout validation failures are returned as
    /// [`SolverError::KernelValidation`].
    pub fn new(gpu: &GpuContext, compute_size: ComputeSize, kernel: &'static Kernel) -> Result<Self> {
        let device = &gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.name),
            source: wgpu::ShaderSource::Wgsl(kernel.source().into()),
        });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        entries.extend(kernel.bindings.iter().enumerate().map(|(i, binding)| {
            wgpu::BindGroupLayoutEntry {
                binding: i as u32 + 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: *binding == Binding::ReadOnly,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }
        }));

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{} Bind Group Layout", kernel.name)),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} Pipeline Layout", kernel.name)),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("{} Pipeline", kernel.name)),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some(kernel.entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(SolverError::KernelValidation {
                kernel: kernel.name,
                message: error.to_string(),
            });
        }

        Ok(Self {
            kernel,
            compute_size,
            pipeline: Arc::new(pipeline),
            layout: Arc::new(layout),
            device: gpu.device.clone(),
        })
    }

    pub fn kernel(&self) -> &'static Kernel {
        self.kernel
    }

    pub fn compute_size(&self) -> ComputeSize {
        self.compute_size
    }

    /// Bind buffers over this work's own compute size.
    pub fn bind(&self, buffers: &[&dyn GenericBuffer]) -> Result<Bound> {
        self.bind_with(self.compute_size, buffers, 0.0, 0)
    }

    /// Bind buffers with an explicit compute size and constants.
    pub fn bind_with(
        &self,
        compute_size: ComputeSize,
        buffers: &[&dyn GenericBuffer],
        value: f32,
        flag: u32,
    ) -> Result<Bound> {
        let expected = self.kernel.bindings.len();
        if buffers.len() != expected {
            return Err(SolverError::BindingCount {
                kernel: self.kernel.name,
                expected,
                actual: buffers.len(),
            });
        }

        let constants = KernelConstants::new(compute_size.domain, value, flag);
        let uniform = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} Constants", self.kernel.name)),
                contents: bytemuck::bytes_of(&constants),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform.as_entire_binding(),
        }];
        entries.extend(buffers.iter().enumerate().map(|(i, buffer)| wgpu::BindGroupEntry {
            binding: i as u32 + 1,
            resource: buffer.raw().as_entire_binding(),
        }));

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", self.kernel.name)),
            layout: &self.layout,
            entries: &entries,
        });

        Ok(Bound {
            label: self.kernel.name.into(),
            pipeline: self.pipeline.clone(),
            bind_group: Arc::new(bind_group),
            constants_buffer: Arc::new(uniform),
            constants,
            workgroups: compute_size.dispatch(),
        })
    }
}

/// A kernel with fixed buffers and constants, recordable any number of times.
#[derive(Clone)]
pub struct Bound {
    label: Arc<str>,
    pipeline: Arc<wgpu::ComputePipeline>,
    bind_group: Arc<wgpu::BindGroup>,
    constants_buffer: Arc<wgpu::Buffer>,
    constants: KernelConstants,
    workgroups: [u32; 3],
}

impl Bound {
    pub fn record(&self, command: &mut CommandEncoder) {
        command.push(Command::Dispatch {
            label: self.label.clone(),
            pipeline: self.pipeline.clone(),
            bind_group: self.bind_group.clone(),
            workgroups: self.workgroups,
        });
    }

    /// Record a dispatch whose workgroup count is read from `indirect` at
    /// `offset` when the command executes.
    pub fn record_indirect(&self, command: &mut CommandEncoder, indirect: &dyn GenericBuffer, offset: u64) {
        command.push(Command::DispatchIndirect {
            label: self.label.clone(),
            pipeline: self.pipeline.clone(),
            bind_group: self.bind_group.clone(),
            indirect: indirect.raw().clone(),
            offset,
        });
    }

    /// Replace the scalar and flag seen by every later submission.
    pub fn push_constants(&mut self, gpu: &GpuContext, value: f32, flag: u32) {
        self.constants.value = value;
        self.constants.flag = flag;
        gpu.queue
            .write_buffer(&self.constants_buffer, 0, bytemuck::bytes_of(&self.constants));
    }

    pub fn workgroups(&self) -> [u32; 3] {
        self.workgroups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_rounds_up_to_whole_workgroups() {
        let size = ComputeSize::grid(UVec2::new(50, 16));
        assert_eq!(size.workgroups, UVec2::new(4, 1));
        assert_eq!(size.dispatch(), [4, 1, 1]);
    }

    #[test]
    fn checkerboard_covers_half_of_each_row() {
        assert_eq!(ComputeSize::checkerboard(UVec2::new(64, 64)).workgroups, UVec2::new(2, 4));
        assert_eq!(ComputeSize::checkerboard(UVec2::new(33, 17)).workgroups, UVec2::new(2, 2));
    }

    #[test]
    fn reduction_folds_512_elements_per_workgroup() {
        assert_eq!(ComputeSize::reduction(512).work_size(), 1);
        assert_eq!(ComputeSize::reduction(513).work_size(), 2);
        assert_eq!(ComputeSize::reduction(256 * 256).work_size(), 128);
        assert_eq!(ComputeSize::reduction(0).work_size(), 1);
    }

    #[test]
    fn constants_match_uniform_layout() {
        assert_eq!(std::mem::size_of::<KernelConstants>(), 16);
    }
}
