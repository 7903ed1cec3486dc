//! Max-norm of the residual `b - A x`, with an overlappable host readback.

use glam::{UVec2, Vec2};

use super::reduce::{ReduceBound, ReduceMax};
use crate::error::{Result, SolverError};
use crate::gpu::{kernels, readback, Access, Bound, Buffer, CommandBuffer, ComputeSize, GpuContext, MemoryUsage, Work};

pub struct ResidualError {
    gpu: GpuContext,
    residual: Buffer<f32>,
    error: Buffer<f32>,
    local_error: Buffer<f32>,
    residual_work: Work,
    reduce_max: ReduceMax,
    residual_bound: Option<Bound>,
    reduce_bound: Option<ReduceBound>,
    command: CommandBuffer,
}

impl ResidualError {
    pub fn new(gpu: &GpuContext, size: UVec2) -> Result<Self> {
        let n = size.x * size.y;
        Ok(Self {
            gpu: gpu.clone(),
            residual: Buffer::new(gpu, "Error Residual", n as usize, MemoryUsage::Gpu)?,
            error: Buffer::new(gpu, "Error", 1, MemoryUsage::Gpu)?,
            local_error: Buffer::new(gpu, "Error Readback", 1, MemoryUsage::GpuToCpu)?,
            residual_work: Work::new(gpu, ComputeSize::grid(size), &kernels::RESIDUAL)?,
            reduce_max: ReduceMax::new(gpu, n)?,
            residual_bound: None,
            reduce_bound: None,
            command: CommandBuffer::new(gpu, "Residual Error", true),
        })
    }

    pub fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        let residual_bound = self
            .residual_work
            .bind(&[x, diagonal, lower, b, &self.residual])?;
        let reduce_bound = self.reduce_max.bind(&self.residual, &self.error)?;

        let (residual, error, local_error) = (&self.residual, &self.error, &self.local_error);
        self.command.record(|command| {
            command.debug_marker_begin("Residual Error");
            residual_bound.record(command);
            residual.barrier(command, Access::Write, Access::Read);
            reduce_bound.record(command);
            local_error.copy_from(command, error);
            command.debug_marker_end();
            Ok(())
        })?;

        self.residual_bound = Some(residual_bound);
        self.reduce_bound = Some(reduce_bound);
        Ok(())
    }

    pub fn submit(&mut self) -> Result<&mut Self> {
        if !self.command.is_recorded() {
            return Err(SolverError::NotBound {
                component: "residual error",
            });
        }
        self.command.submit()?;
        Ok(self)
    }

    pub fn wait(&mut self) -> Result<&mut Self> {
        self.command.wait()?;
        Ok(self)
    }

    /// Read the value computed by the last submission.
    pub fn error(&self) -> Result<f32> {
        let values = readback::map_read(&self.gpu, &self.local_error, self.command.maintain())?;
        Ok(values.first().copied().unwrap_or(0.0))
    }
}
