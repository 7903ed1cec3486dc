//! Damped Jacobi smoother, double-buffered.
//!
//! One iteration is a sweep into the back buffer followed by a sweep back
//! into `x`, so the result always lands in the bound `x`.

use glam::{UVec2, Vec2};

use super::Preconditioner;
use crate::error::{Result, SolverError};
use crate::gpu::{kernels, Access, Bound, Buffer, CommandEncoder, ComputeSize, GpuContext, MemoryUsage, Work};

struct JacobiBound {
    front: Bound,
    back: Bound,
    x: Buffer<f32>,
}

pub struct Jacobi {
    gpu: GpuContext,
    size: UVec2,
    w: f32,
    iterations: u32,
    back: Buffer<f32>,
    work: Work,
    bound: Option<JacobiBound>,
}

impl Jacobi {
    pub fn new(gpu: &GpuContext, size: UVec2) -> Result<Self> {
        Ok(Self {
            gpu: gpu.clone(),
            size,
            w: 1.0,
            iterations: 1,
            back: Buffer::new(gpu, "Jacobi Back", (size.x * size.y) as usize, MemoryUsage::Gpu)?,
            work: Work::new(gpu, ComputeSize::grid(size), &kernels::JACOBI)?,
            bound: None,
        })
    }

    /// Relaxation factor; applies to already bound buffers as well.
    pub fn set_w(&mut self, w: f32) {
        self.w = w;
        if let Some(bound) = &mut self.bound {
            bound.front.push_constants(&self.gpu, w, 0);
            bound.back.push_constants(&self.gpu, w, 0);
        }
    }

    pub fn w(&self) -> f32 {
        self.w
    }

    pub fn set_preconditioner_iterations(&mut self, iterations: u32) {
        self.iterations = iterations;
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }
}

impl Preconditioner for Jacobi {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        let compute_size = self.work.compute_size();
        let front = self
            .work
            .bind_with(compute_size, &[x, &self.back, diagonal, lower, b], self.w, 0)?;
        let back = self
            .work
            .bind_with(compute_size, &[&self.back, x, diagonal, lower, b], self.w, 0)?;
        self.bound = Some(JacobiBound {
            front,
            back,
            x: x.clone(),
        });
        Ok(())
    }

    fn record(&self, command: &mut CommandEncoder) -> Result<()> {
        let bound = self.bound.as_ref().ok_or(SolverError::NotBound {
            component: "jacobi",
        })?;
        self.back.clear(command);
        self.back.barrier(command, Access::Write, Access::Read);
        for _ in 0..self.iterations {
            bound.front.record(command);
            self.back.barrier(command, Access::Write, Access::Read);
            bound.back.record(command);
            bound.x.barrier(command, Access::Write, Access::Read);
        }
        Ok(())
    }
}
