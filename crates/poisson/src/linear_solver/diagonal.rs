//! Diagonal (point-Jacobi) preconditioner: `x = b / d`.

use glam::{UVec2, Vec2};

use super::Preconditioner;
use crate::error::{Result, SolverError};
use crate::gpu::{kernels, Access, Bound, Buffer, CommandEncoder, ComputeSize, GpuContext, Work};

pub struct Diagonal {
    work: Work,
    bound: Option<(Bound, Buffer<f32>)>,
}

impl Diagonal {
    pub fn new(gpu: &GpuContext, size: UVec2) -> Result<Self> {
        Ok(Self {
            work: Work::new(gpu, ComputeSize::grid(size), &kernels::DIAGONAL)?,
            bound: None,
        })
    }
}

impl Preconditioner for Diagonal {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        _lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        self.bound = Some((self.work.bind(&[diagonal, b, x])?, x.clone()));
        Ok(())
    }

    fn record(&self, command: &mut CommandEncoder) -> Result<()> {
        let (bound, x) = self.bound.as_ref().ok_or(SolverError::NotBound {
            component: "diagonal preconditioner",
        })?;
        bound.record(command);
        x.barrier(command, Access::Write, Access::Read);
        Ok(())
    }
}
