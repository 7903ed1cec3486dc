//! Incomplete-Poisson preconditioner, `M⁻¹ = K Kᵀ` with `K = I - L D⁻¹`,
//! applied as a single stencil dispatch.

use glam::{UVec2, Vec2};

use super::Preconditioner;
use crate::error::{Result, SolverError};
use crate::gpu::{kernels, Access, Bound, Buffer, CommandEncoder, ComputeSize, GpuContext, Work};

pub struct IncompletePoisson {
    work: Work,
    bound: Option<(Bound, Buffer<f32>)>,
}

impl IncompletePoisson {
    pub fn new(gpu: &GpuContext, size: UVec2) -> Result<Self> {
        Ok(Self {
            work: Work::new(gpu, ComputeSize::grid(size), &kernels::INCOMPLETE_POISSON)?,
            bound: None,
        })
    }
}

impl Preconditioner for IncompletePoisson {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        self.bound = Some((self.work.bind(&[diagonal, lower, b, x])?, x.clone()));
        Ok(())
    }

    fn record(&self, command: &mut CommandEncoder) -> Result<()> {
        let (bound, x) = self.bound.as_ref().ok_or(SolverError::NotBound {
            component: "incomplete poisson preconditioner",
        })?;
        bound.record(command);
        x.barrier(command, Access::Write, Access::Read);
        Ok(())
    }
}
