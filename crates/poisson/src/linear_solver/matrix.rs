//! Kernels assembling a level's matrix from level sets.

use glam::{UVec2, Vec2};

use crate::error::Result;
use crate::gpu::{kernels, Bound, Buffer, ComputeSize, GpuContext, Work};

/// Builds `diagonal` / `lower` from cell-centred liquid and solid level
/// sets, with faces partially blocked by solids and ghost-fluid weights at
/// the free surface.
pub struct MatrixBuild {
    work: Work,
}

impl MatrixBuild {
    pub fn new(gpu: &GpuContext) -> Result<Self> {
        Ok(Self {
            work: Work::new(gpu, ComputeSize::scalar(), &kernels::BUILD_MATRIX)?,
        })
    }

    /// `scale` multiplies every coupling, `delta / 4^level` on level `level`.
    pub fn bind(
        &self,
        size: UVec2,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        liquid_phi: &Buffer<f32>,
        solid_phi: &Buffer<f32>,
        scale: f32,
    ) -> Result<Bound> {
        self.work.bind_with(
            ComputeSize::grid(size),
            &[liquid_phi, solid_phi, diagonal, lower],
            scale,
            0,
        )
    }
}

/// Down-samples a level set onto the next coarser level.
pub struct PhiScale {
    work: Work,
}

impl PhiScale {
    pub fn new(gpu: &GpuContext) -> Result<Self> {
        Ok(Self {
            work: Work::new(gpu, ComputeSize::scalar(), &kernels::PHI_SCALE)?,
        })
    }

    pub fn bind(&self, coarse_size: UVec2, fine: &Buffer<f32>, coarse: &Buffer<f32>) -> Result<Bound> {
        self.work
            .bind_with(ComputeSize::grid(coarse_size), &[fine, coarse], 0.0, 0)
    }
}
