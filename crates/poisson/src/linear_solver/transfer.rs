//! Restriction and prolongation between consecutive multigrid levels.
//!
//! Binding slot `level` moves data between level `level` (fine) and level
//! `level + 1` (coarse). Both kernels mask cells by their level's diagonal.

use glam::UVec2;

use crate::error::{Result, SolverError};
use crate::gpu::{kernels, Access, Bound, Buffer, CommandEncoder, ComputeSize, GpuContext, Work};

struct TransferBound {
    bound: Bound,
    output: Buffer<f32>,
}

pub struct Transfer {
    prolongate_work: Work,
    restrict_work: Work,
    prolongate_bounds: Vec<Option<TransferBound>>,
    restrict_bounds: Vec<Option<TransferBound>>,
}

impl Transfer {
    pub fn new(gpu: &GpuContext) -> Result<Self> {
        // Compute sizes are supplied per level at bind time.
        let placeholder = ComputeSize::scalar();
        Ok(Self {
            prolongate_work: Work::new(gpu, placeholder, &kernels::PROLONGATE)?,
            restrict_work: Work::new(gpu, placeholder, &kernels::RESTRICT)?,
            prolongate_bounds: Vec::new(),
            restrict_bounds: Vec::new(),
        })
    }

    fn slot(bounds: &mut Vec<Option<TransferBound>>, level: usize) -> &mut Option<TransferBound> {
        if bounds.len() <= level {
            bounds.resize_with(level + 1, || None);
        }
        &mut bounds[level]
    }

    /// `fine += P coarse` on level `level`, whose size is `fine_size`.
    pub fn prolongate_bind(
        &mut self,
        level: usize,
        fine_size: UVec2,
        fine: &Buffer<f32>,
        fine_diagonal: &Buffer<f32>,
        coarse: &Buffer<f32>,
        coarse_diagonal: &Buffer<f32>,
    ) -> Result<()> {
        let bound = self.prolongate_work.bind_with(
            ComputeSize::grid(fine_size),
            &[fine_diagonal, fine, coarse_diagonal, coarse],
            0.0,
            0,
        )?;
        *Self::slot(&mut self.prolongate_bounds, level) = Some(TransferBound {
            bound,
            output: fine.clone(),
        });
        Ok(())
    }

    /// `coarse = R fine` from level `level`, whose size is `fine_size`.
    pub fn restrict_bind(
        &mut self,
        level: usize,
        fine_size: UVec2,
        fine: &Buffer<f32>,
        fine_diagonal: &Buffer<f32>,
        coarse: &Buffer<f32>,
        coarse_diagonal: &Buffer<f32>,
    ) -> Result<()> {
        let bound = self.restrict_work.bind_with(
            ComputeSize::grid(fine_size / 2),
            &[fine_diagonal, fine, coarse_diagonal, coarse],
            0.0,
            0,
        )?;
        *Self::slot(&mut self.restrict_bounds, level) = Some(TransferBound {
            bound,
            output: coarse.clone(),
        });
        Ok(())
    }

    pub fn prolongate(&self, command: &mut CommandEncoder, level: usize) -> Result<()> {
        Self::record(&self.prolongate_bounds, command, level, "prolongation")
    }

    pub fn restrict(&self, command: &mut CommandEncoder, level: usize) -> Result<()> {
        Self::record(&self.restrict_bounds, command, level, "restriction")
    }

    fn record(
        bounds: &[Option<TransferBound>],
        command: &mut CommandEncoder,
        level: usize,
        component: &'static str,
    ) -> Result<()> {
        let transfer = bounds
            .get(level)
            .and_then(Option::as_ref)
            .ok_or(SolverError::NotBound { component })?;
        transfer.bound.record(command);
        transfer.output.barrier(command, Access::Write, Access::Read);
        Ok(())
    }
}
