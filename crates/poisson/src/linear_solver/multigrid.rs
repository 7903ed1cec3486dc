//! Geometric multigrid over a [`Depth`] hierarchy.
//!
//! Level 0 is the caller's system. Coarser systems are assembled on the GPU
//! from down-scaled level sets ([`Multigrid::build_hierarchies`]). Usable as
//! a [`LinearSolver`] (one full cycle then a fixed number of V-cycles) or as
//! a [`Preconditioner`] (one V-cycle from a zero guess).

use glam::{UVec2, Vec2};
use serde::{Deserialize, Serialize};

use super::{
    Data, Depth, GaussSeidel, Jacobi, LinearSolver, LocalGaussSeidel, MatrixBuild, Parameters, PhiScale,
    Preconditioner, ResidualError, Transfer,
};
use crate::config::MultigridConfig;
use crate::error::{Result, SolverError};
use crate::gpu::{
    kernels, Access, Bound, Buffer, CommandBuffer, CommandEncoder, ComputeSize, GenericBuffer, GpuContext,
    MemoryUsage, Work,
};
use crate::rigid_body::{Coupling, RigidBody};

/// Smoother used on every level but the coarsest.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmootherKind {
    #[default]
    Jacobi,
    GaussSeidel,
}

impl SmootherKind {
    pub fn default_w(self) -> f32 {
        match self {
            SmootherKind::Jacobi => 2.0 / 3.0,
            SmootherKind::GaussSeidel => 1.0,
        }
    }
}

fn make_smoother(
    gpu: &GpuContext,
    size: UVec2,
    config: &MultigridConfig,
) -> Result<Box<dyn Preconditioner>> {
    let w = config.relaxation.unwrap_or_else(|| config.smoother.default_w());
    Ok(match config.smoother {
        SmootherKind::Jacobi => {
            let mut jacobi = Jacobi::new(gpu, size)?;
            jacobi.set_w(w);
            jacobi.set_preconditioner_iterations(config.smoothing_iterations);
            Box::new(jacobi)
        }
        SmootherKind::GaussSeidel => {
            let mut gauss_seidel = GaussSeidel::new(gpu, size)?;
            gauss_seidel.set_w(w);
            gauss_seidel.set_preconditioner_iterations(config.smoothing_iterations);
            Box::new(gauss_seidel)
        }
    })
}

/// Buffers of one coarse level.
struct Level {
    size: UVec2,
    data: Data,
    liquid_phi: Buffer<f32>,
    solid_phi: Buffer<f32>,
}

/// Everything the cycles record from, kept apart from the command buffers
/// so both can be borrowed at once.
struct Hierarchy {
    depth: Depth,
    /// `levels[k]` is level `k + 1`.
    levels: Vec<Level>,
    /// `residuals[k]` is level `k`, for every level but the coarsest.
    residuals: Vec<Buffer<f32>>,
    residual_bounds: Vec<Option<Bound>>,
    smoothers: Vec<Box<dyn Preconditioner>>,
    coarse_smoother: LocalGaussSeidel,
    transfer: Transfer,
    x: Option<Buffer<f32>>,
}

impl Hierarchy {
    fn max_depth(&self) -> usize {
        self.depth.max_depth()
    }

    fn x(&self) -> Result<&Buffer<f32>> {
        self.x.as_ref().ok_or(SolverError::NotBound {
            component: "multigrid",
        })
    }

    fn residual(&self, command: &mut CommandEncoder, level: usize) -> Result<()> {
        let bound = self
            .residual_bounds
            .get(level)
            .and_then(Option::as_ref)
            .ok_or(SolverError::NotBound {
                component: "multigrid residual",
            })?;
        bound.record(command);
        self.residuals[level].barrier(command, Access::Write, Access::Read);
        Ok(())
    }

    /// V-cycle starting at level `start`, using that level's current `x` as
    /// the initial guess.
    fn record_v_cycle(&self, command: &mut CommandEncoder, start: usize) -> Result<()> {
        let max = self.max_depth();
        for level in start..max {
            command.debug_marker_begin(&format!("Multigrid Down {level}"));
            self.smoothers[level].record(command)?;
            self.residual(command, level)?;
            self.transfer.restrict(command, level)?;
            let coarse_x = &self.levels[level].data.x;
            coarse_x.clear(command);
            coarse_x.barrier(command, Access::Write, Access::Write);
            command.debug_marker_end();
        }

        self.coarse_smoother.record(command)?;

        for level in (start..max).rev() {
            command.debug_marker_begin(&format!("Multigrid Up {level}"));
            self.transfer.prolongate(command, level)?;
            self.smoothers[level].record(command)?;
            command.debug_marker_end();
        }
        Ok(())
    }

    /// Full multigrid cycle: restrict the residual to the coarsest level,
    /// solve there, then walk back up running a V-cycle on every level.
    /// Expects level 0's `x` to be zero.
    fn record_full_cycle(&self, command: &mut CommandEncoder) -> Result<()> {
        let max = self.max_depth();
        if max == 0 {
            return self.coarse_smoother.record(command);
        }

        self.residual(command, 0)?;
        for level in 0..max {
            self.transfer.restrict(command, level)?;
            let coarse = &self.levels[level].data;
            coarse.x.clear(command);
            if level + 1 < max {
                self.residuals[level + 1].copy_from(command, &coarse.b);
            }
            coarse.b.barrier(command, Access::Write, Access::Read);
        }

        self.coarse_smoother.record(command)?;

        for level in (0..max).rev() {
            self.transfer.prolongate(command, level)?;
            self.record_v_cycle(command, level)?;
        }
        Ok(())
    }
}

/// Memory held by a multigrid instance, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultigridMemoryStats {
    pub level_memory: u64,
    pub residual_memory: u64,
    pub total: u64,
}

pub struct Multigrid {
    gpu: GpuContext,
    delta: f32,
    hierarchy: Hierarchy,
    residual_work: Work,
    phi_scale: PhiScale,
    matrix_build: MatrixBuild,
    error: ResidualError,
    build_hierarchies: CommandBuffer,
    full_cycle: CommandBuffer,
    v_cycle: CommandBuffer,
}

impl Multigrid {
    pub fn new(gpu: &GpuContext, size: UVec2, delta: f32) -> Result<Self> {
        Self::with_config(gpu, size, delta, &MultigridConfig::default())
    }

    pub fn with_config(gpu: &GpuContext, size: UVec2, delta: f32, config: &MultigridConfig) -> Result<Self> {
        let depth = Depth::new(size)?;
        let max = depth.max_depth();

        log::info!(
            "Multigrid: {} levels: {}",
            max + 1,
            depth
                .iter()
                .map(|s| format!("{}x{}", s.x, s.y))
                .collect::<Vec<_>>()
                .join(" → ")
        );

        let cells = |s: UVec2| (s.x * s.y) as usize;

        let mut levels = Vec::with_capacity(max);
        for level in 1..=max {
            let size = depth.depth_size(level);
            levels.push(Level {
                size,
                data: Data::new(gpu, size, &format!("MG Level {level}"))?,
                liquid_phi: Buffer::new(gpu, &format!("MG Level {level} Liquid Phi"), cells(size), MemoryUsage::Gpu)?,
                solid_phi: Buffer::new(gpu, &format!("MG Level {level} Solid Phi"), cells(size), MemoryUsage::Gpu)?,
            });
        }

        let residuals = (0..max)
            .map(|level| {
                Buffer::new(
                    gpu,
                    &format!("MG Level {level} Residual"),
                    cells(depth.depth_size(level)),
                    MemoryUsage::Gpu,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut smoothers = (0..max)
            .map(|level| make_smoother(gpu, depth.depth_size(level), config))
            .collect::<Result<Vec<_>>>()?;

        let residual_work = Work::new(gpu, ComputeSize::grid(size), &kernels::RESIDUAL)?;
        let mut residual_bounds: Vec<Option<Bound>> = (0..max).map(|_| None).collect();
        let mut transfer = Transfer::new(gpu)?;

        // Everything below level 0 only depends on buffers owned here.
        for level in 1..max {
            let fine = &levels[level - 1];
            let coarse = &levels[level];
            let data = &fine.data;
            smoothers[level].bind(&data.diagonal, &data.lower, &data.b, &data.x)?;
            residual_bounds[level] = Some(residual_work.bind_with(
                ComputeSize::grid(fine.size),
                &[&data.x, &data.diagonal, &data.lower, &data.b, &residuals[level]],
                0.0,
                0,
            )?);
            transfer.restrict_bind(
                level,
                fine.size,
                &residuals[level],
                &data.diagonal,
                &coarse.data.b,
                &coarse.data.diagonal,
            )?;
            transfer.prolongate_bind(
                level,
                fine.size,
                &data.x,
                &data.diagonal,
                &coarse.data.x,
                &coarse.data.diagonal,
            )?;
        }

        let mut coarse_smoother = LocalGaussSeidel::new(gpu, depth.depth_size(max))?;
        coarse_smoother.set_iterations(config.coarse_iterations);
        if let Some(coarsest) = levels.last() {
            let data = &coarsest.data;
            coarse_smoother.bind(&data.diagonal, &data.lower, &data.b, &data.x)?;
        }

        Ok(Self {
            gpu: gpu.clone(),
            delta,
            hierarchy: Hierarchy {
                depth,
                levels,
                residuals,
                residual_bounds,
                smoothers,
                coarse_smoother,
                transfer,
                x: None,
            },
            residual_work,
            phi_scale: PhiScale::new(gpu)?,
            matrix_build: MatrixBuild::new(gpu)?,
            error: ResidualError::new(gpu, size)?,
            build_hierarchies: CommandBuffer::new(gpu, "Multigrid Build Hierarchies", false),
            full_cycle: CommandBuffer::new(gpu, "Multigrid Full Cycle", false),
            v_cycle: CommandBuffer::new(gpu, "Multigrid V-Cycle", false),
        })
    }

    pub fn depth(&self) -> &Depth {
        &self.hierarchy.depth
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Coarse system of level `level` (1 ..= max depth).
    pub fn level_data(&self, level: usize) -> Option<&Data> {
        level
            .checked_sub(1)
            .and_then(|k| self.hierarchy.levels.get(k))
            .map(|l| &l.data)
    }

    /// Record the hierarchy build from the finest level's level sets.
    pub fn build_hierarchies_bind(&mut self, solid_phi: &Buffer<f32>, liquid_phi: &Buffer<f32>) -> Result<()> {
        let levels = &self.hierarchy.levels;
        let mut bounds = Vec::with_capacity(levels.len());
        for (k, coarse) in levels.iter().enumerate() {
            let (fine_liquid, fine_solid) = match k {
                0 => (liquid_phi, solid_phi),
                _ => (&levels[k - 1].liquid_phi, &levels[k - 1].solid_phi),
            };
            let scale = self.delta / 4f32.powi(k as i32 + 1);
            bounds.push((
                self.phi_scale.bind(coarse.size, fine_liquid, &coarse.liquid_phi)?,
                self.phi_scale.bind(coarse.size, fine_solid, &coarse.solid_phi)?,
                self.matrix_build.bind(
                    coarse.size,
                    &coarse.data.diagonal,
                    &coarse.data.lower,
                    &coarse.liquid_phi,
                    &coarse.solid_phi,
                    scale,
                )?,
            ));
        }

        self.build_hierarchies.record(|command| {
            for (coarse, (liquid, solid, matrix)) in levels.iter().zip(&bounds) {
                liquid.record(command);
                solid.record(command);
                coarse.liquid_phi.barrier(command, Access::Write, Access::Read);
                matrix.record(command);
                coarse.data.diagonal.barrier(command, Access::Write, Access::Read);
                coarse.data.b.clear(command);
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Rebuild the coarse matrices. Queued asynchronously; later submissions
    /// on the queue see the result.
    pub fn build_hierarchies(&mut self) -> Result<()> {
        self.build_hierarchies.submit()?;
        Ok(())
    }

    fn bind_system(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        let size = self.hierarchy.depth.depth_size(0);
        x.check_len((size.x * size.y) as usize)?;

        let hierarchy = &mut self.hierarchy;
        if hierarchy.max_depth() == 0 {
            hierarchy.coarse_smoother.bind(diagonal, lower, b, x)?;
        } else {
            let coarse = &hierarchy.levels[0].data;
            hierarchy.smoothers[0].bind(diagonal, lower, b, x)?;
            hierarchy.residual_bounds[0] = Some(self.residual_work.bind_with(
                ComputeSize::grid(size),
                &[x, diagonal, lower, b, &hierarchy.residuals[0]],
                0.0,
                0,
            )?);
            hierarchy
                .transfer
                .restrict_bind(0, size, &hierarchy.residuals[0], diagonal, &coarse.b, &coarse.diagonal)?;
            hierarchy
                .transfer
                .prolongate_bind(0, size, x, diagonal, &coarse.x, &coarse.diagonal)?;
        }
        hierarchy.x = Some(x.clone());

        self.error.bind(diagonal, lower, b, x)?;

        let hierarchy = &self.hierarchy;
        self.full_cycle.record(|command| {
            x.clear(command);
            x.barrier(command, Access::Write, Access::Write);
            hierarchy.record_full_cycle(command)
        })?;
        self.v_cycle.record(|command| hierarchy.record_v_cycle(command, 0))?;
        Ok(())
    }

    pub fn memory_stats(&self) -> MultigridMemoryStats {
        let level_memory = self
            .hierarchy
            .levels
            .iter()
            .map(|l| {
                l.data.diagonal.byte_size()
                    + l.data.lower.byte_size()
                    + l.data.b.byte_size()
                    + l.data.x.byte_size()
                    + l.liquid_phi.byte_size()
                    + l.solid_phi.byte_size()
            })
            .sum();
        let residual_memory = self.hierarchy.residuals.iter().map(|r| r.byte_size()).sum();
        MultigridMemoryStats {
            level_memory,
            residual_memory,
            total: level_memory + residual_memory,
        }
    }
}

impl Preconditioner for Multigrid {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        self.bind_system(diagonal, lower, b, x)
    }

    fn record(&self, command: &mut CommandEncoder) -> Result<()> {
        let x = self.hierarchy.x()?;
        x.clear(command);
        x.barrier(command, Access::Write, Access::Write);
        self.hierarchy.record_v_cycle(command, 0)
    }
}

impl LinearSolver for Multigrid {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        self.bind_system(diagonal, lower, b, x)
    }

    fn bind_rigidbody(&mut self, _delta: f32, _diagonal: &Buffer<f32>, rigid_body: &mut dyn RigidBody) -> Result<()> {
        match rigid_body.coupling() {
            Coupling::Strong => Err(SolverError::UnsupportedCoupling { solver: "multigrid" }),
            Coupling::Weak => Ok(()),
        }
    }

    /// One full cycle followed by `params.iterations` V-cycles. The error
    /// tolerance is not consulted; `out_error` is the residual measured
    /// after the last cycle.
    fn solve(&mut self, params: &mut Parameters, _rigid_bodies: &mut [&mut dyn RigidBody]) -> Result<()> {
        self.hierarchy.x()?;
        params.reset();

        self.full_cycle.submit()?;
        for _ in 0..params.iterations {
            self.v_cycle.submit()?;
        }
        params.out_iterations = params.iterations;
        params.out_error = self.error.submit()?.wait()?.error()?;

        log::debug!(
            "Multigrid: full cycle + {} V-cycles, error {:.3e}",
            params.iterations,
            params.out_error
        );
        Ok(())
    }

    fn error(&mut self) -> Result<f32> {
        self.error.submit()?.wait()?.error()
    }
}
