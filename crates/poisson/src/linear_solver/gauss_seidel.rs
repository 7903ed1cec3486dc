//! Red/black Gauss-Seidel with over-relaxation.
//!
//! [`GaussSeidel`] updates one colour per dispatch and is usable both as a
//! preconditioner / smoother and as a stand-alone solver. [`LocalGaussSeidel`]
//! runs all of its iterations inside a single workgroup and serves as the
//! coarsest-level solver of the multigrid hierarchy.

use std::f32::consts::PI;

use glam::{UVec2, Vec2};
use serde::{Deserialize, Serialize};

use super::{LinearSolver, Parameters, Preconditioner, ResidualError, SolverType};
use crate::error::{Result, SolverError};
use crate::gpu::{kernels, Access, Bound, Buffer, CommandBuffer, CommandEncoder, ComputeSize, GpuContext, Work};
use crate::rigid_body::RigidBody;

/// Cell colour of the red/black ordering: red cells have even `x + y`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Colour {
    #[default]
    Red,
    Black,
}

impl Colour {
    fn flag(self) -> u32 {
        match self {
            Colour::Red => 0,
            Colour::Black => 1,
        }
    }

    fn other(self) -> Self {
        match self {
            Colour::Red => Colour::Black,
            Colour::Black => Colour::Red,
        }
    }
}

/// Successive over-relaxation factor minimising the spectral radius for a
/// Poisson problem with `cells` unknowns.
pub fn optimal_w(cells: u32) -> f32 {
    2.0 / (1.0 + (PI / (cells.max(1) as f32).sqrt()).sin())
}

struct GaussSeidelBound {
    first: Bound,
    second: Bound,
    x: Buffer<f32>,
}

impl GaussSeidelBound {
    fn record(&self, command: &mut CommandEncoder, iterations: u32) {
        self.x.barrier(command, Access::Write, Access::Write);
        for _ in 0..iterations {
            self.first.record(command);
            self.x.barrier(command, Access::Write, Access::Write);
            self.second.record(command);
            self.x.barrier(command, Access::Write, Access::Write);
        }
    }
}

pub struct GaussSeidel {
    gpu: GpuContext,
    size: UVec2,
    w: f32,
    iterations: u32,
    first_colour: Colour,
    work: Work,
    /// Created on the first `LinearSolver::bind`; smoothers never read it.
    error: Option<ResidualError>,
    bound: Option<GaussSeidelBound>,
    init: CommandBuffer,
    step: CommandBuffer,
}

impl GaussSeidel {
    pub fn new(gpu: &GpuContext, size: UVec2) -> Result<Self> {
        Ok(Self {
            gpu: gpu.clone(),
            size,
            w: optimal_w(size.x * size.y),
            iterations: 1,
            first_colour: Colour::Red,
            work: Work::new(gpu, ComputeSize::checkerboard(size), &kernels::GAUSS_SEIDEL)?,
            error: None,
            bound: None,
            init: CommandBuffer::new(gpu, "Gauss-Seidel Init", false),
            step: CommandBuffer::new(gpu, "Gauss-Seidel", false),
        })
    }

    /// Relaxation factor; applies to already bound buffers as well.
    pub fn set_w(&mut self, w: f32) {
        self.w = w;
        if let Some(bound) = &mut self.bound {
            bound.first.push_constants(&self.gpu, w, self.first_colour.flag());
            bound.second.push_constants(&self.gpu, w, self.first_colour.other().flag());
        }
    }

    pub fn w(&self) -> f32 {
        self.w
    }

    /// Iterations per preconditioner application.
    pub fn set_preconditioner_iterations(&mut self, iterations: u32) {
        self.iterations = iterations;
    }

    /// Colour updated first in every iteration. Takes effect on the next bind.
    pub fn set_first_colour(&mut self, colour: Colour) {
        self.first_colour = colour;
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    fn bound(&self) -> Result<&GaussSeidelBound> {
        self.bound.as_ref().ok_or(SolverError::NotBound {
            component: "gauss-seidel",
        })
    }

    fn bind_sweeps(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        let compute_size = self.work.compute_size();
        let first = self.work.bind_with(
            compute_size,
            &[x, diagonal, lower, b],
            self.w,
            self.first_colour.flag(),
        )?;
        let second = self.work.bind_with(
            compute_size,
            &[x, diagonal, lower, b],
            self.w,
            self.first_colour.other().flag(),
        )?;
        self.bound = Some(GaussSeidelBound {
            first,
            second,
            x: x.clone(),
        });
        Ok(())
    }

    /// Append `iterations` full red/black sweeps.
    pub fn record_iterations(&self, command: &mut CommandEncoder, iterations: u32) -> Result<()> {
        self.bound()?.record(command, iterations);
        Ok(())
    }
}

impl Preconditioner for GaussSeidel {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        self.bind_sweeps(diagonal, lower, b, x)
    }

    fn record(&self, command: &mut CommandEncoder) -> Result<()> {
        self.record_iterations(command, self.iterations)
    }
}

impl LinearSolver for GaussSeidel {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        self.bind_sweeps(diagonal, lower, b, x)?;
        if self.error.is_none() {
            self.error = Some(ResidualError::new(&self.gpu, self.size)?);
        }
        if let Some(error) = &mut self.error {
            error.bind(diagonal, lower, b, x)?;
        }

        self.init.record(|command| {
            x.clear(command);
            Ok(())
        })?;

        let bound = self.bound.as_ref().ok_or(SolverError::NotBound {
            component: "gauss-seidel",
        })?;
        self.step.record(|command| {
            bound.record(command, 1);
            Ok(())
        })?;
        Ok(())
    }

    fn bind_rigidbody(&mut self, _delta: f32, _diagonal: &Buffer<f32>, _rigid_body: &mut dyn RigidBody) -> Result<()> {
        Ok(())
    }

    fn solve(&mut self, params: &mut Parameters, _rigid_bodies: &mut [&mut dyn RigidBody]) -> Result<()> {
        self.bound()?;
        let error = self.error.as_mut().ok_or(SolverError::NotBound {
            component: "gauss-seidel solver",
        })?;
        params.reset();
        self.init.submit()?;

        let iterative = params.solver_type == SolverType::Iterative;
        if iterative {
            params.out_error = error.submit()?.wait()?.error()?;
            if params.out_error <= params.error_tolerance {
                return Ok(());
            }
            error.submit()?;
        }

        let initial_error = params.out_error;
        let mut i = 0;
        while !params.should_stop(initial_error) {
            self.step.submit()?;
            if iterative {
                params.out_error = error.wait()?.error()?;
                error.submit()?;
            }
            i += 1;
            params.out_iterations = i;
        }

        if iterative {
            error.wait()?;
            if params.out_iterations >= params.max_iterations() {
                log::warn!(
                    "Gauss-Seidel hit {} iterations with error {:.3e}",
                    params.out_iterations,
                    params.out_error
                );
            }
        }
        log::debug!(
            "Gauss-Seidel finished: {} iterations, error {:.3e}",
            params.out_iterations,
            params.out_error
        );
        Ok(())
    }

    fn error(&mut self) -> Result<f32> {
        self.error
            .as_mut()
            .ok_or(SolverError::NotBound {
                component: "gauss-seidel solver",
            })?
            .submit()?
            .wait()?
            .error()
    }
}

/// Many Gauss-Seidel iterations in one single-workgroup dispatch.
pub struct LocalGaussSeidel {
    work: Work,
    w: f32,
    iterations: u32,
    bound: Option<(Bound, Buffer<f32>)>,
}

impl LocalGaussSeidel {
    pub const DEFAULT_ITERATIONS: u32 = 32;

    pub fn new(gpu: &GpuContext, size: UVec2) -> Result<Self> {
        Ok(Self {
            work: Work::new(gpu, ComputeSize::single_workgroup(size), &kernels::LOCAL_GAUSS_SEIDEL)?,
            w: 1.0,
            iterations: Self::DEFAULT_ITERATIONS,
            bound: None,
        })
    }

    /// Iterations run per dispatch. Takes effect on the next bind.
    pub fn set_iterations(&mut self, iterations: u32) {
        self.iterations = iterations;
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Preconditioner for LocalGaussSeidel {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        let bound = self.work.bind_with(
            self.work.compute_size(),
            &[x, diagonal, lower, b],
            self.w,
            self.iterations,
        )?;
        self.bound = Some((bound, x.clone()));
        Ok(())
    }

    fn record(&self, command: &mut CommandEncoder) -> Result<()> {
        let (bound, x) = self.bound.as_ref().ok_or(SolverError::NotBound {
            component: "local gauss-seidel",
        })?;
        bound.record(command);
        x.barrier(command, Access::Write, Access::Read);
        Ok(())
    }
}
