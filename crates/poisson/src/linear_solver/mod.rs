//! Linear solvers and preconditioners for the pressure system `A x = b`.
//!
//! `A` is stored per cell as a diagonal and a `vec2` of lower couplings:
//! `lower[i].x` is `A(i, i - 1)` and `lower[i].y` is `A(i, i - width)`. Cells
//! with a zero diagonal are masked out of every kernel.

pub mod algebra;
pub mod conjugate_gradient;
pub mod depth;
pub mod diagonal;
pub mod gauss_seidel;
pub mod incomplete_poisson;
pub mod jacobi;
pub mod matrix;
pub mod multigrid;
pub mod reduce;
pub mod residual;
pub mod transfer;

pub use conjugate_gradient::ConjugateGradient;
pub use depth::Depth;
pub use diagonal::Diagonal;
pub use gauss_seidel::{Colour, GaussSeidel, LocalGaussSeidel};
pub use incomplete_poisson::IncompletePoisson;
pub use jacobi::Jacobi;
pub use matrix::{MatrixBuild, PhiScale};
pub use multigrid::{Multigrid, SmootherKind};
pub use reduce::{Reduce, ReduceJ, ReduceMax, ReduceSum, J};
pub use residual::ResidualError;
pub use transfer::Transfer;

use glam::{UVec2, Vec2};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpu::{Buffer, CommandEncoder, GpuContext, MemoryUsage};
use crate::rigid_body::RigidBody;

/// Iteration cap of an iterative solve that sets no ceiling of its own.
pub const ITERATION_CEILING: u32 = 1000;

/// Termination policy of a solve.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverType {
    /// Run exactly `iterations` iterations.
    Fixed,
    /// Run until the error drops below the tolerance or the ceiling is hit.
    Iterative,
}

/// Solve parameters plus the outputs of the last solve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub solver_type: SolverType,
    /// Iteration count (fixed) or ceiling (iterative). An iterative solve
    /// with 0 uses an absolute tolerance and stops at `ITERATION_CEILING`.
    pub iterations: u32,
    pub error_tolerance: f32,
    #[serde(skip)]
    pub out_iterations: u32,
    #[serde(skip)]
    pub out_error: f32,
}

impl Parameters {
    pub fn new(solver_type: SolverType, iterations: u32, error_tolerance: f32) -> Self {
        Self {
            solver_type,
            iterations,
            error_tolerance,
            out_iterations: 0,
            out_error: 0.0,
        }
    }

    /// Exactly `iterations` iterations, tolerance ignored.
    pub fn fixed(iterations: u32) -> Self {
        Self::new(SolverType::Fixed, iterations, 0.0)
    }

    /// Iterate to `error_tolerance` relative to the initial error, at most
    /// `ITERATION_CEILING` iterations.
    pub fn iterative(error_tolerance: f32) -> Self {
        Self::new(SolverType::Iterative, ITERATION_CEILING, error_tolerance)
    }

    /// Iteration count past which a solve stops whatever its error.
    pub fn max_iterations(&self) -> u32 {
        if self.iterations > 0 {
            self.iterations
        } else {
            ITERATION_CEILING
        }
    }

    /// Finished, or out of iterations. Solver loops run until this holds so
    /// a system that never reaches the tolerance still terminates.
    pub fn should_stop(&self, initial_error: f32) -> bool {
        self.is_finished(initial_error) || self.out_iterations >= self.max_iterations()
    }

    pub fn is_finished(&self, initial_error: f32) -> bool {
        match self.solver_type {
            SolverType::Fixed => self.out_iterations >= self.iterations,
            SolverType::Iterative if self.iterations > 0 => {
                self.out_iterations >= self.iterations
                    || self.out_error <= self.error_tolerance * initial_error
            }
            SolverType::Iterative => self.out_error <= self.error_tolerance,
        }
    }

    pub fn reset(&mut self) {
        self.out_error = 0.0;
        self.out_iterations = 0;
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::iterative(1e-5)
    }
}

/// Device buffers of one linear system.
#[derive(Clone)]
pub struct Data {
    pub diagonal: Buffer<f32>,
    pub lower: Buffer<Vec2>,
    pub b: Buffer<f32>,
    pub x: Buffer<f32>,
}

impl Data {
    /// Zero-initialised system of `size` cells; `label` prefixes buffer names.
    pub fn new(gpu: &GpuContext, size: UVec2, label: &str) -> Result<Self> {
        let n = (size.x * size.y) as usize;
        Ok(Self {
            diagonal: Buffer::new(gpu, &format!("{label} Diagonal"), n, MemoryUsage::Gpu)?,
            lower: Buffer::new(gpu, &format!("{label} Lower"), n, MemoryUsage::Gpu)?,
            b: Buffer::new(gpu, &format!("{label} B"), n, MemoryUsage::Gpu)?,
            x: Buffer::new(gpu, &format!("{label} X"), n, MemoryUsage::Gpu)?,
        })
    }
}

/// Approximate inverse of `A`, applied as `x = M⁻¹ b` by recorded commands.
pub trait Preconditioner {
    /// Fix the buffers read (`diagonal`, `lower`, `b`) and written (`x`).
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()>;

    /// Append the application to `command`. Fails if not bound.
    fn record(&self, command: &mut CommandEncoder) -> Result<()>;
}

/// A solver for `A x = b` on a fixed grid size.
pub trait LinearSolver {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()>;

    /// Couple a rigid body to the solve. Solvers without coupling support
    /// accept weak bodies as a no-op.
    fn bind_rigidbody(
        &mut self,
        delta: f32,
        diagonal: &Buffer<f32>,
        rigid_body: &mut dyn RigidBody,
    ) -> Result<()>;

    /// Solve, writing `out_iterations` and `out_error` back into `params`.
    fn solve(&mut self, params: &mut Parameters, rigid_bodies: &mut [&mut dyn RigidBody]) -> Result<()>;

    /// Max-norm of the residual left by the last solve.
    fn error(&mut self) -> Result<f32>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_stops_after_iterations() {
        let mut params = Parameters::fixed(3);
        params.out_error = 0.0;
        assert!(!params.is_finished(1.0));
        params.out_iterations = 3;
        assert!(params.is_finished(1.0));
    }

    #[test]
    fn iterative_uses_relative_tolerance_with_ceiling() {
        let mut params = Parameters::iterative(1e-3);
        params.out_error = 0.5;
        assert!(!params.is_finished(1.0));
        params.out_error = 1e-3;
        assert!(params.is_finished(1.0));
        params.out_error = 1.0;
        params.out_iterations = 1000;
        assert!(params.is_finished(1.0));
    }

    #[test]
    fn iterative_without_ceiling_uses_absolute_tolerance() {
        let mut params = Parameters::new(SolverType::Iterative, 0, 1e-2);
        params.out_error = 0.05;
        assert!(!params.is_finished(10.0));
        params.out_error = 0.01;
        assert!(params.is_finished(10.0));
    }

    #[test]
    fn zero_iterations_still_has_a_ceiling() {
        let mut params = Parameters::new(SolverType::Iterative, 0, 0.0);
        params.out_error = 1.0;
        params.out_iterations = ITERATION_CEILING - 1;
        assert!(!params.should_stop(1.0));
        params.out_iterations = ITERATION_CEILING;
        assert!(!params.is_finished(1.0));
        assert!(params.should_stop(1.0));
    }

    #[test]
    fn ceiling_follows_explicit_iterations() {
        let mut params = Parameters::iterative(0.0);
        params.iterations = 25;
        params.out_error = 1.0;
        params.out_iterations = 25;
        assert_eq!(params.max_iterations(), 25);
        assert!(params.should_stop(1.0));
        assert_eq!(Parameters::fixed(0).max_iterations(), ITERATION_CEILING);
    }

    #[test]
    fn reset_clears_outputs() {
        let mut params = Parameters::iterative(1e-4);
        params.out_error = 3.0;
        params.out_iterations = 17;
        params.reset();
        assert_eq!(params.out_error, 0.0);
        assert_eq!(params.out_iterations, 0);
        assert_eq!(params.iterations, ITERATION_CEILING);
    }

    proptest! {
        #[test]
        fn is_finished_stays_finished(
            iterations in 0u32..50,
            tolerance in 0.0f32..1.0,
            initial in 0.0f32..10.0,
            errors in prop::collection::vec(0.0f32..10.0, 1..60),
            fixed in any::<bool>(),
        ) {
            let solver_type = if fixed { SolverType::Fixed } else { SolverType::Iterative };
            let mut params = Parameters::new(solver_type, iterations, tolerance);
            // Feed a non-increasing error sequence, as a converging solver would.
            let mut sorted = errors.clone();
            sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
            let mut finished = false;
            for (i, error) in sorted.into_iter().enumerate() {
                params.out_iterations = i as u32;
                params.out_error = error;
                let now = params.is_finished(initial);
                prop_assert!(!finished || now);
                finished = now;
            }
        }
    }
}
