//! Serialisable solver configuration and the factory that turns it into a
//! ready-to-bind solver.

use glam::UVec2;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpu::GpuContext;
use crate::linear_solver::{
    ConjugateGradient, Diagonal, GaussSeidel, IncompletePoisson, Jacobi, LinearSolver, Multigrid, Parameters,
    Preconditioner, SmootherKind,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    #[default]
    ConjugateGradient,
    GaussSeidel,
    Multigrid,
}

/// Preconditioner of the conjugate gradient solver. Ignored otherwise.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionerKind {
    Diagonal,
    Jacobi,
    GaussSeidel,
    #[default]
    IncompletePoisson,
    Multigrid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultigridConfig {
    pub smoother: SmootherKind,
    /// Smoother iterations before and after each coarse correction.
    pub smoothing_iterations: u32,
    /// Overrides the smoother's default relaxation factor.
    pub relaxation: Option<f32>,
    /// Iterations of the single-workgroup solver on the coarsest level.
    pub coarse_iterations: u32,
}

impl Default for MultigridConfig {
    fn default() -> Self {
        Self {
            smoother: SmootherKind::Jacobi,
            smoothing_iterations: 3,
            relaxation: None,
            coarse_iterations: 32,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub solver: SolverKind,
    pub preconditioner: PreconditionerKind,
    /// Iterations per application of the Jacobi and Gauss-Seidel preconditioners.
    pub preconditioner_iterations: u32,
    pub multigrid: MultigridConfig,
    pub parameters: Parameters,
    /// Grid spacing, used when multigrid assembles its coarse matrices.
    pub delta: f32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::ConjugateGradient,
            preconditioner: PreconditionerKind::IncompletePoisson,
            preconditioner_iterations: 1,
            multigrid: MultigridConfig::default(),
            parameters: Parameters::default(),
            delta: 1.0,
        }
    }
}

/// A constructed solver. Multigrid-preconditioned CG keeps its concrete type
/// so the hierarchy can still be rebuilt through [`Solver::multigrid_mut`].
pub enum Solver {
    ConjugateGradient(ConjugateGradient),
    MultigridPreconditioned(ConjugateGradient<Multigrid>),
    GaussSeidel(GaussSeidel),
    Multigrid(Multigrid),
}

impl Solver {
    pub fn as_linear_solver(&mut self) -> &mut dyn LinearSolver {
        match self {
            Solver::ConjugateGradient(solver) => solver,
            Solver::MultigridPreconditioned(solver) => solver,
            Solver::GaussSeidel(solver) => solver,
            Solver::Multigrid(solver) => solver,
        }
    }

    /// The multigrid hierarchy, when the solver has one.
    pub fn multigrid_mut(&mut self) -> Option<&mut Multigrid> {
        match self {
            Solver::MultigridPreconditioned(solver) => Some(solver.preconditioner_mut()),
            Solver::Multigrid(solver) => Some(solver),
            _ => None,
        }
    }
}

fn make_preconditioner(gpu: &GpuContext, size: UVec2, config: &SolverConfig) -> Result<Box<dyn Preconditioner>> {
    Ok(match config.preconditioner {
        PreconditionerKind::Diagonal => Box::new(Diagonal::new(gpu, size)?),
        PreconditionerKind::IncompletePoisson => Box::new(IncompletePoisson::new(gpu, size)?),
        PreconditionerKind::Jacobi => {
            let mut jacobi = Jacobi::new(gpu, size)?;
            jacobi.set_preconditioner_iterations(config.preconditioner_iterations);
            Box::new(jacobi)
        }
        PreconditionerKind::GaussSeidel => {
            let mut gauss_seidel = GaussSeidel::new(gpu, size)?;
            gauss_seidel.set_preconditioner_iterations(config.preconditioner_iterations);
            Box::new(gauss_seidel)
        }
        PreconditionerKind::Multigrid => {
            Box::new(Multigrid::with_config(gpu, size, config.delta, &config.multigrid)?)
        }
    })
}

/// Construct the solver described by `config` for a `size` grid.
pub fn build_solver(gpu: &GpuContext, size: UVec2, config: &SolverConfig) -> Result<Solver> {
    log::info!(
        "Building {:?} solver ({:?} preconditioner) for {}x{}",
        config.solver,
        config.preconditioner,
        size.x,
        size.y
    );
    Ok(match config.solver {
        SolverKind::ConjugateGradient if config.preconditioner == PreconditionerKind::Multigrid => {
            let multigrid = Multigrid::with_config(gpu, size, config.delta, &config.multigrid)?;
            Solver::MultigridPreconditioned(ConjugateGradient::new(gpu, size, Box::new(multigrid))?)
        }
        SolverKind::ConjugateGradient => {
            let preconditioner = make_preconditioner(gpu, size, config)?;
            Solver::ConjugateGradient(ConjugateGradient::new(gpu, size, preconditioner)?)
        }
        SolverKind::GaussSeidel => Solver::GaussSeidel(GaussSeidel::new(gpu, size)?),
        SolverKind::Multigrid => {
            Solver::Multigrid(Multigrid::with_config(gpu, size, config.delta, &config.multigrid)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear_solver::SolverType;

    #[test]
    fn defaults() {
        let config = SolverConfig::default();
        assert_eq!(config.solver, SolverKind::ConjugateGradient);
        assert_eq!(config.preconditioner, PreconditionerKind::IncompletePoisson);
        assert_eq!(config.parameters.solver_type, SolverType::Iterative);
        assert_eq!(config.multigrid.smoother, SmootherKind::Jacobi);
        assert_eq!(config.multigrid.coarse_iterations, 32);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{
            "solver": "multigrid",
            "multigrid": { "smoother": "GaussSeidel", "relaxation": 1.2 },
            "parameters": { "solver_type": "Fixed", "iterations": 4, "error_tolerance": 0.0 }
        }"#;
        let config: SolverConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.solver, SolverKind::Multigrid);
        assert_eq!(config.multigrid.smoother, SmootherKind::GaussSeidel);
        assert_eq!(config.multigrid.relaxation, Some(1.2));
        assert_eq!(config.multigrid.smoothing_iterations, 3);
        assert_eq!(config.parameters, Parameters::fixed(4));
        assert_eq!(config.delta, 1.0);
    }

    #[test]
    fn round_trips_through_json() {
        let config = SolverConfig {
            preconditioner: PreconditionerKind::Jacobi,
            preconditioner_iterations: 2,
            ..SolverConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SolverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
