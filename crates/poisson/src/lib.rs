//! GPU-resident solvers for the pressure Poisson equation of a 2-D
//! incompressible fluid simulation.
//!
//! The matrix is the 5-point Laplacian stored as a diagonal plus one `vec2`
//! of lower couplings per cell (west in `.x`, south in `.y`). Solvers record
//! their work once into [`gpu::CommandBuffer`]s and replay it every solve:
//!
//! - [`linear_solver::ConjugateGradient`] with any [`linear_solver::Preconditioner`]
//! - [`linear_solver::GaussSeidel`] as a stand-alone red/black SOR solver
//! - [`linear_solver::Multigrid`] as a solver or as a CG preconditioner
//!
//! [`reference`] holds host implementations of every kernel for verification.

pub mod config;
pub mod error;
pub mod gpu;
pub mod linear_solver;
pub mod prefix_scan;
pub mod reference;
pub mod rigid_body;

pub use config::{build_solver, Solver, SolverConfig};
pub use error::{Result, SolverError};
pub use gpu::GpuContext;
pub use linear_solver::{LinearSolver, Parameters, Preconditioner, SolverType};
pub use rigid_body::{Coupling, RigidBody};
