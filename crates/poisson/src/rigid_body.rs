//! Coupling hook between the pressure solve and rigid bodies.
//!
//! A body receives the solver's scratch buffers at bind time and is invoked
//! once per iteration, before the iteration is submitted, so it can record
//! its own exchange of impulses with the search direction.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::gpu::Buffer;

/// How strongly a body is coupled to the fluid pressure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coupling {
    /// The body reacts to pressure after the solve.
    Weak,
    /// The body enters the linear system; needs a solver with a search
    /// direction it can update.
    Strong,
}

pub trait RigidBody {
    fn coupling(&self) -> Coupling;

    /// Receive the cell spacing, the matrix diagonal, the search direction
    /// and the matrix-vector product buffer of the solver.
    fn bind_pressure(
        &mut self,
        delta: f32,
        diagonal: &Buffer<f32>,
        search: &Buffer<f32>,
        product: &Buffer<f32>,
    ) -> Result<()>;

    /// Called once per solver iteration.
    fn pressure(&mut self) -> Result<()>;
}
