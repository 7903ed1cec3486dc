//! Element-wise vector algebra used by the Krylov solvers.
//!
//! Expressions are plain data describing which buffers combine into the
//! output. [`BufferAlgebra::apply`] picks the kernel, including the in-place
//! variants when the output aliases one of the operands.

use glam::UVec2;

use crate::error::Result;
use crate::gpu::{kernels, Bound, Buffer, ComputeSize, GenericBuffer, GpuContext, Work};

/// `output = ...`
#[derive(Copy, Clone)]
pub enum Expression<'a> {
    /// `a ⊙ b`, element-wise.
    Multiply { a: &'a Buffer<f32>, b: &'a Buffer<f32> },
    /// `a[0] / b[0]`; zero when the denominator vanishes.
    Divide { a: &'a Buffer<f32>, b: &'a Buffer<f32> },
    /// `a + scalar[0] * b`
    MultiplyAdd {
        a: &'a Buffer<f32>,
        scalar: &'a Buffer<f32>,
        b: &'a Buffer<f32>,
    },
    /// `a - scalar[0] * b`
    MultiplySub {
        a: &'a Buffer<f32>,
        scalar: &'a Buffer<f32>,
        b: &'a Buffer<f32>,
    },
}

fn same(lhs: &Buffer<f32>, rhs: &Buffer<f32>) -> bool {
    lhs.id() == rhs.id()
}

/// Compiled algebra kernels for one grid size.
pub struct BufferAlgebra {
    size: UVec2,
    multiply: Work,
    divide: Work,
    multiply_add: Work,
    multiply_sub: Work,
    accumulate_add: Work,
    accumulate_sub: Work,
    rescale_add: Work,
    rescale_sub: Work,
}

impl BufferAlgebra {
    pub fn new(gpu: &GpuContext, size: UVec2) -> Result<Self> {
        let grid = ComputeSize::grid(size);
        Ok(Self {
            size,
            multiply: Work::new(gpu, grid, &kernels::MULTIPLY)?,
            divide: Work::new(gpu, ComputeSize::scalar(), &kernels::DIVIDE)?,
            multiply_add: Work::new(gpu, grid, &kernels::MULTIPLY_ADD)?,
            multiply_sub: Work::new(gpu, grid, &kernels::MULTIPLY_SUB)?,
            accumulate_add: Work::new(gpu, grid, &kernels::ACCUMULATE_ADD)?,
            accumulate_sub: Work::new(gpu, grid, &kernels::ACCUMULATE_SUB)?,
            rescale_add: Work::new(gpu, grid, &kernels::RESCALE_ADD)?,
            rescale_sub: Work::new(gpu, grid, &kernels::RESCALE_SUB)?,
        })
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    /// Bind `expression` so that recording it writes into `output`.
    pub fn apply(&self, output: &Buffer<f32>, expression: Expression<'_>) -> Result<Bound> {
        match expression {
            Expression::Multiply { a, b } => self.multiply.bind(&[a, b, output]),
            Expression::Divide { a, b } => self.divide.bind(&[a, b, output]),
            Expression::MultiplyAdd { a, scalar, b } => {
                self.combine(output, a, scalar, b, &self.multiply_add, &self.accumulate_add, &self.rescale_add)
            }
            Expression::MultiplySub { a, scalar, b } => {
                self.combine(output, a, scalar, b, &self.multiply_sub, &self.accumulate_sub, &self.rescale_sub)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn combine(
        &self,
        output: &Buffer<f32>,
        a: &Buffer<f32>,
        scalar: &Buffer<f32>,
        b: &Buffer<f32>,
        out_of_place: &Work,
        in_place_first: &Work,
        in_place_second: &Work,
    ) -> Result<Bound> {
        if same(output, a) {
            in_place_first.bind(&[scalar, b, output])
        } else if same(output, b) {
            in_place_second.bind(&[a, scalar, output])
        } else {
            out_of_place.bind(&[a, scalar, b, output])
        }
    }
}
