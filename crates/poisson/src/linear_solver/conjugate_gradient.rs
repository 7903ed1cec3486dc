//! Preconditioned conjugate gradient.
//!
//! Every scalar of the iteration (alpha, beta, rho, sigma) stays in a
//! one-element device buffer, so an iteration is a single recorded command
//! buffer with no host round trip. In iterative mode the error readback of
//! one iteration overlaps the dispatch of the next.

use glam::{UVec2, Vec2};

use super::algebra::{BufferAlgebra, Expression};
use super::reduce::{ReduceBound, ReduceMax, ReduceSum};
use super::{LinearSolver, Parameters, Preconditioner, SolverType};
use crate::error::{Result, SolverError};
use crate::gpu::{
    kernels, readback, Access, Bound, Buffer, CommandBuffer, CommandEncoder, ComputeSize, GpuContext, MemoryUsage,
    Work,
};
use crate::rigid_body::RigidBody;

/// Scratch vectors and scalars of one solver instance.
struct Scratch {
    r: Buffer<f32>,
    s: Buffer<f32>,
    z: Buffer<f32>,
    inner: Buffer<f32>,
    alpha: Buffer<f32>,
    beta: Buffer<f32>,
    rho: Buffer<f32>,
    rho_new: Buffer<f32>,
    sigma: Buffer<f32>,
    error: Buffer<f32>,
    local_error: Buffer<f32>,
}

impl Scratch {
    fn new(gpu: &GpuContext, n: usize) -> Result<Self> {
        let vector = |label: &str| Buffer::new(gpu, label, n, MemoryUsage::Gpu);
        let scalar = |label: &str| Buffer::new(gpu, label, 1, MemoryUsage::Gpu);
        Ok(Self {
            r: vector("CG Residual")?,
            s: vector("CG Search")?,
            z: vector("CG Z")?,
            inner: vector("CG Inner")?,
            alpha: scalar("CG Alpha")?,
            beta: scalar("CG Beta")?,
            rho: scalar("CG Rho")?,
            rho_new: scalar("CG Rho New")?,
            sigma: scalar("CG Sigma")?,
            error: scalar("CG Error")?,
            local_error: Buffer::new(gpu, "CG Error Readback", 1, MemoryUsage::GpuToCpu)?,
        })
    }
}

/// Bound operations that only touch solver-owned buffers.
struct Internal {
    reduce_max: ReduceBound,
    reduce_rho: ReduceBound,
    reduce_rho_new: ReduceBound,
    reduce_sigma: ReduceBound,
    multiply_zr: Bound,
    multiply_zs: Bound,
    divide_alpha: Bound,
    divide_beta: Bound,
    multiply_sub_r: Bound,
    multiply_add_s: Bound,
}

/// Bound operations that involve the caller's buffers.
struct External {
    matrix_multiply: Bound,
    multiply_add_x: Bound,
    b: Buffer<f32>,
    x: Buffer<f32>,
}

pub struct ConjugateGradient<P: Preconditioner + ?Sized = dyn Preconditioner> {
    gpu: GpuContext,
    size: UVec2,
    scratch: Scratch,
    internal: Internal,
    external: Option<External>,
    matrix_multiply: Work,
    algebra: BufferAlgebra,
    init: CommandBuffer,
    step: CommandBuffer,
    error_read: CommandBuffer,
    preconditioner: Box<P>,
}

impl<P: Preconditioner + ?Sized> ConjugateGradient<P> {
    pub fn new(gpu: &GpuContext, size: UVec2, preconditioner: Box<P>) -> Result<Self> {
        let n = size.x * size.y;
        let scratch = Scratch::new(gpu, n as usize)?;
        let algebra = BufferAlgebra::new(gpu, size)?;
        let reduce_sum = ReduceSum::new(gpu, n)?;
        let reduce_max = ReduceMax::new(gpu, n)?;

        let s = &scratch;
        let internal = Internal {
            reduce_max: reduce_max.bind(&s.r, &s.error)?,
            reduce_rho: reduce_sum.bind(&s.inner, &s.rho)?,
            reduce_rho_new: reduce_sum.bind(&s.inner, &s.rho_new)?,
            reduce_sigma: reduce_sum.bind(&s.inner, &s.sigma)?,
            multiply_zr: algebra.apply(&s.inner, Expression::Multiply { a: &s.z, b: &s.r })?,
            multiply_zs: algebra.apply(&s.inner, Expression::Multiply { a: &s.z, b: &s.s })?,
            divide_alpha: algebra.apply(&s.alpha, Expression::Divide { a: &s.rho, b: &s.sigma })?,
            divide_beta: algebra.apply(&s.beta, Expression::Divide { a: &s.rho_new, b: &s.rho })?,
            multiply_sub_r: algebra.apply(
                &s.r,
                Expression::MultiplySub {
                    a: &s.r,
                    scalar: &s.alpha,
                    b: &s.z,
                },
            )?,
            multiply_add_s: algebra.apply(
                &s.s,
                Expression::MultiplyAdd {
                    a: &s.z,
                    scalar: &s.beta,
                    b: &s.s,
                },
            )?,
        };

        let mut error_read = CommandBuffer::new(gpu, "CG Error Read", true);
        error_read.record(|command| {
            scratch.local_error.copy_from(command, &scratch.error);
            Ok(())
        })?;

        log::info!("Conjugate gradient: {}x{} cells", size.x, size.y);

        Ok(Self {
            gpu: gpu.clone(),
            size,
            internal,
            external: None,
            matrix_multiply: Work::new(gpu, ComputeSize::grid(size), &kernels::MATRIX_MULTIPLY)?,
            algebra,
            init: CommandBuffer::new(gpu, "CG Init", false),
            step: CommandBuffer::new(gpu, "CG Step", false),
            error_read,
            scratch,
            preconditioner,
        })
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn preconditioner(&self) -> &P {
        &self.preconditioner
    }

    pub fn preconditioner_mut(&mut self) -> &mut P {
        &mut self.preconditioner
    }

    fn read_error(&mut self) -> Result<f32> {
        self.error_read.wait()?;
        let values = readback::map_read(&self.gpu, &self.scratch.local_error, self.error_read.maintain())?;
        Ok(values.first().copied().unwrap_or(0.0))
    }

    fn record_init(
        command: &mut CommandEncoder,
        s: &Scratch,
        internal: &Internal,
        external: &External,
        preconditioner: &P,
    ) -> Result<()> {
        command.debug_marker_begin("CG Init");
        s.r.copy_from(command, &external.b);
        s.r.barrier(command, Access::Write, Access::Read);
        internal.reduce_max.record(command);
        external.x.clear(command);
        s.z.clear(command);
        s.z.barrier(command, Access::Write, Access::Write);
        preconditioner.record(command)?;
        s.s.copy_from(command, &s.z);
        internal.multiply_zr.record(command);
        s.inner.barrier(command, Access::Write, Access::Read);
        internal.reduce_rho.record(command);
        s.z.clear(command);
        command.debug_marker_end();
        Ok(())
    }

    fn record_step(
        command: &mut CommandEncoder,
        s: &Scratch,
        internal: &Internal,
        external: &External,
        preconditioner: &P,
    ) -> Result<()> {
        command.debug_marker_begin("CG Step");
        external.matrix_multiply.record(command);
        s.z.barrier(command, Access::Write, Access::Read);
        internal.multiply_zs.record(command);
        s.inner.barrier(command, Access::Write, Access::Read);
        internal.reduce_sigma.record(command);
        internal.divide_alpha.record(command);
        s.alpha.barrier(command, Access::Write, Access::Read);

        external.multiply_add_x.record(command);
        internal.multiply_sub_r.record(command);
        s.r.barrier(command, Access::Write, Access::Read);
        internal.reduce_max.record(command);

        s.z.clear(command);
        s.z.barrier(command, Access::Write, Access::Write);
        preconditioner.record(command)?;
        internal.multiply_zr.record(command);
        s.inner.barrier(command, Access::Write, Access::Read);
        internal.reduce_rho_new.record(command);
        internal.divide_beta.record(command);
        s.beta.barrier(command, Access::Write, Access::Read);

        internal.multiply_add_s.record(command);
        s.s.barrier(command, Access::Write, Access::Read);
        s.z.clear(command);
        s.rho.copy_from(command, &s.rho_new);
        command.debug_marker_end();
        Ok(())
    }
}

impl<P: Preconditioner + ?Sized> LinearSolver for ConjugateGradient<P> {
    fn bind(
        &mut self,
        diagonal: &Buffer<f32>,
        lower: &Buffer<Vec2>,
        b: &Buffer<f32>,
        x: &Buffer<f32>,
    ) -> Result<()> {
        let n = (self.size.x * self.size.y) as usize;
        b.check_len(n)?;
        x.check_len(n)?;

        let s = &self.scratch;
        self.preconditioner.bind(diagonal, lower, &s.r, &s.z)?;

        let external = External {
            matrix_multiply: self.matrix_multiply.bind(&[diagonal, lower, &s.s, &s.z])?,
            multiply_add_x: self.algebra.apply(
                x,
                Expression::MultiplyAdd {
                    a: x,
                    scalar: &s.alpha,
                    b: &s.s,
                },
            )?,
            b: b.clone(),
            x: x.clone(),
        };

        let (internal, preconditioner) = (&self.internal, &*self.preconditioner);
        self.init
            .record(|command| Self::record_init(command, s, internal, &external, preconditioner))?;
        self.step
            .record(|command| Self::record_step(command, s, internal, &external, preconditioner))?;
        self.external = Some(external);
        Ok(())
    }

    fn bind_rigidbody(&mut self, delta: f32, diagonal: &Buffer<f32>, rigid_body: &mut dyn RigidBody) -> Result<()> {
        rigid_body.bind_pressure(delta, diagonal, &self.scratch.s, &self.scratch.z)
    }

    fn solve(&mut self, params: &mut Parameters, rigid_bodies: &mut [&mut dyn RigidBody]) -> Result<()> {
        if self.external.is_none() {
            return Err(SolverError::NotBound {
                component: "conjugate gradient",
            });
        }
        params.reset();
        self.init.submit()?;

        let iterative = params.solver_type == SolverType::Iterative;
        if iterative {
            self.error_read.submit()?;
            params.out_error = self.read_error()?;
            if params.out_error <= params.error_tolerance {
                log::debug!("CG: initial error {:.3e} within tolerance", params.out_error);
                return Ok(());
            }
            self.error_read.submit()?;
        }

        let initial_error = params.out_error;
        let mut i = 0;
        while !params.should_stop(initial_error) {
            for rigid_body in rigid_bodies.iter_mut() {
                rigid_body.pressure()?;
            }

            self.step.submit()?;

            if iterative {
                params.out_error = self.read_error()?;
                self.error_read.submit()?;
            }
            i += 1;
            params.out_iterations = i;
        }

        self.error_read.wait()?;

        if iterative && params.out_iterations >= params.max_iterations() {
            log::warn!(
                "CG: reached {} iterations with error {:.3e} (initial {:.3e})",
                params.out_iterations,
                params.out_error,
                initial_error
            );
        }
        log::debug!(
            "CG: {} iterations, error {:.3e}",
            params.out_iterations,
            params.out_error
        );
        Ok(())
    }

    fn error(&mut self) -> Result<f32> {
        self.error_read.submit()?;
        self.read_error()
    }
}
