//! Compute kernels shipped with the crate.
//!
//! Each kernel is a WGSL module assembled from shared preludes plus one
//! kernel file. Binding 0 is always the [`super::KernelConstants`] uniform;
//! storage buffers follow in the order listed in `bindings`.

const COMMON: &str = include_str!("shaders/common.wgsl");
const STENCIL: &str = include_str!("shaders/stencil.wgsl");
const PREFIX_SCAN: &str = include_str!("shaders/prefix_scan.wgsl");

/// Storage access of one kernel binding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    ReadOnly,
    ReadWrite,
}

use Binding::{ReadOnly as R, ReadWrite as RW};

/// A compute entry point together with its source and binding layout.
#[derive(Debug)]
pub struct Kernel {
    pub name: &'static str,
    pub entry_point: &'static str,
    pub sources: &'static [&'static str],
    pub bindings: &'static [Binding],
}

impl Kernel {
    /// Full WGSL source, preludes first.
    pub fn source(&self) -> String {
        self.sources.join("\n")
    }
}

// x, diagonal, lower, b -> residual
pub const RESIDUAL: Kernel = Kernel {
    name: "residual",
    entry_point: "main",
    sources: &[COMMON, STENCIL, include_str!("shaders/residual.wgsl")],
    bindings: &[R, R, R, R, RW],
};

// diagonal, lower, x -> output
pub const MATRIX_MULTIPLY: Kernel = Kernel {
    name: "matrix_multiply",
    entry_point: "main",
    sources: &[COMMON, STENCIL, include_str!("shaders/matrix_multiply.wgsl")],
    bindings: &[R, R, R, RW],
};

pub const MULTIPLY: Kernel = Kernel {
    name: "multiply",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/multiply.wgsl")],
    bindings: &[R, R, RW],
};

pub const DIVIDE: Kernel = Kernel {
    name: "divide",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/divide.wgsl")],
    bindings: &[R, R, RW],
};

const MULTIPLY_ADD_SOURCE: &[&str] = &[COMMON, include_str!("shaders/multiply_add.wgsl")];
const ACCUMULATE_SOURCE: &[&str] = &[COMMON, include_str!("shaders/accumulate.wgsl")];
const RESCALE_SOURCE: &[&str] = &[COMMON, include_str!("shaders/rescale.wgsl")];

// a, scalar, b -> output
pub const MULTIPLY_ADD: Kernel = Kernel {
    name: "multiply_add",
    entry_point: "multiply_add",
    sources: MULTIPLY_ADD_SOURCE,
    bindings: &[R, R, R, RW],
};

pub const MULTIPLY_SUB: Kernel = Kernel {
    name: "multiply_sub",
    entry_point: "multiply_sub",
    sources: MULTIPLY_ADD_SOURCE,
    bindings: &[R, R, R, RW],
};

// scalar, b -> output (output is also the first operand)
pub const ACCUMULATE_ADD: Kernel = Kernel {
    name: "accumulate_add",
    entry_point: "multiply_add",
    sources: ACCUMULATE_SOURCE,
    bindings: &[R, R, RW],
};

pub const ACCUMULATE_SUB: Kernel = Kernel {
    name: "accumulate_sub",
    entry_point: "multiply_sub",
    sources: ACCUMULATE_SOURCE,
    bindings: &[R, R, RW],
};

// a, scalar -> output (output is also the second operand)
pub const RESCALE_ADD: Kernel = Kernel {
    name: "rescale_add",
    entry_point: "multiply_add",
    sources: RESCALE_SOURCE,
    bindings: &[R, R, RW],
};

pub const RESCALE_SUB: Kernel = Kernel {
    name: "rescale_sub",
    entry_point: "multiply_sub",
    sources: RESCALE_SOURCE,
    bindings: &[R, R, RW],
};

// diagonal, b -> x
pub const DIAGONAL: Kernel = Kernel {
    name: "diagonal",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/diagonal.wgsl")],
    bindings: &[R, R, RW],
};

// x -> x_out, diagonal, lower, b
pub const JACOBI: Kernel = Kernel {
    name: "jacobi",
    entry_point: "main",
    sources: &[COMMON, STENCIL, include_str!("shaders/jacobi.wgsl")],
    bindings: &[R, RW, R, R, R],
};

// x (in place), diagonal, lower, b
pub const GAUSS_SEIDEL: Kernel = Kernel {
    name: "gauss_seidel",
    entry_point: "main",
    sources: &[COMMON, STENCIL, include_str!("shaders/gauss_seidel.wgsl")],
    bindings: &[RW, R, R, R],
};

pub const LOCAL_GAUSS_SEIDEL: Kernel = Kernel {
    name: "local_gauss_seidel",
    entry_point: "main",
    sources: &[COMMON, STENCIL, include_str!("shaders/local_gauss_seidel.wgsl")],
    bindings: &[RW, R, R, R],
};

// diagonal, lower, b -> x
pub const INCOMPLETE_POISSON: Kernel = Kernel {
    name: "incomplete_poisson",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/incomplete_poisson.wgsl")],
    bindings: &[R, R, R, RW],
};

// fine_diagonal, fine, coarse_diagonal -> coarse
pub const RESTRICT: Kernel = Kernel {
    name: "restrict",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/restrict.wgsl")],
    bindings: &[R, R, R, RW],
};

// fine_diagonal, fine (accumulated), coarse_diagonal, coarse
pub const PROLONGATE: Kernel = Kernel {
    name: "prolongate",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/prolongate.wgsl")],
    bindings: &[R, RW, R, R],
};

// liquid_phi, solid_phi -> diagonal, lower
pub const BUILD_MATRIX: Kernel = Kernel {
    name: "build_matrix",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/build_matrix.wgsl")],
    bindings: &[R, R, RW, RW],
};

pub const PHI_SCALE: Kernel = Kernel {
    name: "phi_scale",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/phi_scale.wgsl")],
    bindings: &[R, RW],
};

pub const REDUCE_SUM: Kernel = Kernel {
    name: "reduce_sum",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/reduce_sum.wgsl")],
    bindings: &[R, RW],
};

pub const REDUCE_MAX: Kernel = Kernel {
    name: "reduce_max",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/reduce_max.wgsl")],
    bindings: &[R, RW],
};

pub const REDUCE_J: Kernel = Kernel {
    name: "reduce_j",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/reduce_j.wgsl")],
    bindings: &[R, RW],
};

// input -> output, partial_sums
pub const PRESCAN_STORE_SUM: Kernel = Kernel {
    name: "prescan_store_sum",
    entry_point: "main",
    sources: &[COMMON, PREFIX_SCAN, include_str!("shaders/prescan_store_sum.wgsl")],
    bindings: &[R, RW, RW],
};

// input -> output, dispatch_params
pub const PRESCAN: Kernel = Kernel {
    name: "prescan",
    entry_point: "main",
    sources: &[COMMON, PREFIX_SCAN, include_str!("shaders/prescan.wgsl")],
    bindings: &[R, RW, RW],
};

// partial_sums -> output
pub const PRESCAN_ADD: Kernel = Kernel {
    name: "prescan_add",
    entry_point: "main",
    sources: &[COMMON, include_str!("shaders/prescan_add.wgsl")],
    bindings: &[R, RW],
};

/// Every kernel, for validation.
pub const ALL: &[&Kernel] = &[
    &RESIDUAL,
    &MATRIX_MULTIPLY,
    &MULTIPLY,
    &DIVIDE,
    &MULTIPLY_ADD,
    &MULTIPLY_SUB,
    &ACCUMULATE_ADD,
    &ACCUMULATE_SUB,
    &RESCALE_ADD,
    &RESCALE_SUB,
    &DIAGONAL,
    &JACOBI,
    &GAUSS_SEIDEL,
    &LOCAL_GAUSS_SEIDEL,
    &INCOMPLETE_POISSON,
    &RESTRICT,
    &PROLONGATE,
    &BUILD_MATRIX,
    &PHI_SCALE,
    &REDUCE_SUM,
    &REDUCE_MAX,
    &REDUCE_J,
    &PRESCAN_STORE_SUM,
    &PRESCAN,
    &PRESCAN_ADD,
];
