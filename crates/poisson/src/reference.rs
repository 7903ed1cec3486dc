//! Host implementations of every solver kernel.
//!
//! Each function computes what the matching GPU kernel writes, cell for
//! cell, so device results can be checked against them and algorithmic
//! properties can be tested without an adapter. Grid-wide loops run on
//! rayon's pool.

use glam::{UVec2, Vec2};
use rayon::prelude::*;

use crate::error::Result;
use crate::linear_solver::{Colour, Depth, Parameters, SolverType};

/// Denominators at or below this magnitude make a scalar division yield 0.
pub const DIVIDE_EPSILON: f32 = 1e-20;

/// Ghost-fluid weights are clamped to this fraction.
pub const MIN_THETA: f32 = 0.01;

pub fn divide(a: f32, b: f32) -> f32 {
    if b.abs() <= DIVIDE_EPSILON {
        0.0
    } else {
        a / b
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.par_iter().zip(b.par_iter()).map(|(a, b)| a * b).sum()
}

pub fn max_abs(v: &[f32]) -> f32 {
    v.par_iter().map(|v| v.abs()).reduce(|| 0.0, f32::max)
}

/// Exclusive prefix sum and total.
pub fn exclusive_scan(counts: &[u32]) -> (Vec<u32>, u32) {
    let mut total = 0;
    let scanned = counts
        .iter()
        .map(|&count| {
            let offset = total;
            total += count;
            offset
        })
        .collect();
    (scanned, total)
}

/// Length of the segment between two level-set samples that lies inside
/// (negative side), as a fraction of the segment.
pub fn fraction_inside(a: f32, b: f32) -> f32 {
    match (a < 0.0, b < 0.0) {
        (true, true) => 1.0,
        (true, false) => a / (a - b),
        (false, true) => b / (b - a),
        (false, false) => 0.0,
    }
}

/// Level sets of a pool that fills the grid except for a one-cell ring of
/// air, with no solids.
pub fn pool_level_sets(size: UVec2) -> (Vec<f32>, Vec<f32>) {
    let liquid_phi = (0..size.y)
        .flat_map(|y| (0..size.x).map(move |x| (x, y)))
        .map(|(x, y)| {
            let edge = x.min(y).min(size.x - 1 - x).min(size.y - 1 - y);
            0.5 - edge as f32
        })
        .collect();
    let solid_phi = vec![1.0; (size.x * size.y) as usize];
    (liquid_phi, solid_phi)
}

/// Coarse level set: half the mean of the four children.
pub fn phi_scale(coarse_size: UVec2, fine: &[f32]) -> Vec<f32> {
    let fine_width = coarse_size.x as usize * 2;
    (0..coarse_size.y as usize)
        .flat_map(|y| (0..coarse_size.x as usize).map(move |x| (x, y)))
        .map(|(x, y)| {
            let j = y * 2 * fine_width + x * 2;
            let mean = 0.25 * (fine[j] + fine[j + 1] + fine[j + fine_width] + fine[j + fine_width + 1]);
            0.5 * mean
        })
        .collect()
}

/// A 5-point system: one diagonal and one west/south coupling per cell.
#[derive(Clone, Debug, PartialEq)]
pub struct HostSystem {
    pub size: UVec2,
    pub diagonal: Vec<f32>,
    pub lower: Vec<Vec2>,
}

impl HostSystem {
    pub fn new(size: UVec2, diagonal: Vec<f32>, lower: Vec<Vec2>) -> Self {
        Self { size, diagonal, lower }
    }

    /// Assemble the matrix from cell-centred level sets, `scale` being the
    /// weight of a fully open liquid face.
    pub fn from_level_sets(size: UVec2, liquid_phi: &[f32], solid_phi: &[f32], scale: f32) -> Self {
        let w = size.x as usize;
        let coupling = |i: usize, j: usize| -> (f32, f32) {
            let open = (1.0 - fraction_inside(solid_phi[i], solid_phi[j])).clamp(0.0, 1.0);
            if open <= 0.0 {
                return (0.0, 0.0);
            }
            let s = scale * open;
            if liquid_phi[j] < 0.0 {
                return (s, -s);
            }
            let theta = fraction_inside(liquid_phi[i], liquid_phi[j]).max(MIN_THETA);
            (s / theta, 0.0)
        };

        let (diagonal, lower) = (0..size.y as usize)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| {
                let i = y * w + x;
                if liquid_phi[i] >= 0.0 {
                    return (0.0, Vec2::ZERO);
                }
                let mut d = 0.0;
                let mut l = Vec2::ZERO;
                if x > 0 {
                    let c = coupling(i, i - 1);
                    d += c.0;
                    l.x = c.1;
                }
                if y > 0 {
                    let c = coupling(i, i - w);
                    d += c.0;
                    l.y = c.1;
                }
                if x + 1 < w {
                    d += coupling(i, i + 1).0;
                }
                if y + 1 < size.y as usize {
                    d += coupling(i, i + w).0;
                }
                if d == 0.0 {
                    l = Vec2::ZERO;
                }
                (d, l)
            })
            .unzip();
        Self::new(size, diagonal, lower)
    }

    /// Liquid pool with an air ring, see [`pool_level_sets`].
    pub fn pool(size: UVec2) -> Self {
        let (liquid_phi, solid_phi) = pool_level_sets(size);
        Self::from_level_sets(size, &liquid_phi, &solid_phi, 1.0)
    }

    pub fn len(&self) -> usize {
        self.diagonal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagonal.is_empty()
    }

    fn coordinates(&self, i: usize) -> (usize, usize) {
        let w = self.size.x as usize;
        (i % w, i / w)
    }

    fn off_diagonal(&self, x: &[f32], i: usize) -> f32 {
        let w = self.size.x as usize;
        let (cx, cy) = self.coordinates(i);
        let mut total = 0.0;
        if cx > 0 {
            total += self.lower[i].x * x[i - 1];
        }
        if cy > 0 {
            total += self.lower[i].y * x[i - w];
        }
        if cx + 1 < w {
            total += self.lower[i + 1].x * x[i + 1];
        }
        if cy + 1 < self.size.y as usize {
            total += self.lower[i + w].y * x[i + w];
        }
        total
    }

    /// `A x`, zero on masked cells.
    pub fn multiply(&self, x: &[f32]) -> Vec<f32> {
        (0..self.len())
            .into_par_iter()
            .map(|i| match self.diagonal[i] {
                d if d == 0.0 => 0.0,
                d => d * x[i] + self.off_diagonal(x, i),
            })
            .collect()
    }

    /// `b - A x`, zero on masked cells.
    pub fn residual(&self, b: &[f32], x: &[f32]) -> Vec<f32> {
        (0..self.len())
            .into_par_iter()
            .map(|i| match self.diagonal[i] {
                d if d == 0.0 => 0.0,
                d => b[i] - (d * x[i] + self.off_diagonal(x, i)),
            })
            .collect()
    }

    /// `b / d`, zero on masked cells.
    pub fn diagonal_solve(&self, b: &[f32]) -> Vec<f32> {
        self.diagonal
            .par_iter()
            .zip(b.par_iter())
            .map(|(&d, &b)| if d == 0.0 { 0.0 } else { b / d })
            .collect()
    }

    /// One damped Jacobi sweep.
    pub fn jacobi_sweep(&self, b: &[f32], x: &[f32], w: f32) -> Vec<f32> {
        (0..self.len())
            .into_par_iter()
            .map(|i| match self.diagonal[i] {
                d if d == 0.0 => 0.0,
                d => (1.0 - w) * x[i] + w * (b[i] - self.off_diagonal(x, i)) / d,
            })
            .collect()
    }

    /// One Jacobi preconditioner iteration: two sweeps, landing back in `x`.
    pub fn jacobi(&self, b: &[f32], x: &mut Vec<f32>, w: f32) {
        let back = self.jacobi_sweep(b, x, w);
        *x = self.jacobi_sweep(b, &back, w);
    }

    /// Relax every cell of `colour` in place. Cells of one colour only
    /// couple to the other colour, so the update order within it is free.
    pub fn gauss_seidel_colour(&self, b: &[f32], x: &mut [f32], w: f32, colour: Colour) {
        let parity = match colour {
            Colour::Red => 0,
            Colour::Black => 1,
        };
        let current: &[f32] = x;
        let updates: Vec<(usize, f32)> = (0..self.len())
            .into_par_iter()
            .filter(|&i| {
                let (cx, cy) = self.coordinates(i);
                (cx + cy) % 2 == parity && self.diagonal[i] != 0.0
            })
            .map(|i| {
                let d = self.diagonal[i];
                (i, (1.0 - w) * current[i] + w * (b[i] - self.off_diagonal(current, i)) / d)
            })
            .collect();
        for (i, value) in updates {
            x[i] = value;
        }
    }

    /// One red/black iteration starting with `first`.
    pub fn gauss_seidel(&self, b: &[f32], x: &mut [f32], w: f32, first: Colour) {
        let second = match first {
            Colour::Red => Colour::Black,
            Colour::Black => Colour::Red,
        };
        self.gauss_seidel_colour(b, x, w, first);
        self.gauss_seidel_colour(b, x, w, second);
    }

    /// `K Kᵀ b` with `K = I - L D⁻¹`.
    pub fn incomplete_poisson(&self, b: &[f32]) -> Vec<f32> {
        let w = self.size.x as usize;
        let h = self.size.y as usize;
        let transposed: Vec<f32> = (0..self.len())
            .into_par_iter()
            .map(|j| {
                let d = self.diagonal[j];
                if d == 0.0 {
                    return 0.0;
                }
                let (cx, cy) = self.coordinates(j);
                let mut coupled = 0.0;
                if cx + 1 < w {
                    coupled += self.lower[j + 1].x * b[j + 1];
                }
                if cy + 1 < h {
                    coupled += self.lower[j + w].y * b[j + w];
                }
                b[j] - coupled / d
            })
            .collect();

        (0..self.len())
            .into_par_iter()
            .map(|i| {
                if self.diagonal[i] == 0.0 {
                    return 0.0;
                }
                let (cx, cy) = self.coordinates(i);
                let mut value = transposed[i];
                if cx > 0 && self.diagonal[i - 1] != 0.0 {
                    value -= self.lower[i].x / self.diagonal[i - 1] * transposed[i - 1];
                }
                if cy > 0 && self.diagonal[i - w] != 0.0 {
                    value -= self.lower[i].y / self.diagonal[i - w] * transposed[i - w];
                }
                value
            })
            .collect()
    }

    /// Preconditioned conjugate gradient from a zero guess. Returns the
    /// solution and the max-norm residual before each iteration and after
    /// the last one.
    pub fn conjugate_gradient<F>(&self, b: &[f32], params: &mut Parameters, preconditioner: F) -> (Vec<f32>, Vec<f32>)
    where
        F: Fn(&[f32]) -> Vec<f32>,
    {
        params.reset();
        let n = self.len();
        let mut x = vec![0.0; n];
        let mut r = b.to_vec();
        params.out_error = max_abs(&r);
        let mut history = vec![params.out_error];
        if params.solver_type == SolverType::Iterative && params.out_error <= params.error_tolerance {
            return (x, history);
        }

        let mut z = preconditioner(&r);
        let mut s = z.clone();
        let mut rho = dot(&z, &r);
        let initial_error = params.out_error;

        while !params.should_stop(initial_error) {
            let z_s = self.multiply(&s);
            let alpha = divide(rho, dot(&z_s, &s));
            x.par_iter_mut().zip(s.par_iter()).for_each(|(x, s)| *x += alpha * s);
            r.par_iter_mut().zip(z_s.par_iter()).for_each(|(r, z)| *r -= alpha * z);
            params.out_error = max_abs(&r);
            history.push(params.out_error);

            z = preconditioner(&r);
            let rho_new = dot(&z, &r);
            let beta = divide(rho_new, rho);
            s.par_iter_mut().zip(z.par_iter()).for_each(|(s, z)| *s = z + beta * *s);
            rho = rho_new;
            params.out_iterations += 1;
        }
        (x, history)
    }
}

/// Full-weighting restriction onto a grid half the size of `fine_size`.
pub fn restrict(fine_size: UVec2, fine_diagonal: &[f32], fine: &[f32], coarse_diagonal: &[f32]) -> Vec<f32> {
    const WEIGHTS: [f32; 4] = [1.0, 3.0, 3.0, 1.0];
    let coarse_size = fine_size / 2;
    let (fw, fh) = (fine_size.x as i64, fine_size.y as i64);
    (0..(coarse_size.x * coarse_size.y) as usize)
        .into_par_iter()
        .map(|i| {
            if coarse_diagonal[i] == 0.0 {
                return 0.0;
            }
            let (cx, cy) = ((i % coarse_size.x as usize) as i64, (i / coarse_size.x as usize) as i64);
            let mut total = 0.0;
            for (ky, wy) in WEIGHTS.iter().enumerate() {
                let fy = cy * 2 + ky as i64 - 1;
                if fy < 0 || fy >= fh {
                    continue;
                }
                for (kx, wx) in WEIGHTS.iter().enumerate() {
                    let fx = cx * 2 + kx as i64 - 1;
                    if fx < 0 || fx >= fw {
                        continue;
                    }
                    let j = (fy * fw + fx) as usize;
                    if fine_diagonal[j] != 0.0 {
                        total += wx * wy * fine[j];
                    }
                }
            }
            total / 64.0
        })
        .collect()
}

/// Bilinear prolongation of `coarse`, added onto `fine`.
pub fn prolongate(fine_size: UVec2, fine_diagonal: &[f32], fine: &mut [f32], coarse_diagonal: &[f32], coarse: &[f32]) {
    let (cw, ch) = ((fine_size.x / 2) as i64, (fine_size.y / 2) as i64);
    let fw = fine_size.x as usize;
    fine.par_iter_mut().enumerate().for_each(|(i, value)| {
        if fine_diagonal[i] == 0.0 {
            return;
        }
        let (fx, fy) = ((i % fw) as i64, (i / fw) as i64);
        let x0 = (fx + 1) / 2 - 1;
        let y0 = (fy + 1) / 2 - 1;
        let wx0 = if fx % 2 == 0 { 0.25 } else { 0.75 };
        let wy0 = if fy % 2 == 0 { 0.25 } else { 0.75 };
        let mut total = 0.0;
        for ky in 0..2 {
            let cy = y0 + ky;
            if cy < 0 || cy >= ch {
                continue;
            }
            let wy = if ky == 0 { wy0 } else { 1.0 - wy0 };
            for kx in 0..2 {
                let cx = x0 + kx;
                if cx < 0 || cx >= cw {
                    continue;
                }
                let wx = if kx == 0 { wx0 } else { 1.0 - wx0 };
                let j = (cy * cw + cx) as usize;
                if coarse_diagonal[j] != 0.0 {
                    total += wx * wy * coarse[j];
                }
            }
        }
        *value += total;
    });
}

/// Host multigrid with a damped Jacobi smoother and a red/black coarse solver.
pub struct HostMultigrid {
    pub levels: Vec<HostSystem>,
    pub smoothing_iterations: u32,
    pub w: f32,
    pub coarse_iterations: u32,
}

impl HostMultigrid {
    /// Build every level from the finest level sets, mirroring the device
    /// hierarchy build.
    pub fn new(size: UVec2, liquid_phi: &[f32], solid_phi: &[f32], delta: f32) -> Result<Self> {
        let depth = Depth::new(size)?;
        let mut levels = Vec::with_capacity(depth.max_depth() + 1);
        let mut phi = (liquid_phi.to_vec(), solid_phi.to_vec());
        for (level, level_size) in depth.iter().enumerate() {
            if level > 0 {
                phi = (phi_scale(level_size, &phi.0), phi_scale(level_size, &phi.1));
            }
            let scale = delta / 4f32.powi(level as i32);
            levels.push(HostSystem::from_level_sets(level_size, &phi.0, &phi.1, scale));
        }
        Ok(Self {
            levels,
            smoothing_iterations: 3,
            w: 2.0 / 3.0,
            coarse_iterations: 32,
        })
    }

    /// One V-cycle for `A x = b` on level `level` from the guess in `x`.
    pub fn v_cycle(&self, level: usize, b: &[f32], x: &mut Vec<f32>) {
        let system = &self.levels[level];
        if level + 1 == self.levels.len() {
            for _ in 0..self.coarse_iterations {
                system.gauss_seidel(b, x, 1.0, Colour::Red);
            }
            return;
        }

        for _ in 0..self.smoothing_iterations {
            system.jacobi(b, x, self.w);
        }
        let residual = system.residual(b, x);
        let coarse = &self.levels[level + 1];
        let coarse_b = restrict(system.size, &system.diagonal, &residual, &coarse.diagonal);
        let mut coarse_x = vec![0.0; coarse.len()];
        self.v_cycle(level + 1, &coarse_b, &mut coarse_x);
        prolongate(system.size, &system.diagonal, x, &coarse.diagonal, &coarse_x);
        for _ in 0..self.smoothing_iterations {
            system.jacobi(b, x, self.w);
        }
    }

    /// Full multigrid cycle from a zero guess: restrict `b` to every level,
    /// solve on the coarsest, then prolongate upward running a V-cycle on
    /// each finer level.
    pub fn full_cycle(&self, b: &[f32]) -> Vec<f32> {
        let mut rhs = vec![b.to_vec()];
        for (level, pair) in self.levels.windows(2).enumerate() {
            let (fine, coarse) = (&pair[0], &pair[1]);
            let coarse_b = restrict(fine.size, &fine.diagonal, &rhs[level], &coarse.diagonal);
            rhs.push(coarse_b);
        }

        let coarsest = self.levels.len() - 1;
        let mut x = vec![0.0; self.levels[coarsest].len()];
        for _ in 0..self.coarse_iterations {
            self.levels[coarsest].gauss_seidel(&rhs[coarsest], &mut x, 1.0, Colour::Red);
        }

        for level in (0..coarsest).rev() {
            let (system, coarse) = (&self.levels[level], &self.levels[level + 1]);
            let mut fine_x = vec![0.0; system.len()];
            prolongate(system.size, &system.diagonal, &mut fine_x, &coarse.diagonal, &x);
            self.v_cycle(level, &rhs[level], &mut fine_x);
            x = fine_x;
        }
        x
    }

    /// `M⁻¹ b`: one V-cycle from a zero guess.
    pub fn precondition(&self, b: &[f32]) -> Vec<f32> {
        let mut x = vec![0.0; b.len()];
        self.v_cycle(0, b, &mut x);
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divide_guards_tiny_denominators() {
        assert_eq!(divide(1.0, 0.0), 0.0);
        assert_eq!(divide(1.0, 1e-21), 0.0);
        assert_eq!(divide(1.0, 4.0), 0.25);
    }

    #[test]
    fn scan_is_exclusive() {
        let (scanned, total) = exclusive_scan(&[3, 0, 2, 5]);
        assert_eq!(scanned, vec![0, 3, 3, 5]);
        assert_eq!(total, 10);
    }

    #[test]
    fn pool_couplings_stay_between_liquid_cells() {
        let system = HostSystem::pool(UVec2::new(8, 6));
        let w = 8;
        for i in 0..system.len() {
            if system.diagonal[i] == 0.0 {
                assert_eq!(system.lower[i], Vec2::ZERO);
                continue;
            }
            assert!(system.diagonal[i] > 0.0);
            // A neighbour coupling is only stored when both cells are liquid.
            if system.lower[i].x != 0.0 {
                assert!(system.diagonal[i - 1] != 0.0);
            }
            if system.lower[i].y != 0.0 {
                assert!(system.diagonal[i - w] != 0.0);
            }
        }
    }

    #[test]
    fn ring_cells_are_masked() {
        let system = HostSystem::pool(UVec2::new(6, 6));
        assert_eq!(system.diagonal[0], 0.0);
        assert_eq!(system.diagonal[5], 0.0);
        // Corner liquid cell: two liquid faces, two air faces at theta 0.5.
        assert_eq!(system.diagonal[7], 2.0 + 2.0 * 2.0);
        assert_eq!(system.lower[8], Vec2::new(-1.0, 0.0));
    }

    #[test]
    fn phi_scale_halves_the_mean() {
        let fine = vec![1.0, 3.0, 5.0, 7.0];
        assert_eq!(phi_scale(UVec2::ONE, &fine), vec![2.0]);
    }
}
