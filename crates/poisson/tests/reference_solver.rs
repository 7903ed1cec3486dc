//! Algorithmic properties of the solvers, checked on the host reference
//!
//! These run without a GPU and cover:
//! - Conjugate gradient convergence and energy-norm monotonicity
//! - Red/black Gauss-Seidel converging to the same answer from either colour
//! - Max-norm residual monotonicity of the Gauss-Seidel and Jacobi smoothers
//! - Multigrid V-cycle and full cycle residual reduction
//! - Restriction / prolongation stencils and their adjointness

use glam::{UVec2, Vec2};
use poisson::linear_solver::gauss_seidel::optimal_w;
use poisson::linear_solver::{Colour, Parameters, SolverType, ITERATION_CEILING};
use poisson::reference::{self, HostMultigrid, HostSystem};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random right-hand side on liquid cells, zero elsewhere.
fn random_rhs(system: &HostSystem, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    system
        .diagonal
        .iter()
        .map(|&d| if d == 0.0 { 0.0 } else { rng.gen_range(-1.0..1.0) })
        .collect()
}

/// Constant diagonal of 8 with random couplings in [-1, 0]: every row is
/// strictly diagonally dominant with off-diagonal sum at most half the diagonal.
fn dominant_system(size: UVec2, seed: u64) -> HostSystem {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = (size.x * size.y) as usize;
    let lower = (0..n)
        .map(|_| Vec2::new(rng.gen_range(-1.0f32..=0.0), rng.gen_range(-1.0f32..=0.0)))
        .collect();
    HostSystem::new(size, vec![8.0; n], lower)
}

fn energy(system: &HostSystem, exact: &[f32], x: &[f32]) -> f32 {
    let error: Vec<f32> = exact.iter().zip(x).map(|(a, b)| a - b).collect();
    reference::dot(&error, &system.multiply(&error))
}

//==============================================================================
// Conjugate gradient
//==============================================================================

#[test]
fn test_cg_reaches_relative_tolerance() {
    let system = HostSystem::pool(UVec2::new(32, 32));
    let b = random_rhs(&system, 1);

    let mut params = Parameters::iterative(1e-5);
    let (x, history) = system.conjugate_gradient(&b, &mut params, |r| system.incomplete_poisson(r));

    let initial = history[0];
    assert!(params.out_iterations < params.iterations, "hit the iteration ceiling");
    assert!(params.out_error <= 1e-5 * initial);
    assert_eq!(history.len() as u32, params.out_iterations + 1);

    // The recursively updated residual stays close to the true one.
    let residual = reference::max_abs(&system.residual(&b, &x));
    assert!(residual <= 1e-3 * initial, "residual {residual} vs initial {initial}");
}

#[test]
fn test_cg_fixed_runs_exact_iterations() {
    let system = HostSystem::pool(UVec2::new(16, 16));
    let b = random_rhs(&system, 2);

    let mut params = Parameters::fixed(7);
    let (_, history) = system.conjugate_gradient(&b, &mut params, |r| r.to_vec());
    assert_eq!(params.out_iterations, 7);
    assert_eq!(history.len(), 8);
}

#[test]
fn test_cg_zero_rhs_returns_immediately() {
    let system = HostSystem::pool(UVec2::new(16, 16));
    let b = vec![0.0; system.len()];

    let mut params = Parameters::iterative(1e-5);
    let (x, _) = system.conjugate_gradient(&b, &mut params, |r| system.diagonal_solve(r));
    assert_eq!(params.out_iterations, 0);
    assert!(x.iter().all(|&v| v == 0.0));
}

#[test]
fn test_cg_error_is_non_increasing_in_energy_norm() {
    let system = HostSystem::pool(UVec2::new(16, 16));
    let b = random_rhs(&system, 3);

    let (exact, _) = system.conjugate_gradient(&b, &mut Parameters::fixed(400), |r| system.diagonal_solve(r));

    let energies: Vec<f32> = (0..15)
        .map(|k| {
            let (x, _) = system.conjugate_gradient(&b, &mut Parameters::fixed(k), |r| system.diagonal_solve(r));
            energy(&system, &exact, &x)
        })
        .collect();

    let epsilon = 1e-4 * energies[0];
    for pair in energies.windows(2) {
        assert!(pair[1] <= pair[0] + epsilon, "energy rose: {:?}", energies);
    }
    assert!(energies[14] < 0.1 * energies[0]);
}

#[test]
fn test_cg_without_ceiling_stops_at_default_ceiling() {
    let system = HostSystem::pool(UVec2::new(8, 8));
    let b = random_rhs(&system, 9);

    // A negative tolerance is never met, so only the ceiling ends the solve.
    let mut params = Parameters::new(SolverType::Iterative, 0, -1.0);
    let (_, history) = system.conjugate_gradient(&b, &mut params, |r| system.diagonal_solve(r));
    assert_eq!(params.out_iterations, ITERATION_CEILING);
    assert_eq!(history.len() as u32, ITERATION_CEILING + 1);
}

#[test]
fn test_cg_preconditioners_all_converge() {
    let system = HostSystem::pool(UVec2::new(24, 24));
    let b = random_rhs(&system, 4);

    let plain = {
        let mut params = Parameters::iterative(1e-4);
        system.conjugate_gradient(&b, &mut params, |r| r.to_vec());
        params.out_iterations
    };
    let incomplete = {
        let mut params = Parameters::iterative(1e-4);
        system.conjugate_gradient(&b, &mut params, |r| system.incomplete_poisson(r));
        params.out_iterations
    };
    let jacobi = {
        let mut params = Parameters::iterative(1e-4);
        system.conjugate_gradient(&b, &mut params, |r| {
            let mut z = vec![0.0; r.len()];
            system.jacobi(r, &mut z, 1.0);
            z
        });
        params.out_iterations
    };

    assert!(plain < 1000 && incomplete < 1000 && jacobi < 1000);
    assert!(incomplete < plain, "incomplete poisson {incomplete} vs plain {plain}");
}

//==============================================================================
// Gauss-Seidel
//==============================================================================

#[test]
fn test_gauss_seidel_colour_order_converges_to_same_solution() {
    let size = UVec2::new(16, 16);
    let system = HostSystem::pool(size);
    let b = random_rhs(&system, 5);
    let w = optimal_w(size.x * size.y);

    let solve = |first: Colour| {
        let mut x = vec![0.0; system.len()];
        for _ in 0..500 {
            system.gauss_seidel(&b, &mut x, w, first);
        }
        x
    };
    let red_first = solve(Colour::Red);
    let black_first = solve(Colour::Black);

    let scale = reference::max_abs(&red_first);
    for (a, b) in red_first.iter().zip(&black_first) {
        assert!((a - b).abs() <= 1e-3 * scale, "{a} vs {b}");
    }
    assert!(reference::max_abs(&system.residual(&b, &red_first)) < 1e-3);
}

#[test]
fn test_gauss_seidel_colour_leaves_other_colour_untouched() {
    let size = UVec2::new(10, 10);
    let system = HostSystem::pool(size);
    let b = random_rhs(&system, 6);
    let before: Vec<f32> = (0..system.len()).map(|i| i as f32 * 0.01).collect();

    let mut x = before.clone();
    system.gauss_seidel_colour(&b, &mut x, 1.0, Colour::Red);
    for i in 0..system.len() {
        let (cx, cy) = (i % 10, i / 10);
        if (cx + cy) % 2 == 1 || system.diagonal[i] == 0.0 {
            assert_eq!(x[i], before[i]);
        }
    }
}

//==============================================================================
// Multigrid
//==============================================================================

#[test]
fn test_v_cycle_reduces_residual() {
    let size = UVec2::new(64, 64);
    let (liquid_phi, solid_phi) = reference::pool_level_sets(size);
    let multigrid = HostMultigrid::new(size, &liquid_phi, &solid_phi, 1.0).unwrap();
    assert_eq!(multigrid.levels.len(), 3);

    let system = &multigrid.levels[0];
    assert_eq!(system, &HostSystem::pool(size));
    let b = random_rhs(system, 7);

    let x = multigrid.precondition(&b);
    let before = reference::max_abs(&b);
    let after = reference::max_abs(&system.residual(&b, &x));
    assert!(after * 4.0 <= before, "V-cycle reduced {before} only to {after}");
}

#[test]
fn test_full_cycle_reduces_residual() {
    let size = UVec2::new(64, 64);
    let (liquid_phi, solid_phi) = reference::pool_level_sets(size);
    let multigrid = HostMultigrid::new(size, &liquid_phi, &solid_phi, 1.0).unwrap();
    let system = &multigrid.levels[0];
    let b = random_rhs(system, 10);

    let x = multigrid.full_cycle(&b);
    let before = reference::max_abs(&b);
    let after = reference::max_abs(&system.residual(&b, &x));
    assert!(after * 4.0 <= before, "full cycle reduced {before} only to {after}");
}

#[test]
fn test_full_cycle_on_single_level_is_coarse_solve() {
    let size = UVec2::new(16, 16);
    let (liquid_phi, solid_phi) = reference::pool_level_sets(size);
    let multigrid = HostMultigrid::new(size, &liquid_phi, &solid_phi, 1.0).unwrap();
    assert_eq!(multigrid.levels.len(), 1);
    let b = random_rhs(&multigrid.levels[0], 11);

    assert_eq!(multigrid.full_cycle(&b), multigrid.precondition(&b));
}

#[test]
fn test_multigrid_preconditioned_cg_beats_incomplete_poisson() {
    let size = UVec2::new(64, 64);
    let (liquid_phi, solid_phi) = reference::pool_level_sets(size);
    let multigrid = HostMultigrid::new(size, &liquid_phi, &solid_phi, 1.0).unwrap();
    let system = &multigrid.levels[0];
    let b = random_rhs(system, 8);

    let mut with_multigrid = Parameters::iterative(1e-4);
    system.conjugate_gradient(&b, &mut with_multigrid, |r| multigrid.precondition(r));
    let mut with_incomplete = Parameters::iterative(1e-4);
    system.conjugate_gradient(&b, &mut with_incomplete, |r| system.incomplete_poisson(r));

    assert!(with_multigrid.out_iterations < with_incomplete.out_iterations);
}

#[test]
fn test_coarse_levels_are_rescaled() {
    let size = UVec2::new(64, 64);
    let (liquid_phi, solid_phi) = reference::pool_level_sets(size);
    let multigrid = HostMultigrid::new(size, &liquid_phi, &solid_phi, 1.0).unwrap();

    // A fully liquid interior cell of each level couples to its west
    // neighbour with -delta / 4^level.
    for (level, system) in multigrid.levels.iter().enumerate() {
        let w = system.size.x as usize;
        let centre = (system.size.y as usize / 2) * w + w / 2;
        assert_eq!(system.lower[centre].x, -1.0 / 4f32.powi(level as i32));
    }
}

#[test]
fn test_hierarchy_rejects_odd_sizes() {
    let size = UVec2::new(250, 250);
    let (liquid_phi, solid_phi) = reference::pool_level_sets(size);
    assert!(HostMultigrid::new(size, &liquid_phi, &solid_phi, 1.0).is_err());
}

//==============================================================================
// Transfer stencils
//==============================================================================

#[test]
fn test_restrict_full_weighting() {
    let fine_size = UVec2::new(8, 8);
    let fine = vec![1.0; 64];
    let ones = vec![1.0; 64];
    let coarse = reference::restrict(fine_size, &ones, &fine, &[1.0; 16]);

    // Interior coarse cells see the whole 4x4 footprint.
    assert_eq!(coarse[5], 1.0);
    // Corner cells lose one row and one column of weight 1.
    assert_eq!(coarse[0], 49.0 / 64.0);
    // Edge cells lose one row.
    assert_eq!(coarse[1], 56.0 / 64.0);
}

#[test]
fn test_restrict_skips_masked_cells() {
    let fine_size = UVec2::new(4, 4);
    let fine = vec![1.0; 16];
    let mut fine_diagonal = vec![1.0; 16];
    fine_diagonal[0] = 0.0;
    let coarse = reference::restrict(fine_size, &fine_diagonal, &fine, &[1.0, 1.0, 1.0, 0.0]);

    assert_eq!(coarse[0], 40.0 / 64.0);
    assert_eq!(coarse[3], 0.0);
}

#[test]
fn test_prolongate_bilinear_weights() {
    let fine_size = UVec2::new(4, 4);
    let coarse = [1.0, 2.0, 3.0, 4.0];
    let mut fine = vec![0.0; 16];
    reference::prolongate(fine_size, &[1.0; 16], &mut fine, &[1.0; 4], &coarse);

    assert_eq!(fine[5], (9.0 * 1.0 + 3.0 * 2.0 + 3.0 * 3.0 + 1.0 * 4.0) / 16.0);
    // Corner: only the nearest coarse cell is inside the grid.
    assert_eq!(fine[0], 9.0 / 16.0);
}

#[test]
fn test_prolongate_adds_onto_fine() {
    let fine_size = UVec2::new(4, 4);
    let mut fine = vec![1.0; 16];
    let mut fine_diagonal = vec![1.0; 16];
    fine_diagonal[6] = 0.0;
    reference::prolongate(fine_size, &fine_diagonal, &mut fine, &[1.0; 4], &[1.0; 4]);

    assert_eq!(fine[5], 2.0);
    assert_eq!(fine[6], 1.0);
}

proptest! {
    /// On a diagonally dominant system neither smoother lets the max-norm
    /// residual grow from one iteration to the next.
    #[test]
    fn prop_smoother_residual_max_norm_is_non_increasing(
        width in 2u32..12,
        height in 2u32..12,
        seed in any::<u64>(),
    ) {
        let system = dominant_system(UVec2::new(width, height), seed);
        let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
        let b: Vec<f32> = (0..system.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let epsilon = 1e-5 * (1.0 + reference::max_abs(&b));

        let mut x = vec![0.0; system.len()];
        let mut previous = reference::max_abs(&system.residual(&b, &x));
        for k in 0..10 {
            system.gauss_seidel(&b, &mut x, 1.0, Colour::Red);
            let current = reference::max_abs(&system.residual(&b, &x));
            prop_assert!(current <= previous + epsilon, "gauss-seidel {}: {} > {}", k, current, previous);
            previous = current;
        }

        let mut x = vec![0.0; system.len()];
        let mut previous = reference::max_abs(&system.residual(&b, &x));
        for k in 0..10 {
            x = system.jacobi_sweep(&b, &x, 2.0 / 3.0);
            let current = reference::max_abs(&system.residual(&b, &x));
            prop_assert!(current <= previous + epsilon, "jacobi {}: {} > {}", k, current, previous);
            previous = current;
        }
    }

    /// Prolongation is four times the transpose of restriction.
    #[test]
    fn prop_prolongation_is_scaled_restriction_transpose(
        half in 1u32..6,
        seed in any::<u64>(),
    ) {
        let fine_size = UVec2::splat(half * 2);
        let coarse_size = UVec2::splat(half);
        let fine_len = (fine_size.x * fine_size.y) as usize;
        let coarse_len = (coarse_size.x * coarse_size.y) as usize;

        let mut rng = StdRng::seed_from_u64(seed);
        let u: Vec<f32> = (0..coarse_len).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let v: Vec<f32> = (0..fine_len).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let fine_ones = vec![1.0; fine_len];
        let coarse_ones = vec![1.0; coarse_len];

        let mut pu = vec![0.0; fine_len];
        reference::prolongate(fine_size, &fine_ones, &mut pu, &coarse_ones, &u);
        let rv = reference::restrict(fine_size, &fine_ones, &v, &coarse_ones);

        let lhs = reference::dot(&pu, &v);
        let rhs = 4.0 * reference::dot(&u, &rv);
        prop_assert!((lhs - rhs).abs() <= 1e-4 * (1.0 + lhs.abs()), "{} vs {}", lhs, rhs);
    }
}
