//! Pressure solve benchmark
//!
//! Run with: cargo run --release --example benchmark [config.json]
//!
//! The optional argument is a JSON `SolverConfig`; missing fields take their
//! defaults.

use std::time::Instant;

use glam::UVec2;
use poisson::gpu::{Buffer, CommandBuffer, GpuContext};
use poisson::linear_solver::{Data, MatrixBuild};
use poisson::reference::{self, HostSystem};
use poisson::{build_solver, SolverConfig};

const GRID_WIDTH: u32 = 256;
const GRID_HEIGHT: u32 = 256;

const WARMUP_SOLVES: u32 = 3;
const BENCH_SOLVES: u32 = 20;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config: SolverConfig = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SolverConfig::default(),
    };

    println!("=== Pressure Solve Benchmark ===");
    println!("Grid: {}x{}", GRID_WIDTH, GRID_HEIGHT);
    println!("Config: {}", serde_json::to_string(&config)?);

    let gpu = pollster::block_on(GpuContext::new_headless())?;
    let size = UVec2::new(GRID_WIDTH, GRID_HEIGHT);
    let n = (size.x * size.y) as usize;

    let (liquid, solid) = reference::pool_level_sets(size);
    let liquid_phi = Buffer::from_slice(&gpu, "Liquid Phi", &liquid)?;
    let solid_phi = Buffer::from_slice(&gpu, "Solid Phi", &solid)?;

    let data = Data::new(&gpu, size, "Benchmark")?;
    let build = MatrixBuild::new(&gpu)?.bind(
        size,
        &data.diagonal,
        &data.lower,
        &liquid_phi,
        &solid_phi,
        config.delta,
    )?;
    let mut command = CommandBuffer::new(&gpu, "Build Matrix", true);
    command.record(|encoder| {
        build.record(encoder);
        Ok(())
    })?;
    command.submit()?.wait()?;

    // A single unit source in the middle of the pool.
    let host = HostSystem::from_level_sets(size, &liquid, &solid, config.delta);
    let mut b = vec![0.0f32; n];
    let centre = (size.y / 2 * size.x + size.x / 2) as usize;
    b[centre] = 1.0;
    data.b.write(&gpu, &b)?;

    let mut solver = build_solver(&gpu, size, &config)?;
    if let Some(multigrid) = solver.multigrid_mut() {
        multigrid.build_hierarchies_bind(&solid_phi, &liquid_phi)?;
        multigrid.build_hierarchies()?;
        let stats = multigrid.memory_stats();
        println!("Multigrid memory: {:.2} MiB", stats.total as f64 / (1024.0 * 1024.0));
    }
    let solver = solver.as_linear_solver();
    solver.bind(&data.diagonal, &data.lower, &data.b, &data.x)?;

    let mut params = config.parameters.clone();
    for _ in 0..WARMUP_SOLVES {
        solver.solve(&mut params, &mut [])?;
    }

    let start = Instant::now();
    let mut iterations = 0;
    for _ in 0..BENCH_SOLVES {
        solver.solve(&mut params, &mut [])?;
        iterations += params.out_iterations;
    }
    gpu.wait_idle()?;
    let elapsed = start.elapsed();

    println!(
        "Solves: {}, avg: {:.3} ms/solve, {:.1} iterations/solve",
        BENCH_SOLVES,
        elapsed.as_secs_f64() * 1000.0 / BENCH_SOLVES as f64,
        iterations as f64 / BENCH_SOLVES as f64
    );

    let x = data.x.read(&gpu)?;
    let residual = reference::max_abs(&host.residual(&b, &x));
    println!("Device error: {:.3e}", solver.error()?);
    println!("Host residual: {:.3e}", residual);
    println!("=== Done ===");
    Ok(())
}
