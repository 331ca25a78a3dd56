use sparse_op_applier::{
    ConjugateGradient, CpuDevice, GpuDevice, HostVector, OperatorApplier, SparseBackend,
    SparseMatrix, SparseOpError, Triplete,
};
use sparse_op_core::device::TransferStats;
use std::time::Instant;

/// Creates an m x n banded observation matrix A (m > n).
/// Row i samples columns around i * n / m with weights 0.25, 0.5, 0.25.
fn create_observation_matrix(m: usize, n: usize) -> SparseMatrix {
    let mut triplets = Vec::new();
    for row in 0..m {
        let center = row * n / m;
        for (col, weight) in [(center.wrapping_sub(1), 0.25), (center, 0.5), (center + 1, 0.25)] {
            if col < n {
                triplets.push(Triplete::new(row, col, weight));
            }
        }
    }
    SparseMatrix::from_triplets(m, n, triplets).expect("Failed to create sparse matrix from COO")
}

/// First-difference regularizer Q = DᵗD + εI, tridiagonal and SPD.
fn create_regularizer(n: usize) -> SparseMatrix {
    let mut triplets = Vec::new();
    for i in 0..n {
        let neighbours = (i > 0) as usize + (i + 1 < n) as usize;
        triplets.push(Triplete::new(i, i, neighbours as f64 + 1e-3));
        if i + 1 < n {
            triplets.push(Triplete::new(i, i + 1, -1.0));
            triplets.push(Triplete::new(i + 1, i, -1.0));
        }
    }
    SparseMatrix::from_triplets(n, n, triplets).expect("Failed to create sparse matrix from COO")
}

/// Solves (tQ + AᵗHA) x = b and returns the true residual norm ‖S·x - b‖.
async fn solve_on<B: SparseBackend>(
    backend: &B,
    a: &B::Matrix,
    q: &B::Matrix,
    h: &B::Vector,
    b: &B::Vector,
    t: f64,
) -> Result<f64, SparseOpError> {
    let mut applier = OperatorApplier::new(backend, a, Some(q)).await?;
    applier.load_h_matrix(h)?;
    applier.set_q_scalar(t);

    let algorithm = ConjugateGradient::with_params(1e-10, 2000);
    let start_time = Instant::now();
    let result = algorithm.solve(backend, &mut applier, b).await?;
    log::info!("  Iterations: {}", result.metadata.iterations);
    log::info!(
        "  Final Residual Norm: {:.6e}",
        result.metadata.residual_norm
    );
    log::info!("  Time elapsed: {:?}", start_time.elapsed());

    let (_, n) = applier.dims();
    let mut check = backend.create_empty_vector("check", n)?;
    applier.apply(&result.x, &mut check).await?;
    backend.axpby(-1.0, b, 1.0, &mut check).await?;
    Ok(backend.dot(&check, &check).await?.sqrt())
}

#[tokio::main]
async fn main() -> Result<(), SparseOpError> {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .init();

    let (m, n) = (4000, 1000);
    let t = 0.05;
    log::info!("Setting up {}x{} observation matrix A and {}x{} regularizer Q...", m, n, n, n);

    let a = create_observation_matrix(m, n);
    let q = create_regularizer(n);
    let h: Vec<f64> = (0..m).map(|i| 1.0 + 0.5 * ((i % 10) as f64 / 10.0)).collect();
    let b: Vec<f64> = (0..n).map(|i| (i as f64 / n as f64 * 6.0).sin()).collect();

    match GpuDevice::new().await {
        Ok(gpu_device) => {
            log::info!("Running operator CG on the GPU...");
            let a = gpu_device.create_sparse_matrix(&a)?;
            let q = gpu_device.create_sparse_matrix(&q)?;
            let h = gpu_device.create_vector("h", &h)?;
            let b = gpu_device.create_vector("b", &b)?;

            gpu_device.reset_transfer_stats();
            let residual = solve_on(&gpu_device, &a, &q, &h, &b, t).await?;
            gpu_device.synchronize()?;

            let TransferStats {
                bytes_to_gpu,
                bytes_from_gpu,
            } = gpu_device.get_transfer_stats();
            log::info!("GPU Transfer Stats:");
            log::info!("  Bytes CPU -> GPU: {}", bytes_to_gpu);
            log::info!("  Bytes GPU -> CPU: {}", bytes_from_gpu);
            log::info!("True residual ‖S·x - b‖ = {:.6e}", residual);
        }
        Err(e) => {
            log::warn!("GPU unavailable ({}), falling back to the CPU device", e);
            let cpu_device = CpuDevice::new();
            let h = HostVector::new(h);
            let b = HostVector::new(b);
            let residual = solve_on(&cpu_device, &a, &q, &h, &b, t).await?;
            log::info!("True residual ‖S·x - b‖ = {:.6e}", residual);
        }
    }
    Ok(())
}
