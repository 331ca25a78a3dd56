use pollster::block_on;
use sparse_op_applier::{
    ConjugateGradient, CpuDevice, GpuDevice, HostVector, OperatorApplier, SparseBackend,
    SparseMatrix, SparseOpError, Triplete,
};

// Helper for float comparison in tests
fn assert_approx_eq_vec(a: &[f64], b: &[f64], tolerance: f64) {
    assert_eq!(a.len(), b.len(), "Vector lengths differ");
    for i in 0..a.len() {
        let diff = (a[i] - b[i]).abs();
        assert!(
            diff <= tolerance * (1.0 + b[i].abs()),
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            b[i],
            a[i],
            diff
        );
    }
}

// These tests need an adapter with SHADER_F64; run them with `cargo test -- --ignored`.
fn gpu_device() -> Result<GpuDevice, SparseOpError> {
    let _ = env_logger::builder().is_test(true).try_init();
    GpuDevice::new_blocking()
}

/// Pentadiagonal m x n matrix with a dominant main diagonal.
fn banded_matrix(m: usize, n: usize) -> SparseMatrix {
    let mut triplets = Vec::new();
    for row in 0..m {
        for (offset, value) in [(-2i64, -0.5), (-1, -1.0), (0, 4.0), (1, -1.0), (2, -0.5)] {
            let col = row as i64 + offset;
            if col >= 0 && (col as usize) < n {
                triplets.push(Triplete::new(row, col as usize, value));
            }
        }
    }
    SparseMatrix::from_triplets(m, n, triplets).unwrap()
}

#[test]
#[ignore = "needs a GPU adapter with SHADER_F64"]
fn test_gpu_two_by_two_scenario() -> Result<(), SparseOpError> {
    let device = gpu_device()?;
    block_on(async {
        let a = device.create_sparse_matrix(&SparseMatrix::identity(2))?;
        let q = device.create_sparse_matrix(&SparseMatrix::identity(2))?;
        let h = device.create_vector("h", &[2.0, 3.0])?;
        let v = device.create_vector("v", &[1.0, 1.0])?;
        let mut out = device.create_empty_vector("out", 2)?;

        let mut applier = OperatorApplier::new(&device, &a, Some(&q)).await?;
        applier.load_h_matrix(&h)?;
        applier.set_q_scalar(0.5);
        applier.apply(&v, &mut out).await?;

        assert_approx_eq_vec(&out.read_contents().await?, &[2.5, 3.5], 1e-12);

        // H is borrowed, so a host-side rewrite shows up in the next apply.
        h.write_contents(&[4.0, 1.0])?;
        applier.apply(&v, &mut out).await?;
        device.synchronize()?;
        assert_approx_eq_vec(&out.read_contents().await?, &[4.5, 1.5], 1e-12);
        Ok(())
    })
}

#[test]
#[ignore = "needs a GPU adapter with SHADER_F64"]
fn test_gpu_matches_cpu_device() -> Result<(), SparseOpError> {
    let gpu = gpu_device()?;
    let cpu = CpuDevice::new();
    let (m, n) = (600, 300);
    let a_host = banded_matrix(m, n);
    let q_host = banded_matrix(n, n);
    let h_data: Vec<f64> = (0..m).map(|i| 1.0 + (i % 7) as f64 * 0.25).collect();
    let v_data: Vec<f64> = (0..n).map(|i| (i as f64 / n as f64).sin()).collect();

    let expected = block_on(async {
        let h = HostVector::new(h_data.clone());
        let v = HostVector::new(v_data.clone());
        let mut out = cpu.create_empty_vector("out", n)?;
        let mut applier = OperatorApplier::new(&cpu, &a_host, Some(&q_host)).await?;
        applier.load_h_matrix(&h)?;
        applier.set_q_scalar(0.3);
        applier.apply(&v, &mut out).await?;
        Ok::<_, SparseOpError>(out.into_vec())
    })?;

    block_on(async {
        let a = gpu.create_sparse_matrix(&a_host)?;
        let q = gpu.create_sparse_matrix(&q_host)?;
        let h = gpu.create_vector("h", &h_data)?;
        let v = gpu.create_vector("v", &v_data)?;
        let mut out = gpu.create_empty_vector("out", n)?;

        let mut applier = OperatorApplier::new(&gpu, &a, Some(&q)).await?;
        applier.load_h_matrix(&h)?;
        applier.set_q_scalar(0.3);

        applier.apply(&v, &mut out).await?;
        let first = out.read_contents().await?;
        assert_approx_eq_vec(&first, &expected, 1e-10);

        applier.apply(&v, &mut out).await?;
        assert_eq!(out.read_contents().await?, first);
        assert!(applier.is_linear_allocated());
        assert!(applier.is_quadratic_allocated());
        Ok(())
    })
}

#[test]
#[ignore = "needs a GPU adapter with SHADER_F64"]
fn test_gpu_transpose_round_trip() -> Result<(), SparseOpError> {
    let device = gpu_device()?;
    block_on(async {
        let host = banded_matrix(7, 4);
        let a = device.create_sparse_matrix(&host)?;
        let a_t = device.transpose(&a).await?;
        assert_eq!(device.read_sparse_matrix(&a_t).await?, host.transpose());
        Ok(())
    })
}

#[test]
#[ignore = "needs a GPU adapter with SHADER_F64"]
fn test_gpu_conjugate_gradient() -> Result<(), SparseOpError> {
    let device = gpu_device()?;
    block_on(async {
        let n = 64;
        let a = device.create_sparse_matrix(&banded_matrix(2 * n, n))?;
        let q = device.create_sparse_matrix(&SparseMatrix::identity(n))?;
        let h = device.create_vector("h", &vec![1.0; 2 * n])?;
        let b_data: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 / n as f64).collect();
        let b = device.create_vector("b", &b_data)?;

        let mut applier = OperatorApplier::new(&device, &a, Some(&q)).await?;
        applier.load_h_matrix(&h)?;
        applier.set_q_scalar(0.01);

        let solver = ConjugateGradient::with_params(1e-9, 500);
        let result = solver.solve(&device, &mut applier, &b).await?;

        let mut check = device.create_empty_vector("check", n)?;
        applier.apply(&result.x, &mut check).await?;
        assert_approx_eq_vec(&check.read_contents().await?, &b_data, 1e-6);
        Ok(())
    })
}

#[test]
#[ignore = "needs a GPU adapter with SHADER_F64"]
fn test_gpu_pipelines_compiled_once() -> Result<(), SparseOpError> {
    let device = gpu_device()?;
    block_on(async {
        let n = 32;
        let a = device.create_sparse_matrix(&banded_matrix(2 * n, n))?;
        let q = device.create_sparse_matrix(&SparseMatrix::identity(n))?;
        let h = device.create_vector("h", &vec![1.0; 2 * n])?;
        let v = device.create_vector("v", &vec![1.0; n])?;
        let mut out = device.create_empty_vector("out", n)?;

        let mut applier = OperatorApplier::new(&device, &a, Some(&q)).await?;
        applier.load_h_matrix(&h)?;
        applier.apply(&v, &mut out).await?;
        device.dot(&out, &out).await?;
        let compiled = device.cached_pipeline_count();
        assert_eq!(compiled, 5);

        for _ in 0..3 {
            applier.apply(&v, &mut out).await?;
            device.dot(&out, &out).await?;
        }
        assert_eq!(device.cached_pipeline_count(), compiled);
        Ok(())
    })
}
