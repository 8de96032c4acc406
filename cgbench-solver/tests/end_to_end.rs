use cgbench_solver::{
    assembler::MatrixAssembler, build_matrix, CgError, ConjugateGradient, DeviceClass,
    FixedPolicy, GpuDevice, HostBackend, InversePower, KernelSource, OffloadBackend,
    PolicyCache, ProblemClass, ProblemParams, RandomStream, SparseMatrix, Verification,
};
use cgbench_solver::algorithms::CgWorkspace;
use pollster::block_on;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_same_matrix(a: &SparseMatrix, b: &SparseMatrix) {
    assert_eq!(a.row_ptr(), b.row_ptr());
    assert_eq!(a.col_indices(), b.col_indices());
    let a_bits: Vec<u64> = a.values().iter().map(|v| v.to_bits()).collect();
    let b_bits: Vec<u64> = b.values().iter().map(|v| v.to_bits()).collect();
    assert_eq!(a_bits, b_bits);
}

#[test]
fn test_class_s_verifies_on_host() -> Result<(), CgError> {
    init_logging();
    let params = ProblemClass::S.params();
    let policy = PolicyCache::default();
    let a = build_matrix(&params, &policy)?;
    assert_eq!(a.dims(), (1400, 1400));

    let mut backend = HostBackend::new(&policy);
    let mut lines = Vec::new();
    let summary = block_on(InversePower::new(params).run(&policy, &a, &mut backend, |r| {
        lines.push(r.iteration)
    }))?;

    assert_eq!(lines, (1..=15).collect::<Vec<_>>());
    match summary.verification {
        Verification::Checked { error, passed, .. } => {
            assert!(passed, "zeta {} off by {:e}", summary.zeta, error);
        }
        Verification::NotPerformed => panic!("class S must be verified"),
    }
    assert!((summary.zeta - 8.5971775078648).abs() <= 1e-10 * 8.5971775078648);
    Ok(())
}

#[test]
fn test_class_s_verifies_with_offload() -> Result<(), CgError> {
    init_logging();
    let device = match block_on(GpuDevice::new(DeviceClass::Any, 'S', &KernelSource::Embedded)) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("skipping offload run: {}", e);
            return Ok(());
        }
    };
    let params = ProblemClass::S.params();
    let policy = PolicyCache::default();
    let a = build_matrix(&params, &policy)?;

    let mut backend = OffloadBackend::new(&device, params.na)?;
    let summary = block_on(InversePower::new(params).run(&policy, &a, &mut backend, |_| {}))?;

    assert_eq!(summary.backend, "offload");
    assert!(summary.verification.passed(), "zeta = {}", summary.zeta);
    assert!(backend.transfer_stats().bytes_from_gpu > 0);
    Ok(())
}

#[test]
fn test_assembly_is_reproducible_across_policies() -> Result<(), CgError> {
    let params = ProblemParams {
        na: 500,
        nonzer: 6,
        niter: 1,
        shift: 8.0,
        rcond: 0.1,
    };
    let reference = build_matrix(&params, &PolicyCache::default())?;
    // two threads, dynamic chunk 8
    let tuned = PolicyCache::new(Box::new(FixedPolicy(27 * 2 + 9 + 3)), None);
    assert_same_matrix(&reference, &build_matrix(&params, &tuned)?);
    assert_same_matrix(&reference, &build_matrix(&params, &PolicyCache::default())?);

    let row_ptr = reference.row_ptr();
    assert_eq!(row_ptr[0], 0);
    for row in 0..reference.rows() {
        let (cols, _) = reference.row(row);
        assert!(cols.windows(2).all(|w| w[0] < w[1]));
        assert!(cols.iter().all(|&c| c < params.na));
    }
    Ok(())
}

#[test]
fn test_capacity_below_structural_count_fails() {
    let params = ProblemClass::S.params();
    let mut stream = RandomStream::default();
    stream.next_value();
    let result = MatrixAssembler::new(params)
        .with_capacity(params.na)
        .generate(&mut stream, &PolicyCache::default());
    assert!(matches!(
        result,
        Err(CgError::CapacityExceeded { capacity, requested }) if capacity == params.na && requested > capacity
    ));
}

#[test]
fn test_single_step_on_scalar_system() -> Result<(), CgError> {
    let a = SparseMatrix::from_dense(&[vec![8.0]])?;
    let mut z = vec![0.0];
    let mut work = CgWorkspace::new(1);
    let outcome = ConjugateGradient::with_iterations(1).solve(
        &PolicyCache::default(),
        &a,
        &[3.0],
        &mut z,
        &mut work,
    )?;
    assert_eq!(z, vec![0.375]);
    assert_eq!(outcome.rnorm, 0.0);
    Ok(())
}
