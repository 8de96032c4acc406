use cgbench_solver::{
    build_matrix, DeviceClass, GpuDevice, HostBackend, InversePower, KernelSource,
    OffloadBackend, PolicyCache, ProblemClass, TransferStats,
};

#[tokio::main]
async fn main() {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .init();

    let class = ProblemClass::S;
    let params = class.params();
    let policy = PolicyCache::default();

    log::info!("Building class {} matrix (n = {})...", class, params.na);
    let a = match build_matrix(&params, &policy) {
        Ok(a) => a,
        Err(e) => {
            log::error!("Matrix generation failed: {}", e);
            return;
        }
    };

    let driver = InversePower::new(params);
    let print = |r: &cgbench_solver::IterationRecord| {
        log::info!("  it {:>3}  rnorm {:.6e}  zeta {:.13}", r.iteration, r.rnorm, r.zeta)
    };

    let result = match GpuDevice::new(DeviceClass::Any, class.letter(), &KernelSource::Embedded).await {
        Ok(device) => {
            log::info!("Offloading to {}", device.adapter_info().name);
            let mut backend = match OffloadBackend::new(&device, params.na) {
                Ok(backend) => backend,
                Err(e) => {
                    log::error!("Buffer setup failed: {}", e);
                    return;
                }
            };
            let result = driver.run(&policy, &a, &mut backend, print).await;
            let TransferStats {
                bytes_to_gpu,
                bytes_from_gpu,
            } = backend.transfer_stats();
            log::info!("  Bytes CPU -> GPU: {}", bytes_to_gpu);
            log::info!("  Bytes GPU -> CPU: {}", bytes_from_gpu);
            result
        }
        Err(e) => {
            log::warn!("No offload device ({}), running on the host", e);
            driver
                .run(&policy, &a, &mut HostBackend::new(&policy), print)
                .await
        }
    };

    match result {
        Ok(summary) => log::info!(
            "zeta = {:.13}, verified: {}, {:.3}s",
            summary.zeta,
            summary.verification.passed(),
            summary.benchmark_seconds
        ),
        Err(e) => log::error!("Run failed: {:?}", e),
    }
}
