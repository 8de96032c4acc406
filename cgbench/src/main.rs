mod config;
mod error;
mod report;
mod timers;

use std::process::ExitCode;
use std::time::Instant;

use cgbench_core::{CgCoreError, GpuDevice};
use cgbench_solver::{build_matrix, HostBackend, InversePower, OffloadBackend};

use crate::config::{BenchConfig, DeviceChoice};
use crate::error::Result;
use crate::report::BenchReport;
use crate::timers::SectionTimes;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            eprintln!(" cgbench failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Opens the offload device the configuration asks for. `auto` falls back
/// to the host when no usable adapter exists.
async fn open_device(config: &BenchConfig) -> Result<Option<GpuDevice>> {
    let DeviceChoice::Offload { class, required } = config.device else {
        log::info!("Offload disabled, running on the host");
        return Ok(None);
    };
    match GpuDevice::new(class, config.class.letter(), &config.kernel_source).await {
        Ok(device) => {
            let info = device.adapter_info();
            log::info!(
                "Using {} ({:?}, {:?}) as {} device",
                info.name,
                info.device_type,
                info.backend,
                device.device_class()
            );
            Ok(Some(device))
        }
        Err(
            e @ (CgCoreError::NoAdapter(_)
            | CgCoreError::MissingF64Support(_)
            | CgCoreError::WgpuInitError(_)),
        ) if !required => {
            log::warn!("No offload device ({}), running on the host", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs the benchmark. Returns whether the process should exit successfully.
async fn run() -> Result<bool> {
    let config = BenchConfig::from_env()?;
    log::debug!("{:?}", config);
    let params = config.class.params();
    params.validate()?;
    let policy = config.policy_cache()?;

    println!("{}", report::header(&params));

    let init_started = Instant::now();
    let a = build_matrix(&params, &policy)?;
    let device = open_device(&config).await?;
    let init = init_started.elapsed().as_secs_f64();
    println!(" Initialization time = {:15.3} seconds", init);

    let driver = InversePower::new(params);
    let print_progress = |record: &cgbench_solver::IterationRecord| {
        println!("{}", report::progress_line(record))
    };
    let (summary, transfers, device_name) = match &device {
        Some(device) => {
            let mut backend = OffloadBackend::new(device, params.na)?;
            device.reset_transfer_stats();
            let summary = driver.run(&policy, &a, &mut backend, print_progress).await?;
            (
                summary,
                Some(backend.transfer_stats()),
                device.adapter_info().name.clone(),
            )
        }
        None => {
            let mut backend = HostBackend::new(&policy);
            let summary = driver.run(&policy, &a, &mut backend, print_progress).await?;
            (summary, None, "host".to_string())
        }
    };

    println!(" Benchmark completed");
    println!("{}", report::verification_block(summary.zeta, &summary.verification));
    println!("{}", report::results_block(&params, &summary, &device_name));

    let times = SectionTimes {
        init,
        benchmark: summary.benchmark_seconds,
        conj_grad: summary.cg_seconds,
    };
    if config.timers_enabled {
        print!("{}", times.render());
    }
    if let Some(stats) = transfers {
        log::info!(
            "Bytes transferred: {} to device, {} from device",
            human_size(stats.bytes_to_gpu),
            human_size(stats.bytes_from_gpu)
        );
    }

    if let Some(path) = &config.json_report {
        BenchReport {
            class: params.class_letter(),
            params: &params,
            device: &device_name,
            matrix: a.shape(),
            mops: report::mops(&params, summary.benchmark_seconds),
            times,
            transfers,
            summary: &summary,
        }
        .write_json(path)?;
    }

    Ok(!config.strict_verify || summary.verification.passed())
}

fn human_size(size: u64) -> String {
    let mut size = size as f64;
    let mut unit = "B";
    for u in ["KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = u;
    }
    format!("{:.2} {}", size, unit)
}
