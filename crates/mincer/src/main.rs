use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use counters::{CounterLibrary, SystemBackend};
use log::{info, warn};
use sysinfo::System;
use telemetry::{report, Catalog, CatalogConfig, MonitoringSession, ReportContext};
use time::macros::format_description;
use time::OffsetDateTime;

mod workload;

use workload::Layout;

/// Runs a matrix multiply under hardware counter monitoring
#[derive(Debug, Parser)]
#[command(name = "mincer")]
struct Command {
    /// Verbose debug output
    #[arg(short, long)]
    verbose: bool,

    /// Matrix dimension
    #[arg(short = 'n', long, default_value = "256")]
    size: usize,

    /// Loop order of the multiply
    #[arg(short, long, value_enum, default_value = "row-major")]
    layout: Layout,

    /// GPU device index for the ROCm SMI counters
    #[arg(long, default_value = "0")]
    gpu_device: u32,

    /// GPU power/temperature sensor index
    #[arg(long, default_value = "0")]
    gpu_sensor: u32,

    /// CPU whose RAPL package is measured
    #[arg(long, default_value = "0")]
    cpu: u32,

    /// Root of the sysfs tree
    #[arg(long, default_value = "/sys")]
    sysfs_root: PathBuf,
}

fn format_time(now: OffsetDateTime) -> String {
    let format = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    );
    now.format(&format)
        .unwrap_or_else(|_| "0000-00-00 00:00:00.000".to_string())
}

fn report_context() -> ReportContext {
    let host = hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned());
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());

    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();
    let cpu = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty());
    let memory_bytes = Some(system.total_memory()).filter(|&bytes| bytes > 0);

    ReportContext {
        host,
        os: System::long_os_version(),
        cpu,
        memory_bytes,
        started: Some(format_time(now)),
    }
}

fn main() -> Result<()> {
    let opts = Command::parse();

    let default_level = if opts.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let catalog = Catalog::from_config(&CatalogConfig {
        gpu_device: opts.gpu_device,
        gpu_sensor: opts.gpu_sensor,
        cpu: opts.cpu,
    });

    let (a, b) = workload::inputs(opts.size);
    let context = report_context();

    let library = CounterLibrary::new(SystemBackend::with_sysfs_root(&opts.sysfs_root));
    info!(
        "Reading counters from sysfs at {}",
        library.backend().sysfs_root().display()
    );
    let mut session = match library.acquire() {
        Ok(guard) => {
            let registration = telemetry::register_all(&guard, &catalog);
            for line in registration.summary() {
                info!("{}", line);
            }
            Some(MonitoringSession::new(guard, registration))
        }
        Err(e) => {
            warn!("Counter library unavailable, running without monitoring: {}", e);
            None
        }
    };

    println!(
        "Running {:?} matrix multiplication ({} x {})",
        opts.layout, opts.size, opts.size
    );

    let run = || {
        let start = Instant::now();
        let c = workload::multiply(&a, &b, opts.layout);
        (c.checksum(), start.elapsed())
    };

    let ((checksum, runtime), metrics) = match session.as_mut() {
        Some(session) => session.measure(run),
        None => (run(), None),
    };

    println!(
        "Matrix multiplication completed in {:.6} seconds.",
        runtime.as_secs_f64()
    );
    println!("Checksum: {checksum}");

    if let Some(metrics) = metrics {
        let metrics = metrics.with_elapsed(runtime);
        std::io::stdout()
            .write_all(report::render_with_context(&metrics, &context).as_bytes())
            .context("failed to write report")?;
    }

    if let Some(mut session) = session {
        session.teardown();
    }

    Ok(())
}
