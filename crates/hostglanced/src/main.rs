//! hostglanced — telemetry producer daemon.
//!
//! Drives every collector on its own cadence, fuses GPU attribution,
//! evaluates alerts, and publishes through the lock-free snapshot
//! buffers. Serves the result over a Prometheus endpoint and an
//! hour-rotated log directory.

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Releases unused memory back to the operating system.
/// Uses jemalloc's arena purge to reduce RSS after memory-intensive operations.
fn release_memory_to_os() {
    // SAFETY: mallctl is called with a valid, null-terminated control string
    // and no input/output buffers, matching its documented no-args form.
    unsafe {
        tikv_jemalloc_sys::mallctl(
            c"arena.4096.purge".as_ptr().cast(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            0,
        );
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use hostglance_core::alerts::{AlertEngine, AlertThresholds};
use hostglance_core::buffers::SnapshotBuffers;
use hostglance_core::churn::ChurnCounter;
use hostglance_core::collectors::process::{CollectParams, ProcessCollector};
use hostglance_core::fs::RealFs;
use hostglance_core::logchunk::LogChunker;
use hostglance_core::producer::Producer;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProcessCollectorKind {
    Auto,
    Procfs,
    Netlink,
    Kernel,
}

/// On-host telemetry producer daemon.
#[derive(Parser)]
#[command(name = "hostglanced", about = "hostglance telemetry producer daemon", version)]
struct Args {
    /// Which process-collector variant to run.
    #[arg(long, value_enum, default_value_t = ProcessCollectorKind::Auto)]
    process_collector: ProcessCollectorKind,

    /// Top-K cap on the processes table.
    #[arg(long, default_value = "200")]
    max_procs: usize,

    /// Rows enriched with cmdline and user-name.
    #[arg(long, default_value = "32")]
    enrich_top_n: usize,

    /// Skip the NVML backend entirely.
    #[arg(long)]
    disable_nvml: bool,

    /// Alternate vendor CLI path (rejected unless under an allowed prefix).
    #[arg(long)]
    nvidia_smi_path: Option<String>,

    /// Enable the `nvidia-smi pmon` vendor-CLI fallback.
    #[arg(long)]
    nvidia_pmon: bool,

    /// Enable the `nvidia-smi --query-compute-apps` vendor-CLI fallback.
    #[arg(long)]
    nvidia_mem: bool,

    /// Alert engine: sustained CPU-high threshold, percent.
    #[arg(long, default_value = "90.0")]
    cpu_high_pct: f64,

    /// Alert engine: sustained memory-high threshold, percent.
    #[arg(long, default_value = "90.0")]
    mem_high_pct: f64,

    /// Alert engine: top-process CPU threshold, percent (immediate, not sustained).
    #[arg(long, default_value = "80.0")]
    top_proc_pct: f64,

    /// Alert engine: hysteresis window before a sustained alert fires.
    #[arg(long, default_value = "3")]
    sustain_secs: u64,

    /// Test/container root remap for the process-source tree.
    #[arg(long, env = "HOSTGLANCE_PROC_ROOT")]
    proc_root: Option<String>,

    /// Test/container root remap for the system-source tree.
    #[arg(long, env = "HOSTGLANCE_SYS_ROOT")]
    sys_root: Option<String>,

    /// Metrics HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:9400")]
    listen: SocketAddr,

    /// Directory for hour-rotated Prometheus log chunks.
    #[arg(long, default_value = "./data")]
    log_dir: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("hostglanced={}", level).parse().unwrap())
        .add_directive(format!("hostglance_core={}", level).parse().unwrap())
        .add_directive(format!("hostglance_web={}", level).parse().unwrap());

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn build_process_collector(kind: ProcessCollectorKind) -> ProcessCollector {
    match kind {
        ProcessCollectorKind::Procfs => ProcessCollector::procfs(),
        ProcessCollectorKind::Auto => {
            debug!("no netlink event source wired in this build; using procfs scanner");
            ProcessCollector::procfs()
        }
        ProcessCollectorKind::Netlink => {
            warn!("netlink process collector requested but no event source is available; falling back to procfs");
            ProcessCollector::procfs()
        }
        ProcessCollectorKind::Kernel => {
            warn!("kernel-module process collector requested but no transport is available; falling back to procfs");
            ProcessCollector::procfs()
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    // SAFETY: called once on the main thread before any other thread is
    // spawned, so there is no concurrent reader of the environment.
    unsafe {
        if let Some(proc_root) = &args.proc_root {
            std::env::set_var("HOSTGLANCE_PROC_ROOT", proc_root);
        }
        if let Some(sys_root) = &args.sys_root {
            std::env::set_var("HOSTGLANCE_SYS_ROOT", sys_root);
        }
    }
    if args.disable_nvml {
        debug!("NVML backend disabled by flag");
    }
    if let Some(path) = &args.nvidia_smi_path {
        debug!(path, "alternate nvidia-smi path requested");
    }

    info!("hostglanced {} starting", env!("CARGO_PKG_VERSION"));
    info!("listen={} log_dir={}", args.listen, args.log_dir.display());

    let fs = RealFs::new();
    let churn = Arc::new(ChurnCounter::new());
    let buffers = Arc::new(SnapshotBuffers::new());

    let params = CollectParams { max_procs: args.max_procs, enrich_top_n: args.enrich_top_n };
    let thresholds = AlertThresholds {
        cpu_high_pct: args.cpu_high_pct,
        mem_high_pct: args.mem_high_pct,
        top_proc_pct: args.top_proc_pct,
        sustain: Duration::from_secs(args.sustain_secs),
    };
    let alerts = AlertEngine::new(thresholds);
    let process_collector = build_process_collector(args.process_collector);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_handler = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        stop_for_handler.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to set Ctrl-C handler: {e}");
    }

    let producer_buffers = buffers.clone();
    let producer_stop = stop.clone();
    let producer_handle = std::thread::Builder::new()
        .name("hostglance-producer".to_string())
        .spawn(move || {
            let mut producer = Producer::new(fs, churn, producer_buffers, process_collector, params, alerts);
            producer.run(producer_stop);
        })
        .expect("failed to spawn producer thread");

    let log_buffers = buffers.clone();
    let log_stop = stop.clone();
    let log_dir = args.log_dir.clone();
    let log_handle = std::thread::Builder::new()
        .name("hostglance-logwriter".to_string())
        .spawn(move || {
            let mut chunker = LogChunker::new(log_dir);
            while !log_stop.load(Ordering::Relaxed) {
                if let Err(e) = chunker.write_tick(&log_buffers, Utc::now()) {
                    error!("log chunker write failed: {e}");
                }
                std::thread::sleep(Duration::from_secs(1));
            }
        })
        .expect("failed to spawn log writer thread");

    let web_buffers = buffers.clone();
    let web_stop = stop.clone();
    let web_listen = args.listen;
    let web_handle = std::thread::Builder::new()
        .name("hostglance-web".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("failed to build metrics-server runtime");
            runtime.block_on(async move {
                let shutdown = async move {
                    while !web_stop.load(Ordering::Relaxed) {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                };
                if let Err(e) = hostglance_web::serve(web_listen, web_buffers, shutdown).await {
                    error!("metrics server error: {e}");
                }
            });
        })
        .expect("failed to spawn metrics-server thread");

    producer_handle.join().expect("producer thread panicked");
    stop.store(true, Ordering::SeqCst);
    log_handle.join().expect("log writer thread panicked");
    web_handle.join().expect("metrics-server thread panicked");

    release_memory_to_os();
    info!("shutdown complete");
}
