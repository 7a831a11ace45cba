//! # XVC Server for the Digilent HS2 (FT2232H)
//!
//! Exposes a single FT2232H-based JTAG adapter as a Xilinx Virtual Cable server.
//! One process, one adapter, one TCP port — a supervisor wanting several adapters
//! runs several copies of this binary (§4.9).
use std::error::Error;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use env_logger::Env;
use xvc_mpsse::planner::PlannerLimits;
use xvc_mpsse::transport::DeviceSelector;
use xvc_mpsse::{Ft2232hTransport, JtagEngine};
use xvc_server::instance::Instance;
use xvc_server::ip_filter::AllowAll;
use xvc_server::server::{Config, Server};
use xvc_server::XvcServer;

const MAX_VECTOR_CAP_BYTES: u32 = 262_144;
const DEFAULT_VECTOR_CAP_BYTES: u32 = 2048;

#[derive(Parser, Clone, Debug)]
enum DeviceArg {
    /// Select by D2XX serial number string.
    Serial { serial: String },
    /// Select by D2XX enumeration index.
    Index { index: u32 },
    /// Select by USB bus:address.
    Bus { bus: u8, address: u8 },
}

impl From<DeviceArg> for DeviceSelector {
    fn from(value: DeviceArg) -> Self {
        match value {
            DeviceArg::Serial { serial } => DeviceSelector::SerialNumber(serial),
            DeviceArg::Index { index } => DeviceSelector::Index(index),
            DeviceArg::Bus { bus, address } => DeviceSelector::BusLocation { bus, address },
        }
    }
}

#[derive(Parser)]
#[command(about = "Xilinx Virtual Cable (XVC) JTAG interface for a Digilent HS2 adapter", long_about = None)]
struct Args {
    /// TCP port to listen on, unique per instance on the host.
    #[arg(short, long)]
    port: u16,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    ip: IpAddr,

    #[clap(subcommand)]
    device: DeviceArg,

    /// Initial TCK frequency in Hz.
    #[arg(long, default_value_t = 30_000_000)]
    frequency_hz: u32,

    /// Lock the TCK frequency to this value in Hz and ignore every client
    /// `settck:` request thereafter. Absent, clients may change the frequency
    /// freely after the initial one set via `--frequency-hz`.
    #[arg(long)]
    static_frequency_hz: Option<u32>,

    /// MPSSE latency timer in milliseconds.
    #[arg(long, default_value_t = 2)]
    latency_ms: u8,

    /// Maximum bytes per shift vector advertised to clients via getinfo.
    #[arg(long, default_value_t = DEFAULT_VECTOR_CAP_BYTES)]
    vector_cap_bytes: u32,

    /// Seconds a disconnected client's IP stays "locked" to the adapter before a
    /// different peer may take over. 0 disables stickiness.
    #[arg(long, default_value_t = 0)]
    lock_timeout_s: u32,
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let vector_cap_bytes = if args.vector_cap_bytes > MAX_VECTOR_CAP_BYTES {
        log::warn!(
            "vector-cap-bytes {} exceeds the maximum {}; clamping",
            args.vector_cap_bytes,
            MAX_VECTOR_CAP_BYTES
        );
        MAX_VECTOR_CAP_BYTES
    } else {
        args.vector_cap_bytes
    };

    let selector: DeviceSelector = args.device.into();
    log::info!("opening FTDI device {selector}");
    let transport = Ft2232hTransport::open(&selector, args.latency_ms)?;

    let engine = JtagEngine::new(
        transport,
        PlannerLimits {
            chip_rx_cap: vector_cap_bytes as usize,
        },
    );
    let initial_hz = args.static_frequency_hz.unwrap_or(args.frequency_hz);
    let realized_ns = engine.set_tck(1_000_000_000 / initial_hz.max(1));
    let engine = match args.static_frequency_hz {
        Some(hz) => {
            log::info!("locking TCK frequency to {hz} Hz ({realized_ns} ns), ignoring client settck:");
            engine.with_static_frequency(realized_ns)
        }
        None => engine,
    };

    let config = Config {
        max_vector_size: vector_cap_bytes,
        ..Config::default()
    };
    let server = Server::new(engine, config);

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("binding to {addr}");
    let listener = TcpListener::bind(addr)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let instance = Instance::new(
        server,
        listener,
        AllowAll,
        std::time::Duration::from_secs(args.lock_timeout_s as u64),
        Arc::clone(&shutdown),
    )?;

    install_signal_handler(Arc::clone(&shutdown))?;
    instance.run()?;
    Ok(())
}

/// Uses a small current-thread `tokio` runtime purely to wait on `SIGINT`/`SIGTERM`
/// concurrently with the otherwise-blocking instance loop (§5); this does not add
/// any session concurrency.
fn install_signal_handler(shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_io().build()?;
    std::thread::spawn(move || {
        runtime.block_on(async move {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            log::info!("shutdown signal received");
            shutdown.store(true, Ordering::Relaxed);
        });
    });
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("startup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

