//! GeoBeacon CLI - Command-line runner
//!
//! This binary assembles the GeoBeacon worker with the HTTP transport and,
//! by default, a simulated fix source so the agent can be exercised
//! without platform positioning hardware.

use std::process;
use std::time::Duration;

use clap::Parser;

use geobeacon::config::Settings;
use geobeacon::fix::LocationFix;
use geobeacon::logging::{default_log_dir, default_log_file, init_logging};
use geobeacon::provider::{ChannelProvider, FixInjector};
use geobeacon::scheduler::CountingWakeToken;
use geobeacon::uploader::HttpTransport;
use geobeacon::worker::Worker;

#[derive(Parser)]
#[command(name = "geobeacon")]
#[command(version = geobeacon::VERSION)]
#[command(about = "Background location acquisition and upload agent", long_about = None)]
struct Args {
    /// Collector endpoint URL (empty disables uploads)
    #[arg(long, default_value = "")]
    server_url: String,

    /// User identifier attached to every upload
    #[arg(long, default_value = "")]
    user: String,

    /// Foreground upload interval in milliseconds
    #[arg(long, default_value = "5000")]
    foreground_interval: i64,

    /// Background upload interval in milliseconds
    #[arg(long, default_value = "180000")]
    background_interval: i64,

    /// Wake cycle interval in milliseconds (60000..=1800000)
    #[arg(long, default_value = "60000")]
    wake_interval: i64,

    /// Start with uploads disabled
    #[arg(long)]
    disable_upload: bool,

    /// Start in foreground mode (fast upload cadence)
    #[arg(long)]
    foreground: bool,

    /// Directory for the log file
    #[arg(long, default_value_t = default_log_dir().to_string())]
    log_dir: String,

    /// Disable the simulated position source (expect fixes from elsewhere)
    #[arg(long)]
    no_simulate: bool,

    /// Simulated fix cadence in milliseconds
    #[arg(long, default_value = "1000")]
    simulate_interval: u64,

    /// Simulation starting latitude
    #[arg(long, default_value = "31.2304", allow_hyphen_values = true)]
    start_lat: f64,

    /// Simulation starting longitude
    #[arg(long, default_value = "121.4737", allow_hyphen_values = true)]
    start_lon: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.foreground_interval <= 0 || args.background_interval <= 0 {
        eprintln!("Error: upload intervals must be positive");
        process::exit(1);
    }

    let _log_guard = match init_logging(&args.log_dir, default_log_file()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {}", e);
            process::exit(1);
        }
    };

    let settings = Settings {
        server_url: args.server_url.clone(),
        user_name: args.user.clone(),
        upload_enabled: !args.disable_upload,
        foreground_interval_ms: args.foreground_interval,
        background_interval_ms: args.background_interval,
        wake_interval_ms: args.wake_interval,
    };

    if settings.server_url.is_empty() {
        tracing::warn!("No collector URL configured, fixes will be acquired but not uploaded");
    }

    let transport = match HttpTransport::new() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error creating HTTP transport: {}", e);
            process::exit(1);
        }
    };

    let (provider, injector, fix_rx) = ChannelProvider::new(32);

    let handle = match Worker::start(
        settings,
        provider,
        fix_rx,
        transport,
        CountingWakeToken::new(),
    ) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error starting worker: {}", e);
            process::exit(1);
        }
    };

    if args.foreground {
        handle.set_foreground_mode(true);
    }

    if !args.no_simulate {
        tokio::spawn(simulate_fixes(
            injector,
            args.start_lat,
            args.start_lon,
            Duration::from_millis(args.simulate_interval.max(100)),
        ));
    }

    tokio::spawn(report_delivery(handle.clone()));

    tracing::info!(version = geobeacon::VERSION, "GeoBeacon running, Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error waiting for shutdown signal: {}", e);
        process::exit(1);
    }

    tracing::info!("Shutdown signal received");
    handle.stop().await;
}

/// Deterministic position walk: a slow drift plus a small oscillation,
/// good enough to watch throttling and wake cycles behave.
async fn simulate_fixes(injector: FixInjector, lat: f64, lon: f64, cadence: Duration) {
    let mut ticker = tokio::time::interval(cadence);
    let mut step: u64 = 0;

    loop {
        ticker.tick().await;
        let t = step as f64;
        let fix = LocationFix::new(
            lat + t * 0.00002 + (t * 0.7).sin() * 0.0001,
            lon + t * 0.00003 + (t * 0.4).cos() * 0.0001,
        )
        .with_accuracy(5.0 + (t * 0.3).sin().abs() as f32 * 10.0)
        .with_vectors(1.4, ((step * 7) % 360) as f32, 12.0);

        if !injector.inject(fix).await {
            tracing::trace!("Simulated fix dropped, acquisition inactive");
        }
        step = step.wrapping_add(1);
    }
}

/// Log delivery status transitions for operator visibility.
async fn report_delivery(handle: geobeacon::worker::WorkerHandle) {
    use geobeacon::fix::DeliveryStatus;

    let mut status = handle.observe_delivery_status();
    loop {
        if status.changed().await.is_err() {
            break;
        }
        match &*status.borrow_and_update() {
            DeliveryStatus::Success { code } => {
                tracing::info!(code, "Fix delivered");
            }
            DeliveryStatus::Error { message } => {
                tracing::warn!(%message, "Fix delivery failed");
            }
            DeliveryStatus::Uploading | DeliveryStatus::Idle => {}
        }
    }
}
