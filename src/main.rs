//! CLI entry point for the GTFS-RT delay tracker.
//!
//! Provides subcommands for tracking a live feed against a static schedule,
//! inspecting a single feed snapshot, and measuring a feed's refresh cadence.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use gtfs_rt_delay::{
    cadence::CadenceProbe,
    config::MatchConfig,
    fetch::{
        BasicClient, FeedSource, FileFeedSource, HttpClient, HttpFeedSource,
        auth::{ApiKey, UrlParam},
    },
    output::{CsvLogSink, LogSink, MemorySink},
    processor::Processor,
    schedule::{GtfsSchedule, ScheduleProvider},
    tracker::ActiveTrips,
};
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Wait after a failed fetch before polling again.
const RETRY_AFTER_FETCH_ERROR: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "gtfs_rt_delay")]
#[command(about = "Map-matches GTFS-RT vehicles and records their delays", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll a vehicle-positions feed and append delay records to a CSV file
    Track {
        /// GTFS static feed, as a directory or a .zip archive
        #[arg(long, env = "GTFS_PATH")]
        gtfs: String,

        /// GTFS-RT vehicle positions URL
        #[arg(long, env = "FEED_URL")]
        feed_url: String,

        /// CSV file to append delay records to
        #[arg(short, long, default_value = "delays.csv")]
        output: String,

        /// Seconds between polls
        #[arg(short, long, default_value_t = 30)]
        interval: u64,

        /// Number of polls to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        cycles: usize,

        #[command(flatten)]
        tuning: TuningArgs,

        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Match a single feed snapshot from a file or URL and print the records
    Inspect {
        /// GTFS static feed, as a directory or a .zip archive
        #[arg(long, env = "GTFS_PATH")]
        gtfs: String,

        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        #[command(flatten)]
        tuning: TuningArgs,

        #[command(flatten)]
        auth: AuthArgs,
    },
    /// Report how often a feed publishes new positions
    Cadence {
        /// GTFS-RT vehicle positions URL
        #[arg(long, env = "FEED_URL")]
        feed_url: String,

        /// Seconds between polls
        #[arg(short, long, default_value_t = 50)]
        interval: u64,

        /// Number of polls to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        cycles: usize,

        #[command(flatten)]
        auth: AuthArgs,
    },
}

#[derive(Args)]
struct TuningArgs {
    /// JSON file with matching parameters
    #[arg(long, env = "MATCH_CONFIG")]
    config: Option<String>,

    /// Override the stop tolerance, in meters
    #[arg(long)]
    stop_tolerance: Option<f64>,

    /// Override the vehicle tolerance, in meters
    #[arg(long)]
    vehicle_tolerance: Option<f64>,
}

impl TuningArgs {
    fn match_config(&self) -> Result<MatchConfig> {
        let mut config = match &self.config {
            Some(path) => MatchConfig::load(path)?,
            None => MatchConfig::default(),
        };
        if let Some(tolerance) = self.stop_tolerance {
            config.stop_tolerance_m = tolerance;
        }
        if let Some(tolerance) = self.vehicle_tolerance {
            config.vehicle_tolerance_m = tolerance;
        }
        Ok(config)
    }
}

#[derive(Args)]
struct AuthArgs {
    /// API key for feeds that require one
    #[arg(long, env = "FEED_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Send the key in this HTTP header
    #[arg(long, conflicts_with = "api_key_param")]
    api_key_header: Option<String>,

    /// Send the key as this URL query parameter
    #[arg(long)]
    api_key_param: Option<String>,
}

impl AuthArgs {
    fn client(&self) -> Result<Box<dyn HttpClient>> {
        let basic = BasicClient::new()?;
        let Some(key) = &self.api_key else {
            return Ok(Box::new(basic));
        };

        let client: Box<dyn HttpClient> = match (&self.api_key_header, &self.api_key_param) {
            (_, Some(param)) => Box::new(UrlParam {
                inner: basic,
                param_name: param.clone(),
                key: key.clone(),
            }),
            (Some(header), None) => Box::new(ApiKey::new(basic, header, key)?),
            (None, None) => Box::new(ApiKey::bearer(basic, key)?),
        };
        Ok(client)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_delay.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_delay.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track {
            gtfs,
            feed_url,
            output,
            interval,
            cycles,
            tuning,
            auth,
        } => {
            let config = tuning.match_config()?;
            let schedule = load_schedule(&gtfs)?;
            let sink = CsvLogSink::open(&output, config.sink_lookback_secs)?;
            let source = HttpFeedSource::new(auth.client()?, feed_url);
            track(
                &source,
                schedule,
                sink,
                config,
                Duration::from_secs(interval),
                cycles,
            )
            .await?;
        }
        Commands::Inspect {
            gtfs,
            source,
            tuning,
            auth,
        } => {
            let config = tuning.match_config()?;
            let schedule = load_schedule(&gtfs)?;
            let source = feed_source(&source, &auth)?;
            inspect(source.as_ref(), schedule, config).await?;
        }
        Commands::Cadence {
            feed_url,
            interval,
            cycles,
            auth,
        } => {
            let source = HttpFeedSource::new(auth.client()?, feed_url);
            cadence(&source, Duration::from_secs(interval), cycles).await?;
        }
    }

    Ok(())
}

fn load_schedule(path: &str) -> Result<GtfsSchedule> {
    let schedule =
        GtfsSchedule::load(path).with_context(|| format!("loading GTFS schedule from {path}"))?;
    if schedule.trip_count() == 0 {
        bail!("GTFS schedule at {path} has no trips");
    }
    Ok(schedule)
}

/// Reads a feed from a local file path or fetches it over HTTP.
fn feed_source(source: &str, auth: &AuthArgs) -> Result<Box<dyn FeedSource>> {
    let source: Box<dyn FeedSource> = if source.starts_with("http") {
        Box::new(HttpFeedSource::new(auth.client()?, source))
    } else {
        Box::new(FileFeedSource::new(source))
    };
    Ok(source)
}

/// Polls `source` every `interval` and records delays until `cycles` polls
/// have run or Ctrl+C is pressed.
#[tracing::instrument(skip_all, fields(interval_secs = interval.as_secs(), cycles))]
async fn track<F, P, S>(
    source: &F,
    schedule: P,
    sink: S,
    config: MatchConfig,
    interval: Duration,
    cycles: usize,
) -> Result<()>
where
    F: FeedSource,
    P: ScheduleProvider,
    S: LogSink,
{
    let tracker = ActiveTrips::new(schedule.timezone());
    let mut processor = Processor::new(schedule, sink, tracker, config);

    if cycles == 0 {
        info!("Tracking until interrupted. Press Ctrl+C to stop.");
    }

    let mut cycle = 0;
    loop {
        if cycles > 0 && cycle >= cycles {
            break;
        }
        cycle += 1;

        let started = Instant::now();
        let snapshot = match source.poll().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %format!("{e:#}"), "Feed fetch failed, retrying");
                tokio::time::sleep(RETRY_AFTER_FETCH_ERROR).await;
                continue;
            }
        };

        let stats = processor.process_snapshot(&snapshot)?;
        let elapsed = started.elapsed();

        info!(
            cycle,
            feed_timestamp = stats.timestamp,
            vehicles = stats.vehicles,
            saved = stats.saved,
            saved_pct = %format!("{:.1}", stats.saved_pct()),
            rejected = stats.rejected(),
            active_trips = stats.active_trips,
            elapsed_ms = elapsed.as_millis() as u64,
            "Cycle processed"
        );
        debug!(stats = %serde_json::to_string(&stats)?, "Cycle stats");

        if elapsed > interval {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                interval_secs = interval.as_secs(),
                "Processing took longer than the polling interval"
            );
        }

        if cycles > 0 && cycle >= cycles {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval.saturating_sub(elapsed)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Matches one snapshot and prints the records and statistics as JSON.
async fn inspect<P: ScheduleProvider>(
    source: &dyn FeedSource,
    schedule: P,
    config: MatchConfig,
) -> Result<()> {
    let snapshot = source.poll().await?;
    let tracker = ActiveTrips::new(schedule.timezone());
    let mut processor = Processor::new(schedule, MemorySink::default(), tracker, config);

    let stats = processor.process_snapshot(&snapshot)?;

    println!("{}", serde_json::to_string_pretty(&processor.sink().logs)?);
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Logs the time between content changes of `source`.
#[tracing::instrument(skip_all, fields(interval_secs = interval.as_secs(), cycles))]
async fn cadence<F: FeedSource>(source: &F, interval: Duration, cycles: usize) -> Result<()> {
    let mut probe = CadenceProbe::new();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);

    let mut cycle = 0;
    while cycles == 0 || cycle < cycles {
        cycle += 1;
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
        }

        match source.poll().await {
            Ok(snapshot) => {
                let now = started.elapsed().as_secs_f64();
                match probe.observe(&snapshot, now) {
                    Some(secs) => info!(
                        since_last_change_secs = %format!("{secs:.1}"),
                        vehicles = snapshot.observations.len(),
                        "Feed content changed"
                    ),
                    None => debug!(vehicles = snapshot.observations.len(), "Feed unchanged"),
                }
            }
            Err(e) => warn!(error = %format!("{e:#}"), "Feed fetch failed"),
        }
    }

    Ok(())
}
