use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use model_monitor::aggregator::{MetricsStore, SharedMetricsStore};
use model_monitor::config::{Config, PredictorBackend, TrackerBackend};
use model_monitor::drift::{DriftDetector, ReferenceDatasetManager};
use model_monitor::error::ConfigError;
use model_monitor::predictor::{
    FeatureGenerator, KServePredictor, MockPredictor, Predictor, UniformFeatureGenerator,
};
use model_monitor::reporting::{LogTracker, MlflowTracker, SummaryExporter, Tracker};
use model_monitor::scheduler::{
    DriftCycle, DriftSettings, MonitoringCycle, MonitoringSettings, Schedule, Scheduler,
};
use model_monitor::storage::FsObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const TRACKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Which cycles to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Monitor,
    Drift,
    All,
}

impl Mode {
    fn monitors(self) -> bool {
        matches!(self, Mode::Monitor | Mode::All)
    }

    fn detects_drift(self) -> bool {
        matches!(self, Mode::Drift | Mode::All)
    }
}

/// Command-line arguments for the model monitor
#[derive(Parser)]
#[command(
    name = "model-monitor",
    about = "Prediction service monitor - latency, trends and data drift",
    long_about = "Exercises a KServe inference endpoint with synthetic batches, aggregates response \
                  times and predictions into hourly, daily and weekly buckets, detects input \
                  drift against a reference dataset, and reports everything to an experiment \
                  tracker."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Run each selected cycle once and exit
    #[arg(long)]
    once: bool,

    /// Cycles to run
    #[arg(long, value_enum, default_value_t = Mode::All)]
    mode: Mode,
}

impl Cli {
    /// The configuration file to load, if one was given
    ///
    /// A path that does not exist is passed through; `load_config` falls back
    /// to defaults for it. Anything other than a regular file is rejected.
    fn config_file(&self) -> Result<Option<&Path>, String> {
        let Some(path) = self.config.as_deref() else {
            return Ok(None);
        };
        if path.exists() && !path.is_file() {
            return Err(format!("{} is not a regular file", path.display()));
        }
        if path.extension().is_some_and(|ext| ext != "toml") {
            warn!("Expected a .toml configuration file, got {}", path.display());
        }
        Ok(Some(path))
    }
}

/// Load configuration from file or use defaults
///
/// A missing or unreadable file and an invalid file both fall back to the
/// defaults with a warning.
fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    let Some(path) = config_path else {
        info!("Using default configuration");
        return Ok(Config::default());
    };

    info!("Loading configuration from: {}", path.display());
    match Config::from_file(path) {
        Ok(config) => Ok(config),
        Err(ConfigError::ReadError(e)) => {
            warn!("Cannot read {} ({}), using defaults", path.display(), e);
            Ok(Config::default())
        }
        Err(e) => {
            error!("Configuration error in {}: {}", path.display(), e);
            warn!("Using default configuration due to invalid config file");
            Ok(Config::default())
        }
    }
}

fn build_predictor(config: &Config) -> anyhow::Result<Arc<dyn Predictor>> {
    let predictor: Arc<dyn Predictor> = match config.predictor.backend {
        PredictorBackend::Kserve => Arc::new(
            KServePredictor::new(
                config.predictor.endpoint.clone(),
                config.predictor.model_name.clone(),
                config.predictor.timeout(),
            )
            .context("failed to create KServe client")?,
        ),
        PredictorBackend::Mock => {
            warn!("Using mock predictor; no requests leave this process");
            Arc::new(MockPredictor::with_script(vec![Ok(0), Ok(0), Ok(0), Ok(1)]))
        }
    };
    Ok(predictor)
}

fn build_tracker(config: &Config) -> anyhow::Result<Arc<dyn Tracker>> {
    let tracker: Arc<dyn Tracker> = match config.tracker.backend {
        TrackerBackend::Log => Arc::new(LogTracker::new()),
        TrackerBackend::Mlflow => Arc::new(
            MlflowTracker::new(config.tracker.tracking_uri.clone(), TRACKER_TIMEOUT)
                .context("failed to create MLflow client")?,
        ),
    };
    Ok(tracker)
}

/// Wire every component the selected mode needs into a scheduler
fn build_scheduler(config: &Config, mode: Mode) -> anyhow::Result<Scheduler> {
    let predictor = build_predictor(config)?;
    let tracker = build_tracker(config)?;
    let generator: Arc<dyn FeatureGenerator> = Arc::new(UniformFeatureGenerator::bank_churn());

    let mut scheduler = Scheduler::new(config.monitoring.cycle_deadline());

    if mode.monitors() {
        let store = SharedMetricsStore::new(
            MetricsStore::new(
                config.monitoring.history_size,
                config.monitoring.time_window(),
            ),
            config.monitoring.lock_timeout(),
        );
        let monitoring = Arc::new(MonitoringCycle::new(
            Arc::clone(&predictor),
            Arc::clone(&generator),
            store,
            Arc::clone(&tracker),
            SummaryExporter::new(config.monitoring.export_path.clone()),
            MonitoringSettings::from_config(config),
        ));
        scheduler = scheduler
            .every(monitoring.clone(), config.monitoring.interval())
            .on_schedule(
                monitoring,
                Schedule::daily_and_weekend(
                    &config.monitoring.scheduled_hours,
                    config.monitoring.weekend_hour,
                ),
            );
    }

    if mode.detects_drift() {
        let objects = Arc::new(FsObjectStore::new(config.storage.root.clone()));
        let reference = Arc::new(ReferenceDatasetManager::new(
            objects,
            Arc::clone(&generator),
            config.storage.reference_key.clone(),
        ));
        let detector = DriftDetector::new(config.drift.psi_threshold, config.drift.ks_threshold)
            .with_psi_buckets(config.drift.psi_buckets)
            .with_positive_class(config.drift.positive_class)
            .with_features(config.drift.features.clone());
        let drift = Arc::new(DriftCycle::new(
            predictor,
            generator,
            reference,
            detector,
            tracker,
            DriftSettings::from_config(config),
        ));
        scheduler = scheduler.every(drift, config.drift.interval());
    }

    Ok(scheduler)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting model monitor");

    let config_file = match cli.config_file() {
        Ok(path) => path,
        Err(e) => bail!("Invalid --config: {}", e),
    };
    let config = load_config(config_file)?;

    let scheduler = build_scheduler(&config, cli.mode)?;
    info!(
        "Model monitor initialized for {} at {} ({} jobs)",
        config.predictor.model_name,
        config.predictor.endpoint,
        scheduler.job_count()
    );

    if cli.once {
        let results = scheduler.run_once().await;
        let failed: Vec<&str> = results
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(name, _)| name.as_str())
            .collect();
        if !failed.is_empty() {
            bail!("Cycles failed: {}", failed.join(", "));
        }
        info!("Single run complete");
        return Ok(());
    }

    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if shutdown_sender.send(true).is_err() {
            error!("Failed to send shutdown signal: scheduler already stopped");
        }
    })
    .context("failed to set SIGINT handler")?;

    info!("Model monitor is running. Press Ctrl+C to stop.");
    scheduler.run(shutdown_receiver).await;

    info!("Model monitor shutdown complete");
    Ok(())
}
