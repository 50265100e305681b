// # discoveryd - Target Discovery Daemon
//
// Thin integration layer: all discovery logic lives in discovery-core and the
// backend crates. The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering backends and starting one discovery per configured source
// 4. Consuming the target groups and stopping every source on shutdown
//
// ## Configuration
//
// ### EC2
// - `SD_EC2_REGIONS`: Comma-separated regions, one source each
// - `SD_EC2_ENDPOINT`: API endpoint override (optional)
//
// ### Marathon
// - `SD_MARATHON_HOSTS`: Comma-separated Marathon hosts, one source each
// - `SD_MARATHON_ENDPOINT_ENV`: Application variable declaring the endpoint
//   (default `PROMETHEUS_ENDPOINT`)
//
// ### Engine
// - `SD_REFRESH_INTERVAL_SECS`: Seconds between polls (10-3600, default 60)
// - `SD_OBSERVER_CAPACITY`: Buffered lifecycle events (default 256)
// - `SD_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export SD_EC2_REGIONS=us-east-1,eu-west-1
// export SD_MARATHON_HOSTS=marathon.internal:8080
// export SD_REFRESH_INTERVAL_SECS=30
//
// discoveryd
// ```

use anyhow::{Context, Result};
use discovery_core::config::DEFAULT_MARATHON_ENDPOINT_ENV;
use discovery_core::{
    Discovery, DiscoveryConfig, DiscoveryEvent, DiscovererRegistry, StopHandle, TargetGroup,
};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Upper bound for stopping every source once a signal arrived
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DiscoverydExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<DiscoverydExitCode> for ExitCode {
    fn from(code: DiscoverydExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    ec2_regions: Vec<String>,
    ec2_endpoint: Option<String>,
    marathon_hosts: Vec<String>,
    marathon_endpoint_env: String,
    refresh_interval_secs: u64,
    observer_capacity: usize,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            ec2_regions: list(lookup("SD_EC2_REGIONS")),
            ec2_endpoint: lookup("SD_EC2_ENDPOINT").filter(|s| !s.is_empty()),
            marathon_hosts: list(lookup("SD_MARATHON_HOSTS")),
            marathon_endpoint_env: lookup("SD_MARATHON_ENDPOINT_ENV")
                .unwrap_or_else(|| DEFAULT_MARATHON_ENDPOINT_ENV.to_string()),
            refresh_interval_secs: number(&lookup, "SD_REFRESH_INTERVAL_SECS", 60)?,
            observer_capacity: number(&lookup, "SD_OBSERVER_CAPACITY", 256)?,
            log_level: lookup("SD_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.ec2_regions.is_empty() && self.marathon_hosts.is_empty() {
            anyhow::bail!(
                "No discovery source configured. \
                Set SD_EC2_REGIONS and/or SD_MARATHON_HOSTS, e.g. \
                export SD_EC2_REGIONS=us-east-1"
            );
        }

        for (name, values) in [
            ("SD_EC2_REGIONS", &self.ec2_regions),
            ("SD_MARATHON_HOSTS", &self.marathon_hosts),
        ] {
            if let Some(duplicate) = first_duplicate(values) {
                anyhow::bail!("{} lists '{}' more than once", name, duplicate);
            }
        }

        if !(10..=3600).contains(&self.refresh_interval_secs) {
            anyhow::bail!(
                "SD_REFRESH_INTERVAL_SECS must be between 10 and 3600 seconds. Got: {}",
                self.refresh_interval_secs
            );
        }

        if self.observer_capacity == 0 {
            anyhow::bail!("SD_OBSERVER_CAPACITY must be at least 1");
        }

        if self.marathon_endpoint_env.is_empty() {
            anyhow::bail!("SD_MARATHON_ENDPOINT_ENV cannot be empty");
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "SD_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        for source in self.sources() {
            source
                .validate()
                .with_context(|| format!("Invalid {} source", source.type_name()))?;
        }

        Ok(())
    }

    /// One discovery config per configured source
    fn sources(&self) -> Vec<DiscoveryConfig> {
        let ec2 = self.ec2_regions.iter().map(|region| DiscoveryConfig::Ec2 {
            region: region.clone(),
            refresh_interval_secs: self.refresh_interval_secs,
            endpoint: self.ec2_endpoint.clone(),
        });

        let marathon = self.marathon_hosts.iter().map(|host| DiscoveryConfig::Marathon {
            host: host.clone(),
            refresh_interval_secs: self.refresh_interval_secs,
            endpoint_env_var: self.marathon_endpoint_env.clone(),
        });

        ec2.chain(marathon).collect()
    }
}

/// Split a comma-separated variable, ignoring blanks
fn list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// First value that appears twice; each one would start the same source
fn first_duplicate(values: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    values
        .iter()
        .find(|value| !seen.insert(value.as_str()))
        .map(String::as_str)
}

/// Parse a numeric variable, falling back to `default` when unset
fn number<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number. Got: {}", name, value)),
        None => Ok(default),
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return DiscoverydExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return DiscoverydExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DiscoverydExitCode::ConfigError.into();
    }

    info!("Starting discoveryd daemon");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DiscoverydExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let sources = match start_sources(&config) {
            Ok(sources) => sources,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return DiscoverydExitCode::ConfigError;
            }
        };

        match run_daemon(sources).await {
            Ok(()) => DiscoverydExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                DiscoverydExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Everything needed to consume and stop the running sources
struct Sources {
    outputs: StreamMap<String, ReceiverStream<TargetGroup>>,
    running: Vec<(StopHandle, JoinHandle<()>)>,
    observer: JoinHandle<()>,
}

/// Create and spawn one discovery per configured source
fn start_sources(config: &Config) -> Result<Sources> {
    let registry = DiscovererRegistry::new();

    #[cfg(feature = "ec2")]
    {
        info!("Registering EC2 discoverer");
        discovery_ec2::register(&registry);
    }

    #[cfg(feature = "marathon")]
    {
        info!("Registering Marathon discoverer");
        discovery_marathon::register(&registry);
    }

    let (event_tx, event_rx) = mpsc::channel(config.observer_capacity);
    let mut outputs = StreamMap::new();
    let mut running = Vec::new();

    for source_config in config.sources() {
        let discoverer = registry
            .create(&source_config)
            .with_context(|| format!("Failed to create {} discoverer", source_config.type_name()))?;

        let (discovery, stop) = Discovery::new(discoverer, source_config.refresh_interval())?;
        let key = discovery.sources().join(",");
        let (stream, task) = discovery.with_observer(event_tx.clone()).spawn();

        info!("Started discovery source {}", key);
        outputs.insert(key, stream);
        running.push((stop, task));
    }

    let observer = tokio::spawn(log_events(event_rx));

    Ok(Sources {
        outputs,
        running,
        observer,
    })
}

/// Consume target groups until a shutdown signal, then stop every source
async fn run_daemon(sources: Sources) -> Result<()> {
    let Sources {
        mut outputs,
        running,
        observer,
    } = sources;
    let mut latest: BTreeMap<String, TargetGroup> = BTreeMap::new();

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let signal = loop {
        tokio::select! {
            signal = &mut shutdown => break signal?,
            next = outputs.next() => match next {
                Some((key, group)) => {
                    info!("Source {} reported {} target(s)", key, group.len());
                    for target in &group.targets {
                        debug!("{}: {}", key, target);
                    }
                    latest.insert(key, group);

                    let total: usize = latest.values().map(TargetGroup::len).sum();
                    debug!("{} target(s) across {} source(s)", total, latest.len());
                }
                None => anyhow::bail!("Every discovery source terminated unexpectedly"),
            },
        }
    };

    info!("Received shutdown signal: {}", signal);
    info!("Stopping {} discovery source(s)", running.len());

    let stop_all = async {
        for (stop, task) in running {
            let names = stop.sources().join(",");
            stop.stop().await;
            if let Err(e) = task.await {
                warn!("Discovery task for {} ended abnormally: {}", names, e);
            }
        }
    };

    tokio::time::timeout(STOP_TIMEOUT, stop_all)
        .await
        .map_err(|_| anyhow::anyhow!("Shutdown timeout after {:?}", STOP_TIMEOUT))?;

    // Every Discovery held a sender; the observer drains and ends on its own
    drop(outputs);
    if let Err(e) = observer.await {
        warn!("Event observer ended abnormally: {}", e);
    }

    info!("Shut down cleanly");
    Ok(())
}

/// Log lifecycle events reported by the discoveries
async fn log_events(mut events: mpsc::Receiver<DiscoveryEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DiscoveryEvent::RefreshFailed { error } => debug!("Refresh failed: {}", error),
            DiscoveryEvent::TargetsDropped {
                source,
                count,
                reason,
            } => warn!("Dropped {} target(s) from {}: {}", count, source, reason),
            other => debug!("Discovery event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
