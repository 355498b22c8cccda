// # cname-flattener
//
// Runs one CNAME flattening pass and exits. Meant to be started by a
// scheduler (cron, systemd timer, Kubernetes CronJob).
//
// The binary is a thin layer over `flatten-core`:
// 1. Read and validate configuration from environment variables
// 2. Set up logging (stdout + rolling file)
// 3. Take the pass lock so overlapping runs exit early
// 4. Run the reconciler once
// 5. Touch the liveness marker on success, notify the error reporter otherwise
//
// ## Configuration
//
// ### Names
// - `FLATTEN_CNAME`: CNAME target to resolve (e.g. myapp.herokuapp.com)
// - `FLATTEN_DOMAIN`: Domain whose A records are managed
// - `FLATTEN_TTL`: TTL for created records (1 = automatic, else 120-86400; default 120)
//
// ### Resolution
// - `FLATTEN_NAMESERVERS`: Comma-separated nameserver IPs (default: system configuration)
// - `FLATTEN_RESOLVE_TIMEOUT_SECS`: Lookup timeout (default 10)
//
// ### CloudFlare
// - `FLATTEN_CLOUDFLARE_API_KEY`: Account API key
// - `FLATTEN_CLOUDFLARE_EMAIL`: Account email
// - `FLATTEN_CLOUDFLARE_ZONE`: Zone name (default: `FLATTEN_DOMAIN`)
// - `FLATTEN_CLOUDFLARE_ENDPOINT`: API endpoint override
// - `FLATTEN_HTTP_TIMEOUT_SECS`: Request timeout (default 30)
// - `FLATTEN_MODE`: `live` (default) or `dry-run`
//
// ### Engine
// - `FLATTEN_MAX_RETRIES`: Extra attempts for transient failures (default 2)
// - `FLATTEN_RETRY_DELAY_SECS`: Delay between attempts (default 5)
//
// ### Run state
// - `FLATTEN_LOCK_PATH`: Lock file (default cname-flattener.lock)
// - `FLATTEN_LIVENESS_MARKER`: File rewritten after every successful live pass
//
// ### Reporting and logging
// - `FLATTEN_BUGSNAG_API_KEY`: Enables Bugsnag error reporting
// - `FLATTEN_BUGSNAG_RELEASE_STAGE`: Bugsnag release stage (default production)
// - `FLATTEN_BUGSNAG_ENDPOINT`: Notify endpoint override (on-premise Bugsnag)
// - `FLATTEN_LOG_LEVEL`: trace, debug, info, warn, error (default info)
// - `LOG_PATH`: Log file (default cname-flattener.log)
// - `LOG_ROTATION_PERIOD`: minutely, hourly, daily, weekly (rolls daily), never (default daily)
// - `FLATTEN_LOG_MAX_FILES`: Rotated log files to keep (default 7)
//
// ## Example
//
// ```bash
// export FLATTEN_CNAME=myapp.herokuapp.com
// export FLATTEN_DOMAIN=example.com
// export FLATTEN_CLOUDFLARE_API_KEY=your_key
// export FLATTEN_CLOUDFLARE_EMAIL=you@example.com
// export FLATTEN_LIVENESS_MARKER=/var/lib/cname-flattener/last-success.json
//
// cname-flattener
// ```

mod bugsnag;
mod config;
mod logging;

use flatten_core::traits::{ErrorReporter, FailureNotice, NoopReporter};
use flatten_core::{
    Error, ErrorKind, FlattenConfig, LivenessMarker, PassLock, ReconciliationReport, Reconciler,
};
use flatten_provider_cloudflare::CloudflareRecordStore;
use flatten_resolver_hickory::HickoryResolver;
use std::any::Any;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::bugsnag::BugsnagReporter;
use crate::config::Config;

/// Exit codes for the outcomes of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlattenExitCode {
    /// Records match the resolved addresses
    Success = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Pass aborted before changing anything (or crashed)
    Aborted = 2,
    /// Some record changes failed
    PartialApply = 3,
    /// Another pass holds the lock
    AlreadyRunning = 4,
}

impl From<FlattenExitCode> for ExitCode {
    fn from(code: FlattenExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return FlattenExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return FlattenExitCode::ConfigError.into();
    }

    // Flushes the log file on exit
    let _log_guard = match logging::init(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return FlattenExitCode::ConfigError.into();
        }
    };

    let flatten_config = config.to_flatten_config();
    info!(
        "Starting cname-flattener: {} -> {} [provider: {}, mode: {}]",
        flatten_config.cname,
        flatten_config.domain,
        flatten_config.provider.type_name(),
        if flatten_config.provider.is_dry_run() { "DRY-RUN" } else { "LIVE" }
    );

    // Held until main returns
    let _lock = match PassLock::acquire(&flatten_config.lock_path) {
        Ok(lock) => lock,
        Err(e @ Error::PassInProgress(_)) => {
            warn!("{}", e);
            return FlattenExitCode::AlreadyRunning.into();
        }
        Err(e) => {
            error!("Failed to take pass lock: {}", e);
            return FlattenExitCode::Aborted.into();
        }
    };

    let reporter = match build_reporter(&config) {
        Ok(reporter) => reporter,
        Err(e) => {
            error!("Failed to set up error reporting: {:#}", e);
            return FlattenExitCode::ConfigError.into();
        }
    };

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return FlattenExitCode::Aborted.into();
        }
    };

    let code = rt.block_on(run(flatten_config, reporter));
    info!("Exiting with {:?}", code);
    code.into()
}

fn build_reporter(config: &Config) -> anyhow::Result<Arc<dyn ErrorReporter>> {
    let reporter: Arc<dyn ErrorReporter> = match config.bugsnag_api_key {
        Some(ref key) => {
            let mut bugsnag =
                BugsnagReporter::new(key.clone(), config.bugsnag_release_stage.clone())?;
            if let Some(ref endpoint) = config.bugsnag_endpoint {
                bugsnag = bugsnag.with_endpoint(endpoint.clone());
            }
            Arc::new(bugsnag)
        }
        None => Arc::new(NoopReporter),
    };
    info!("Error reporting: {}", reporter.reporter_name());
    Ok(reporter)
}

/// Run one pass and turn its outcome into an exit code
async fn run(config: FlattenConfig, reporter: Arc<dyn ErrorReporter>) -> FlattenExitCode {
    let store = match CloudflareRecordStore::from_config(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to create CloudFlare record store: {}", e);
            return FlattenExitCode::ConfigError;
        }
    };
    let resolver = HickoryResolver::from_settings(&config.resolver);
    let reconciler = Reconciler::new(Box::new(resolver), Box::new(store), &config.engine);

    // Run the pass in its own task so a panic surfaces as a JoinError
    let cname = config.cname.clone();
    let pass = tokio::spawn(async move { reconciler.run(&cname).await });

    let outcome = match pass.await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            let message = if join_error.is_panic() {
                format!("Pass panicked: {}", panic_message(join_error.into_panic()))
            } else {
                "Pass task was cancelled".to_string()
            };
            error!("{}", message);
            let notice = FailureNotice::new(ErrorKind::Other, message).unhandled();
            notify(reporter.as_ref(), notice, &config).await;
            return FlattenExitCode::Aborted;
        }
    };

    match outcome {
        Ok(report) => finish(report, reporter.as_ref(), &config).await,
        Err(e) => {
            error!("Pass aborted: {}", e);
            notify(reporter.as_ref(), FailureNotice::from(&e), &config).await;
            FlattenExitCode::Aborted
        }
    }
}

/// Handle a completed pass
async fn finish(
    report: ReconciliationReport,
    reporter: &dyn ErrorReporter,
    config: &FlattenConfig,
) -> FlattenExitCode {
    if let Some(err) = report.partial_apply_error() {
        let failed: Vec<String> = report.failures.iter().map(|f| f.to_string()).collect();
        let notice = FailureNotice::from(&err).with_context("failures", failed.join("; "));
        notify(reporter, notice, config).await;
        return FlattenExitCode::PartialApply;
    }

    if config.provider.is_dry_run() {
        info!("Dry run: leaving the liveness marker untouched");
        return FlattenExitCode::Success;
    }

    if let Some(ref path) = config.liveness_marker {
        // A missing marker update shows up as a stale marker, so the pass
        // result stands
        if let Err(e) = LivenessMarker::new(path).touch(&report).await {
            error!("Failed to update liveness marker {}: {}", path.display(), e);
            notify(reporter, FailureNotice::from(&e), config).await;
        }
    }

    FlattenExitCode::Success
}

async fn notify(reporter: &dyn ErrorReporter, notice: FailureNotice, config: &FlattenConfig) {
    let notice = notice
        .with_context("cname", config.cname.clone())
        .with_context("domain", config.domain.clone());
    reporter.notify(&notice).await;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
