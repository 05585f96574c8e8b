use clap::Parser;
use gyazo_drain::{Config, Error, Event, ItemId, MigrationRun, Migrator, run_with_shutdown};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Catalog drained, nothing left to do
const EXIT_OK: u8 = 0;
/// Fatal error while running (credentials rejected mid-run, completion log failure)
const EXIT_RUNTIME: u8 = 1;
/// Fatal configuration error (missing token, unwritable output directory)
const EXIT_CONFIG: u8 = 2;
/// Interrupted by a signal
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "gyazo-drain", version)]
#[command(about = "Download every image of a Gyazo account, then delete the remote copies", long_about = None)]
struct Cli {
    /// Access token for the image API
    #[arg(long, env = "GYAZO_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory images are saved to (created if absent)
    #[arg(short, long, env = "GYAZO_OUTPUT_DIR", default_value = "images")]
    output_dir: PathBuf,

    /// Images downloaded at the same time
    #[arg(short = 'j', long, env = "GYAZO_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Images requested per catalog page (1-100)
    #[arg(long, default_value_t = 100)]
    per_page: u32,

    /// Completion log database
    #[arg(long, env = "GYAZO_DRAIN_DB", default_value = "gyazo-drain.db")]
    db: PathBuf,

    /// Base URL of the image API
    #[arg(long, env = "GYAZO_API_BASE", default_value = "https://api.gyazo.com")]
    api_base: String,

    /// Timeout of a single catalog call, in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Retries for transient failures
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Do not log per-image transfer progress
    #[arg(long)]
    no_progress: bool,
}

impl Cli {
    fn to_config(&self) -> Config {
        let mut config = Config::default();
        config.api.access_token = self.token.clone();
        config.api.base_url = self.api_base.clone();
        config.api.per_page = self.per_page;
        config.api.request_timeout = Duration::from_secs(self.timeout);
        config.download.output_dir = self.output_dir.clone();
        config.download.concurrency = self.concurrency;
        config.retry.max_attempts = self.max_attempts;
        config.persistence.database_path = self.db.clone();
        config
    }
}

/// Log filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

fn init_logging() {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // stdout is reserved for the report
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter_layer)
        .init();
}

fn log_progress(id: &ItemId, downloaded: u64, total: Option<u64>) {
    match total {
        Some(total) if total > 0 => tracing::info!(
            item_id = %id,
            downloaded,
            total,
            percent = downloaded as f64 * 100.0 / total as f64,
            "Transferring"
        ),
        _ => tracing::info!(item_id = %id, downloaded, "Transferring"),
    }
}

/// Log transfer progress as the engine reports it (every 500 ms per transfer)
fn spawn_progress_logger(mut events: tokio::sync::broadcast::Receiver<Event>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::Progress {
                    id,
                    downloaded,
                    total,
                }) => log_progress(&id, downloaded, total),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::trace!(skipped, "Progress logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_report(summary: &MigrationRun, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(report) => println!("{}", report),
            Err(e) => tracing::error!(error = %e, "Failed to serialize report"),
        }
    } else {
        println!("{}", summary);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging();

    let migrator = match Migrator::new(cli.to_config()).await {
        Ok(migrator) => migrator,
        Err(e) => {
            tracing::error!(error = %e, "Cannot start migration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let progress = (!cli.no_progress).then(|| spawn_progress_logger(migrator.subscribe()));
    let result = run_with_shutdown(migrator).await;
    if let Some(progress) = progress {
        progress.abort();
    }

    match result {
        Ok(summary) => {
            print_report(&summary, cli.json);
            if summary.cancelled {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::from(EXIT_OK)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, kind = %e.kind(), "Migration failed");
            match e {
                Error::Config { .. } => ExitCode::from(EXIT_CONFIG),
                _ => ExitCode::from(EXIT_RUNTIME),
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn progress_is_visible_with_default_filter() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(DEFAULT_FILTER))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            log_progress(&ItemId::from("img-1"), 512, Some(2048));
            log_progress(&ItemId::from("img-2"), 64, None);
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(output.matches("Transferring").count(), 2, "output: {output}");
        assert!(output.contains("img-1"));
        assert!(output.contains("percent=25"));
    }

    #[test]
    fn progress_logging_can_be_disabled() {
        let cli = Cli::try_parse_from(["gyazo-drain"]).unwrap();
        assert!(!cli.no_progress);

        let cli = Cli::try_parse_from(["gyazo-drain", "--no-progress"]).unwrap();
        assert!(cli.no_progress);
    }
}
