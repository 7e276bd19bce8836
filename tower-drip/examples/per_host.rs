use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use tower_drip::Backend;
use tower_drip::DripError;
use tower_drip::LimiterConfig;
use tower_drip::LimiterSession;
use tracing_subscriber::EnvFilter;

/// Fetch URLs through a rate limited session and report how long each waited.
#[derive(Debug, Parser)]
struct Args {
    /// URLs to fetch, in order. Repeat a URL to see its host's bucket drain.
    #[arg(required = true)]
    urls: Vec<String>,

    /// Requests allowed per second, per host
    #[arg(long, default_value_t = 2.0)]
    per_second: f64,

    /// Requests allowed per minute, per host
    #[arg(long, default_value_t = 0.0)]
    per_minute: f64,

    /// Give up on a request that would wait longer than this, e.g. `750ms`
    #[arg(long, value_parser = humantime::parse_duration)]
    max_delay: Option<Duration>,

    /// Share one bucket across all hosts
    #[arg(long)]
    shared: bool,

    /// Persist buckets in this SQLite file
    #[arg(long)]
    sqlite: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), DripError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tower_drip=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = LimiterConfig::per_second(args.per_second)
        .with_per_minute(args.per_minute)
        .with_per_host(!args.shared);
    if let Some(max_delay) = args.max_delay {
        config = config.with_max_delay(max_delay);
    }
    if let Some(path) = args.sqlite {
        config = config.with_backend(Backend::Sqlite { path, table: None });
    }

    let session = LimiterSession::new(config)?;
    let start = Instant::now();

    for url in &args.urls {
        let sent = Instant::now();
        match session.send(session.get(url)).await {
            Ok(response) => println!(
                "[{:>8.2?}] {} {url} (waited {:.2?})",
                start.elapsed(),
                response.status(),
                sent.elapsed()
            ),
            Err(err) if err.is_delay_exceeded() => {
                println!("[{:>8.2?}] skipped {url}: {err}", start.elapsed())
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}
