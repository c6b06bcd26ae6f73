use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "tsuzuki=info";
const VERBOSE_FILTER: &str = "tsuzuki=debug";

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Log to stderr only.
pub fn init(verbose: bool) {
    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Log to stderr and to a daily file under `dir`. Keep the guard alive until exit.
pub fn init_with_file(verbose: bool, dir: &Path) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "tsuzuki.log"));

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .init();

    guard
}
