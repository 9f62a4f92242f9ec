// SHARDBENCH LOGGING
// STRUCTURED LOGS TO STDERR. RESULT TABLES GO TO STDOUT WITH println!.
//
// FILTER PRIORITY:
//   1. SHARDBENCH_LOG  (DIRECTIVES, e.g. "shardbench=debug,warn")
//   2. RUST_LOG
//   3. -v FLAG         (debug FOR THIS CRATE, info ELSEWHERE)
//   4. DEFAULT         info

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SHARDBENCH_LOG";

// SAFE TO CALL MORE THAN ONCE: LATER CALLS ARE NO-OPS
pub fn init(verbose: bool) {
    let filter = build_filter(verbose);
    let ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(verbose);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if verbose {
        registry.with(layer.with_timer(fmt::time::uptime())).try_init()
    } else {
        registry.with(layer.without_time().compact()).try_init()
    };
}

fn build_filter(verbose: bool) -> EnvFilter {
    // UNPARSEABLE DIRECTIVES FALL THROUGH TO THE NEXT SOURCE
    if let Some(filter) = std::env::var(LOG_ENV)
        .ok()
        .and_then(|d| EnvFilter::try_new(d).ok())
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(default_directive(verbose))
}

fn default_directive(verbose: bool) -> String {
    if verbose {
        format!("{},{}={}", Level::INFO, env!("CARGO_CRATE_NAME"), Level::DEBUG)
    } else {
        Level::INFO.to_string()
    }
}
