//! Logging setup for the CLI.
//!
//! Logs go to stderr so `--json` output on stdout stays machine-readable.
//! Without `-v`/`-q`, `RUST_LOG` is honored; otherwise the flags win.

use stitch_bundler::LogLevel;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Call once, before any logging.
pub fn init_logger(verbose: u8, quiet: u8, no_color: bool) {
    let filter = if verbose == 0 && quiet == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(LogLevel::Info))
    } else {
        level_filter(LogLevel::from_verbosity(verbose, quiet))
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color && should_use_colors())
        .with_writer(std::io::stderr)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Filter enabling `level` for stitch crates only.
fn level_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(format!("stitch_bundler={level},stitch_cli={level}"))
}

/// `NO_COLOR` disables colors, `FORCE_COLOR` forces them.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var_os("FORCE_COLOR").is_some() {
        return true;
    }
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}
