//! Subscriber setup for binaries embedding stitch.
//!
//! The library itself only emits `tracing` events. Hosts that want them
//! printed without wiring their own subscriber can call one of these
//! functions once at startup.

use std::sync::Once;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Verbosity for stitch output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    /// Includes per-probe resolution events.
    Trace,
}

impl LogLevel {
    fn as_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Silent => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Map a `-v`/`-q` count pair onto a level, starting from `Info`.
    pub fn from_verbosity(verbose: u8, quiet: u8) -> Self {
        match i16::from(verbose) - i16::from(quiet) {
            i16::MIN..=-3 => LogLevel::Silent,
            -2 => LogLevel::Error,
            -1 => LogLevel::Warn,
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silent" | "off" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("Invalid log level: {other}")),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_level_filter())
    }
}

/// Install a global subscriber at `level`, still honoring `RUST_LOG`
/// directives. Only the first call in a process takes effect.
///
/// Returns `false` when nothing was installed: an earlier call already ran,
/// or the host had its own subscriber in place, which is kept.
///
/// ```rust,no_run
/// use stitch_bundler::logging::{LogLevel, init_logging};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(level.as_level_filter().into())
            .from_env_lossy();
        installed = install(filter);
    });
    installed
}

/// Install a global subscriber configured purely from `RUST_LOG`, falling
/// back to `info`. Returns `false` as [`init_logging`] does.
pub fn init_logging_from_env() -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()
        });
        installed = install(filter);
    });
    installed
}

fn install(filter: EnvFilter) -> bool {
    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .try_init();
    match result {
        Ok(()) => true,
        Err(error) => {
            tracing::debug!(%error, "global subscriber already installed, keeping it");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_subscriber_is_kept() {
        // Either this installs the host subscriber or one is already set.
        let _ = tracing_subscriber::registry().try_init();

        assert!(!init_logging(LogLevel::Debug));
        assert!(!init_logging_from_env());
    }

    #[test]
    fn parses_levels() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("OFF".parse::<LogLevel>().unwrap(), LogLevel::Silent);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn display_matches_filter_syntax() {
        assert_eq!(LogLevel::Info.to_string(), "info");
        assert_eq!(LogLevel::Silent.to_string(), "off");
    }

    #[test]
    fn verbosity_counts() {
        assert_eq!(LogLevel::from_verbosity(0, 0), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(1, 0), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(4, 0), LogLevel::Trace);
        assert_eq!(LogLevel::from_verbosity(0, 1), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(0, 9), LogLevel::Silent);
    }
}
