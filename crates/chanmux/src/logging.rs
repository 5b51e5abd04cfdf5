use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Environment override for the log level, checked ahead of the CLI flag.
const LEVEL_ENV: &str = "CHANMUX_LOG";

/// Log output shape on stderr.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

fn env_level() -> Option<LogLevel> {
    let raw = std::env::var(LEVEL_ENV).ok()?;
    match <LogLevel as ValueEnum>::from_str(raw.trim(), true) {
        Ok(level) => Some(level),
        Err(_) => {
            eprintln!("ignoring {LEVEL_ENV}={raw}: unknown level");
            None
        }
    }
}

/// Install the global subscriber. `CHANMUX_LOG` overrides `level`. Module
/// targets only show up at debug and trace, where they are worth the noise.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let level = env_level().unwrap_or(level);
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::from(level))
        .with_ansi(false)
        .with_target(matches!(level, LogLevel::Debug | LogLevel::Trace));

    // try_init: a subscriber may already be installed.
    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
