use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging arguments shared by binaries embedding the engine.
#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// The log verbosity. Overridden by RUST_LOG, if set.
    #[clap(long = "log.level", value_enum, default_value = "info", global = true)]
    pub level: LogLevel,
    /// The format of emitted logs. Defaults to text.
    #[clap(long = "log.format", value_enum, global = true)]
    pub format: Option<LogFormat>,
}

/// Install a global tracing subscriber which writes to stderr.
/// Installing twice is harmless: later calls have no effect.
pub fn init_logging(args: &LogArgs) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.level.as_filter()));

    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter);

    let result = match args.format.unwrap_or(LogFormat::Text) {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(false)
            .try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if result.is_err() {
        tracing::debug!("a global tracing subscriber was already installed");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Args {
        #[clap(flatten)]
        log_args: LogArgs,
    }

    #[test]
    fn test_log_args() {
        let args = Args::parse_from(["etl", "--log.level", "debug", "--log.format", "json"]);
        assert_eq!(args.log_args.level, LogLevel::Debug);
        assert_eq!(args.log_args.format, Some(LogFormat::Json));

        let args = Args::parse_from(["etl"]);
        assert_eq!(args.log_args.level, LogLevel::Info);
        assert_eq!(args.log_args.format, None);
    }
}
