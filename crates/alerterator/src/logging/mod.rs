use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// The environment variable holding the log filter of the `alerterator` binary.
pub const LOG_ENV: &str = "ALERTERATOR_LOG";

const MAX_LOG_FILES: usize = 6;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to parse log filter from {env}"))]
    ParseFilter {
        source: tracing_subscriber::filter::FromEnvError,
        env: String,
    },

    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitRollingFileAppender {
        source: tracing_appender::rolling::InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install global tracing subscriber"))]
    InstallSubscriber {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Initializes `tracing` logging with the filter read from the environment variable `env`.
///
/// Without the variable, events up to INFO are logged. If `{env}_DIRECTORY` is set, all output is
/// additionally written to a daily rotated log file `<date>.{app_name}.log` in that directory.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(env)
        .from_env()
        .context(ParseFilterSnafu { env })?;

    let directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_layer = directory
        .as_deref()
        .map(|directory| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(MAX_LOG_FILES)
                .build(directory)
                .context(InitRollingFileAppenderSnafu { directory })
        })
        .transpose()?
        .map(|appender| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // Logging only works once the subscriber is installed
    match directory {
        Some(directory) => tracing::info!(directory = %directory.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, no log directory set"),
    }

    Ok(())
}
