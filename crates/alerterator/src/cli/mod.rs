//! Command line interface of the `alerterator` binary.
//!
//! ```no_run
//! use alerterator::cli::{Command, Opts};
//! use clap::Parser;
//!
//! let opts = Opts::parse_from(["alerterator", "apply", "--alert", "alert.yaml"]);
//! assert!(matches!(opts.command, Command::Apply(_)));
//! ```

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Snafu};

use crate::crd::Alert;

pub const DEFAULT_NAMESPACE: &str = "nais";
pub const DEFAULT_CONFIG_MAP: &str = "nais-prometheus-prometheus-alertmanager";
pub const DEFAULT_TEMPLATE_CONFIG_MAP: &str = "alertmanager-template-config";
pub const DEFAULT_CONFIG_KEY: &str = "alertmanager.yml";

/// Reads from stdin instead of a file.
pub const STDIN: &str = "-";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read {path:?}"))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to read from stdin"))]
    ReadStdin { source: std::io::Error },

    #[snafu(display("failed to parse Alert from {path:?}"))]
    ParseAlert {
        source: serde_yaml::Error,
        path: PathBuf,
    },
}

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "alerterator",
    author,
    version,
    about = "Reconciles Alert resources into the Alertmanager configuration"
)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the Alert CRD.
    Crd,

    /// Add an Alert to the live Alertmanager configuration, or update its entries.
    Apply(ClusterArguments),

    /// Remove all entries of an Alert from the live Alertmanager configuration.
    Delete(ClusterArguments),

    /// Reconcile an Alert against configuration files and print the resulting configuration.
    Render(RenderArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct ClusterArguments {
    /// Path to the Alert manifest, `-` reads it from stdin.
    #[arg(long, short = 'f', value_name = "FILE")]
    pub alert: PathBuf,

    #[command(flatten)]
    pub config: AlertmanagerConfigOptions,
}

/// Where the Alertmanager configuration documents are stored.
#[derive(Debug, PartialEq, Eq, Args)]
#[command(next_help_heading = "Alertmanager Options")]
pub struct AlertmanagerConfigOptions {
    /// The namespace of the Alertmanager ConfigMaps.
    #[arg(long, env = "ALERTMANAGER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// The ConfigMap holding the live configuration.
    #[arg(long, env = "ALERTERATOR_CONFIG_MAP", default_value = DEFAULT_CONFIG_MAP)]
    pub config_map: String,

    /// The ConfigMap holding the template every configuration is built from.
    #[arg(
        long,
        env = "ALERTERATOR_TEMPLATE_CONFIG_MAP",
        default_value = DEFAULT_TEMPLATE_CONFIG_MAP
    )]
    pub template_config_map: String,

    /// The key of both ConfigMaps holding the configuration document.
    #[arg(long, env = "ALERTERATOR_CONFIG_KEY", default_value = DEFAULT_CONFIG_KEY)]
    pub config_key: String,
}

#[derive(Debug, PartialEq, Eq, Args)]
pub struct RenderArguments {
    /// Path to the Alert manifest, `-` reads it from stdin.
    #[arg(long, short = 'f', value_name = "FILE")]
    pub alert: PathBuf,

    /// Path to the live configuration document.
    #[arg(long, value_name = "FILE")]
    pub current: PathBuf,

    /// Path to the template configuration document.
    #[arg(long, value_name = "FILE", required_unless_present = "delete")]
    pub template: Option<PathBuf>,

    /// Render the configuration with the Alert deleted.
    #[arg(long)]
    pub delete: bool,
}

/// Reads the file at `path`, or stdin if `path` is [`STDIN`].
pub fn read_input(path: &Path) -> Result<String, Error> {
    if path == Path::new(STDIN) {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context(ReadStdinSnafu)?;
        return Ok(input);
    }

    std::fs::read_to_string(path).context(ReadFileSnafu { path })
}

/// Reads and parses the Alert manifest at `path`.
pub fn read_alert(path: &Path) -> Result<Alert, Error> {
    let raw = read_input(path)?;
    serde_yaml::from_str(&raw).context(ParseAlertSnafu { path })
}
