use std::io::Write;

use alerterator::{
    cli::{self, AlertmanagerConfigOptions, ClusterArguments, Command, Opts, RenderArguments},
    crd::Alert,
    logging::{self, LOG_ENV},
    reconciler::{self, Reconciler},
    store::{ConfigMapStore, MemoryStore},
};
use alerterator_shared::crd;
use clap::Parser;
use snafu::{ResultExt, Snafu};
use tracing::info;

const APP_NAME: &str = "alerterator";

const RENDER_CURRENT: &str = "current";
const RENDER_TEMPLATE: &str = "template";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to print the Alert CRD"))]
    PrintCrd { source: crd::Error },

    #[snafu(display("failed to read input"))]
    ReadInput { source: cli::Error },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("reconciliation failed ({})", source.reason()), context(false))]
    Reconcile { source: reconciler::Error },

    #[snafu(display("failed to write the rendered configuration to stdout"))]
    WriteToStdout { source: std::io::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.command {
        Command::Crd => {
            crd::write_manifest::<Alert>(std::io::stdout().lock()).context(PrintCrdSnafu)
        }
        Command::Apply(arguments) => {
            logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;
            let (reconciler, alert) = cluster_reconciler(arguments).await?;

            let outcome = reconciler.add_or_update(&alert).await?;
            info!(%outcome, "applied alert");
            Ok(())
        }
        Command::Delete(arguments) => {
            logging::initialize_logging(LOG_ENV, APP_NAME).context(InitializeLoggingSnafu)?;
            let (reconciler, alert) = cluster_reconciler(arguments).await?;

            let outcome = reconciler.delete(&alert).await?;
            info!(%outcome, "deleted alert");
            Ok(())
        }
        Command::Render(arguments) => render(&arguments).await,
    }
}

async fn cluster_reconciler(
    arguments: ClusterArguments,
) -> Result<(Reconciler<ConfigMapStore>, Alert), Error> {
    let alert = cli::read_alert(&arguments.alert).context(ReadInputSnafu)?;

    let AlertmanagerConfigOptions {
        namespace,
        config_map,
        template_config_map,
        config_key,
    } = arguments.config;
    let client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;
    let store = ConfigMapStore::new(client, &namespace, config_key);

    Ok((
        Reconciler::new(store, config_map, template_config_map),
        alert,
    ))
}

// No logging, stdout carries the rendered document
async fn render(arguments: &RenderArguments) -> Result<(), Error> {
    let alert = cli::read_alert(&arguments.alert).context(ReadInputSnafu)?;
    let current = cli::read_input(&arguments.current).context(ReadInputSnafu)?;

    let mut store = MemoryStore::new().with_document(RENDER_CURRENT, current.clone());
    if let Some(template) = &arguments.template {
        let template = cli::read_input(template).context(ReadInputSnafu)?;
        store = store.with_document(RENDER_TEMPLATE, template);
    }
    let reconciler = Reconciler::new(store, RENDER_CURRENT, RENDER_TEMPLATE);

    if arguments.delete {
        reconciler.delete(&alert).await?;
    } else {
        reconciler.add_or_update(&alert).await?;
    }

    let rendered = reconciler
        .store()
        .document(reconciler.config_name())
        .unwrap_or(current);
    std::io::stdout()
        .write_all(rendered.as_bytes())
        .context(WriteToStdoutSnafu)
}
