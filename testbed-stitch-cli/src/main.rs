use std::future::Future;
use anyhow::{anyhow, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing::level_filters::LevelFilter;
use testbed_stitch_lib::orchestration::orchestrator::run_workflow;
use testbed_stitch_lib::platforms::chameleon::ChameleonClient;
use testbed_stitch_lib::platforms::fabric::FabricClient;
use testbed_stitch_schemas::cli_models::Opts;
use testbed_stitch_schemas::settings::StitchConfig;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    std::process::exit(match run_app().await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            err.chain().skip(1).for_each(|cause| tracing::error!("because: {}", cause));
            1
        }
    });
}

fn log_level(s: &str) -> anyhow::Result<LevelFilter> {
    match s.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::ERROR),
        "warn" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        _ => Err(anyhow!("Unknown Log LevelFilter {}", s)),
    }
}

/// The first interrupt cancels the run so that teardown can clean up, a second one gives up on
/// teardown and returns the exit status to leave with.
async fn watch_interrupts<S, Fut>(mut signal: S, cancel: CancellationToken) -> Option<i32>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    signal().await.ok()?;
    tracing::warn!("interrupted, abandoning provisioning and tearing down");
    cancel.cancel();
    signal().await.ok()?;
    tracing::error!("interrupted again, exiting without finishing teardown");
    Some(130)
}

/// Parse the options, set up logging and run the workflow. The returned value is the process exit
/// status.
pub async fn run_app() -> anyhow::Result<i32> {
    let opts: Opts = Opts::parse();
    let mut e = None;
    let level = match &opts.verbosity {
        None => LevelFilter::INFO,
        Some(x) => match log_level(x) {
            Ok(l) => l,
            Err(err) => {
                e = Some(err);
                LevelFilter::INFO
            }
        },
    };

    let stdout_log = tracing_subscriber::fmt::layer();
    tracing_subscriber::registry()
        .with(stdout_log.with_filter(level))
        .init();
    if let Some(e) = e {
        tracing::warn!("{}", e);
    }

    let mut config = StitchConfig::load_or_default(&opts.config)
        .await
        .context("loading testbed-stitch config")?;
    if let Some(secs) = opts.poll_deadline_secs {
        config.polling.deadline_secs = Some(secs);
    }
    tracing::info!("config:\n{config}");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Some(code) = watch_interrupts(tokio::signal::ctrl_c, on_interrupt).await {
            std::process::exit(code);
        }
    });

    // without both platforms no lease is ever requested, so there is nothing to tear down
    let chameleon = ChameleonClient::connect(&config.chameleon)
        .await
        .context("connecting to Chameleon")?;
    let fabric = FabricClient::new(&config.fabric)
        .await
        .context("setting up the FABRIC client")?;

    let report = run_workflow(&config, &chameleon, &fabric, &cancel).await;
    Ok(report.exit_code())
}
