use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use pocket_trello_sync::config;
use pocket_trello_sync::logging::{self, LogConfig};
use pocket_trello_sync::pocket::PocketClient;
use pocket_trello_sync::sync::{self, RunOutcome};
use pocket_trello_sync::title::TitleResolver;
use pocket_trello_sync::trello::TrelloClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Mirror newly saved Pocket items into a Trello list and archive them"
)]
struct Args {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory for the rolling log file
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = logging::init_logging(LogConfig {
        log_dir: args.log_dir.clone(),
        ..LogConfig::default()
    })?;

    if let Err(err) = run(&args).await {
        error!(?err, "run failed");
        return Err(err);
    }
    Ok(())
}

async fn run(args: &Args) -> Result<()> {
    let mut cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let settings = cfg.settings();

    let auth = &cfg.authentication;
    let pocket = PocketClient::new(
        auth.source_consumer_key.clone(),
        auth.source_access_token.clone(),
        settings.request_timeout(),
    )?;
    info!("logged in to pocket");
    let trello = TrelloClient::new(
        auth.destination_api_key.clone(),
        auth.destination_token.clone(),
        settings.request_timeout(),
    )?;
    info!("logged in to trello");
    let titles = TitleResolver::new(settings.title_timeout(), settings.title_max_bytes)?;

    let pass = sync::run_and_record(&mut cfg, &args.config, &pocket, &trello, &titles);
    let outcome = sync::with_deadline(settings.max_run(), pass).await?;

    match outcome {
        RunOutcome::NoItems => Ok(()),
        RunOutcome::Completed(report) if report.is_clean() => {
            info!(synced = report.synced, "done");
            Ok(())
        }
        RunOutcome::Completed(report) => {
            for failure in &report.failures {
                error!(
                    item_id = %failure.item_id,
                    url = %failure.url,
                    stage = %failure.stage,
                    error = %failure.error,
                    "item not synced"
                );
            }
            Err(anyhow!(
                "{} of {} unread items failed to sync",
                report.failures.len(),
                report.synced + report.failures.len()
            ))
        }
    }
}
