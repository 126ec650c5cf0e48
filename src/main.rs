use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use lpledger::datasource::{
    CachedPriceSource, IndexerEventSource, LoggingAggregator, RpcChainClient,
};
use lpledger::orchestration::LedgerSyncDeps;
use lpledger::{
    config::Config, db::init_db, export::write_ledger_csv, LedgerSync, PositionReconciler,
    Repository, SyncMode,
};
use std::sync::Arc;
use std::time::Duration;

/// Concentrated-liquidity position ledger.
#[derive(Debug, Parser)]
#[command(name = "lpledger", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Refresh every tracked position on an interval (default).
    Run,
    /// Sync one position's ledger and print the result.
    Sync {
        position_id: i64,
        /// Rebuild from the deployment block instead of the finality window.
        #[arg(long)]
        full: bool,
    },
    /// Print a position's ledger as CSV.
    Export { position_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let command = Cli::parse().command.unwrap_or(Command::Run);

    let config = Config::from_env().context("configuration error")?;
    let pool = init_db(&config.database_path)
        .await
        .context("failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    if let Command::Export { position_id } = command {
        let events = repo.query_ledger_events(position_id).await?;
        write_ledger_csv(&events, std::io::stdout().lock())?;
        return Ok(());
    }

    let chain = Arc::new(RpcChainClient::new(config.chain_endpoints()));
    let sync = Arc::new(LedgerSync::new(LedgerSyncDeps {
        repo: repo.clone(),
        events: Arc::new(IndexerEventSource::new(config.indexer_api_url.clone())),
        prices: CachedPriceSource::with_capacity(
            chain.clone(),
            config.price_fallback,
            config.price_cache_capacity,
        ),
        finality: chain.clone(),
        aggregator: Arc::new(LoggingAggregator),
        deployment_blocks: config.deployment_blocks(),
    }));

    match command {
        Command::Sync { position_id, full } => {
            let mode = if full { SyncMode::Full } else { SyncMode::Incremental };
            let result = sync.sync_position(position_id, mode).await?;
            println!("{:?}", result);
            Ok(())
        }
        _ => {
            let reconciler = PositionReconciler::new(sync, chain);
            run_refresh_loop(&repo, &reconciler, &config).await
        }
    }
}

/// Refresh every stored position each interval, `sync_concurrency` at a time.
async fn run_refresh_loop(
    repo: &Repository,
    reconciler: &PositionReconciler,
    config: &Config,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(config.sync_interval_secs));
    tracing::info!(
        interval_secs = config.sync_interval_secs,
        concurrency = config.sync_concurrency,
        "starting position refresh loop"
    );

    loop {
        interval.tick().await;

        let positions = match repo.list_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "failed to list positions");
                continue;
            }
        };

        let outcomes: Vec<_> = stream::iter(positions.into_iter().map(|p| p.id))
            .map(|position_id| async move { (position_id, reconciler.refresh(position_id).await) })
            .buffer_unordered(config.sync_concurrency)
            .collect()
            .await;

        let mut failed = 0usize;
        for (position_id, outcome) in &outcomes {
            match outcome {
                Ok(o) => tracing::debug!(
                    position_id,
                    resynced = o.resync.is_some(),
                    closed = o.is_closed,
                    "position refreshed"
                ),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(position_id, error = %e, "position refresh failed");
                }
            }
        }
        tracing::info!(positions = outcomes.len(), failed, "refresh round complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Command>, clap::Error> {
        Cli::try_parse_from(std::iter::once("lpledger").chain(args.iter().copied()))
            .map(|cli| cli.command)
    }

    #[test]
    fn test_cli_commands() {
        assert_eq!(parse(&[]).unwrap(), None);
        assert_eq!(parse(&["run"]).unwrap(), Some(Command::Run));
        assert_eq!(
            parse(&["sync", "5", "--full"]).unwrap(),
            Some(Command::Sync { position_id: 5, full: true })
        );
        assert_eq!(
            parse(&["sync", "5"]).unwrap(),
            Some(Command::Sync { position_id: 5, full: false })
        );
        assert_eq!(
            parse(&["export", "9"]).unwrap(),
            Some(Command::Export { position_id: 9 })
        );
    }

    #[test]
    fn test_cli_rejects_bad_input() {
        assert!(parse(&["sync"]).is_err());
        assert!(parse(&["sync", "x"]).is_err());
        assert!(parse(&["sync", "5", "--fulll"]).is_err());
        assert!(parse(&["serve"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
