use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::Context;
use clap::{Parser, Subcommand};
use multisend_core::{chain::RpcPool, signer::LocalAccount};
use multisend_engine::{
    batch::{BatchConfig, BatchOrchestrator, DelayPolicy},
    cancel::{self, NonceSelection},
    fees::FeeEstimator,
    monitor::{SystemClock, TransactionMonitor},
    network::{HttpNetwork, Network},
    nonce::NonceLedger,
    notify::{NoopNotifier, Notifier, TelegramNotifier},
    rows,
    sender::{SenderConfig, TransferSender},
    store::FsStateStore,
};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;

#[derive(Parser)]
#[command(name = "multisend", about = "Bulk ERC-20 transfer submission engine")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "multisend.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit transfers to every recipient in a CSV list.
    Send {
        /// Token symbol from the configured token map, or a raw contract
        /// address.
        #[arg(long)]
        token: String,

        /// CSV file of `address,amount` rows.
        #[arg(long)]
        recipients: PathBuf,

        /// Start from row 0 even if a checkpoint exists.
        #[arg(long)]
        reset_checkpoint: bool,
    },

    /// Replace pending transactions so their nonces stop blocking the
    /// account.
    Cancel {
        /// Cancel one specific nonce instead of every pending one.
        #[arg(long)]
        nonce: Option<u64>,

        /// Index of the configured signing account to use.
        #[arg(long, default_value_t = 0)]
        account: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    let subscriber = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "multisend=info,multisend_engine=info,multisend_core=info".into()
        }),
    );
    match config.log_format {
        config::LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        config::LogFormat::Pretty => subscriber.with(tracing_subscriber::fmt::layer()).init(),
    }

    let pool = RpcPool::new(&config.rpc.endpoints)?;
    tracing::info!(endpoints = pool.len(), chain_id = config.rpc.chain_id, "RPC pool ready");

    let network = Arc::new(HttpNetwork::new(
        pool,
        config.rpc.chain_id,
        Duration::from_millis(config.rpc.confirmation_poll_ms),
    ));

    let accounts = config
        .account
        .private_keys
        .iter()
        .map(|key| LocalAccount::from_private_key(key))
        .collect::<Result<Vec<_>, _>>()?;

    let estimator = FeeEstimator::new(network.clone());

    match cli.command {
        Commands::Send {
            token,
            recipients,
            reset_checkpoint,
        } => {
            let account = Arc::new(accounts[0].clone());
            run_send(
                &config,
                network,
                estimator,
                account,
                &token,
                &recipients,
                reset_checkpoint,
            )
            .await
        }
        Commands::Cancel { nonce, account } => {
            let account = accounts
                .get(account)
                .with_context(|| format!("no account at index {account}"))?;

            let selection = match nonce {
                Some(n) => NonceSelection::Single(n),
                None => NonceSelection::All,
            };
            let summary =
                cancel::cancel_pending_nonces(&*network, &estimator, account, selection).await?;
            tracing::info!(
                cancelled = summary.cancelled.len(),
                failed = summary.failed.len(),
                "cancellation finished"
            );
            Ok(())
        }
    }
}

async fn run_send(
    config: &config::MultisendConfig,
    network: Arc<HttpNetwork>,
    estimator: FeeEstimator<HttpNetwork>,
    account: Arc<LocalAccount>,
    token: &str,
    recipients: &PathBuf,
    reset_checkpoint: bool,
) -> anyhow::Result<()> {
    use multisend_core::signer::AccountSigner;

    let (token_symbol, token_address) = resolve_token(config, token)?;
    let rows = rows::load_rows(recipients)?;
    anyhow::ensure!(!rows.is_empty(), "recipient list is empty");
    tracing::info!(
        rows = rows.len(),
        token = %token_symbol,
        contract = %token_address,
        "loaded recipient list"
    );

    match network.balance(account.address()).await {
        Ok(balance) => {
            tracing::info!(account = %account.address(), balance = %balance, "native balance")
        }
        Err(e) => tracing::warn!(error = %e, "balance check failed"),
    }

    match estimator.congestion().await {
        Ok(level) if level.is_congested() => tracing::warn!(
            level = level as u8,
            "network is congested, transfers will carry a fee uplift"
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "congestion check failed"),
    }

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some(telegram) => Arc::new(TelegramNotifier::new(
            telegram.bot_token.clone(),
            telegram.chat_id.clone(),
            Duration::from_secs(telegram.delay_secs),
            telegram.explorer_base_url.clone(),
        )),
        None => Arc::new(NoopNotifier),
    };

    let ledger = Arc::new(NonceLedger::new());
    let monitor = Arc::new(TransactionMonitor::new(
        network.clone(),
        estimator.clone(),
        Arc::new(SystemClock),
        Duration::from_secs(config.engine.stale_after_secs),
    ));

    let sender = Arc::new(TransferSender {
        network: network.clone(),
        account,
        ledger,
        monitor,
        estimator,
        notifier: notifier.clone(),
        config: SenderConfig::new(token_address, token_symbol.clone())
            .with_max_attempts(config.engine.max_attempts),
    });

    let store = Arc::new(FsStateStore::new(
        &config.report.checkpoint_path,
        &config.report.report_path,
    ));
    if reset_checkpoint {
        store.reset_checkpoint()?;
    }

    let delay = match config.delay.mode {
        config::DelayMode::None => DelayPolicy::None,
        config::DelayMode::Fixed => DelayPolicy::Fixed(Duration::from_secs_f64(
            config.delay.seconds,
        )),
        config::DelayMode::Random => DelayPolicy::Random {
            min: Duration::from_secs_f64(config.delay.min_seconds),
            max: Duration::from_secs_f64(config.delay.max_seconds),
        },
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::warn!("shutdown signal received, finishing current slice");
        shutdown_flag.store(true, Ordering::SeqCst);
    });

    let orchestrator = BatchOrchestrator::new(
        sender.clone(),
        store,
        BatchConfig::new(config.engine.batch_size).with_delay(delay),
        shutdown,
    );

    let summary = orchestrator.run(&rows).await?;
    tracing::info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        checkpoint = summary.checkpoint,
        interrupted = summary.interrupted,
        "batch finished"
    );

    if !summary.interrupted
        && let Ok(balance) = network.balance(sender.account.address()).await
    {
        tracing::info!(balance = %balance, "native balance after run");
    }

    notifier.notify(
        &format!(
            "Batch finished\nSucceeded: {}\nFailed: {}\nSkipped: {}",
            summary.succeeded, summary.failed, summary.skipped
        ),
        None,
    );

    Ok(())
}

fn resolve_token(
    config: &config::MultisendConfig,
    token: &str,
) -> anyhow::Result<(String, Address)> {
    if let Some(raw) = config.tokens.get(&token.to_uppercase()) {
        let address = raw
            .parse::<Address>()
            .with_context(|| format!("configured contract for {token} is invalid: {raw}"))?;
        return Ok((token.to_uppercase(), address));
    }

    let address = token.parse::<Address>().with_context(|| {
        format!("{token} is neither a configured token symbol nor a contract address")
    })?;
    Ok(("TOKEN".to_string(), address))
}
