use alloy_primitives::{
    Address,
    utils::parse_ether,
};
use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::{
    path::Path,
    time::Duration,
};
use tracing::{
    info,
    warn,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use umi_mines::{
    config::{
        self,
        AppConfig,
        DeploymentRecord,
        NetworkTarget,
    },
    engine::GameEngine,
    rpc::JsonRpcTransport,
};

mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "umi-mines",
    about = "Play Umi Mines against the on-chain contract",
    version,
    group(ArgGroup::new("network").args(["devnet", "local"]))
)]
struct Args {
    /// Connect to Umi devnet (the default)
    #[arg(long)]
    devnet: bool,

    /// Connect to a local node
    #[arg(long)]
    local: bool,

    /// Override the RPC URL for the selected network
    #[arg(long)]
    rpc_url: Option<String>,

    /// Mines contract address
    #[arg(long, conflicts_with = "deployment")]
    contract: Option<Address>,

    /// Deployment record JSON to take the contract address from
    #[arg(long)]
    deployment: Option<String>,

    /// Milliseconds between receipt polls
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Milliseconds to wait after a confirmed start before reading the game back
    #[arg(long, default_value_t = 1000)]
    settle_delay_ms: u64,

    /// Write daily rolling logs here instead of stderr
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show balances and the current game
    Status,
    /// Start a new game
    Start {
        /// Number of mines, 1 to 24
        #[arg(long)]
        mines: u8,
        /// Bet in ETH, e.g. 0.1
        #[arg(long)]
        bet: String,
    },
    /// Reveal one tile, 0 to 24
    Reveal { tile: u8 },
    /// Cash out the current game
    CashOut,
}

fn app_config(args: &Args) -> Result<AppConfig> {
    let network = if args.local {
        NetworkTarget::local(args.rpc_url.clone())
    } else {
        NetworkTarget::devnet(args.rpc_url.clone())
    };
    let mut config = AppConfig::new(network);
    if let Some(path) = args.deployment.as_deref() {
        let record = DeploymentRecord::load(config::resolve_path(path))
            .wrap_err("loading deployment record")?;
        config = config.with_deployment(&record);
    }
    if let Some(contract) = args.contract {
        config.contract = contract;
    }
    config.receipt_poll_interval = Duration::from_millis(args.poll_interval_ms);
    config.settle_delay = Duration::from_millis(args.settle_delay_ms);
    config.log_dir = args.log_dir.as_deref().map(config::resolve_path);
    Ok(config)
}

fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = rolling::daily(dir, "umi-mines.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| eyre!("failed to install tracing subscriber: {e}"))?;
            Ok(Some(guard))
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .try_init()
                .map_err(|e| eyre!("failed to install tracing subscriber: {e}"))?;
            Ok(None)
        }
    }
}

async fn run(args: Args, config: AppConfig) -> Result<()> {
    let transport = JsonRpcTransport::new(config.network.url(), config.receipt_poll_interval)?;
    match transport.chain_id().await {
        Ok(chain_id) if !config.network.accepts_chain_id(chain_id) => warn!(
            chain_id,
            expected = ?config.network.chain_id(),
            "node reports an unexpected chain id"
        ),
        Ok(chain_id) => info!(chain_id, "connected to node"),
        Err(e) => warn!(error = %e, "could not read chain id"),
    }
    let engine = GameEngine::from_config(transport, &config);
    info!(network = %config.network, contract = %config.contract, "starting umi-mines client");

    if engine.restore_connection().await.ok().flatten().is_none() {
        engine
            .connect_wallet()
            .await
            .wrap_err("Failed to connect wallet")?;
    }

    let outcome = match args.command {
        Command::Status => engine.refresh().await,
        Command::Start { mines, bet } => {
            let bet_amount_wei = parse_ether(&bet)
                .map_err(|e| eyre!("Invalid bet amount {bet:?}: {e}"))?;
            engine.start_game(mines, bet_amount_wei).await
        }
        Command::Reveal { tile } => engine.reveal_tile(tile).await,
        Command::CashOut => engine.cash_out().await,
    };
    print!("{}", ui::draw(&engine.view(), &config.network.to_string()));
    outcome.wrap_err("Action failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config = app_config(&args)?;
    let _guard = init_tracing(config.log_dir.as_deref())?;
    run(args, config).await
}
