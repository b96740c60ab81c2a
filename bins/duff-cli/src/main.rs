//! duff-cli — Offline command-line front end for the Duff wallet engine.
//!
//! Manages an encrypted wallet file and its persisted storage state in a
//! data directory. Balances and history reflect the last synced state;
//! payments are built and signed locally and printed as raw hex.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use duff_core::amount::duffs_to_dash;
use duff_core::types::{ChainType, Network};
use duff_storage::{FileAdapter, PersistenceAdapter, StorageHandle};
use duff_wallet::{
    Account, AccountOptions, CoinSelectionStrategy, CreateTransactionOptions, Wallet,
    WalletSecret, WordCount,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::CliConfig;

/// Duff command-line wallet.
#[derive(Parser)]
#[command(name = "duff-cli")]
#[command(version, about = "Non-custodial HD wallet for Dash-style chains.")]
struct Cli {
    /// Config file (default: ~/.duff/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the wallet and its state.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Network for new wallets (mainnet, testnet or regtest).
    #[arg(long, global = true)]
    network: Option<Network>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet management subcommands.
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Account management subcommands.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Show an unused address.
    Address(AddressArgs),
    /// Show account balances from the last synced state.
    Balance(AccountArg),
    /// Show account transaction history.
    History(HistoryArgs),
    /// Build and sign a payment without broadcasting it.
    Pay(PayArgs),
    /// Write the account cache as JSON.
    ExportCache(ExportArgs),
}

#[derive(Subcommand)]
enum WalletAction {
    /// Create a wallet from a fresh mnemonic.
    Create(CreateArgs),
    /// Restore a wallet from a mnemonic, extended key or single key.
    Restore(RestoreArgs),
    /// Show wallet id, network and type.
    Info,
}

#[derive(Subcommand)]
enum AccountAction {
    /// Add the next free account.
    New(NewAccountArgs),
    /// List accounts.
    List,
}

#[derive(Args)]
struct CreateArgs {
    /// Mnemonic length (12 or 24).
    #[arg(long, default_value_t = 24)]
    words: usize,
}

#[derive(Args)]
struct RestoreArgs {
    /// Account-level extended public key; creates a watch-only wallet.
    #[arg(long, conflicts_with_all = ["xprv", "key"])]
    xpub: Option<String>,

    /// Account index the extended public key was exported at.
    #[arg(long, default_value_t = 0, requires = "xpub")]
    account_index: u32,

    /// Root extended private key.
    #[arg(long, conflicts_with = "key")]
    xprv: Option<String>,

    /// Single private key (WIF or hex).
    #[arg(long)]
    key: Option<String>,
}

#[derive(Args)]
struct NewAccountArgs {
    /// Human-readable account label.
    #[arg(long)]
    label: Option<String>,
}

#[derive(Args)]
struct AccountArg {
    /// Account index.
    #[arg(short, long, default_value_t = 0)]
    account: u32,
}

#[derive(Args)]
struct AddressArgs {
    #[command(flatten)]
    account: AccountArg,

    /// Use the internal (change) chain.
    #[arg(long)]
    change: bool,

    /// Skip this many unused addresses.
    #[arg(long, default_value_t = 0)]
    skip: usize,
}

#[derive(Args)]
struct HistoryArgs {
    #[command(flatten)]
    account: AccountArg,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PayArgs {
    #[command(flatten)]
    account: AccountArg,

    /// Recipient address.
    #[arg(long)]
    to: String,

    /// Amount in whole coins.
    #[arg(long)]
    amount: f64,

    /// Take the fee out of the payment.
    #[arg(long)]
    deduct_fee: bool,

    /// Pay the instant-send fee.
    #[arg(long)]
    instant: bool,

    /// Coin selection strategy (descending, ascending or transaction-optimized).
    #[arg(long)]
    strategy: Option<CoinSelectionStrategy>,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    account: AccountArg,

    /// Output file (default: stdout).
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = CliConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }
    if let Some(network) = cli.network {
        cfg.network = network;
    }
    init_logging(&cfg);

    match cli.command {
        Commands::Wallet { action } => match action {
            WalletAction::Create(args) => wallet_create(&cfg, args).await,
            WalletAction::Restore(args) => wallet_restore(&cfg, args).await,
            WalletAction::Info => wallet_info(&cfg).await,
        },
        Commands::Account { action } => match action {
            AccountAction::New(args) => account_new(&cfg, args).await,
            AccountAction::List => account_list(&cfg).await,
        },
        Commands::Address(args) => address(&cfg, args).await,
        Commands::Balance(args) => balance(&cfg, args).await,
        Commands::History(args) => history(&cfg, args).await,
        Commands::Pay(args) => pay(&cfg, args).await,
        Commands::ExportCache(args) => export_cache(&cfg, args).await,
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(cfg: &CliConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cfg.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Create a new wallet with a random mnemonic.
async fn wallet_create(cfg: &CliConfig, args: CreateArgs) -> Result<()> {
    let words = match args.words {
        12 => WordCount::Twelve,
        24 => WordCount::TwentyFour,
        n => bail!("Unsupported mnemonic length {n} (must be 12 or 24)"),
    };
    let wallet_path = cfg.wallet_path();
    if wallet_path.exists() {
        bail!("Wallet file already exists: {}", wallet_path.display());
    }
    let password = prompt_new_password()?;

    let wallet = Wallet::generate(words, cfg.wallet_config())
        .context("Failed to create wallet")?
        .with_storage(open_storage(cfg).await?);
    let phrase = wallet
        .export_mnemonic()
        .context("Generated wallet has no mnemonic")?;
    save_new_wallet(cfg, &wallet, &password).await?;

    println!("\n=== WALLET CREATED ===");
    println!("Wallet id: {}", wallet.id());
    println!("Network:   {}", wallet.network());
    println!("\nRECOVERY PHRASE (BACK THIS UP):");
    println!("  {}", phrase.as_str());
    println!("\nWARNING: This phrase will NOT be shown again.");
    println!("Anyone with this phrase can spend your funds.");
    println!("\nWallet saved to: {}", wallet_path.display());
    Ok(())
}

/// Restore a wallet from existing key material.
async fn wallet_restore(cfg: &CliConfig, args: RestoreArgs) -> Result<()> {
    let wallet_path = cfg.wallet_path();
    if wallet_path.exists() {
        bail!("Wallet file already exists: {}", wallet_path.display());
    }

    let secret = if let Some(key) = args.xpub {
        WalletSecret::ExtendedPublicKey {
            key,
            account_index: args.account_index,
        }
    } else if let Some(key) = args.xprv {
        WalletSecret::ExtendedPrivateKey { key }
    } else if let Some(key) = args.key {
        WalletSecret::PrivateKey { key }
    } else {
        let phrase = prompt_password("Enter recovery phrase")?;
        let passphrase = prompt_password("Enter BIP-39 passphrase (empty for none)")?;
        WalletSecret::Mnemonic { phrase, passphrase }
    };

    let password = prompt_new_password()?;
    let wallet = Wallet::new(secret, cfg.wallet_config())
        .context("Failed to restore wallet")?
        .with_storage(open_storage(cfg).await?);
    save_new_wallet(cfg, &wallet, &password).await?;

    println!("\n=== WALLET RESTORED ===");
    println!("Wallet id: {}", wallet.id());
    println!("Network:   {}", wallet.network());
    println!("Type:      {:?}", wallet.wallet_type());
    println!("Wallet saved to: {}", wallet_path.display());
    Ok(())
}

/// Display wallet metadata.
async fn wallet_info(cfg: &CliConfig) -> Result<()> {
    let (wallet, _) = open_wallet(cfg).await?;
    println!("Wallet id: {}", wallet.id());
    println!("Network:   {}", wallet.network());
    println!("Type:      {:?}", wallet.wallet_type());
    println!("Accounts:  {}", wallet.accounts().len());
    println!("Data dir:  {}", cfg.data_dir.display());
    Ok(())
}

/// Add an account and remember it in the wallet file.
async fn account_new(cfg: &CliConfig, args: NewAccountArgs) -> Result<()> {
    let (wallet, password) = open_wallet(cfg).await?;
    let mut options = AccountOptions::default();
    options.label = args.label;
    let account = wallet.create_account(options).context("Failed to create account")?;
    wallet
        .save_to_file(&cfg.wallet_path(), password.as_bytes())
        .context("Failed to save wallet")?;
    persist(&wallet).await?;

    println!("Account {} created ({})", account.index(), account.path());
    Ok(())
}

/// List every account with its confirmed balance.
async fn account_list(cfg: &CliConfig) -> Result<()> {
    let (wallet, _) = open_wallet(cfg).await?;
    println!("{:<6} {:<16} {:<20} {:>16}", "INDEX", "LABEL", "PATH", "CONFIRMED");
    for account in wallet.accounts() {
        println!(
            "{:<6} {:<16} {:<20} {:>16.8}",
            account.index(),
            account.label().unwrap_or("-"),
            account.path(),
            duffs_to_dash(account.get_confirmed_balance()?),
        );
    }
    Ok(())
}

/// Print an unused address and persist any newly derived ones.
async fn address(cfg: &CliConfig, args: AddressArgs) -> Result<()> {
    let (wallet, _) = open_wallet(cfg).await?;
    let account = account(&wallet, args.account.account)?;
    let chain = if args.change {
        ChainType::Internal
    } else {
        ChainType::External
    };
    let info = account
        .get_unused_address(chain, args.skip)
        .context("Failed to derive address")?;
    persist(&wallet).await?;

    println!("{}", info.address);
    info!(path = %info.path, "address issued");
    Ok(())
}

/// Display confirmed, unconfirmed and total balance.
async fn balance(cfg: &CliConfig, args: AccountArg) -> Result<()> {
    let (wallet, _) = open_wallet(cfg).await?;
    let account = account(&wallet, args.account)?;
    let confirmed = account.get_confirmed_balance()?;
    let unconfirmed = account.get_unconfirmed_balance()?;
    let utxos = account.get_utxos()?;

    println!("=== ACCOUNT {} BALANCE ===", account.index());
    println!("Confirmed:   {:.8} ({confirmed} duffs)", duffs_to_dash(confirmed));
    println!("Unconfirmed: {:.8} ({unconfirmed} duffs)", duffs_to_dash(unconfirmed));
    println!("Total:       {:.8}", duffs_to_dash(confirmed + unconfirmed));
    println!("Spendable UTXOs: {}", utxos.len());
    Ok(())
}

/// Display classified history, newest first.
async fn history(cfg: &CliConfig, args: HistoryArgs) -> Result<()> {
    let (wallet, _) = open_wallet(cfg).await?;
    let account = account(&wallet, args.account.account)?;
    let entries = account.get_transaction_history()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No transactions.");
        return Ok(());
    }
    for entry in entries {
        let status = if entry.block_hash.is_some() { "confirmed" } else { "pending" };
        println!(
            "{}  {:<16} {:>+18} duffs  fee {:>8}  {status}",
            entry.tx_id,
            format!("{:?}", entry.kind),
            entry.satoshis_balance_impact,
            entry.fee_impact,
        );
    }
    Ok(())
}

/// Build and sign a payment, then print it for broadcast elsewhere.
async fn pay(cfg: &CliConfig, args: PayArgs) -> Result<()> {
    let (wallet, _) = open_wallet(cfg).await?;
    let account = account(&wallet, args.account.account)?;

    let mut opts = CreateTransactionOptions {
        recipient: Some(args.to),
        amount: Some(args.amount),
        strategy: args.strategy,
        ..CreateTransactionOptions::default()
    };
    if args.deduct_fee {
        opts = opts.deduct_fee();
    }
    if args.instant {
        opts = opts.instant_send();
    }
    let signed = account
        .create_transaction(opts)
        .context("Failed to create transaction")?;

    println!("=== TRANSACTION SIGNED ===");
    println!("Txid:   {}", signed.txid);
    println!("Inputs: {}", signed.inputs.len());
    for output in &signed.outputs {
        println!("  -> {} {:.8}", output.address, duffs_to_dash(output.satoshis));
    }
    if let Some(change) = &signed.change {
        println!("  change {} {:.8}", change.address, duffs_to_dash(change.satoshis));
    }
    println!("Fee:    {} duffs ({})", signed.fee, signed.fee_category);
    println!("\n{}", signed.raw_hex);
    Ok(())
}

/// Write the shape-stable account cache.
async fn export_cache(cfg: &CliConfig, args: ExportArgs) -> Result<()> {
    let (wallet, _) = open_wallet(cfg).await?;
    let account = account(&wallet, args.account.account)?;
    let json = serde_json::to_string_pretty(&account.export_cache()?)?;
    match args.out {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Cache written to: {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Load the wallet file and its persisted state, then recreate its accounts.
async fn open_wallet(cfg: &CliConfig) -> Result<(Wallet, String)> {
    let wallet_path = cfg.wallet_path();
    if !wallet_path.exists() {
        bail!(
            "No wallet at {} (run `duff-cli wallet create` first)",
            wallet_path.display()
        );
    }
    let password = prompt_password("Wallet password")?;
    let storage = open_storage(cfg).await?;
    let wallet = Wallet::load_from_file(&wallet_path, password.as_bytes())
        .context("Failed to load wallet (check password)")?
        .with_storage(storage);
    wallet.restore_accounts().context("Failed to restore accounts")?;
    if wallet.accounts().is_empty() {
        wallet.create_account(AccountOptions::default())?;
    }
    Ok((wallet, password))
}

async fn open_storage(cfg: &CliConfig) -> Result<StorageHandle> {
    let adapter: Arc<dyn PersistenceAdapter> = Arc::new(FileAdapter::new(cfg.state_path()));
    StorageHandle::rehydrate(adapter)
        .await
        .with_context(|| format!("Failed to load state from {}", cfg.state_path().display()))
}

/// Save a fresh wallet with its first account.
async fn save_new_wallet(cfg: &CliConfig, wallet: &Wallet, password: &str) -> Result<()> {
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("Failed to create directory: {}", cfg.data_dir.display()))?;
    wallet
        .create_account(AccountOptions::default())
        .context("Failed to create first account")?;
    wallet
        .save_to_file(&cfg.wallet_path(), password.as_bytes())
        .context("Failed to save wallet")?;
    persist(wallet).await
}

fn account(wallet: &Wallet, index: u32) -> Result<Arc<Account>> {
    wallet
        .get_account(index)
        .with_context(|| format!("Account {index} does not exist (see `duff-cli account list`)"))
}

/// Save the storage state back to the data directory.
async fn persist(wallet: &Wallet) -> Result<()> {
    wallet
        .storage()
        .save_state()
        .await
        .context("Failed to save wallet state")?;
    Ok(())
}

/// Prompt for a password without echo.
fn prompt_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(format!("{prompt}: ")).context("Failed to read password")
}

/// Prompt for a new password twice.
fn prompt_new_password() -> Result<String> {
    let password = prompt_password("Enter wallet password")?;
    let confirm = prompt_password("Confirm password")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}
