pub mod cli;
pub mod config;
pub mod provider;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, FeePayerArg, TransferCmd};
use config::{load_config, CliConfig};
use provider::KeypairFileProvider;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use solkit_connector::{
    connectors::{FeePayer, InjectedConnector, ProviderRegistry, TransferArgs},
    Client, Cluster, TransactionIntent,
};
use std::{str::FromStr, sync::Arc};

/// Parses arguments, loads configuration and logging, then runs one command.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(name) = &cli.cluster {
        config.connector.cluster =
            Cluster::by_name(name).ok_or_else(|| anyhow!("Unknown cluster '{name}'"))?;
    }
    solkit_logger::init(&config.cli.log)?;
    tracing::debug!("Configuration loaded: {:#?}", &config);

    let client = build_client(&config)?;
    execute(&client, cli.command).await
}

/// Builds a client whose only wallet is the configured keypair file.
pub fn build_client(config: &CliConfig) -> Result<Client> {
    let registry = Arc::new(ProviderRegistry::new());
    if let Some(path) = &config.cli.keypair_path {
        let provider = KeypairFileProvider::load(path)?;
        registry.register_provider(KeypairFileProvider::NAME, Arc::new(provider));
    }
    let wallet = InjectedConnector::new(KeypairFileProvider::NAME, registry);
    Ok(Client::new(&config.connector, vec![wallet.into()])?)
}

fn unavailable() -> anyhow::Error {
    anyhow!(
        "Wallet '{}' is unavailable, set cli.keypair-path",
        InjectedConnector::connector_name(KeypairFileProvider::NAME)
    )
}

fn parse_address(raw: &str) -> Result<Pubkey> {
    Pubkey::from_str(raw).with_context(|| format!("Invalid address '{raw}'"))
}

pub async fn execute(client: &Client, command: Commands) -> Result<()> {
    let connected = client
        .connect()
        .await
        .context("Failed to connect the wallet")?;
    if let Some(address) = connected {
        tracing::info!(cluster = %client.network().name, "Wallet {} connected", address);
    }

    match command {
        Commands::Address => {
            println!("{}", connected.ok_or_else(unavailable)?);
        }
        Commands::Balance { address } => {
            let address = address.as_deref().map(parse_address).transpose()?;
            let lamports = client.get_balance(address).await?.ok_or_else(unavailable)?;
            println!("{lamports}");
        }
        Commands::Blockhash => {
            println!("{}", client.cluster().get_latest_blockhash().await?);
        }
        Commands::Transfer(cmd) => transfer(client, cmd).await?,
        Commands::SignMessage { message } => {
            let signature = client.sign_message(&message).await?.ok_or_else(unavailable)?;
            println!("{signature}");
        }
        Commands::Watch { signature } => {
            let signature = Signature::from_str(&signature)
                .with_context(|| format!("Invalid signature '{signature}'"))?;
            watch(client, &signature).await?;
        }
        Commands::Name { address } => {
            let address = address.as_deref().map(parse_address).transpose()?;
            match client.fetch_name(address).await? {
                Some(name) => println!("{name}"),
                None => println!("(no name)"),
            }
        }
    }
    Ok(())
}

async fn transfer(client: &Client, cmd: TransferCmd) -> Result<()> {
    let intent = TransactionIntent::Transfer(TransferArgs {
        to: parse_address(&cmd.to)?,
        amount_in_lamports: cmd.lamports,
        fee_payer: match cmd.fee_payer {
            FeePayerArg::From => FeePayer::From,
            FeePayerArg::To => FeePayer::To,
        },
    });

    if cmd.dry_run {
        let encoded = client.sign_transaction(&intent).await?.ok_or_else(unavailable)?;
        println!("{encoded}");
        return Ok(());
    }
    let signature = client
        .sign_and_send_transaction(&intent)
        .await?
        .ok_or_else(unavailable)?;
    println!("{signature}");
    Ok(())
}

async fn watch(client: &Client, signature: &Signature) -> Result<()> {
    let mut subscription = client
        .watch_transaction(signature)
        .await?
        .ok_or_else(unavailable)?;

    tokio::select! {
        notification = subscription.next() => match notification {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("Subscription closed before {} was confirmed", signature),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, stopping watch");
        }
    }
    subscription.unsubscribe().await?;
    Ok(())
}
