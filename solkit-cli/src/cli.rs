use clap::{Parser, Subcommand, ValueEnum};

/// Command-line wallet for Solana clusters.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file. Defaults are used without one.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Well-known cluster to use instead of the configured one
    /// (mainnet-beta, testnet, devnet, localnet).
    #[arg(long, global = true)]
    pub cluster: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the wallet address.
    Address,
    /// Print the balance in lamports of an address, or of the wallet.
    Balance { address: Option<String> },
    /// Print the latest blockhash of the cluster.
    Blockhash,
    /// Transfer lamports from the wallet.
    Transfer(TransferCmd),
    /// Sign a UTF-8 message with the wallet.
    SignMessage { message: String },
    /// Wait until a transaction signature reaches the configured commitment.
    Watch { signature: String },
    /// Resolve the .sol name of an address, or of the wallet.
    Name { address: Option<String> },
}

#[derive(Parser, Debug)]
pub struct TransferCmd {
    /// Recipient address.
    pub to: String,
    /// Amount in lamports.
    pub lamports: u64,
    /// Which party is charged the fee.
    #[arg(long, value_enum, default_value_t = FeePayerArg::From)]
    pub fee_payer: FeePayerArg,
    /// Sign the transaction and print it without sending.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeePayerArg {
    From,
    To,
}
