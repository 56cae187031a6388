//! Developer CLI for `HumanKit`.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use alloy_primitives::Address;
use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use humankit_core::{
    contracts, CredentialAcquisition, Environment, FieldValue, HttpRpcProvider, Identity,
    IdentityKey, KycProvider, OracleClient, PipelineConfig, ProofGenerator, StatesDetails,
    SupportedChain,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "humankit")]
#[command(about = "Identity keys, claim offers, state data and on-chain proof status", long_about = None)]
struct Cli {
    /// Environment whose default services are used.
    #[arg(long, env = "HUMANKIT_ENV", default_value = "staging")]
    env: Environment,

    /// JSON configuration file. Replaces the environment defaults.
    #[arg(long, env = "HUMANKIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identity key files.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Polls the issuer until the claim offer for an identity is ready.
    Offer {
        /// Identity id as the issuer knows it.
        #[arg(long)]
        identity: String,
        /// Identity id as a field element.
        #[arg(long, default_value = "0")]
        identity_bigint: String,
        /// KYC provider the identity was verified with.
        #[arg(long, default_value = "worldcoin")]
        provider: KycProvider,
    },
    /// Loads the on-chain state data of an issuer, waiting while it is not indexed.
    /// Ctrl-C stops the wait.
    States {
        /// Issuer id (the tail of the issuer DID).
        #[arg(long)]
        issuer: String,
    },
    /// Reads whether an identity or an address is proved on a chain.
    Status {
        /// Target chain.
        #[arg(long)]
        chain: Option<SupportedChain>,
        /// Identity id as a field element.
        #[arg(long)]
        identity_bigint: Option<String>,
        /// Wallet address.
        #[arg(long)]
        address: Option<Address>,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Generates a key and writes it as a key file.
    New {
        /// Output file. Printed to stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Checks that a key file can be imported.
    Check {
        /// Key file to read.
        file: PathBuf,
    },
}

fn load_config(env: Environment, path: Option<&Path>) -> Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::from_environment(&env));
    };
    let json = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config {}", path.display()))?;
    Ok(PipelineConfig::from_json(&json)?)
}

fn write_key_file(out: Option<&Path>) -> Result<()> {
    let key_file = IdentityKey::generate().to_key_file();
    match out {
        Some(path) => {
            std::fs::write(path, key_file.as_bytes())
                .wrap_err_with(|| format!("writing {}", path.display()))?;
            tracing::info!("key file written to {}", path.display());
        }
        None => println!("{}", key_file.as_str()),
    }
    Ok(())
}

fn check_key_file(path: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading {}", path.display()))?;
    IdentityKey::from_key_file(&contents)?;
    Ok(())
}

async fn wait_for_offer(
    config: &PipelineConfig,
    identity: String,
    identity_bigint: &str,
    provider: KycProvider,
) -> Result<()> {
    // the issuer addresses offers by identity id, the key is never sent
    let identity = Identity::new(identity, identity_bigint, IdentityKey::generate())?;
    let credentials = CredentialAcquisition::new(config);
    if !credentials.is_claim_offer_exists(&identity, provider).await {
        return Err(eyre!(
            "no claim offer for {} after {} attempts",
            identity.id_string(),
            config.claim_offer_max_attempts
        ));
    }
    let offer = credentials.get_claim_offer(&identity, provider).await?;
    println!("{}", serde_json::to_string_pretty(&offer)?);
    Ok(())
}

async fn load_states(config: &PipelineConfig, issuer: &str) -> Result<()> {
    let generator = ProofGenerator::new(Arc::new(OracleClient::new(config)), config);
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut states = StatesDetails::default();
    generator
        .load_states_details(issuer, &mut states, &cancel)
        .await?;
    println!("{}", serde_json::to_string_pretty(&states)?);
    Ok(())
}

async fn proved_status(
    config: &PipelineConfig,
    chain: Option<SupportedChain>,
    identity_bigint: Option<&str>,
    address: Option<Address>,
) -> Result<()> {
    let chain = chain.unwrap_or(config.default_chain);
    let deployment = config
        .deployment(chain)
        .ok_or_else(|| eyre!("no deployment configured for {chain}"))?;
    let provider = HttpRpcProvider::new(deployment.rpc_url(), config);

    if identity_bigint.is_none() && address.is_none() {
        return Err(eyre!("pass --identity-bigint, --address or both"));
    }
    if let Some(identity) = identity_bigint {
        let identity_id = FieldValue::parse(identity)?;
        let proved = contracts::is_identity_proved(&provider, deployment, identity_id).await?;
        println!("identity {identity} proved on {chain}: {proved}");
    }
    if let Some(address) = address {
        let proved = contracts::is_address_proved(&provider, deployment, address).await?;
        println!("address {address} proved on {chain}: {proved}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.env, cli.config.as_deref())?;

    match cli.command {
        Commands::Key { action } => match action {
            KeyAction::New { out } => write_key_file(out.as_deref()),
            KeyAction::Check { file } => {
                check_key_file(&file)?;
                println!("{}: ok", file.display());
                Ok(())
            }
        },
        Commands::Offer {
            identity,
            identity_bigint,
            provider,
        } => wait_for_offer(&config, identity, &identity_bigint, provider).await,
        Commands::States { issuer } => load_states(&config, &issuer).await,
        Commands::Status {
            chain,
            identity_bigint,
            address,
        } => proved_status(&config, chain, identity_bigint.as_deref(), address).await,
    }
}
