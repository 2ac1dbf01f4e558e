//! Slot delegator CLI client

mod client;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slot_delegator::delegation::{Call, CallOutput};
use slot_delegator::vault::sign_permit;
use slot_delegator::websocket::{ClientMessage, ServerMessage};
use slot_delegator::Address;

use crate::client::DelegatorClient;

/// Seconds a locally signed permit stays valid
const PERMIT_TTL: u64 = 600;

#[derive(Parser)]
#[command(name = "slot-delegator-cli")]
#[command(about = "CLI client for the slot delegator server")]
#[command(version)]
struct Cli {
    /// Server URL
    #[arg(short, long, env = "DELEGATOR_SERVER", default_value = "ws://localhost:3000/ws")]
    server: String,

    /// Hex-encoded ed25519 seed identifying you
    #[arg(short, long, env = "DELEGATOR_KEY", hide_env_values = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the address of --key
    Address,
    /// Mint vault shares to yourself
    Deposit { amount: u128 },
    /// Set your vault allowance for the engine (or --spender)
    Approve {
        amount: u128,
        #[arg(long)]
        spender: Option<Address>,
    },
    /// Stake vault shares
    Stake {
        amount: u128,
        /// Stake owner, defaults to you
        #[arg(long)]
        to: Option<Address>,
    },
    /// Burn stake and receive vault shares
    Unstake {
        amount: u128,
        #[arg(long)]
        to: Option<Address>,
    },
    /// Create the delegation account for a slot
    Create {
        slot: u64,
        delegatee: Address,
        /// Lock duration in seconds
        #[arg(long, default_value_t = 0)]
        lock: u64,
        /// Act for this delegator as its representative
        #[arg(long)]
        delegator: Option<Address>,
    },
    /// Change the delegatee of a slot, optionally re-locking it
    Update {
        slot: u64,
        delegatee: Address,
        #[arg(long, default_value_t = 0)]
        lock: u64,
        #[arg(long)]
        delegator: Option<Address>,
    },
    /// Send vault shares from your wallet to a slot
    Fund {
        slot: u64,
        amount: u128,
        #[arg(long)]
        delegator: Option<Address>,
    },
    /// Move stake into a slot
    FundFromStake {
        slot: u64,
        amount: u128,
        #[arg(long)]
        delegator: Option<Address>,
    },
    /// Move a slot's shares back to stake
    Withdraw {
        slot: u64,
        amount: u128,
        #[arg(long)]
        delegator: Option<Address>,
    },
    /// Send a slot's shares to another address
    Transfer { slot: u64, amount: u128, to: Address },
    /// Approve or revoke a representative
    Representative {
        representative: Address,
        #[arg(long)]
        revoke: bool,
    },
    /// Show the delegation for a slot
    Get {
        slot: u64,
        #[arg(long)]
        delegator: Option<Address>,
    },
    /// Show stake and vault balances
    Balance {
        #[arg(long)]
        address: Option<Address>,
    },
    /// Stake using a signed permit instead of a standing allowance
    PermitStake { amount: u128 },
    /// Print committed events as they happen
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slot_delegator_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let key = cli.key.as_deref().map(parse_key).transpose()?;

    if let Commands::Address = cli.command {
        let key = key.context("--key is required")?;
        println!("{}", Address::from(key.verifying_key()));
        return Ok(());
    }

    let mut client = DelegatorClient::connect(&cli.server).await?;

    // Reads work anonymously; everything else acts as the key's address.
    let me = match (&key, &cli.command) {
        (Some(key), _) => Some(client.login(key).await?),
        (None, Commands::Get { .. } | Commands::Balance { .. } | Commands::Watch) => None,
        (None, _) => bail!("--key is required for this command"),
    };
    let owner = |explicit: Option<Address>| -> Result<Address> {
        explicit.or(me).context("Pass --delegator/--address or --key")
    };

    match cli.command {
        Commands::Address => {}
        Commands::Deposit { amount } => {
            print_reply(client.request(ClientMessage::Deposit { amount }).await?)?;
        }
        Commands::Approve { amount, spender } => {
            print_reply(client.request(ClientMessage::Approve { spender, amount }).await?)?;
        }
        Commands::Stake { amount, to } => {
            let to = owner(to)?;
            print_output(client.call(Call::Stake { to, amount }).await?);
        }
        Commands::Unstake { amount, to } => {
            let to = owner(to)?;
            print_output(client.call(Call::Unstake { to, amount }).await?);
        }
        Commands::Create {
            slot,
            delegatee,
            lock,
            delegator,
        } => {
            let call = Call::CreateDelegation {
                delegator: owner(delegator)?,
                slot,
                delegatee,
                lock_duration: lock,
            };
            print_output(client.call(call).await?);
        }
        Commands::Update {
            slot,
            delegatee,
            lock,
            delegator,
        } => {
            let call = Call::UpdateDelegatee {
                delegator: owner(delegator)?,
                slot,
                delegatee,
                lock_duration: lock,
            };
            print_output(client.call(call).await?);
        }
        Commands::Fund {
            slot,
            amount,
            delegator,
        } => {
            let call = Call::FundDelegation {
                delegator: owner(delegator)?,
                slot,
                amount,
            };
            print_output(client.call(call).await?);
        }
        Commands::FundFromStake {
            slot,
            amount,
            delegator,
        } => {
            let call = Call::FundDelegationFromStake {
                delegator: owner(delegator)?,
                slot,
                amount,
            };
            print_output(client.call(call).await?);
        }
        Commands::Withdraw {
            slot,
            amount,
            delegator,
        } => {
            let call = Call::WithdrawDelegationToStake {
                delegator: owner(delegator)?,
                slot,
                amount,
            };
            print_output(client.call(call).await?);
        }
        Commands::Transfer { slot, amount, to } => {
            let call = Call::TransferDelegationTo {
                delegator: owner(None)?,
                slot,
                amount,
                to,
            };
            print_output(client.call(call).await?);
        }
        Commands::Representative {
            representative,
            revoke,
        } => {
            let call = Call::SetRepresentative {
                representative,
                enabled: !revoke,
            };
            print_output(client.call(call).await?);
        }
        Commands::Get { slot, delegator } => {
            let delegator = owner(delegator)?;
            print_reply(
                client
                    .request(ClientMessage::GetDelegation { delegator, slot })
                    .await?,
            )?;
        }
        Commands::Balance { address } => {
            let address = owner(address)?;
            print_reply(client.request(ClientMessage::StakeBalance { address }).await?)?;
            print_reply(client.request(ClientMessage::VaultBalance { address }).await?)?;
        }
        Commands::PermitStake { amount } => {
            let key = key.context("--key is required")?;
            let me = owner(None)?;
            let (nonce, spender, domain_separator) = match client
                .request(ClientMessage::PermitNonce { address: me })
                .await?
            {
                ServerMessage::PermitNonce {
                    nonce,
                    spender,
                    domain_separator,
                    ..
                } => (nonce, spender, parse_domain(&domain_separator)?),
                other => bail!("Unexpected reply to permit_nonce: {:?}", other),
            };
            let deadline = chrono::Utc::now().timestamp().max(0) as u64 + PERMIT_TTL;
            let permit = sign_permit(&key, &domain_separator, &spender, amount, nonce, deadline);
            let outputs = client
                .permit_and_multicall(amount, permit, vec![Call::Stake { to: me, amount }])
                .await?;
            for output in outputs {
                print_output(output);
            }
        }
        Commands::Watch => {
            client
                .watch(|event| match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(e) => tracing::warn!("Failed to encode event: {}", e),
                })
                .await?;
        }
    }

    Ok(())
}

fn parse_key(hex_seed: &str) -> Result<SigningKey> {
    let bytes = hex::decode(hex_seed.strip_prefix("0x").unwrap_or(hex_seed))
        .context("Key must be hex")?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Key must be a 32-byte ed25519 seed"))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn parse_domain(hex_domain: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_domain).context("Invalid domain separator")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Domain separator must be 32 bytes"))
}

fn print_output(output: CallOutput) {
    match output {
        CallOutput::Done => println!("ok"),
        CallOutput::Account { account } => println!("ok account={}", account),
    }
}

fn print_reply(reply: ServerMessage) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
