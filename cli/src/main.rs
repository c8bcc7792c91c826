use clap::{Parser, Subcommand};
use talus_core::config::{NetworkKind, NetworkParams};
use talus_core::numbers::Account;
use talus_network::Transport;
use talus_wallet::Wallet;

#[derive(Parser)]
#[command(name = "talus")]
#[command(about = "Talus node CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind the UDP transport and log inbound datagrams until interrupted.
    Listen {
        #[arg(long, default_value = "127.0.0.1:7075")]
        bind: String,
        #[arg(long, default_value = "test")]
        network: String,
    },
    /// Generate a fresh wallet seed and print its first deterministic account.
    WalletNew,
    /// Render a 32-byte hex public key as an address string.
    Address {
        #[arg(long)]
        pubkey_hex: String,
        #[arg(long, default_value = "talus")]
        prefix: String,
    },
}

fn network_params(name: &str) -> NetworkParams {
    match name {
        "live" => NetworkParams::live(),
        _ => NetworkParams::test(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::WalletNew => {
            let wallet = Wallet::generate();
            let account = wallet.deterministic_insert()?;
            println!("{}", account.to_address("talus"));
        }
        Commands::Address { pubkey_hex, prefix } => {
            let bytes = hex::decode(pubkey_hex.trim())?;
            if bytes.len() != 32 {
                anyhow::bail!("public key must be 32 bytes, got {}", bytes.len());
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            println!("{}", Account(key).to_address(&prefix));
        }
        Commands::Listen { bind, network } => {
            let params = network_params(&network);
            let addr = bind.parse()?;
            let transport = Transport::bind(addr, params.network.magic(), params.protocol_version_min, params.publish_threshold).await?;
            tracing::info!(local_addr = ?transport.local_addr()?, network = ?params.network, "listening");
            loop {
                match transport.recv().await {
                    Ok((from, Ok((header, message)))) => {
                        tracing::info!(?from, message_type = ?header.message_type, ?message, "received message");
                    }
                    Ok((from, Err(status))) => {
                        tracing::warn!(?from, ?status, "rejected inbound datagram");
                    }
                    Err(err) => {
                        tracing::error!(?err, "transport error");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_params_selects_live_threshold() {
        assert_ne!(network_params("live").publish_threshold, network_params("test").publish_threshold);
    }
}
