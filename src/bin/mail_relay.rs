use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use log::info;

use mail_relay::auth::{AccessTokenSource, token_manager::TokenManager, token_store};
use mail_relay::config::{Config, load_config};
use mail_relay::daemon::run_relay;
use mail_relay::delivery::DeliveryPipeline;
use mail_relay::summarizer::Summarizer;
use mail_relay::summarizer::gemini::GeminiSummarizer;

#[derive(Parser)]
#[command(name = "mail_relay")]
#[command(about = "Relay new Gmail messages to WhatsApp with an AI summary", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay until Ctrl-C
    Run {
        /// Also relay up to `existing_batch_limit` unread inbox messages at startup
        #[arg(long)]
        process_existing: bool,
    },

    /// Check config, Google credentials, the summarizer and the chat bridge
    Check {
        /// Ask the bridge to send its test message
        #[arg(long)]
        send_test: bool,
    },

    /// Run the browser consent flow and store the refresh token
    Authorize,

    /// Store the OAuth client secret in keyring
    SetClientSecret {
        #[arg(long)]
        client_id: String,
    },
}

fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn load() -> Result<Config> {
    let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;
    init_logging(&cfg.log_level);
    Ok(cfg)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::SetClientSecret { client_id } => {
            init_logging("info");
            eprintln!("Paste client secret (end with Ctrl-D):");
            let mut secret = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut secret)?;
            let secret = secret.trim();
            token_store::save_client_secret(&client_id, secret)?;
            println!("Saved client secret for client_id {}", client_id);
            Ok(())
        }

        Command::Authorize => {
            let cfg = load()?;
            TokenManager::from_config(&cfg)?.authorize()?;
            println!("Authorization complete.");
            Ok(())
        }

        Command::Check { send_test } => {
            let cfg = load()?;
            cfg.validate()?;
            println!("config ok");

            TokenManager::from_config(&cfg)?.access_token()?;
            println!("google credentials ok");

            GeminiSummarizer::new(&cfg.summarizer)?.check_connection()?;
            println!("summarizer ok");

            let delivery = DeliveryPipeline::from_config(&cfg.bridge, &cfg.tuning)?;
            let health = delivery.bridge().health()?;
            println!("bridge status: {}", health.status);
            if send_test {
                delivery.test_connection()?;
                println!("bridge test message sent");
            }
            Ok(())
        }

        Command::Run { process_existing } => {
            let mut cfg = load()?;
            cfg.process_existing |= process_existing;
            info!("starting mail relay");
            let stats = run_relay(&cfg)?;
            println!("{stats}");
            Ok(())
        }
    }
}
