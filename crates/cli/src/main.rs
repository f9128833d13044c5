//! Apple Store CLI - Database migrations and operator tools.
//!
//! # Usage
//!
//! ```bash
//! # Run order database migrations
//! as-cli migrate
//!
//! # Publish an event so every server instance invalidates its caches
//! as-cli publish product-modified '{"productId":"p_1","slug":"iphone-16"}'
//!
//! # Produce a Stripe-Signature header for a local webhook delivery
//! as-cli sign-webhook event.json
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `publish` - Publish a domain event over Redis
//! - `sign-webhook` - Sign a webhook payload with the endpoint secret

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "as-cli")]
#[command(author, version, about = "Apple Store CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Publish a domain event to every subscribed server
    Publish {
        /// Channel name (e.g. `product-modified`, `user-order-modified`)
        channel: String,

        /// JSON payload
        payload: String,
    },
    /// Print a `Stripe-Signature` header for a webhook payload
    SignWebhook {
        /// File containing the raw event body
        file: PathBuf,

        /// Unix timestamp to sign with (default: now)
        #[arg(short, long)]
        timestamp: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Publish { channel, payload } => {
            commands::publish::run(&channel, &payload).await?;
        }
        Commands::SignWebhook { file, timestamp } => {
            commands::sign::run(&file, timestamp)?;
        }
    }
    Ok(())
}
