//! # Redeemer Binary Entry Point
//!
//! Command-line front end of the redemption engine.
//!
//! ## Usage
//!
//! ```bash
//! # Periodic re-validation until Ctrl+C
//! cargo run --bin redeemer -- serve
//!
//! # Redeem one code for a whole group
//! cargo run --bin redeemer -- redeem --group 42 --code SPRING24
//!
//! # Validate a newly sighted code (auto-redeem groups follow)
//! cargo run --bin redeemer -- submit --code WINTER2024
//!
//! # Try the CAPTCHA model on a saved challenge
//! cargo run --bin redeemer -- classify --image captcha.png
//!
//! # Manage the account snapshot
//! cargo run --bin redeemer -- add-account --id 123456789 --nickname Frost --group 42
//! cargo run --bin redeemer -- auto-redeem --group 42 --enabled true
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use std::time::Duration;

use giftcode_redeemer::common::config::{load_config, AppConfig};
use giftcode_redeemer::common::logging::init_logger;
use giftcode_redeemer::common::messages::{Account, AccountId, CodeSource, GroupId};
use giftcode_redeemer::processing::ImageClassifier;
use giftcode_redeemer::store::{JsonFileStore, NotifierEvent};
use giftcode_redeemer::validation::EnqueueResponse;
use giftcode_redeemer::Service;

/// Command-line arguments for the redeemer binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML format)
    #[arg(short, long, default_value = "config/redeemer.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the periodic validation sweep until interrupted
    Serve,

    /// Redeem a code for every member of a group
    Redeem {
        #[arg(short, long)]
        group: GroupId,
        #[arg(short = 'C', long)]
        code: String,
    },

    /// Queue a code for validation and wait for the verdict
    Submit {
        #[arg(short = 'C', long)]
        code: String,
    },

    /// Classify a CAPTCHA image with the configured model
    Classify {
        #[arg(short, long)]
        image: String,
    },

    /// Add or replace an account in the store
    AddAccount {
        #[arg(long)]
        id: AccountId,
        #[arg(long)]
        nickname: String,
        #[arg(long)]
        group: GroupId,
    },

    /// Toggle automatic redemption of newly validated codes for a group
    AutoRedeem {
        #[arg(long)]
        group: GroupId,
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: AppConfig = load_config(&args.config)
        .with_context(|| format!("failed to load {}", args.config))?;

    match args.command {
        Command::Serve => {
            let service = Service::open(config).await?;
            service.run().await;
        }
        Command::Redeem { group, code } => {
            let service = Service::open(config).await?;
            let report = service.orchestrator.run(group, &code).await?;
            println!("{}", report.to_json()?);
        }
        Command::Submit { code } => submit(config, &code).await?,
        Command::Classify { image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("failed to read {}", image))?;
            let classifier = ImageClassifier::load(&config.classifier);
            let result = classifier.classify(bytes).await;
            match result.code {
                Some(code) => println!("{} (confidence {:.3})", code, result.confidence),
                None => println!("rejected"),
            }
        }
        Command::AddAccount {
            id,
            nickname,
            group,
        } => {
            let store = JsonFileStore::open(&config.storage.path).await?;
            store
                .add_account(Account {
                    id,
                    nickname,
                    group_id: group,
                })
                .await?;
            info!("👤 Account {} stored in group {}", id, group);
        }
        Command::AutoRedeem { group, enabled } => {
            let store = JsonFileStore::open(&config.storage.path).await?;
            store.set_auto_redeem(group, enabled).await?;
            info!("⚙️  Auto-redeem for group {} set to {}", group, enabled);
        }
    }

    Ok(())
}

async fn submit(config: AppConfig, code: &str) -> anyhow::Result<()> {
    let service = Service::open(config).await?;

    match service.queue.enqueue(code, CodeSource::Submission, None).await {
        EnqueueResponse::Queued { .. } => {}
        other => {
            println!("{}", serde_json::to_string_pretty(&other)?);
            return Ok(());
        }
    }

    while !service.queue.is_idle().await {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    for event in service.notifier.events().await {
        if let NotifierEvent::Reply(reply) = event {
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
    }

    // Auto-redeem runs start right after the verdict; let them finish
    let groups = service.stores.accounts.auto_redeem_groups().await?;
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if !groups.iter().any(|g| service.orchestrator.is_running(*g)) {
            break;
        }
    }
    if !groups.is_empty() {
        info!("🏁 Auto-redeem runs for {} groups finished", groups.len());
    }

    Ok(())
}
