//! `discomail` - inspect the local database of a disconnectable mail store.
//!
//! Reads the diary and folder registry without contacting any remote, and
//! can discard a diary that will never replay cleanly.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use discomail_core::{DiscoConfig, LocalStorage, LoggedEntry};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "discomail", version, about)]
struct Cli {
    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List pending diary entries in replay order.
    Diary(Target),
    /// List folders recorded while online, with cached message counts.
    Folders(Target),
    /// Throw away every pending diary entry and the UID map.
    Discard {
        #[command(flatten)]
        target: Target,
        /// Do not ask; required when entries are pending.
        #[arg(long)]
        yes: bool,
    },
}

/// Which database to open.
#[derive(Debug, Args)]
struct Target {
    /// Path to a store database.
    #[arg(required_unless_present = "store", conflicts_with = "store")]
    database: Option<PathBuf>,

    /// Store URL; the database is looked up under the configured data dir.
    #[arg(long)]
    store: Option<String>,
}

impl Target {
    async fn resolve(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.database {
            return Ok(path.clone());
        }
        let Some(url) = &self.store else {
            bail!("either a database path or --store is required");
        };
        let config = DiscoConfig::load().await.context("loading configuration")?;
        Ok(config.database_path(url))
    }

    async fn open(&self) -> anyhow::Result<LocalStorage> {
        let path = self.resolve().await?;
        if !path.exists() {
            bail!("no store database at {}", path.display());
        }
        debug!("Opening {}", path.display());
        LocalStorage::open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discomail=info,discomail_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Diary(target) => diary(&target, cli.json).await,
        Command::Folders(target) => folders(&target, cli.json).await,
        Command::Discard { target, yes } => discard(&target, yes).await,
    }
}

async fn diary(target: &Target, json: bool) -> anyhow::Result<()> {
    let storage = target.open().await?;
    let entries = storage.diary().entries().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Diary is empty.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", describe(entry));
    }
    Ok(())
}

fn describe(logged: &LoggedEntry) -> String {
    let mut line = format!(
        "#{:<5} {}  {}",
        logged.seq,
        logged.logged_at.format("%Y-%m-%d %H:%M:%S"),
        logged.entry
    );
    if logged.attempts > 0 {
        let _ = write!(line, "  ({} failed attempts", logged.attempts);
        if let Some(error) = &logged.last_error {
            let _ = write!(line, ", last: {error}");
        }
        line.push(')');
    }
    line
}

async fn folders(target: &Target, json: bool) -> anyhow::Result<()> {
    let storage = target.open().await?;
    let summaries = storage.summaries();

    let mut infos = Vec::new();
    for registered in summaries.registered_folders().await? {
        let index = summaries.load(&registered.full_name).await?;
        let mut info = index.folder_info();
        info.subscribed = registered.subscribed;
        info.holds_messages = registered.holds_messages;
        info.holds_folders = registered.holds_folders;
        infos.push(info);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }
    if infos.is_empty() {
        println!("No folders recorded.");
        return Ok(());
    }
    for info in &infos {
        println!(
            "{:<40} {:>6} messages {:>6} unread{}",
            info.full_name,
            info.total.unwrap_or(0),
            info.unread.unwrap_or(0),
            if info.subscribed { "  [subscribed]" } else { "" }
        );
    }
    Ok(())
}

async fn discard(target: &Target, yes: bool) -> anyhow::Result<()> {
    let storage = target.open().await?;
    let diary = storage.diary();
    let pending = diary.len().await?;

    if pending > 0 && !yes {
        bail!("{pending} entries pending; pass --yes to discard them");
    }
    diary.clear().await?;
    if pending > 0 {
        warn!("Discarded {pending} diary entries");
    } else {
        info!("Diary was already empty");
    }
    Ok(())
}
