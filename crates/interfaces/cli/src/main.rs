use std::fs;
use std::io;
use std::io::IsTerminal;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use diarist_config::AppConfig;
use diarist_extract::extract;
use diarist_host::{ChatMessage, FileWorldbook, ScriptedChat, StaticPresets, TracingNotices};
use diarist_preset::PresetCoordinator;
use diarist_session::SessionDriver;
use diarist_store::EntryStore;

const CONFIG_PATH: &str = "config/default.toml";
const WORLDBOOK_PATH: &str = ".diarist/worldbooks.json";

#[derive(Debug, Parser)]
#[command(
    name = "diarist",
    version,
    about = "Capture bracketed diary entries from chat replies"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the template scanner over a file (or stdin) and print the fields.
    Extract {
        /// Input file; stdin when omitted.
        #[arg(value_name = "PATH")]
        path: Option<String>,
    },
    /// Parse the latest AI turn of a transcript file and persist it.
    Record {
        /// Transcript file: a JSON array of {author, text} turns.
        #[arg(value_name = "TRANSCRIPT")]
        transcript: String,
        /// Character to file the diary under when the transcript names none.
        #[arg(long)]
        character: Option<String>,
    },
    /// List stored diaries grouped by character.
    List,
    /// Show aggregate counts over the stored diaries.
    Stats,
    /// Export every stored diary as JSON.
    Export {
        /// Destination path; stdout when omitted.
        #[arg(long)]
        path: Option<String>,
    },
    /// Delete one diary by id.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Delete every stored diary.
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Write the default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show the path of the configuration file.
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Extract { path } => run_extract(path.as_deref()),
        Commands::Record {
            transcript,
            character,
        } => run_record(&load_config()?, &transcript, character).await,
        Commands::List => run_list(&load_config()?).await,
        Commands::Stats => run_stats(&load_config()?).await,
        Commands::Export { path } => run_export(&load_config()?, path.as_deref()).await,
        Commands::Delete { id } => run_delete(&load_config()?, &id).await,
        Commands::Clear { yes } => run_clear(&load_config()?, yes).await,
        Commands::Config { command } => run_config(command),
    }
}

fn load_config() -> Result<AppConfig> {
    AppConfig::load_from(CONFIG_PATH)
}

fn open_store(config: &AppConfig) -> Result<Arc<EntryStore>> {
    let book = FileWorldbook::open(WORLDBOOK_PATH)?;
    Ok(Arc::new(EntryStore::new(
        Arc::new(book),
        config.store.clone(),
    )))
}

fn run_extract(path: Option<&str>) -> Result<()> {
    let text = match path {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        None => io::read_to_string(io::stdin()).context("reading stdin")?,
    };

    match extract(&text) {
        Some(fields) => {
            println!("title     : {}", fields.title);
            println!("timestamp : {}", fields.timestamp);
            println!("body      : {}", fields.body);
            Ok(())
        }
        None => bail!("no diary template found in the input"),
    }
}

async fn run_record(
    config: &AppConfig,
    transcript_path: &str,
    character: Option<String>,
) -> Result<()> {
    let turns = load_transcript(transcript_path)?;
    let chat = Arc::new(ScriptedChat::from_transcript(turns));
    if let Some(name) = character {
        chat.set_character(name).await;
    }

    let driver = build_driver(config, chat)?;
    match driver.record_latest().await? {
        Some(entry) => {
            println!(
                "recorded \"{}\" ({}) under {}",
                entry.title, entry.timestamp, entry.character_name
            );
            println!("id: {}", entry.id);
        }
        None => println!("the latest AI reply carries no diary template"),
    }
    Ok(())
}

async fn run_list(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let grouped = store.list_all().await?;
    if grouped.is_empty() {
        println!("no diaries stored");
        return Ok(());
    }

    for (character, diaries) in &grouped {
        println!("── {character} ───────────────────────────────────────");
        for diary in diaries {
            println!("  [{}] {} — {}", diary.id, diary.title, diary.timestamp);
        }
    }
    Ok(())
}

async fn run_stats(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.stats().await?;

    println!("── diary stats ──────────────────────────────────────");
    println!("  total entries    : {}", stats.total_entries);
    println!("  total characters : {}", stats.total_characters);
    for character in &stats.per_character {
        println!("  {:<16} : {}", character.name, character.count);
    }
    Ok(())
}

async fn run_export(config: &AppConfig, path: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    let snapshot = store.export_all().await?;
    let rendered = serde_json::to_string_pretty(&snapshot)?;

    match path {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("writing {path}"))?;
            println!("exported to {path}");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn run_delete(config: &AppConfig, id: &str) -> Result<()> {
    let store = open_store(config)?;
    if store.delete(id).await? {
        println!("diary {id} deleted");
    } else {
        println!("diary {id} was already gone");
    }
    Ok(())
}

async fn run_clear(config: &AppConfig, yes: bool) -> Result<()> {
    if !yes {
        if !io::stdin().is_terminal() {
            bail!("refusing to clear all diaries in non-interactive mode without --yes");
        }

        print!("This deletes every stored diary. Type 'CLEAR ALL' to continue: ");
        io::stdout().flush()?;
        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != "CLEAR ALL" {
            println!("clear cancelled");
            return Ok(());
        }
    }

    let store = open_store(config)?;
    let removed = store.clear_all().await?;
    println!("{removed} diaries cleared");
    Ok(())
}

fn run_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Init { force } => {
            let path = Path::new(CONFIG_PATH);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            AppConfig::default().save_to(path)?;
            println!("default configuration written to {}", path.display());
        }
        ConfigCommands::Path => println!("{CONFIG_PATH}"),
    }
    Ok(())
}

fn build_driver(config: &AppConfig, chat: Arc<ScriptedChat>) -> Result<SessionDriver> {
    let store = open_store(config)?;
    let presets = Arc::new(PresetCoordinator::new(
        Arc::new(StaticPresets::new(Vec::new(), None)),
        config.preset.clone(),
        config.device.profile,
    ));

    Ok(SessionDriver::new(
        chat,
        store,
        presets,
        Arc::new(TracingNotices),
        config.listener.clone(),
        config.device.profile,
    ))
}

fn load_transcript(path: &str) -> Result<Vec<ChatMessage>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading transcript {path}"))?;
    let turns: Vec<ChatMessage> = serde_json::from_str(&raw).with_context(|| {
        format!("parsing transcript {path} (expected a JSON array of {{author, text}} turns)")
    })?;
    Ok(turns)
}
