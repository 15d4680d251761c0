//! contentmill CLI tool.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use contentmill_core::{ItemStatus, MediaFormat, Stage};
use std::path::PathBuf;

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "contentmill")]
#[command(about = "contentmill content pipeline CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "CONTENTMILL_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the day's items (idempotent per date)
    Schedule {
        /// Local date, defaults to today on the server
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show queue depths, render lock usage and item counts
    Status,
    /// Inspect content items
    Items {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Queue a stage for an item
    Trigger {
        /// content, render or publish
        #[arg(value_parser = parse_stage)]
        stage: Stage,
        /// Item ID
        id: String,
        /// Run the stage now and wait for its outcome
        #[arg(long)]
        wait: bool,
    },
    /// Put a failed item back at the stage it failed in
    Retry {
        /// Item ID
        id: String,
    },
    /// Record a manual publish of an item awaiting one
    Confirm {
        /// Item ID
        id: String,
        /// Post id or URL on the platform
        #[arg(long)]
        external_ref: Option<String>,
    },
    /// Generate one item outside the schedule
    Generate {
        #[arg(long)]
        channel: Option<String>,
        #[arg(long, value_parser = parse_format)]
        format: MediaFormat,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        variant: Option<String>,
    },
    /// Validate a system configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "contentmill.kdl")]
        path: PathBuf,
    },
    /// Print the slot plan for a date without touching the database
    Plan {
        #[arg(long)]
        date: NaiveDate,
        /// Configuration file; built-in defaults when absent
        #[arg(long, env = "CONTENTMILL_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ItemCommands {
    /// List recent items
    List {
        /// Filter by status
        #[arg(long, value_parser = parse_status)]
        status: Option<ItemStatus>,
        /// Maximum number of items to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Show item details
    Show {
        /// Item ID
        id: String,
    },
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    s.parse()
}

fn parse_status(s: &str) -> Result<ItemStatus, String> {
    s.parse()
}

fn parse_format(s: &str) -> Result<MediaFormat, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let client = || ApiClient::new(&cli.api_url);

    match cli.command {
        Commands::Schedule { date } => commands::pipeline::schedule(&client()?, date).await,
        Commands::Status => commands::pipeline::status(&client()?).await,
        Commands::Items { command } => match command {
            ItemCommands::List { status, limit } => {
                commands::items::list(&client()?, status, limit).await
            }
            ItemCommands::Show { id } => commands::items::show(&client()?, &id).await,
        },
        Commands::Trigger { stage, id, wait } => {
            commands::items::trigger(&client()?, stage, &id, wait).await
        }
        Commands::Retry { id } => commands::items::retry(&client()?, &id).await,
        Commands::Confirm { id, external_ref } => {
            commands::items::confirm(&client()?, &id, external_ref).await
        }
        Commands::Generate {
            channel,
            format,
            topic,
            variant,
        } => commands::pipeline::generate(&client()?, channel, format, topic, variant).await,
        Commands::Validate { path } => commands::validate(&path),
        Commands::Plan { date, config } => commands::plan(date, config.as_deref()),
    }
}
