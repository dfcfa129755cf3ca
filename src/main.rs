mod commands;
mod config;
mod lock;
mod queue;
mod store;
mod sync;

use anyhow::Result;
use calmesh_core::store::SyncDirection;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::App;

#[derive(Parser)]
#[command(name = "calmesh")]
#[command(about = "Keep Google and CalDAV calendars in two-way sync")]
struct Cli {
    /// Verbose logging (ignored when RUST_LOG is set)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and sync workers until Ctrl-C
    Worker,
    /// Sync one user now
    Sync { user: String },
    /// List both providers' calendars and which ones are synced
    Calendars { user: String },
    /// Create or update a calendar mapping
    Map {
        user: String,

        /// Calendar name on both sides; missing calendars are created with it
        #[arg(long)]
        display_name: String,

        /// Google calendar id (resolved by name when omitted)
        #[arg(long)]
        source_id: Option<String>,

        /// CalDAV calendar URL (resolved by name when omitted)
        #[arg(long)]
        target_id: Option<String>,

        /// bidirectional, source-to-target or target-to-source
        #[arg(long)]
        direction: Option<SyncDirection>,

        /// Keep the mapping but stop syncing it
        #[arg(long)]
        disable: bool,
    },
    /// Show the most recent sync log entries
    Logs {
        user: String,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Reset the last-synced time of every event mapping of a user
    Reset { user: String },
    /// Save CalDAV credentials for a user
    ConnectCaldav {
        user: String,

        #[arg(long)]
        username: String,

        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,

        /// Defaults to caldav.server_url from the config
        #[arg(long)]
        server_url: Option<String>,
    },
    /// Save Google OAuth tokens for a user
    ConnectGoogle {
        user: String,

        #[arg(long)]
        access_token: String,

        #[arg(long)]
        refresh_token: String,
    },
    /// Turn scheduled syncing on or off for a user
    AutoSync { user: String, state: Toggle },
    /// Show config paths, creating a default config file if missing
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Config => commands::config::run(),
        command => {
            let app = App::load()?;
            run(app, command).await
        }
    }
}

async fn run(app: App, command: Commands) -> Result<()> {
    match command {
        Commands::Worker => commands::worker::run(app).await,
        Commands::Sync { user } => commands::sync::run(&app, &user).await,
        Commands::Calendars { user } => commands::calendars::run(&app, &user).await,
        Commands::Map {
            user,
            display_name,
            source_id,
            target_id,
            direction,
            disable,
        } => {
            let update = commands::map::MappingUpdate {
                display_name,
                source_id,
                target_id,
                direction,
                enabled: !disable,
            };
            commands::map::run(&app, &user, update).await
        }
        Commands::Logs { user, limit } => commands::logs::run(&app, &user, limit).await,
        Commands::Reset { user } => commands::reset::run(&app, &user).await,
        Commands::ConnectCaldav {
            user,
            username,
            password,
            server_url,
        } => commands::connect::caldav(&app, &user, username, password, server_url).await,
        Commands::ConnectGoogle {
            user,
            access_token,
            refresh_token,
        } => commands::connect::google(&app, &user, access_token, refresh_token).await,
        Commands::AutoSync { user, state } => {
            commands::auto_sync::run(&app, &user, matches!(state, Toggle::On)).await
        }
        Commands::Config => commands::config::run(),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "calmesh=info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
