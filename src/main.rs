use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(version, about = "Team task tracker: projects, kanban boards and time tracking over a JSON API")]
pub struct Cli {
    /// Configuration file. Defaults to ./taskdeck.toml when it exists.
    #[arg(short, long, global = true, env = "TASKDECK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level regardless of the configured level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for a separately served client)
        #[arg(long)]
        dev: bool,
    },
    /// Create or upgrade the database, then exit
    Migrate {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Create a user account
    CreateUser {
        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,

        #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
        password: String,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration and report warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = cmd::load_config(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            dev,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(path) = db_path {
                config.database.path = path;
            }
            config.server.dev_mode |= dev;
            cmd::cmd_serve(config).await?;
        }
        Commands::Migrate { db_path } => {
            if let Some(path) = db_path {
                config.database.path = path;
            }
            cmd::cmd_migrate(&config)?;
        }
        Commands::CreateUser {
            email,
            name,
            password,
            db_path,
        } => {
            if let Some(path) = db_path {
                config.database.path = path;
            }
            cmd::cmd_create_user(&config, &email, &name, &password)?;
        }
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
    }

    Ok(())
}
