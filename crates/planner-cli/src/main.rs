//! Planner CLI - command line access to the planner auth session.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use output::OutputFormat;
use planner_config::{Config, Paths};
use tracing::debug;

#[derive(Parser)]
#[command(name = "planner")]
#[command(about = "Planner - sign in and inspect your session", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Log level, overriding the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show authentication status
    Status,
    /// Sign in with Google
    Login,
    /// Sign in through the development login endpoint
    DevLogin {
        /// Email to sign in as
        #[arg(long)]
        email: Option<String>,
    },
    /// Show the server-side profile
    Whoami,
    /// Sign out
    Logout,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    planner_config::init_logging(level);
    debug!(base_dir = %paths.base_dir().display(), "Loaded config");

    let bootstrap = commands::build_bootstrap(&paths, &config)?;
    let format = &cli.format;

    let result = match cli.command {
        Commands::Status => commands::status(&bootstrap, format).await,
        Commands::Login => commands::login(&bootstrap, format).await,
        Commands::DevLogin { email } => commands::dev_login(&bootstrap, email, format).await,
        Commands::Whoami => commands::whoami(&bootstrap, format).await,
        Commands::Logout => commands::logout(&bootstrap, format).await,
    };

    bootstrap.teardown();
    result
}
