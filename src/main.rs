use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use fxdash::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for fxdash::AppCommand {
    fn from(cmd: Commands) -> fxdash::AppCommand {
        match cmd {
            Commands::Rates {
                currency,
                from,
                to,
                weekly,
            } => fxdash::AppCommand::Rates {
                currency,
                from,
                to,
                weekly,
            },
            Commands::Access {
                endpoint,
                ip,
                origin,
            } => fxdash::AppCommand::Access {
                endpoint,
                ip,
                origin,
            },
            Commands::Prune => fxdash::AppCommand::Prune,
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch and display historical rates for a currency
    Rates {
        /// Currency code, e.g. EUR
        #[arg(short, long)]
        currency: String,
        /// Range start (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,
        /// Range end (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
        /// Thin the series to one point per week
        #[arg(long)]
        weekly: bool,
    },
    /// Evaluate an access rule for an endpoint and caller
    Access {
        #[arg(short, long)]
        endpoint: String,
        #[arg(long)]
        ip: String,
        #[arg(long)]
        origin: Option<String>,
    },
    /// Delete usage log entries older than the retention horizon
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => fxdash::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

fn setup() -> anyhow::Result<()> {
    use anyhow::Context;

    let path = fxdash::core::config::AppConfig::default_config_path()?;

    if path.exists() {
        anyhow::bail!("Configuration file already exists at {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let default_config = r#"---
upstream:
  base_url: "https://feed.fxdash.org"

currencies:
  - code: "USD"
    display_name: "US Dollar"
    fixed_peg:
      buy: 3.6710
      sell: 3.6740
  - code: "EUR"
    display_name: "Euro"
  - code: "GBP"
    display_name: "Pound Sterling"
  - code: "JPY"
    display_name: "Japanese Yen"
    unit: 100
"#;

    std::fs::write(&path, default_config)
        .with_context(|| format!("Failed to write config file to {}", path.display()))?;

    tracing::info!("Created default configuration at {}", path.display());
    Ok(())
}
