use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use instaclaw::accounts::{AccountStore, Tier};
use instaclaw::billing::UsageLog;
use instaclaw::providers::ProviderRegistry;
use instaclaw::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// `InstaClaw` - unified LLM API gateway.
#[derive(Parser, Debug)]
#[command(name = "instaclaw")]
#[command(author = "InstaClaw contributors")]
#[command(version)]
#[command(about = "Quota-metered routing across LLM providers.", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage accounts
    Account {
        #[command(subcommand)]
        account_command: AccountCommands,
    },

    /// Show an account's usage
    Usage {
        /// Account id
        account_id: String,

        /// Days to report
        #[arg(long, default_value_t = 30)]
        days: u32,

        /// Latest requests to list
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },

    /// List configured providers
    Providers,

    /// Configuration utilities
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommands {
    /// Create an account and print its API key (shown once)
    Create {
        /// free, pro or enterprise
        #[arg(long, default_value = "free")]
        tier: String,

        /// Allowance in units (defaults to the tier's allowance)
        #[arg(long)]
        allowance: Option<u64>,
    },
    /// List accounts
    List,
    /// Show one account
    Show { account_id: String },
    /// Deactivate an account
    Deactivate { account_id: String },
    /// Change an account's tier
    SetTier {
        account_id: String,
        tier: String,

        /// Allowance in units (defaults to the tier's allowance)
        #[arg(long)]
        allowance: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the config JSON schema
    Schema,
    /// Print the effective configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("instaclaw=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "instaclaw", &mut std::io::stdout());
            Ok(())
        }
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(Config);
                println!("{}", serde_json::to_string_pretty(&schema)?);
                Ok(())
            }
            ConfigCommands::Show => {
                let mut config = Config::load(cli.config.as_deref())?;
                if config.gateway.admin_token.is_some() {
                    config.gateway.admin_token = Some("<redacted>".into());
                }
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
        },
        Commands::Serve { host, port } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            instaclaw::gateway::run_gateway(config, shutdown_signal()).await
        }
        Commands::Account { account_command } => {
            let config = Config::load(cli.config.as_deref())?;
            handle_account_command(account_command, &config)
        }
        Commands::Usage {
            account_id,
            days,
            recent,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            show_usage(&config, &account_id, days, recent)
        }
        Commands::Providers => {
            let config = Config::load(cli.config.as_deref())?;
            show_providers(&config);
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn open_accounts(config: &Config) -> Result<AccountStore> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
    AccountStore::open(&data_dir.join("accounts.db"))
}

fn open_usage(data_dir: &Path) -> Result<UsageLog> {
    UsageLog::open(&data_dir.join("usage.db"))
}

fn format_epoch(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
}

fn handle_account_command(command: AccountCommands, config: &Config) -> Result<()> {
    let store = open_accounts(config)?;
    match command {
        AccountCommands::Create { tier, allowance } => {
            let tier: Tier = tier.parse()?;
            let allowance =
                allowance.unwrap_or_else(|| config.quota.tiers.get(tier).allowance_units);
            let created = store.create(tier, allowance, config.quota.period_days)?;
            println!("Created account {}", created.account.id);
            println!("  Tier:      {}", created.account.tier);
            println!("  Allowance: {} units", created.account.allowance);
            println!("  API key:   {}", created.api_key);
            println!();
            println!("Store the API key now; it cannot be shown again.");
            Ok(())
        }
        AccountCommands::List => {
            let accounts = store.list()?;
            if accounts.is_empty() {
                println!("No accounts.");
                return Ok(());
            }
            println!(
                "{:<38} {:<11} {:>12} {:>12} {:<8}",
                "ID", "TIER", "CONSUMED", "ALLOWANCE", "ACTIVE"
            );
            for account in accounts {
                println!(
                    "{:<38} {:<11} {:>12} {:>12} {:<8}",
                    account.id,
                    account.tier,
                    account.consumed,
                    account.allowance,
                    if account.active { "yes" } else { "no" }
                );
            }
            Ok(())
        }
        AccountCommands::Show { account_id } => {
            let Some(account) = store.get(&account_id)? else {
                bail!("Unknown account '{account_id}'");
            };
            println!("Account {}", account.id);
            println!("  Key prefix: {}...", account.api_key_prefix);
            println!("  Tier:       {}", account.tier);
            println!("  Consumed:   {} / {} units", account.consumed, account.allowance);
            println!(
                "  Period:     {} .. {}",
                format_epoch(account.period_start),
                format_epoch(account.period_end)
            );
            println!("  Active:     {}", account.active);
            Ok(())
        }
        AccountCommands::Deactivate { account_id } => {
            if !store.deactivate(&account_id)? {
                bail!("Unknown account '{account_id}'");
            }
            println!("Deactivated {account_id}");
            Ok(())
        }
        AccountCommands::SetTier {
            account_id,
            tier,
            allowance,
        } => {
            let tier: Tier = tier.parse()?;
            let allowance =
                allowance.unwrap_or_else(|| config.quota.tiers.get(tier).allowance_units);
            if !store.set_tier(&account_id, tier, allowance)? {
                bail!("Unknown account '{account_id}'");
            }
            println!("{account_id} is now {tier} with {allowance} units");
            Ok(())
        }
    }
}

fn show_usage(config: &Config, account_id: &str, days: u32, recent: usize) -> Result<()> {
    let store = open_accounts(config)?;
    let Some(account) = store.get(account_id)? else {
        bail!("Unknown account '{account_id}'");
    };
    let usage = open_usage(&config.data_dir())?;
    let days = days.clamp(1, 365);
    let now = chrono::Utc::now();
    let summary = usage.summary(&account.id, now - chrono::Duration::days(i64::from(days)), now)?;

    println!("Usage for {} ({}) over {days} days", account.id, account.tier);
    println!("  Requests: {}", summary.request_count);
    println!("  Units:    {} ({} overage)", summary.total_units, summary.overage_units);
    println!("  Cost:     {:.6}", summary.total_cost);
    println!("  Period:   {} / {} units", account.consumed, account.allowance);

    if !summary.by_provider.is_empty() {
        println!();
        println!("  {:<20} {:>10} {:>12} {:>12}", "PROVIDER", "REQUESTS", "UNITS", "COST");
        for p in &summary.by_provider {
            println!(
                "  {:<20} {:>10} {:>12} {:>12.6}",
                p.provider_id, p.request_count, p.units, p.cost
            );
        }
    }

    let daily = usage.daily(&account.id, days)?;
    if !daily.is_empty() {
        println!();
        for day in daily {
            println!(
                "  {}  {:>6} req  {:>10} units  {:>12.6}",
                day.date, day.request_count, day.units, day.cost
            );
        }
    }

    let recent = usage.recent(&account.id, recent)?;
    if !recent.is_empty() {
        println!();
        println!("  Latest requests:");
        for record in recent {
            println!(
                "  {}  {:<20} {:>8} units{}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.provider_id,
                record.units,
                if record.overage { "  (overage)" } else { "" }
            );
        }
    }
    Ok(())
}

fn show_providers(config: &Config) {
    let registry = ProviderRegistry::from_config(&config.providers);
    if registry.is_empty() {
        println!("No providers configured.");
        return;
    }
    println!(
        "{:<20} {:<18} {:>10} {:>8}  CAPABILITIES",
        "ID", "KIND", "COST/UNIT", "QUALITY"
    );
    for (provider, cfg) in registry.snapshot().iter().zip(&config.providers) {
        let capabilities: Vec<&str> = provider.capabilities.iter().map(String::as_str).collect();
        println!(
            "{:<20} {:<18} {:>10} {:>8}  {}",
            provider.id,
            format!("{:?}", cfg.kind),
            provider.cost_per_unit,
            provider.quality_score,
            capabilities.join(",")
        );
    }
}
