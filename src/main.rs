use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{LoggingConfig, TurnstileConfig};
use turnstile::ratelimit::{RateLimiter, RecordKey, Scope};
use turnstile::store::{FileStore, RecordStore};

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "Inspect and administer abuse rate limits", long_about = None)]
struct Cli {
    /// Configuration file (YAML); TURNSTILE__* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one rate limit check, consuming a token
    Check {
        /// identity, address or device
        #[arg(long)]
        scope: Scope,
        #[arg(long)]
        id: String,
        #[arg(long)]
        action: String,
        /// Treat the device as unrecognized (halves capacity)
        #[arg(long)]
        strict: bool,
    },
    /// Estimate remaining attempts for an identity
    Remaining {
        #[arg(long)]
        id: String,
        #[arg(long)]
        action: String,
        #[arg(long, default_value_t = 5)]
        max_attempts: u32,
    },
    /// Lift the limit on an identity for one action
    Reset {
        #[arg(long)]
        id: String,
        #[arg(long)]
        action: String,
    },
    /// Print the stored record for a key as JSON
    Inspect {
        #[arg(long)]
        scope: Scope,
        #[arg(long)]
        id: String,
        #[arg(long)]
        action: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = TurnstileConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!(
        path = %config.store.path.display(),
        namespace = %config.store.namespace,
        "Configuration loaded"
    );

    let store = Arc::new(FileStore::new(
        config.store.path.clone(),
        config.store.namespace.clone(),
    ));
    let limiter = RateLimiter::with_config(store.clone(), &config);

    match cli.command {
        Command::Check {
            scope,
            id,
            action,
            strict,
        } => {
            let result = match scope {
                Scope::Identity => limiter.check_limit(&id, &action).await,
                Scope::Address => limiter.check_ip(&id, &action).await,
                Scope::Device => limiter.check_device(&id, &action, strict).await,
            };
            match result {
                Ok(()) => println!("allowed"),
                Err(e) => {
                    println!("denied: {}", e);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::Remaining {
            id,
            action,
            max_attempts,
        } => {
            let remaining = limiter
                .get_remaining_attempts(&id, &action, max_attempts)
                .await;
            println!("{}", remaining);
        }
        Command::Reset { id, action } => {
            limiter.reset_limit(&id, &action).await?;
            println!("reset {}", RecordKey::new(Scope::Identity, &id, &action));
        }
        Command::Inspect { scope, id, action } => {
            let key = RecordKey::new(scope, &id, &action);
            match store.get(&key.storage_key()).await? {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => {
                    println!("no record for {}", key);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Initialize tracing, preferring `RUST_LOG` over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
