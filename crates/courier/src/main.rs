//! courier - send, inspect and flush idempotent collector events
//!
//! Thin CLI over `courier-core`. State (dedup ledger, outbox, score ledger,
//! registration) lives in a JSON file store so successive invocations
//! behave like successive page loads of one client.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use courier_core::clock::SystemClock;
use courier_core::config::{Config, LogFormat};
use courier_core::error::{Error, format_error_with_remediation};
use courier_core::ledger::DedupLedger;
use courier_core::logging::init_logging;
use courier_core::outbox::Outbox;
use courier_core::payload::{EventPayload, Fields};
use courier_core::registration::{self, RegistrationForm};
use courier_core::score::{Question, ScoreLedger, atomic_total};
use courier_core::store::{FileStore, KeyValueStore};
use courier_core::{Courier, keys};
use serde_json::Value;

/// courier - reliable, idempotent event delivery
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to courier.toml
    #[arg(short, long, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the JSON state file (overrides [storage] path)
    #[arg(long, env = "COURIER_STORE")]
    store: Option<PathBuf>,

    /// Collector URL (overrides [collector] endpoint)
    #[arg(long, env = "COURIER_ENDPOINT")]
    endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one event
    Send {
        /// Event action (registration, login, test_result, login_check, ...)
        #[arg(short, long)]
        action: String,

        /// Field as key=value; values that parse as JSON keep their type
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,

        /// Extra fields as a JSON object
        #[arg(long)]
        json: Option<String>,

        /// Fire-and-forget: transmit best effort and queue in the outbox
        #[arg(long)]
        fast: bool,
    },

    /// Ask the collector whether a user exists
    CheckLogin {
        #[arg(long, default_value = "")]
        email: String,

        #[arg(long, default_value = "")]
        phone: String,
    },

    /// Register a user locally and submit the registration
    Register {
        #[arg(long)]
        first_name: String,

        #[arg(long)]
        last_name: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "")]
        phone: String,
    },

    /// Forget the local identity and dedup history
    Logout,

    /// Send every queued event once
    Flush,

    /// List queued events
    Outbox,

    /// Inspect the dedup ledger
    #[command(subcommand)]
    Ledger(LedgerCommands),

    /// Score reconciliation
    #[command(subcommand)]
    Score(ScoreCommands),

    /// Print the effective configuration as TOML
    Config {
        /// Print built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

#[derive(Subcommand, Debug)]
enum LedgerCommands {
    /// List recorded keys
    #[command(alias = "ls")]
    List,

    /// Remove expired entries
    Gc,

    /// Remove every entry
    Clear,

    /// Print the key an event would get
    Key {
        #[arg(short, long)]
        action: String,

        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ScoreCommands {
    /// Start a test with its atomic total
    Init { test_id: String, full_total: u32 },

    /// Record how many items the current retry re-proposes
    Retry { test_id: String, wrong: u32 },

    /// Reconcile this run's correct answers
    Build { test_id: String, correct: u32 },

    /// Count atomic items in a JSON array of questions
    Total { file: PathBuf },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::read(path).map_err(|e| remediated(&e))?,
        None => Config::default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.collector.endpoint.clone_from(endpoint);
    }
    if let Some(path) = &cli.store {
        config.storage.path = Some(path.clone());
    }
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = match format.as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => bail!("unknown log format: {other} (expected pretty or json)"),
        };
    }
    Ok(config)
}

fn store_path(config: &Config) -> Result<PathBuf> {
    if let Some(path) = &config.storage.path {
        return Ok(path.clone());
    }
    let base = dirs::data_dir().context("no data directory; pass --store")?;
    Ok(base.join("courier").join("store.json"))
}

fn parse_fields(pairs: &[String], json: Option<&str>) -> Result<Fields> {
    let mut fields = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--json is not valid JSON")? {
            Value::Object(map) => map,
            _ => bail!("--json must be a JSON object"),
        },
        None => Fields::new(),
    };
    for pair in pairs {
        let Some((name, raw)) = pair.split_once('=') else {
            bail!("field `{pair}` is not KEY=VALUE");
        };
        let value = serde_json::from_str::<Value>(raw)
            .ok()
            .filter(|v| !v.is_object() && !v.is_array())
            .unwrap_or_else(|| Value::String(raw.to_string()));
        fields.insert(name.trim().to_string(), value);
    }
    Ok(fields)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render a core error with its fix-it hints.
fn remediated(error: &Error) -> anyhow::Error {
    anyhow::anyhow!(format_error_with_remediation(error))
}

fn build_courier(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Courier> {
    Courier::from_config(config, store).map_err(|e| remediated(&e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if let Commands::Config { default } = &cli.command {
        let shown = if *default { Config::default() } else { config };
        print!("{}", shown.to_toml_string()?);
        return Ok(());
    }

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("warning: logging not initialised: {e}");
    }

    let path = store_path(&config)?;
    tracing::debug!(store = %path.display(), "Using file store");
    let store = FileStore::open(path).map_err(|e| remediated(&Error::from(e)))?;
    let store: Arc<dyn KeyValueStore> = Arc::new(store);

    match cli.command {
        Commands::Send {
            action,
            fields,
            json,
            fast,
        } => {
            let fields = parse_fields(&fields, json.as_deref())?;
            let payload = EventPayload::new(action.as_str(), fields);
            let courier = build_courier(config, store)?;
            if fast {
                print_json(&courier.send_fast(&payload))?;
            } else {
                let outcome = courier.send(&payload).await;
                print_json(&outcome)?;
                if outcome.is_retryable() {
                    courier.outbox().enqueue(&payload);
                    bail!("delivery failed; event queued for the next flush");
                }
            }
        }
        Commands::CheckLogin { email, phone } => {
            let courier = build_courier(config, store)?;
            let outcome = courier.send_login_check(&email, &phone).await;
            print_json(&outcome.to_json())?;
            if outcome.is_retryable() {
                bail!("collector unreachable");
            }
        }
        Commands::Register {
            first_name,
            last_name,
            email,
            phone,
        } => {
            let courier = build_courier(config, store)?;
            let outcome = courier.register_user(&RegistrationForm {
                last_name,
                first_name,
                email,
                phone,
            });
            print_json(&outcome)?;
        }
        Commands::Logout => {
            let ledger = DedupLedger::new(Arc::clone(&store), Arc::new(SystemClock), config.dedup);
            registration::forget_identity(store.as_ref(), &ledger);
            println!("logged out");
        }
        Commands::Flush => {
            let courier = build_courier(config, store)?;
            print_json(&courier.flush_outbox().await)?;
        }
        Commands::Outbox => {
            print_json(&Outbox::new(store).pending())?;
        }
        Commands::Ledger(command) => {
            let ledger = DedupLedger::new(store, Arc::new(SystemClock), config.dedup);
            match command {
                LedgerCommands::List => print_json(&ledger.entries())?,
                LedgerCommands::Gc => println!("removed {}", ledger.collect_expired()),
                LedgerCommands::Clear => {
                    ledger.clear();
                    println!("cleared");
                }
                LedgerCommands::Key { action, fields } => {
                    let payload = EventPayload::new(action.as_str(), parse_fields(&fields, None)?);
                    let (key, ttl) = keys::derive_key(&payload);
                    print_json(&serde_json::json!({"key": key, "ttl": ttl}))?;
                }
            }
        }
        Commands::Score(command) => {
            let scores = ScoreLedger::new(store);
            match command {
                ScoreCommands::Init { test_id, full_total } => {
                    scores.init(&test_id, full_total);
                    print_json(&scores.entry(&test_id))?;
                }
                ScoreCommands::Retry { test_id, wrong } => {
                    scores.set_retry_wrong(&test_id, wrong);
                    print_json(&scores.entry(&test_id))?;
                }
                ScoreCommands::Build { test_id, correct } => {
                    print_json(&scores.build(&test_id, correct))?;
                }
                ScoreCommands::Total { file } => {
                    let raw = std::fs::read_to_string(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    let Value::Array(items) = serde_json::from_str::<Value>(&raw)? else {
                        bail!("{} must hold a JSON array of questions", file.display());
                    };
                    let questions: Vec<Question> = items.iter().map(Question::from).collect();
                    println!("{}", atomic_total(&questions));
                }
            }
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
