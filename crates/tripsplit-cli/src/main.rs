//! tripsplit - command-line harness for the cache layer.
//!
//! Runs one read or write against the configured API through a
//! [`QueryClient`] and prints the result as JSON. Useful for poking a
//! backend and for watching the cache's logs (`RUST_LOG=tripsplit_core=debug`).

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tripsplit_core::models::{ExpenseCreate, ExpenseListParams, TripListParams};
use tripsplit_core::{ApiClient, Config, QueryClient, QueryState};

const USAGE: &str = "usage: tripsplit <command>

commands:
  trips                                         list trips
  trip <trip_id>                                trip detail
  expenses <trip_id>                            first page of expenses
  members <trip_id>                             trip members
  balances <trip_id>                            member balances
  settlements <trip_id>                         suggested settlements
  me                                            your profile
  invite <trip_id>                              mint a new invite link
  add-expense <trip_id> <amount> <currency> <payer_id> <description...>";

/// Initialize the tracing subscriber. Logs go to stderr, and additionally to
/// a daily file when `log_dir` is configured; the returned guard flushes it.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // RUST_LOG controls the level (e.g. RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tripsplit.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

fn parse_id(args: &[String], index: usize, what: &str) -> Result<i64> {
    let raw = args.get(index).with_context(|| format!("missing {}\n\n{}", what, USAGE))?;
    raw.parse().with_context(|| format!("invalid {}: {}", what, raw))
}

fn print<T: Serialize>(state: QueryState<T>) -> Result<()> {
    let data = state.into_result()?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load().context("failed to load config")?;
    let _guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let api = ApiClient::new(&config).context("failed to create API client")?;
    let client = QueryClient::new(Arc::new(api), &config);
    info!(command = %command, url = %config.api_base_url, "tripsplit starting");

    match command.as_str() {
        "trips" => print(client.trips(&TripListParams::default()).await),
        "trip" => print(client.trip(parse_id(&args, 2, "trip id")?).await),
        "expenses" => {
            let trip_id = parse_id(&args, 2, "trip id")?;
            print(client.expenses(trip_id, &ExpenseListParams::default()).await)
        }
        "members" => print(client.members(parse_id(&args, 2, "trip id")?).await),
        "balances" => print(client.balances(parse_id(&args, 2, "trip id")?).await),
        "settlements" => print(client.settlements(parse_id(&args, 2, "trip id")?).await),
        "me" => print(client.me().await),
        "invite" => {
            let link = client
                .regenerate_invite(parse_id(&args, 2, "trip id")?)
                .mutate_async(())
                .await?;
            println!("{}", serde_json::to_string_pretty(&link)?);
            Ok(())
        }
        "add-expense" => {
            let trip_id = parse_id(&args, 2, "trip id")?;
            let amount: f64 = args
                .get(3)
                .context("missing amount")?
                .parse()
                .context("invalid amount")?;
            let currency = args.get(4).context("missing currency")?.clone();
            let paid_by_member_id = parse_id(&args, 5, "payer id")?;
            let description = args.get(6..).map(|words| words.join(" ")).unwrap_or_default();
            if description.is_empty() {
                bail!("missing description\n\n{}", USAGE);
            }
            let created = client
                .create_expense(trip_id)
                .mutate_async(ExpenseCreate {
                    description,
                    amount,
                    currency,
                    paid_by_member_id,
                    ..Default::default()
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(())
        }
        other => bail!("unknown command: {}\n\n{}", other, USAGE),
    }
}
