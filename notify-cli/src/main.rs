use std::sync::Arc;

use anyhow::Context;
use campus_notify::client::delivery::PollScheduleConfig;
use campus_notify::client::{
    CacheEvent, ClientSession, HttpNotificationApi, NotificationApi, SessionConfig,
};
use campus_notify::domain::{CompositeKey, FeedCounts, FeedQuery, NotificationEnvelope};
use campus_notify::notification::DeleteTarget;
use campus_notify::utils::http_client::HttpClientConfig;
use clap::{Parser, Subcommand};
use colored::*;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the notification server
    #[arg(long, env = "NOTIFY_SERVER", default_value = "http://localhost:12555/")]
    server: String,

    /// Access token (JWT)
    #[arg(long, env = "NOTIFY_TOKEN")]
    token: String,

    /// Output JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current feed once
    Feed {
        /// Only unread envelopes
        #[arg(long)]
        unread: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Mark envelopes read, by composite key (`direct_message:12`)
    Read { keys: Vec<CompositeKey> },
    /// Mark everything read
    ReadAll,
    /// Mark an action-required envelope processed
    Processed { key: CompositeKey },
    /// Delete envelopes by key
    Delete { keys: Vec<CompositeKey> },
    /// Stay connected and print counters and connection status as they change
    Watch {
        /// Poll interval used while the push channel is down, in seconds
        #[arg(long, default_value_t = 30)]
        poll_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let http = HttpClientConfig::default();

    match args.command {
        Command::Watch { poll_secs } => {
            let config = SessionConfig {
                http,
                delivery: campus_notify::client::DeliveryConfig {
                    poll: PollScheduleConfig {
                        base_interval_ms: poll_secs.max(1) * 1000,
                        ..Default::default()
                    },
                    ..Default::default()
                },
                ..Default::default()
            };
            let session = ClientSession::connect(&args.server, &args.token, config)
                .context("Failed to start notification session")?;
            watch(session, args.json).await
        }
        command => {
            let api = HttpNotificationApi::new(&args.server, args.token.as_str(), &http)
                .context("Invalid server configuration")?;
            run_once(Arc::new(api), command, args.json).await
        }
    }
}

async fn run_once(api: Arc<dyn NotificationApi>, command: Command, json: bool) -> anyhow::Result<()> {
    let affected = match command {
        Command::Feed { unread, limit } => {
            let mut query = if unread {
                FeedQuery::unread()
            } else {
                FeedQuery::default()
            };
            query.limit = Some(limit);
            let feed = api.fetch(&query).await.context("Failed to fetch feed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&feed)?);
            } else {
                print_counts(&feed.counts);
                for envelope in &feed.envelopes {
                    print_envelope(envelope);
                }
                for failure in &feed.degraded {
                    println!("{} {}", "degraded:".yellow(), failure);
                }
            }
            return Ok(());
        }
        Command::Read { keys } => api.mark_read(&keys).await?,
        Command::ReadAll => api.mark_all_read().await?,
        Command::Processed { key } => api.mark_processed(&key).await?,
        Command::Delete { keys } => {
            anyhow::ensure!(!keys.is_empty(), "No keys given");
            api.delete(&DeleteTarget::Keys(keys)).await?
        }
        Command::Watch { .. } => anyhow::bail!("watch is not a one-shot command"),
    };

    if json {
        println!("{}", serde_json::json!({ "affected": affected }));
    } else {
        println!("{} {}", "Affected:".green(), affected);
    }
    Ok(())
}

async fn watch(session: ClientSession, json: bool) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let mut status = session.connection_status();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if json {
                    println!("{}", serde_json::json!({ "status": current }));
                } else {
                    println!("{} {}", "connection:".blue(), current.to_string().cyan());
                }
            }

            event = events.recv() => match event {
                Ok(CacheEvent::Changed(counts)) => {
                    if json {
                        println!("{}", serde_json::json!({ "counts": counts }));
                    } else {
                        print_counts(&counts);
                    }
                }
                Ok(CacheEvent::AggregationFailed { message }) => {
                    eprintln!("{} {}", "No notification source reachable:".red(), message);
                }
                Ok(CacheEvent::MutationFailed { target, message }) => {
                    eprintln!("{} {}: {}", "Mutation failed".red(), target, message);
                }
                Ok(CacheEvent::DeliveryUnavailable) => {
                    eprintln!("{}", "Push unavailable, polling only".yellow());
                }
                Ok(CacheEvent::RefreshRequested(_)) => {}
                Err(RecvError::Lagged(_)) => print_counts(&session.cache().counts()),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.logout().await;
    Ok(())
}

fn print_counts(counts: &FeedCounts) {
    println!(
        "{} {}  {} {}  {} {}  {} {}",
        "unread:".green(),
        counts.total_unread.to_string().bold(),
        "system:".green(),
        counts.system_unread,
        "chat:".green(),
        counts.chat_unread,
        "friends:".green(),
        counts.friend_request_count,
    );
}

fn print_envelope(envelope: &NotificationEnvelope) {
    let marker = if envelope.is_read { " " } else { "*" };
    let title = if envelope.payload.title.is_empty() {
        envelope.category.as_str()
    } else {
        envelope.payload.title.as_str()
    };
    println!(
        "{} {} {} {} {}",
        marker.yellow(),
        envelope.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
        envelope.key.to_string().cyan(),
        format!("[{}]", envelope.severity).magenta(),
        title
    );
}
