//! Tracker replay — drives the tracking API from a JSON-lines script.
//!
//! Each input line is one command (`{"op":"click","productRefId":"SKU1",...}`).
//! Outbound batches go to stdout, one JSON object per line; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use tracker_core::clock::ManualClock;
use tracker_core::config::{StorageType, TrackerConfig};
use tracker_core::event_bus::EventSink;
use tracker_core::types::{ClickDescriptor, EventType, PageContext, TrackingEvent};
use tracker_web_sdk::events::{
    CommerceRequest, ImpressionRequest, ProductViewRequest, SearchRequest,
};
use tracker_web_sdk::Tracker;

#[derive(Parser, Debug)]
#[command(name = "tracker-replay")]
#[command(about = "Replay tracking calls and print the outbound event batches")]
#[command(version)]
struct Cli {
    /// JSON-lines command script (reads stdin when omitted)
    input: Option<PathBuf>,

    /// Optional TOML config file, overridden by TRACKER__* variables
    #[arg(long, env = "TRACKER_CONFIG")]
    config: Option<String>,

    /// Storage backend: durable-a (cookie) or durable-b (local)
    #[arg(long)]
    storage_type: Option<StorageType>,

    /// Attribution window in milliseconds (overrides config)
    #[arg(long)]
    attribution_window_ms: Option<u64>,

    /// Storage key prefix (overrides config)
    #[arg(long)]
    key_prefix: Option<String>,

    /// Start with this customer id already in session
    #[arg(long, requires = "session_id")]
    customer_id: Option<String>,

    /// Session id for --customer-id
    #[arg(long)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Session {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "customerId")]
        customer_id: String,
    },
    RotateCustomer {
        #[serde(rename = "customerId")]
        customer_id: String,
    },
    EndSession,
    PageView(PageContext),
    ProductView(ProductViewRequest),
    Impressions(ImpressionRequest),
    Search(SearchRequest),
    Click(ClickDescriptor),
    AddToCart(CommerceRequest),
    Checkout(CommerceRequest),
    Purchase(CommerceRequest),
    AdvanceMs {
        ms: i64,
    },
    Flush,
}

/// Writes each batch as one JSON line on stdout.
struct StdoutSink;

impl EventSink for StdoutSink {
    fn send_batch(&self, event_type: EventType, events: Vec<TrackingEvent>) {
        let batch = serde_json::json!({
            "type": event_type.as_str(),
            "events": events,
        });
        match serde_json::to_string(&batch) {
            Ok(line) => println!("{line}"),
            Err(e) => error!(error = %e, "failed to serialize batch"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_replay=info,tracker_web_sdk=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = TrackerConfig::load_with_file(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        TrackerConfig::default()
    });

    // Apply CLI overrides
    if let Some(storage_type) = cli.storage_type {
        config.storage.storage_type = storage_type;
    }
    if let Some(window_ms) = cli.attribution_window_ms {
        config.attribution.window_ms = window_ms;
    }
    if let Some(prefix) = cli.key_prefix {
        config.attribution.key_prefix = prefix;
    }

    info!(
        storage_type = ?config.storage.storage_type,
        window_ms = config.attribution.window_ms,
        key_prefix = %config.attribution.key_prefix,
        batch_size = config.collector.batch_size,
        "Configuration loaded"
    );

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mut tracker = Tracker::from_config(&config, clock.clone(), Arc::new(StdoutSink));

    if let (Some(session_id), Some(customer_id)) = (cli.session_id, cli.customer_id) {
        tracker.session().start(session_id, customer_id);
    }

    let reader: Box<dyn AsyncBufRead + Unpin> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    let flush_every = Duration::from_millis(config.collector.flush_interval_ms.max(1));
    let mut ticker = tokio::time::interval(flush_every);
    ticker.tick().await;

    let mut line_no = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading input")? else {
                    break;
                };
                line_no += 1;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match serde_json::from_str::<Command>(line) {
                    Ok(command) => apply(&mut tracker, &clock, command),
                    Err(e) => warn!(line = line_no, error = %e, "skipping unparseable command"),
                }
            }
            _ = ticker.tick() => {
                tracker.flush();
            }
        }
    }

    let sent = tracker.flush();
    info!(lines = line_no, flushed = sent, "Replay finished");
    Ok(())
}

fn apply(tracker: &mut Tracker, clock: &ManualClock, command: Command) {
    match command {
        Command::Session {
            session_id,
            customer_id,
        } => {
            tracker.session().start(session_id, customer_id);
        }
        Command::RotateCustomer { customer_id } => tracker.session().rotate_customer(customer_id),
        Command::EndSession => tracker.session().invalidate(),
        Command::PageView(context) => tracker.track_page_view(context),
        Command::ProductView(request) => tracker.track_product_view(request),
        Command::Impressions(request) => tracker.track_impressions(request),
        Command::Search(request) => tracker.track_search(request),
        Command::Click(click) => {
            let click_id = tracker.track_click(click, None);
            info!(click_id = %click_id, "click tracked");
        }
        Command::AddToCart(request) => {
            if let Err(e) = tracker.track_add_to_cart(request) {
                warn!(error = %e, "add-to-cart not sent");
            }
        }
        Command::Checkout(request) => tracker.track_checkout(request),
        Command::Purchase(request) => tracker.track_purchase(request),
        Command::AdvanceMs { ms } => match chrono::Duration::try_milliseconds(ms) {
            Some(by) => clock.advance(by),
            None => warn!(ms, "advance_ms out of range, skipped"),
        },
        Command::Flush => {
            tracker.flush();
        }
    }
}
