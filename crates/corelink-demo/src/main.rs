//! Corelink demo - one host, one client, a method and a timer event.
//!
//! Builds a [`HostCore`], registers a sync-enabled `set_title` method and a
//! repeating `timer` event, connects a client over the in-process transport
//! and lets the two talk for a few seconds.

use anyhow::Result;
use clap::Parser;
use corelink::{connect_local, HostCore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "corelink-demo")]
#[command(about = "Demo wiring for the corelink bridge")]
struct Args {
    /// How many timer ticks to run before shutting down
    #[arg(short, long, default_value = "3")]
    ticks: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting corelink demo");

    // Host side: the embedding application registers its surface.
    let host = HostCore::new();
    host.set_debug(args.debug);

    host.add_method("set_title", true, |client, args| async move {
        let title = args
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("expected a title string"))?;
        info!(%client, title, "title change requested");
        Ok(json!(format!("title changed to {}", title)))
    });

    host.add_event("timer");
    {
        let host = Arc::clone(&host);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(2));
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                host.emit_event("timer", &[json!("two seconds have passed")]);
            }
        });
    }

    // Client side: call the method, watch the event.
    let client = connect_local(&host);

    let answer = client
        .exec("set_title", vec![json!("corelink demo")])
        .await?;
    info!("set_title answered: {}", answer);

    let catalogue = client.methods().await?;
    info!(
        "host exposes {} methods ({} sync-enabled)",
        catalogue.r#async.len(),
        catalogue.sync.len()
    );

    let (tick_tx, mut tick_rx) = tokio::sync::mpsc::unbounded_channel();
    client
        .on("timer", move |args| {
            let _ = tick_tx.send(args.to_vec());
        })
        .await?;

    for _ in 0..args.ticks {
        if let Some(args) = tick_rx.recv().await {
            info!("timer fired: {:?}", args);
        }
    }

    client.close().await;
    host.client_closed(client.id());
    info!("Demo finished, exiting");

    Ok(())
}
