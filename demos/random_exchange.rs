//! Random Exchange - two peers trading random numbers over a simulated air gap.
//!
//! This example demonstrates:
//! - Attaching two peers to one broadcast medium that echoes and fragments
//! - Negotiating roles with a local trigger on one side
//! - Replying from inside a message handler to keep the turns going
//!
//! # Running
//!
//! ```text
//! RUST_LOG=turnlink=debug cargo run --example random_exchange
//! ```

use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use turnlink::transport::{MediumConfig, SharedMedium};
use turnlink::{Channel, Peer};

/// Turns each side takes before falling silent.
const ROUNDS: usize = 5;

/// Answer every number with a fresh one until `ROUNDS` messages were seen.
fn start_talking(
    name: &'static str,
    channel: &Channel,
    done: mpsc::UnboundedSender<()>,
) -> turnlink::Result<()> {
    let replies = channel.sender();
    let mut seen = 0;

    channel.on_message(move |msg: Value| {
        seen += 1;
        println!("{} received: {}", name, msg);

        if seen < ROUNDS {
            let next: f64 = rand::thread_rng().gen();
            println!("{} sending: {}", name, next);
            let _ = replies.send(&next);
        } else {
            let _ = done.send(());
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turnlink=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    let medium = SharedMedium::new(MediumConfig {
        echo: true,
        fragment_size: Some(16),
    });
    let (left_station, left_inbound) = medium.attach();
    let (right_station, right_inbound) = medium.attach();

    let left = Peer::builder().start(left_station, left_inbound);
    let right = Peer::builder()
        .max_backoff(Duration::from_millis(500))
        .start(right_station, right_inbound);

    // Only one side presses "start".
    left.initiate()?;

    let left = left.connected().await?;
    let right = right.connected().await?;
    println!("left is {}, right is {}", left.role(), right.role());

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    start_talking("left", &left, done_tx.clone())?;
    start_talking("right", &right, done_tx)?;

    let first: f64 = rand::thread_rng().gen();
    println!("left sending: {}", first);
    left.send(&first)?;

    done_rx.recv().await;

    let frames = medium
        .transmissions()
        .iter()
        .filter(|t| t.payload.ends_with(b"\n"))
        .count();
    println!("{} frames exchanged", frames);

    Ok(())
}
