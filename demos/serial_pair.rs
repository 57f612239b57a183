//! Serial Pair - two peers talking over a byte stream.
//!
//! This example demonstrates:
//! - Running the channel over any `AsyncRead + AsyncWrite` (here an
//!   in-memory duplex pipe standing in for a serial modem link)
//! - Small packet sizes, so every frame crosses the link in pieces
//! - A typed request/response exchange on top of JSON messages
//!
//! # Running
//!
//! ```text
//! RUST_LOG=turnlink=trace cargo run --example serial_pair
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use turnlink::transport::StreamTransport;
use turnlink::Peer;

/// Request sent by the initiating side.
#[derive(Serialize, Deserialize, Debug)]
struct Reading {
    sensor: String,
    celsius: f64,
}

/// Response sent back by the accepting side.
#[derive(Serialize, Deserialize, Debug)]
struct Verdict {
    sensor: String,
    alarm: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turnlink=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    let (near, far) = tokio::io::duplex(256);
    let (near_r, near_w) = tokio::io::split(near);
    let (far_r, far_w) = tokio::io::split(far);

    let (near_transport, near_inbound) = StreamTransport::from_split(near_r, near_w, 16)?;
    let (far_transport, far_inbound) = StreamTransport::from_split(far_r, far_w, 16)?;

    let station = Peer::builder().start(near_transport, near_inbound);
    let monitor = Peer::builder().start(far_transport, far_inbound);

    station.initiate()?;
    let station = station.connected().await?;
    let monitor = monitor.connected().await?;

    let replies = monitor.sender();
    monitor.on_message(move |msg: Value| match serde_json::from_value::<Reading>(msg) {
        Ok(reading) => {
            let verdict = Verdict {
                alarm: reading.celsius > 80.0,
                sensor: reading.sensor,
            };
            let _ = replies.send(&verdict);
        }
        Err(e) => eprintln!("monitor: bad reading: {}", e),
    })?;

    let mut verdicts = station.subscribe()?;
    for (sensor, celsius) in [("boiler", 92.5), ("intake", 21.0), ("exhaust", 64.2)] {
        station.send(&Reading {
            sensor: sensor.to_string(),
            celsius,
        })?;
    }

    for _ in 0..3 {
        let Some(msg) = verdicts.recv().await else {
            break;
        };
        let verdict: Verdict = serde_json::from_value(msg)?;
        println!("{:?}", verdict);
    }

    Ok(())
}
