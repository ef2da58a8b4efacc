//! Monitor pin changes on a Firmata board.
//!
//! Runs discovery, enables analog reporting on every analog channel and
//! digital reporting on every port, then prints events for 30 seconds.
//!
//! Without arguments the example talks to a simulated board, so it runs
//! without hardware. Pass a serial port to use a real board.
//!
//! # Usage
//!
//! ```sh
//! cargo run -p firmata --example monitor_pins
//! cargo run -p firmata --example monitor_pins -- /dev/ttyACM0
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use firmata::{FirmataBuilder, FirmataEvent};
use firmata_test_harness::SimulatedBoard;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let builder = FirmataBuilder::new()
        .discover_on_connect(true)
        .sampling_interval_ms(250);

    let board = match std::env::args().nth(1) {
        Some(port) => {
            println!("Connecting to {port}...");
            builder.serial_port(&port).build().await?
        }
        None => {
            println!("Connecting to simulated board...");
            builder
                .build_with_transport(Box::new(SimulatedBoard::new()))
                .await?
        }
    };

    let pins = board.pins().await?;
    println!("{} pins discovered\n", pins.len());

    let mut events = board.subscribe()?;

    let channels: BTreeSet<u8> = pins.iter().filter_map(|p| p.analog_channel).collect();
    for channel in &channels {
        board.report_analog(*channel, true).await?;
    }
    let ports: BTreeSet<u8> = pins.iter().map(|p| p.port()).collect();
    for port in &ports {
        board.report_digital(*port, true).await?;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(FirmataEvent::PinChanged { pin })) => {
                if let Some(p) = board.pin(pin).await? {
                    let mode = p.current_mode.map(|m| m.to_string()).unwrap_or_else(|| "-".into());
                    println!("pin {:>3}  {:<8} {}", pin, mode, p.current_value);
                }
            }
            Ok(Ok(FirmataEvent::Disconnected)) => {
                println!("Disconnected");
                break;
            }
            Ok(Ok(event)) => println!("{event:?}"),
            Ok(Err(RecvError::Lagged(n))) => println!("(missed {n} events)"),
            Ok(Err(RecvError::Closed)) => break,
            // Monitoring period elapsed.
            Err(_) => break,
        }
    }

    println!("\nMonitoring complete.");
    Ok(())
}
